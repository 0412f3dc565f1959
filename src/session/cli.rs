//! Interactive CLI sessions
//!
//! A session spawns the hypervisor shell (`virsh --connect <address>`) and
//! talks to it over stdin/stdout, recognising its prompt. Login reacts to
//! host-key confirmation and password prompts and distinguishes rejected
//! credentials from a closed connection and from a timeout. One session
//! serves exactly one pod operation.

use crate::error::{ConnectionFailure, Error, Result};
use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

// =============================================================================
// Shell Port
// =============================================================================

/// A logged-in command shell
#[async_trait]
pub trait CommandShell: Send {
    /// Run one command and return its output without the prompt.
    ///
    /// Output starting with `error:` becomes a `PodAction` error.
    async fn run(&mut self, args: &[&str]) -> Result<String>;

    /// End the session
    async fn logout(&mut self) -> Result<()>;
}

/// Opens shells to one pod
#[async_trait]
pub trait ShellConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn CommandShell>>;
}

/// Convert shell output that reports an error into `PodAction`
pub fn check_output(args: &[&str], output: String) -> Result<String> {
    let trimmed = output.trim();
    if let Some(message) = trimmed.strip_prefix("error:") {
        let message = message
            .lines()
            .map(|l| l.trim_start_matches("error:").trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::pod_action(args.join(" "), message));
    }
    Ok(trimmed.to_string())
}

// =============================================================================
// Prompt Recognition
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prompt {
    HostKey,
    Password,
    Shell,
    Denied,
    Closed,
}

struct Prompts {
    patterns: Vec<(Prompt, Regex)>,
}

impl Prompts {
    fn new(shell_prompt: &str) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Internal(format!("bad prompt pattern: {}", e)))
        };
        Ok(Self {
            patterns: vec![
                (
                    Prompt::HostKey,
                    compile(r"(?i)are you sure you want to continue connecting")?,
                ),
                (
                    Prompt::Password,
                    compile(r"(?i)(?:password)|(?:passphrase for key)")?,
                ),
                (Prompt::Shell, compile(&regex::escape(shell_prompt))?),
                (Prompt::Denied, compile(r"(?i)permission denied")?),
                (Prompt::Closed, compile(r"(?i)connection closed by remote host")?),
            ],
        })
    }

    /// Earliest match in `text` among the wanted prompts
    fn earliest(&self, text: &str, wanted: &[Prompt]) -> Option<(Prompt, usize, usize)> {
        self.patterns
            .iter()
            .filter(|(prompt, _)| wanted.contains(prompt))
            .filter_map(|(prompt, re)| re.find(text).map(|m| (*prompt, m.start(), m.end())))
            .min_by_key(|(_, start, _)| *start)
    }
}

/// Incremental UTF-8 decoding of output read in fixed-size chunks.
///
/// A character split across two reads is held back until its remaining
/// bytes arrive. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8], into: &mut String) {
        self.pending.extend_from_slice(bytes);
        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    into.push_str(text);
                    start = self.pending.len();
                }
                Err(err) => {
                    let valid = start + err.valid_up_to();
                    into.push_str(std::str::from_utf8(&self.pending[start..valid]).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            into.push(char::REPLACEMENT_CHARACTER);
                            start = valid + len;
                        }
                        // incomplete trailing character
                        None => {
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
    }

    /// Flush bytes still held back once the stream has ended
    fn finish(&mut self, into: &mut String) {
        if !self.pending.is_empty() {
            into.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }
}

// =============================================================================
// Prompt Session
// =============================================================================

/// Settings for spawning a prompt session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub program: String,
    pub address: String,
    pub password: Option<String>,
    pub prompt: String,
    pub timeout: Duration,
}

impl SessionSettings {
    pub fn virsh(address: &str, password: Option<&str>, timeout: Duration) -> Self {
        Self {
            program: "virsh".into(),
            address: address.into(),
            password: password.map(str::to_string),
            prompt: "virsh #".into(),
            timeout,
        }
    }
}

/// Interactive session over a child process
pub struct PromptSession {
    endpoint: String,
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    stderr_closed: bool,
    stdout_text: Utf8Decoder,
    stderr_text: Utf8Decoder,
    buffer: String,
    timeout: Duration,
    prompts: Prompts,
}

impl PromptSession {
    /// Spawn the shell and log in
    pub async fn login(settings: &SessionSettings) -> Result<Self> {
        let mut child = Command::new(&settings.program)
            .arg("--connect")
            .arg(&settings.address)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                warn!("Failed to spawn {}: {}", settings.program, e);
                Error::Connection {
                    endpoint: settings.address.clone(),
                    failure: ConnectionFailure::Unreachable,
                }
            })?;

        let missing = || Error::Internal("child process pipes unavailable".into());
        let stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;
        let stderr = child.stderr.take().ok_or_else(missing)?;

        let mut session = Self {
            endpoint: settings.address.clone(),
            child,
            stdin,
            stdout,
            stderr,
            stderr_closed: false,
            stdout_text: Utf8Decoder::default(),
            stderr_text: Utf8Decoder::default(),
            buffer: String::new(),
            timeout: settings.timeout,
            prompts: Prompts::new(&settings.prompt)?,
        };
        session.handshake(settings.password.as_deref()).await?;
        debug!("Logged in to {}", session.endpoint);
        Ok(session)
    }

    async fn handshake(&mut self, password: Option<&str>) -> Result<()> {
        let mut password_sent = false;
        loop {
            let wanted = [
                Prompt::HostKey,
                Prompt::Password,
                Prompt::Shell,
                Prompt::Denied,
                Prompt::Closed,
            ];
            let (prompt, _) = self.expect(&wanted).await?;
            match prompt {
                Prompt::HostKey => self.send_line("yes").await?,
                Prompt::Password => match password {
                    Some(_) if password_sent => {
                        return Err(self.rejected("password not accepted"));
                    }
                    Some(password) => {
                        password_sent = true;
                        self.send_line(password).await?;
                    }
                    None => return Err(self.rejected("password required but none configured")),
                },
                Prompt::Shell => return Ok(()),
                Prompt::Denied => return Err(self.rejected("permission denied")),
                Prompt::Closed => {
                    return Err(Error::Connection {
                        endpoint: self.endpoint.clone(),
                        failure: ConnectionFailure::ClosedByRemote,
                    })
                }
            }
        }
    }

    fn rejected(&self, reason: &str) -> Error {
        Error::Authentication {
            endpoint: self.endpoint.clone(),
            reason: reason.to_string(),
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Read until one of `wanted` matches; returns the prompt and the text
    /// preceding it
    async fn expect(&mut self, wanted: &[Prompt]) -> Result<(Prompt, String)> {
        loop {
            if let Some((prompt, start, end)) = self.prompts.earliest(&self.buffer, wanted) {
                let before = self.buffer[..start].to_string();
                self.buffer.drain(..end);
                return Ok((prompt, before));
            }

            let read = tokio::time::timeout(self.timeout, self.read_chunk())
                .await
                .map_err(|_| Error::Connection {
                    endpoint: self.endpoint.clone(),
                    failure: ConnectionFailure::Timeout,
                })??;
            if read == 0 {
                return Err(Error::Connection {
                    endpoint: self.endpoint.clone(),
                    failure: ConnectionFailure::Eof,
                });
            }
        }
    }

    /// Read whatever arrives first on stdout or stderr. Zero means stdout
    /// reached end of stream.
    async fn read_chunk(&mut self) -> Result<usize> {
        enum Source {
            Out(usize),
            Err(usize),
        }

        let mut out = [0u8; 4096];
        let mut err = [0u8; 1024];
        loop {
            let source = tokio::select! {
                n = self.stdout.read(&mut out) => Source::Out(n?),
                n = self.stderr.read(&mut err), if !self.stderr_closed => Source::Err(n?),
            };
            match source {
                Source::Out(0) => {
                    self.stdout_text.finish(&mut self.buffer);
                    return Ok(0);
                }
                Source::Out(n) => {
                    self.stdout_text.decode(&out[..n], &mut self.buffer);
                    return Ok(n);
                }
                Source::Err(0) => {
                    self.stderr_text.finish(&mut self.buffer);
                    self.stderr_closed = true;
                }
                Source::Err(n) => {
                    self.stderr_text.decode(&err[..n], &mut self.buffer);
                    return Ok(n);
                }
            }
        }
    }
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('\'') {
        format!("'{}'", arg.replace('\'', "\\'"))
    } else {
        arg.to_string()
    }
}

#[async_trait]
impl CommandShell for PromptSession {
    async fn run(&mut self, args: &[&str]) -> Result<String> {
        let line = args.iter().map(|a| quote(a)).collect::<Vec<_>>().join(" ");
        debug!("{} <- {}", self.endpoint, line);
        self.send_line(&line).await?;
        let (_, output) = self.expect(&[Prompt::Shell]).await?;

        // Drop an echoed command line
        let output = match output.split_once('\n') {
            Some((first, rest)) if first.trim() == line => rest.to_string(),
            _ => output,
        };
        check_output(args, output)
    }

    async fn logout(&mut self) -> Result<()> {
        let _ = self.send_line("quit").await;
        match tokio::time::timeout(self.timeout, self.child.wait()).await {
            Ok(status) => {
                debug!("Session to {} ended: {:?}", self.endpoint, status?);
            }
            Err(_) => {
                warn!("Session to {} did not exit; killing", self.endpoint);
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

/// Connector that spawns a [`PromptSession`] per operation
#[derive(Debug, Clone)]
pub struct PromptConnector {
    settings: SessionSettings,
}

impl PromptConnector {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ShellConnector for PromptConnector {
    async fn connect(&self) -> Result<Box<dyn CommandShell>> {
        let session = PromptSession::login(&self.settings).await?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_multibyte_character_split_across_reads() {
        let text = "Name: vm-é中\nvirsh # ";
        let bytes = text.as_bytes();
        // split inside the two-byte and inside the three-byte character
        let e = text.find('é').unwrap() + 1;
        let zh = text.find('中').unwrap() + 2;

        let mut decoder = Utf8Decoder::default();
        let mut out = String::new();
        decoder.decode(&bytes[..e], &mut out);
        assert_eq!(out, "Name: vm-");
        decoder.decode(&bytes[e..zh], &mut out);
        assert_eq!(out, "Name: vm-é");
        decoder.decode(&bytes[zh..], &mut out);
        assert_eq!(out, text);
        assert!(!out.contains(char::REPLACEMENT_CHARACTER));
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8Decoder::default();
        let mut out = String::new();
        decoder.decode(b"ok \xff done", &mut out);
        assert_eq!(out, "ok \u{fffd} done");

        decoder.decode(&[b'x', 0xe4, 0xb8], &mut out);
        decoder.finish(&mut out);
        assert_eq!(out, "ok \u{fffd} donex\u{fffd}");
    }

    #[test]
    fn test_check_output_error() {
        let err = check_output(
            &["domstate", "missing"],
            "error: failed to get domain 'missing'\n".into(),
        )
        .unwrap_err();
        assert_matches!(
            err,
            Error::PodAction { action, message }
                if action == "domstate missing" && message == "failed to get domain 'missing'"
        );
    }

    #[test]
    fn test_check_output_trims() {
        assert_eq!(
            check_output(&["domstate", "vm"], "\n running \n\n".into()).unwrap(),
            "running"
        );
    }

    #[test]
    fn test_prompts_pick_earliest_match() {
        let prompts = Prompts::new("virsh #").unwrap();
        let all = [Prompt::Password, Prompt::Shell, Prompt::Denied];
        assert_eq!(
            prompts.earliest("Permission denied, please try again.\nvirsh # ", &all).map(|m| m.0),
            Some(Prompt::Denied)
        );
        assert_eq!(
            prompts.earliest("user@host's Password: ", &all).map(|m| m.0),
            Some(Prompt::Password)
        );
        assert_eq!(
            prompts.earliest("Welcome\nvirsh # ", &all).map(|m| (m.0, m.1)),
            Some((Prompt::Shell, 8))
        );
        assert!(prompts.earliest("nothing yet", &all).is_none());
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("dominfo"), "dominfo");
        assert_eq!(quote("my vm"), "'my vm'");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_unreachable() {
        let settings = SessionSettings {
            program: "/nonexistent/virsh".into(),
            address: "qemu+ssh://nowhere/system".into(),
            password: None,
            prompt: "virsh #".into(),
            timeout: Duration::from_secs(1),
        };
        let err = PromptSession::login(&settings).await.err().unwrap();
        assert_matches!(
            err,
            Error::Connection { failure: ConnectionFailure::Unreachable, .. }
        );
    }
}
