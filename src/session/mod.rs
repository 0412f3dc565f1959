//! Connection/Session Manager
//!
//! Authenticated handles to one pod, scoped to a single operation:
//! - Interactive CLI sessions with prompt recognition
//! - Per-request authenticated Redfish HTTP calls

pub mod cli;
pub mod http;

pub use cli::{check_output, CommandShell, PromptConnector, PromptSession, SessionSettings, ShellConnector};
pub use http::{
    base_url, member_paths, odata_path, HttpMethod, HttpSettings, HttpTransport, RedfishClient,
    RedfishResponse, RedfishTransport, RedfishTransportRef,
};
