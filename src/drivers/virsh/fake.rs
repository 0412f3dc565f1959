//! In-memory virsh host for tests
//!
//! Speaks the command surface the driver uses and keeps pools, volumes,
//! networks and domains as mutable state, so compose and rollback effects
//! show up in a following discovery.

use crate::error::Result;
use crate::inventory::{XmlElement, GIB};
use crate::session::{check_output, CommandShell, ShellConnector};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct FakePool {
    pub name: String,
    pub uuid: String,
    pub pool_type: String,
    pub path: String,
    pub capacity: u64,
    pub available: u64,
}

#[derive(Debug, Clone)]
pub struct FakeNetwork {
    pub name: String,
    pub bridge: String,
    pub dhcp: bool,
}

#[derive(Debug, Clone)]
pub struct FakeVolume {
    pub pool: String,
    pub name: String,
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct FakeDomain {
    pub name: String,
    pub arch: String,
    pub vcpus: u64,
    pub memory_mib: u64,
    pub state: String,
    /// (target, source path)
    pub disks: Vec<(String, String)>,
    /// (mac, libvirt type, source)
    pub interfaces: Vec<(String, String, String)>,
    pub boot: Vec<String>,
    pub autostart: bool,
}

impl FakeDomain {
    pub fn new(name: &str, vcpus: u64, memory_mib: u64) -> Self {
        Self {
            name: name.into(),
            arch: "x86_64".into(),
            vcpus,
            memory_mib,
            state: "shut off".into(),
            disks: Vec::new(),
            interfaces: Vec::new(),
            boot: vec!["hd".into()],
            autostart: false,
        }
    }

    fn to_xml(&self) -> String {
        let mut os = XmlElement::new("os").with_child(
            XmlElement::new("type")
                .with_attr("arch", self.arch.clone())
                .with_text("hvm"),
        );
        for dev in &self.boot {
            os = os.with_child(XmlElement::new("boot").with_attr("dev", dev.clone()));
        }
        let mut devices = XmlElement::new("devices");
        for (target, source) in &self.disks {
            let block = source.starts_with("/dev/");
            devices = devices.with_child(
                XmlElement::new("disk")
                    .with_attr("type", if block { "block" } else { "file" })
                    .with_attr("device", "disk")
                    .with_child(
                        XmlElement::new("source")
                            .with_attr(if block { "dev" } else { "file" }, source.clone()),
                    )
                    .with_child(
                        XmlElement::new("target")
                            .with_attr("dev", target.clone())
                            .with_attr("bus", "virtio"),
                    ),
            );
        }
        for (mac, kind, source) in &self.interfaces {
            let key = match kind.as_str() {
                "network" => "network",
                "bridge" => "bridge",
                _ => "dev",
            };
            devices = devices.with_child(
                XmlElement::new("interface")
                    .with_attr("type", kind.clone())
                    .with_child(XmlElement::new("mac").with_attr("address", mac.clone()))
                    .with_child(XmlElement::new("source").with_attr(key, source.clone())),
            );
        }
        XmlElement::new("domain")
            .with_attr("type", "kvm")
            .with_child(XmlElement::new("name").with_text(self.name.clone()))
            .with_child(os)
            .with_child(devices)
            .to_xml()
    }
}

/// Mutable host state
#[derive(Debug, Clone)]
pub struct FakeHost {
    pub arch: String,
    pub cpus: u64,
    pub cpu_speed: u64,
    pub memory_kib: u64,
    pub pools: Vec<FakePool>,
    pub networks: Vec<FakeNetwork>,
    pub volumes: Vec<FakeVolume>,
    pub domains: BTreeMap<String, FakeDomain>,
    /// Command names that fail with an injected error
    pub failing: Vec<String>,
    /// Every command received
    pub log: Vec<String>,
    pub logins: usize,
    pub logouts: usize,
    macs: u32,
}

impl FakeHost {
    /// 8 threads, 16 GiB, one `default` dir pool with `available_gib` free
    pub fn new(available_gib: u64) -> Self {
        Self {
            arch: "x86_64".into(),
            cpus: 8,
            cpu_speed: 2400,
            memory_kib: 16 * 1024 * 1024,
            pools: vec![FakePool {
                name: "default".into(),
                uuid: "59edc0cb-4635-449a-80e2-2c8a59afa327".into(),
                pool_type: "dir".into(),
                path: "/var/lib/libvirt/images".into(),
                capacity: 200 * GIB,
                available: available_gib * GIB,
            }],
            networks: Vec::new(),
            volumes: Vec::new(),
            domains: BTreeMap::new(),
            failing: Vec::new(),
            log: Vec::new(),
            logins: 0,
            logouts: 0,
            macs: 0,
        }
    }

    pub fn with_network(mut self, name: &str, bridge: &str, dhcp: bool) -> Self {
        self.networks.push(FakeNetwork {
            name: name.into(),
            bridge: bridge.into(),
            dhcp,
        });
        self
    }

    pub fn with_domain(mut self, domain: FakeDomain) -> Self {
        self.domains.insert(domain.name.clone(), domain);
        self
    }

    pub fn failing_on(mut self, command: &str) -> Self {
        self.failing.push(command.into());
        self
    }

    pub fn pool(&self, name: &str) -> Option<&FakePool> {
        self.pools.iter().find(|p| p.name == name)
    }

    pub fn commands(&self, name: &str) -> usize {
        self.log
            .iter()
            .filter(|l| l.split_whitespace().next() == Some(name))
            .count()
    }

    fn next_mac(&mut self) -> String {
        self.macs += 1;
        format!("52:54:00:00:00:{:02x}", self.macs)
    }

    fn domain_mut(&mut self, name: &str) -> std::result::Result<&mut FakeDomain, String> {
        self.domains
            .get_mut(name)
            .ok_or_else(|| format!("error: failed to get domain '{}'", name))
    }

    fn volume_size(&self, path: &str) -> u64 {
        self.volumes
            .iter()
            .find(|v| v.path == path)
            .map(|v| v.size)
            .unwrap_or(10 * GIB)
    }

    fn remove_volume(&mut self, path: &str) {
        if let Some(pos) = self.volumes.iter().position(|v| v.path == path) {
            let volume = self.volumes.remove(pos);
            if let Some(pool) = self.pools.iter_mut().find(|p| p.name == volume.pool) {
                pool.available += volume.size;
            }
        }
    }

    /// Execute one command; `Err` carries virsh-style error output
    fn execute(&mut self, args: &[&str]) -> std::result::Result<String, String> {
        let command = args.first().copied().unwrap_or_default();
        if self.failing.iter().any(|f| f == command) {
            return Err(format!("error: injected failure in {}", command));
        }
        let arg = |i: usize| args.get(i).copied().unwrap_or_default().to_string();

        match command {
            "nodeinfo" => Ok(format!(
                "CPU model:           {}\nCPU(s):              {}\nCPU frequency:       {} MHz\nMemory size:         {} KiB\n",
                self.arch, self.cpus, self.cpu_speed, self.memory_kib
            )),
            "pool-list" => Ok(self
                .pools
                .iter()
                .map(|p| p.name.clone())
                .collect::<Vec<_>>()
                .join("\n")),
            "pool-dumpxml" => {
                let pool = self
                    .pool(&arg(1))
                    .ok_or_else(|| format!("error: failed to get pool '{}'", arg(1)))?;
                Ok(XmlElement::new("pool")
                    .with_attr("type", pool.pool_type.clone())
                    .with_child(XmlElement::new("name").with_text(pool.name.clone()))
                    .with_child(XmlElement::new("uuid").with_text(pool.uuid.clone()))
                    .with_child(XmlElement::new("capacity").with_text(pool.capacity.to_string()))
                    .with_child(XmlElement::new("available").with_text(pool.available.to_string()))
                    .with_child(
                        XmlElement::new("target")
                            .with_child(XmlElement::new("path").with_text(pool.path.clone())),
                    )
                    .to_xml())
            }
            "net-list" => Ok(self
                .networks
                .iter()
                .map(|n| n.name.clone())
                .collect::<Vec<_>>()
                .join("\n")),
            "net-dumpxml" => {
                let network = self
                    .networks
                    .iter()
                    .find(|n| n.name == arg(1))
                    .ok_or_else(|| format!("error: failed to get network '{}'", arg(1)))?;
                let mut ip = XmlElement::new("ip").with_attr("address", "10.0.0.1");
                if network.dhcp {
                    ip = ip.with_child(XmlElement::new("dhcp"));
                }
                Ok(XmlElement::new("network")
                    .with_child(XmlElement::new("name").with_text(network.name.clone()))
                    .with_child(XmlElement::new("bridge").with_attr("name", network.bridge.clone()))
                    .with_child(ip)
                    .to_xml())
            }
            "list" => Ok(self.domains.keys().cloned().collect::<Vec<_>>().join("\n")),
            "dominfo" => {
                let domain = self.domain_mut(&arg(1))?;
                Ok(format!(
                    "Name:           {}\nState:          {}\nCPU(s):         {}\nMax memory:     {} KiB\n",
                    domain.name,
                    domain.state,
                    domain.vcpus,
                    domain.memory_mib * 1024
                ))
            }
            "domstate" => Ok(self.domain_mut(&arg(1))?.state.clone()),
            "dumpxml" => Ok(self.domain_mut(&arg(1))?.to_xml()),
            "domblkinfo" => {
                let target = arg(2);
                let source = self
                    .domain_mut(&arg(1))?
                    .disks
                    .iter()
                    .find(|(t, _)| *t == target)
                    .map(|(_, s)| s.clone())
                    .ok_or_else(|| format!("error: invalid argument: invalid path {}", target))?;
                Ok(format!("Capacity:       {}\n", self.volume_size(&source)))
            }
            "domcapabilities" => Ok("<domainCapabilities><path>/usr/bin/qemu-system-x86_64</path><domain>kvm</domain></domainCapabilities>".into()),
            "vol-create-as" => {
                let (pool_name, name) = (arg(1), arg(2));
                let size: u64 = arg(3).parse().map_err(|_| "error: bad size".to_string())?;
                let pool = self
                    .pools
                    .iter_mut()
                    .find(|p| p.name == pool_name)
                    .ok_or_else(|| format!("error: failed to get pool '{}'", pool_name))?;
                if pool.available < size {
                    return Err("error: Not enough space in pool".into());
                }
                pool.available -= size;
                let path = format!("{}/{}", pool.path, name);
                self.volumes.push(FakeVolume {
                    pool: pool_name,
                    name: name.clone(),
                    path,
                    size,
                });
                Ok(format!("Vol {} created", name))
            }
            "vol-path" => self
                .volumes
                .iter()
                .find(|v| v.name == arg(1))
                .map(|v| v.path.clone())
                .ok_or_else(|| format!("error: failed to get vol '{}'", arg(1))),
            "vol-delete" => {
                let path = self
                    .volumes
                    .iter()
                    .find(|v| v.name == arg(1))
                    .map(|v| v.path.clone())
                    .ok_or_else(|| format!("error: failed to get vol '{}'", arg(1)))?;
                self.remove_volume(&path);
                Ok(format!("Vol {} deleted", arg(1)))
            }
            "define" => {
                let xml = std::fs::read_to_string(arg(1)).map_err(|e| format!("error: {}", e))?;
                let root = XmlElement::parse(&xml).map_err(|e| format!("error: {}", e))?;
                let name = root.text_at("name").unwrap_or_default().to_string();
                let boot = root
                    .find_all("os/boot")
                    .into_iter()
                    .filter_map(|b| b.attr("dev"))
                    .map(str::to_string)
                    .collect();
                match self.domains.get_mut(&name) {
                    Some(existing) => existing.boot = boot,
                    None => {
                        let mut domain = FakeDomain::new(
                            &name,
                            root.text_at("vcpu").and_then(|v| v.parse().ok()).unwrap_or(1),
                            root.text_at("memory").and_then(|v| v.parse().ok()).unwrap_or(1024),
                        );
                        domain.arch = root
                            .find("os/type")
                            .and_then(|t| t.attr("arch"))
                            .unwrap_or("x86_64")
                            .to_string();
                        domain.boot = boot;
                        self.domains.insert(name.clone(), domain);
                    }
                }
                Ok(format!("Domain {} defined from {}", name, arg(1)))
            }
            "attach-interface" => {
                let mac = self.next_mac();
                let (kind, source) = (arg(2), arg(3));
                self.domain_mut(&arg(1))?.interfaces.push((mac, kind, source));
                Ok("Interface attached successfully".into())
            }
            "attach-device" => {
                let xml = std::fs::read_to_string(arg(2)).map_err(|e| format!("error: {}", e))?;
                let root = XmlElement::parse(&xml).map_err(|e| format!("error: {}", e))?;
                let source = root
                    .find("source")
                    .and_then(|s| s.attr("dev"))
                    .unwrap_or_default()
                    .to_string();
                let mac = self.next_mac();
                self.domain_mut(&arg(1))?
                    .interfaces
                    .push((mac, "direct".into(), source));
                Ok("Device attached successfully".into())
            }
            "attach-disk" => {
                let (path, target) = (arg(2), arg(3));
                self.domain_mut(&arg(1))?.disks.push((target, path));
                Ok("Disk attached successfully".into())
            }
            "start" => {
                let domain = self.domain_mut(&arg(1))?;
                if domain.state != "shut off" {
                    return Err("error: Requested operation is not valid: domain is already active".into());
                }
                domain.state = if args.contains(&"--paused") { "paused" } else { "running" }.into();
                Ok(format!("Domain {} started", arg(1)))
            }
            "destroy" => {
                let domain = self.domain_mut(&arg(1))?;
                if domain.state == "shut off" {
                    return Err("error: Requested operation is not valid: domain is not running".into());
                }
                domain.state = "shut off".into();
                Ok(format!("Domain {} destroyed", arg(1)))
            }
            "autostart" => {
                self.domain_mut(&arg(1))?.autostart = true;
                Ok(format!("Domain {} marked as autostarted", arg(1)))
            }
            "undefine" => {
                let domain = self
                    .domains
                    .remove(&arg(1))
                    .ok_or_else(|| format!("error: failed to get domain '{}'", arg(1)))?;
                if args.contains(&"--remove-all-storage") {
                    for (_, source) in &domain.disks {
                        self.remove_volume(source);
                    }
                }
                Ok(format!("Domain {} has been undefined", arg(1)))
            }
            other => Err(format!("error: unknown command: '{}'", other)),
        }
    }
}

/// Shell over a shared [`FakeHost`]
pub struct FakeShell {
    host: Arc<Mutex<FakeHost>>,
}

#[async_trait]
impl CommandShell for FakeShell {
    async fn run(&mut self, args: &[&str]) -> Result<String> {
        let output = {
            let mut host = self.host.lock();
            host.log.push(args.join(" "));
            host.execute(args).unwrap_or_else(|err| err)
        };
        check_output(args, output)
    }

    async fn logout(&mut self) -> Result<()> {
        self.host.lock().logouts += 1;
        Ok(())
    }
}

/// Connector handing out shells on one shared host
#[derive(Clone)]
pub struct FakeConnector {
    pub host: Arc<Mutex<FakeHost>>,
}

impl FakeConnector {
    pub fn new(host: FakeHost) -> Self {
        Self {
            host: Arc::new(Mutex::new(host)),
        }
    }
}

#[async_trait]
impl ShellConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn CommandShell>> {
        self.host.lock().logins += 1;
        Ok(Box::new(FakeShell {
            host: Arc::clone(&self.host),
        }))
    }
}
