//! Domain definitions
//!
//! XML documents handed to `define` and `attach-device`, and the boot order
//! rewrite applied to existing definitions.

use super::parsers::DomainCapabilities;
use crate::error::{Error, Result};
use crate::inventory::XmlElement;

/// Boot devices in the order a composed machine must try them
pub const BOOT_ORDER: &[&str] = &["network", "hd"];

/// Inputs for a new domain
#[derive(Debug, Clone)]
pub struct DomainSpec<'a> {
    pub name: &'a str,
    pub uuid: &'a str,
    /// MiB
    pub memory: u64,
    pub vcpus: u64,
    /// Libvirt architecture name (`x86_64`, `aarch64`, ...)
    pub arch: &'a str,
    pub emulator: &'a DomainCapabilities,
}

fn empty(name: &str) -> XmlElement {
    XmlElement::new(name)
}

fn boot_elements() -> impl Iterator<Item = XmlElement> {
    BOOT_ORDER
        .iter()
        .map(|dev| empty("boot").with_attr("dev", *dev))
}

/// Domain XML for `define`. Devices other than the console are attached
/// afterwards.
pub fn domain_xml(spec: &DomainSpec<'_>) -> String {
    let mut os = empty("os").with_child(
        empty("type")
            .with_attr("arch", spec.arch)
            .with_text("hvm"),
    );
    if spec.arch == "aarch64" {
        if let Some(t) = os.child_mut("type") {
            t.set_attr("machine", "virt");
        }
        os = os.with_child(
            empty("loader")
                .with_attr("readonly", "yes")
                .with_attr("type", "pflash")
                .with_text("/usr/share/AAVMF/AAVMF_CODE.fd"),
        );
    }
    for boot in boot_elements() {
        os = os.with_child(boot);
    }

    let devices = empty("devices")
        .with_child(empty("emulator").with_text(spec.emulator.emulator.clone()))
        .with_child(
            empty("serial")
                .with_attr("type", "pty")
                .with_child(empty("target").with_attr("port", "0")),
        )
        .with_child(
            empty("console")
                .with_attr("type", "pty")
                .with_child(
                    empty("target")
                        .with_attr("type", "serial")
                        .with_attr("port", "0"),
                ),
        );

    empty("domain")
        .with_attr("type", spec.emulator.domain_type.clone())
        .with_child(empty("name").with_text(spec.name))
        .with_child(empty("uuid").with_text(spec.uuid))
        .with_child(
            empty("memory")
                .with_attr("unit", "MiB")
                .with_text(spec.memory.to_string()),
        )
        .with_child(empty("vcpu").with_text(spec.vcpus.to_string()))
        .with_child(os)
        .with_child(empty("features").with_child(empty("acpi")).with_child(empty("apic")))
        .with_child(empty("clock").with_attr("offset", "utc"))
        .with_child(empty("on_poweroff").with_text("destroy"))
        .with_child(empty("on_reboot").with_text("restart"))
        .with_child(empty("on_crash").with_text("restart"))
        .with_child(devices)
        .to_xml()
}

/// `direct` interface in bridge mode for `attach-device`
pub fn macvlan_interface_xml(host_interface: &str) -> String {
    empty("interface")
        .with_attr("type", "direct")
        .with_child(
            empty("source")
                .with_attr("dev", host_interface)
                .with_attr("mode", "bridge"),
        )
        .with_child(empty("model").with_attr("type", "virtio"))
        .to_xml()
}

/// Rewrite a definition so it boots from the network before disk.
///
/// Returns `None` when the order is already correct.
pub fn with_network_boot(xml: &str) -> Result<Option<String>> {
    let mut domain = XmlElement::parse(xml)?;
    let os = domain
        .child_mut("os")
        .ok_or_else(|| Error::Xml("domain definition has no <os> element".into()))?;

    let current: Vec<&str> = os
        .children("boot")
        .filter_map(|b| b.attr("dev"))
        .collect();
    if current == BOOT_ORDER {
        return Ok(None);
    }

    os.children.retain(|c| c.name != "boot");
    let insert_at = os
        .children
        .iter()
        .position(|c| c.name == "type")
        .map(|p| p + 1)
        .unwrap_or(0);
    for (offset, boot) in boot_elements().enumerate() {
        os.children.insert(insert_at + offset, boot);
    }
    Ok(Some(domain.to_xml()))
}
