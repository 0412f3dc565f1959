//! Network interface normalisation

use crate::domain::NetworkInterface;

/// Tags describing an interface's link speed in Mbps
pub fn speed_tags(speed_mbps: u64) -> Vec<String> {
    match speed_mbps {
        0 => Vec::new(),
        s if s < 1000 => vec![format!("e{}", s)],
        1000 => vec!["1g".to_string(), "e1000".to_string()],
        s if s % 1000 == 0 => vec![format!("{}g", s / 1000)],
        s => vec![format!("{:.1}g", s as f64 / 1000.0)],
    }
}

/// Mark exactly one interface as the boot interface.
///
/// The first interface matching `preferred` wins; otherwise the first
/// interface is promoted. Any other boot flags are cleared.
pub fn mark_boot_interface<F>(interfaces: &mut [NetworkInterface], preferred: F)
where
    F: Fn(&NetworkInterface) -> bool,
{
    let boot_index = interfaces.iter().position(|i| preferred(i)).unwrap_or(0);
    for (index, interface) in interfaces.iter_mut().enumerate() {
        interface.boot = index == boot_index;
    }
}
