//! Vendor architecture string mapping
//!
//! Hypervisors and management controllers report architectures in their own
//! vocabulary (`x86_64`, `x86-64`, `ppc64le`, ...). Machines are only
//! surfaced with a canonical debian-style identifier; strings missing from
//! the table are rejected rather than passed through.

use crate::error::{Error, Result};

/// Fixed vendor-to-canonical lookup table
const ARCHITECTURES: &[(&str, &str)] = &[
    ("x86_64", "amd64/generic"),
    ("x86-64", "amd64/generic"),
    ("x86", "amd64/generic"),
    ("amd64", "amd64/generic"),
    ("i686", "i386/generic"),
    ("i386", "i386/generic"),
    ("aarch64", "arm64/generic"),
    ("arm64", "arm64/generic"),
    ("armv7l", "armhf/generic"),
    ("ppc64", "ppc64el/generic"),
    ("ppc64le", "ppc64el/generic"),
    ("s390x", "s390x/generic"),
];

/// Map a vendor architecture string to its canonical identifier
pub fn canonical(vendor: &str) -> Option<&'static str> {
    let vendor = vendor.trim();
    ARCHITECTURES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(vendor))
        .map(|(_, canonical)| *canonical)
}

/// Like [`canonical`], but an unknown string is an error
pub fn require_canonical(vendor: &str) -> Result<String> {
    canonical(vendor)
        .map(str::to_string)
        .ok_or_else(|| Error::UnsupportedArchitecture {
            architecture: vendor.to_string(),
        })
}

/// Map a canonical identifier back to the libvirt architecture name
pub fn libvirt_arch(canonical: &str) -> Option<&'static str> {
    match canonical {
        "amd64/generic" => Some("x86_64"),
        "i386/generic" => Some("i686"),
        "arm64/generic" => Some("aarch64"),
        "armhf/generic" => Some("armv7l"),
        "ppc64el/generic" => Some("ppc64le"),
        "s390x/generic" => Some("s390x"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_known_architectures() {
        assert_eq!(canonical("x86_64"), Some("amd64/generic"));
        assert_eq!(canonical("x86-64"), Some("amd64/generic"));
        assert_eq!(canonical("ppc64le"), Some("ppc64el/generic"));
        assert_eq!(canonical("ppc64"), Some("ppc64el/generic"));
        assert_eq!(canonical("i686"), Some("i386/generic"));
        assert_eq!(canonical("X86-64"), Some("amd64/generic"));
    }

    #[test]
    fn test_mapping_is_deterministic() {
        for (vendor, _) in ARCHITECTURES {
            assert_eq!(canonical(vendor), canonical(vendor));
        }
    }

    #[test]
    fn test_unknown_architecture_is_rejected() {
        assert_eq!(canonical("mips64"), None);
        assert_matches!(
            require_canonical("sparc"),
            Err(Error::UnsupportedArchitecture { architecture }) if architecture == "sparc"
        );
    }

    #[test]
    fn test_libvirt_round_trip() {
        for canonical_name in ["amd64/generic", "arm64/generic", "ppc64el/generic"] {
            let arch = libvirt_arch(canonical_name).unwrap();
            assert_eq!(canonical(arch), Some(canonical_name));
        }
    }
}
