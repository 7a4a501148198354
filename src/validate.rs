//! Syntactic checks for untrusted profile and interface names
//!
//! Everything that ends up in a privileged argument vector passes through
//! here first. The rules are deliberately narrow: ASCII letters, digits,
//! `_` and `-`, with profiles carrying a case-sensitive `.conf` suffix.

use regex::Regex;
use std::sync::LazyLock;

const PROFILE_SUFFIX: &str = ".conf";

static PROFILE_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+\.conf$").expect("profile filename regex"));

static INTERFACE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("interface name regex"));

/// True iff `name` is a bare profile filename such as `wg0.conf`
pub fn is_valid_profile_filename(name: &str) -> bool {
    PROFILE_FILENAME.is_match(name)
}

/// True iff `name` is usable as a network interface name
pub fn is_valid_interface_name(name: &str) -> bool {
    INTERFACE_NAME.is_match(name)
}

/// Text after the last `/` of `input`, taken literally
///
/// `.` and `..` components are returned as-is rather than resolved, so they
/// fail validation downstream.
pub fn file_name(input: &str) -> Option<&str> {
    input.rsplit('/').next().filter(|name| !name.is_empty())
}

/// Derive the interface name for a profile path or name
///
/// Takes the final path component, strips one trailing `.conf` and checks
/// the remainder with [`is_valid_interface_name`]. `None` means the whole
/// operation must be rejected.
pub fn derive_interface_name(input: &str) -> Option<String> {
    let name = file_name(input)?;
    let name = name.strip_suffix(PROFILE_SUFFIX).unwrap_or(name);

    is_valid_interface_name(name).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_profile_filenames() {
        assert!(is_valid_profile_filename("a.conf"));
        assert!(is_valid_profile_filename("wg0.conf"));
        assert!(is_valid_profile_filename("home_vpn-2.conf"));
    }

    #[test]
    fn test_invalid_profile_filenames() {
        assert!(!is_valid_profile_filename("../a.conf"));
        assert!(!is_valid_profile_filename("a.conf.bak"));
        assert!(!is_valid_profile_filename("a b.conf"));
        assert!(!is_valid_profile_filename(".conf"));
        assert!(!is_valid_profile_filename(".hidden.conf"));
        assert!(!is_valid_profile_filename("wg0.CONF"));
        assert!(!is_valid_profile_filename("wg0"));
        assert!(!is_valid_profile_filename("/etc/wireguard/wg0.conf"));
        assert!(!is_valid_profile_filename("wg0.conf\n"));
        assert!(!is_valid_profile_filename("wg0;rm.conf"));
        assert!(!is_valid_profile_filename(""));
    }

    #[test]
    fn test_interface_names() {
        assert!(is_valid_interface_name("wg0"));
        assert!(is_valid_interface_name("office-vpn_1"));
        assert!(!is_valid_interface_name(""));
        assert!(!is_valid_interface_name("wg 0"));
        assert!(!is_valid_interface_name("wg0.conf"));
        assert!(!is_valid_interface_name("../wg0"));
        assert!(!is_valid_interface_name("wg0$(id)"));
    }

    #[test]
    fn test_derive_interface_name() {
        assert_eq!(
            derive_interface_name("/etc/wireguard/wg0.conf"),
            Some("wg0".to_string())
        );
        assert_eq!(derive_interface_name("wg0.conf"), Some("wg0".to_string()));
        assert_eq!(derive_interface_name("wg0"), Some("wg0".to_string()));
        assert_eq!(derive_interface_name("bad name.conf"), None);
        assert_eq!(derive_interface_name(""), None);
        assert_eq!(derive_interface_name(".conf"), None);
        assert_eq!(derive_interface_name("wg0.conf.conf"), None);
        assert_eq!(derive_interface_name("wg0.conf/."), None);
        assert_eq!(derive_interface_name("/etc/wireguard/"), None);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/etc/wireguard/wg0.conf"), Some("wg0.conf"));
        assert_eq!(file_name("wg0.conf"), Some("wg0.conf"));
        assert_eq!(file_name("../a.conf"), Some("a.conf"));
        assert_eq!(file_name("/"), None);
        assert_eq!(file_name("wg0.conf/."), Some("."));
        assert_eq!(file_name("wg0.conf/.."), Some(".."));
    }
}
