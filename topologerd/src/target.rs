//! Traceroute target validation.
//!
//! A target is accepted only if it is an IPv4 literal, an IPv6 literal or a
//! domain name. Anything else is rejected before a process is started.

use std::fmt;
use std::net::Ipv6Addr;
use once_cell::sync::Lazy;
use regex::Regex;
use crate::error::TraceError;

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)*[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$")
        .expect("domain pattern is valid")
});

/// Characters removed from a target before it is placed on a command line.
const SHELL_META: &[char] = &[';', '&', '|', '`', '$', '(', ')'];

const MAX_DOMAIN_LEN: usize = 253;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Ipv4,
    Ipv6,
    Domain,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::Ipv4 => "ipv4",
            TargetKind::Ipv6 => "ipv6",
            TargetKind::Domain => "domain",
        };
        f.write_str(name)
    }
}

/// Classify `input`. `None` means the target is unknown and must be rejected.
pub fn classify(input: &str) -> Option<TargetKind> {
    if is_ipv4(input) {
        Some(TargetKind::Ipv4)
    } else if is_ipv6(input) {
        Some(TargetKind::Ipv6)
    } else if is_domain(input) {
        Some(TargetKind::Domain)
    } else {
        None
    }
}

/// Validate a raw request target, returning its kind.
pub fn validate(input: &str) -> Result<TargetKind, TraceError> {
    if input.is_empty() {
        return Err(TraceError::MissingTarget);
    }
    classify(input).ok_or_else(|| TraceError::InvalidTarget(input.to_string()))
}

/// Strip shell metacharacters. Applied to every target, validated or not.
pub fn sanitize(target: &str) -> String {
    target.chars().filter(|c| !SHELL_META.contains(c)).collect()
}

/// Four decimal octets of 1-3 digits, each at most 255.
/// Leading zeros are read as plain decimal.
fn is_ipv4(input: &str) -> bool {
    let octets: Vec<&str> = input.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|octet| {
            (1..=3).contains(&octet.len())
                && octet.bytes().all(|b| b.is_ascii_digit())
                && octet.parse::<u16>().map_or(false, |v| v <= 255)
        })
}

fn is_ipv6(input: &str) -> bool {
    match input.split_once('%') {
        // Zone ids only make sense on link-local addresses
        Some((addr, zone)) => {
            !zone.is_empty()
                && zone.chars().all(|c| c.is_ascii_alphanumeric())
                && addr
                    .parse::<Ipv6Addr>()
                    .map_or(false, |ip| ip.segments()[0] & 0xffc0 == 0xfe80)
        }
        None => input.parse::<Ipv6Addr>().is_ok(),
    }
}

fn is_domain(input: &str) -> bool {
    input.len() <= MAX_DOMAIN_LEN && DOMAIN_RE.is_match(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_literals() {
        assert_eq!(classify("8.8.8.8"), Some(TargetKind::Ipv4));
        assert_eq!(classify("0.0.0.0"), Some(TargetKind::Ipv4));
        assert_eq!(classify("255.255.255.255"), Some(TargetKind::Ipv4));
        assert_eq!(classify("010.001.0.1"), Some(TargetKind::Ipv4));
    }

    #[test]
    fn test_every_octet_value_is_ipv4() {
        for v in 0..=255u16 {
            let addr = format!("{v}.{v}.1.{v}");
            assert_eq!(classify(&addr), Some(TargetKind::Ipv4), "{addr}");
        }
    }

    #[test]
    fn test_numeric_non_ipv4_falls_through_to_domain() {
        // Label grammar admits digits, so these reach the tool as names
        assert_eq!(classify("256.1.1.1"), Some(TargetKind::Domain));
        assert_eq!(classify("1.2.3.4.5"), Some(TargetKind::Domain));
        assert_eq!(classify("1.2.3"), Some(TargetKind::Domain));
        assert_eq!(classify("1.2.3.0004"), Some(TargetKind::Domain));
        assert_eq!(classify("1.2.3."), None);
    }

    #[test]
    fn test_ipv6_forms() {
        assert_eq!(classify("2001:4860:4860::8888"), Some(TargetKind::Ipv6));
        assert_eq!(
            classify("2001:0db8:0000:0000:0000:ff00:0042:8329"),
            Some(TargetKind::Ipv6)
        );
        assert_eq!(classify("::1"), Some(TargetKind::Ipv6));
        assert_eq!(classify("::ffff:192.0.2.1"), Some(TargetKind::Ipv6));
        assert_eq!(classify("fe80::1%eth0"), Some(TargetKind::Ipv6));
    }

    #[test]
    fn test_ipv6_malformed() {
        assert_eq!(classify("2001::db8::1"), None);
        assert_eq!(classify("2001:db8::g"), None);
        assert_eq!(classify("2001:db8::1%eth0"), None);
        assert_eq!(classify("fe80::1%"), None);
    }

    #[test]
    fn test_domains() {
        assert_eq!(classify("google.com"), Some(TargetKind::Domain));
        assert_eq!(classify("WWW.Example.ORG"), Some(TargetKind::Domain));
        assert_eq!(classify("a-b.c-d.net"), Some(TargetKind::Domain));
        assert_eq!(classify("localhost"), Some(TargetKind::Domain));
    }

    #[test]
    fn test_bad_domains_rejected() {
        assert_eq!(classify("go ogle.com"), None);
        assert_eq!(classify("-lead.example.com"), None);
        assert_eq!(classify("trail-.example.com"), None);
        assert_eq!(classify("example..com"), None);
        assert_eq!(classify("example.com."), None);
        assert_eq!(classify(&format!("{}.com", "a".repeat(64))), None);
        assert_eq!(classify("google.com; rm -rf /"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn test_validate_errors() {
        assert!(matches!(validate(""), Err(TraceError::MissingTarget)));
        assert!(matches!(
            validate("go ogle.com"),
            Err(TraceError::InvalidTarget(t)) if t == "go ogle.com"
        ));
        assert_eq!(validate("8.8.8.8").unwrap(), TargetKind::Ipv4);
    }

    #[test]
    fn test_sanitize_strips_shell_metacharacters() {
        let inputs = [
            "8.8.8.8; reboot",
            "a&b|c",
            "`id`.example.com",
            "$(whoami)",
            "x)(y",
        ];
        for input in inputs {
            let clean = sanitize(input);
            assert!(
                !clean.contains(SHELL_META),
                "{input:?} sanitized to {clean:?}"
            );
        }
        assert_eq!(sanitize("8.8.8.8; reboot"), "8.8.8.8 reboot");
        assert_eq!(sanitize("example.com"), "example.com");
    }
}
