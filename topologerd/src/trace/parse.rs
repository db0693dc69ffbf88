//! Line-oriented parser for traceroute, traceroute6 and tracert output.
//!
//! All three tools print one hop per line, led by the hop number. The same
//! grammar covers them:
//!
//! ```text
//!  3  ae-1.example.net (203.0.113.1)  12.345 ms  13.001 ms  12.9 ms
//!  4  * * *
//!  5  198.51.100.7  8.1 ms  8.3 ms
//!  6    11 ms    10 ms    12 ms  ae-2.example.net [203.0.113.2]
//! ```
//!
//! A leading line without a hop number is the tool's banner and is dropped.
//! Unix tools print that banner on stderr, so stdout may start at hop 1.
//! Any other line that does not start with a hop number is skipped and
//! counted.

use once_cell::sync::Lazy;
use regex::Regex;
use shared::types::Hop;
use crate::net;

static HOP_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)(?:\s|$)").expect("hop number pattern is valid"));

static TIMEOUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\s+\*\s+\*").expect("timeout pattern is valid"));

/// `(addr)` on Unix, `[addr]` on Windows
static ENCLOSED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(([^()\s]+)\)|\[([^\[\]\s]+)\]").expect("enclosed address pattern is valid")
});

static RTT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+(?:\.\d+)?)\s*ms\b").expect("rtt pattern is valid"));

/// Result of parsing one tool run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTrace {
    pub hops: Vec<Hop>,
    /// Non-header lines dropped for lack of a hop number
    pub skipped: usize,
}

/// Parse the full output of one run. Never fails; unattributable lines are
/// skipped.
pub fn parse(output: &str) -> ParsedTrace {
    let mut parsed = ParsedTrace::default();

    let mut lines = output.lines().filter(|l| !l.trim().is_empty()).peekable();
    if lines.peek().map_or(false, |first| !HOP_NUMBER_RE.is_match(first)) {
        lines.next();
    }

    for line in lines {
        match parse_line(line) {
            Some(hop) => parsed.hops.push(hop),
            None => parsed.skipped += 1,
        }
    }

    parsed
}

fn parse_line(line: &str) -> Option<Hop> {
    let hop_match = HOP_NUMBER_RE.captures(line)?;
    let hop: u32 = hop_match[1].parse().ok()?;

    if TIMEOUT_RE.is_match(line) {
        return Some(Hop::timeout(hop));
    }

    let rest = &line[hop_match.get(0).map_or(0, |m| m.end())..];
    let (ip, hostname) = match enclosed_address(rest) {
        Some(found) => found,
        None => bare_token(rest),
    };

    let rtt = RTT_RE
        .captures_iter(line)
        .map(|cap| cap[1].to_string())
        .collect();

    Some(Hop {
        hop,
        ip,
        hostname,
        rtt,
    })
}

/// First parenthesized or bracketed IP literal, with the token right before it
/// as the hostname.
fn enclosed_address(rest: &str) -> Option<(Option<String>, Option<String>)> {
    ENCLOSED_RE.captures_iter(rest).find_map(|cap| {
        let whole = cap.get(0)?;
        let addr = cap.get(1).or_else(|| cap.get(2))?.as_str();
        if !is_ip_literal(addr) {
            return None;
        }

        let hostname = rest[..whole.start()]
            .split_whitespace()
            .last()
            .filter(|token| *token != addr && !is_sample_token(token))
            .map(str::to_string);

        Some((Some(addr.to_string()), hostname))
    })
}

/// No enclosed form: the first token that is not part of a probe sample is
/// either the address or, failing that, a bare hostname.
fn bare_token(rest: &str) -> (Option<String>, Option<String>) {
    match rest.split_whitespace().find(|token| !is_sample_token(token)) {
        Some(token) if is_ip_literal(token) => (Some(token.to_string()), None),
        Some(token) => (None, Some(token.to_string())),
        None => (None, None),
    }
}

fn is_ip_literal(token: &str) -> bool {
    net::parse_addr(token).is_some()
}

/// `*`, `ms`, `12.3`, `12.3ms`, `<1`
fn is_sample_token(token: &str) -> bool {
    let number = token.strip_suffix("ms").unwrap_or(token);
    token == "*"
        || token == "ms"
        || token.starts_with('<')
        || number.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(n: u32, ip: Option<&str>, hostname: Option<&str>, rtt: &[&str]) -> Hop {
        Hop {
            hop: n,
            ip: ip.map(str::to_string),
            hostname: hostname.map(str::to_string),
            rtt: rtt.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_parenthesized_address_without_name() {
        let parsed = parse("traceroute to x\n 3  10.0.0.1 (10.0.0.1)  12.345 ms  13.001 ms");
        assert_eq!(
            parsed.hops,
            vec![hop(3, Some("10.0.0.1"), None, &["12.345", "13.001"])]
        );
    }

    #[test]
    fn test_timeout_line() {
        let parsed = parse("header\n 5  * * *");
        assert_eq!(parsed.hops, vec![hop(5, None, None, &[])]);

        let parsed = parse("header\n 6  *     *\t  *");
        assert_eq!(parsed.hops, vec![Hop::timeout(6)]);
    }

    #[test]
    fn test_linux_traceroute() {
        let output = "\
traceroute to example.com (93.184.215.14), 30 hops max, 60 byte packets
 1  _gateway (192.168.1.1)  0.512 ms  0.487 ms  0.470 ms
 2  100.64.0.1 (100.64.0.1)  8.221 ms  8.205 ms  8.190 ms
 3  * * *
 4  ae-5.r01.ams.example.net (203.0.113.9)  11.030 ms  10.944 ms  11.102 ms
 5  93.184.215.14 (93.184.215.14)  85.1 ms  84.9 ms  85.0 ms
";
        let parsed = parse(output);
        assert_eq!(parsed.skipped, 0);
        assert_eq!(
            parsed.hops,
            vec![
                hop(1, Some("192.168.1.1"), Some("_gateway"), &["0.512", "0.487", "0.470"]),
                hop(2, Some("100.64.0.1"), None, &["8.221", "8.205", "8.190"]),
                Hop::timeout(3),
                hop(
                    4,
                    Some("203.0.113.9"),
                    Some("ae-5.r01.ams.example.net"),
                    &["11.030", "10.944", "11.102"]
                ),
                hop(5, Some("93.184.215.14"), None, &["85.1", "84.9", "85.0"]),
            ]
        );
    }

    #[test]
    fn test_traceroute6() {
        let output = "\
traceroute6 to 2001:4860:4860::8888 (2001:4860:4860::8888), 30 hops max, 80 byte packets
 1  2001:db8::1 (2001:db8::1)  0.9 ms  0.8 ms  0.8 ms
 2  2001:4860:4860::8888  14.2 ms  14.0 ms  13.9 ms
";
        let parsed = parse(output);
        assert_eq!(
            parsed.hops,
            vec![
                hop(1, Some("2001:db8::1"), None, &["0.9", "0.8", "0.8"]),
                hop(2, Some("2001:4860:4860::8888"), None, &["14.2", "14.0", "13.9"]),
            ]
        );
    }

    #[test]
    fn test_windows_tracert() {
        let output = "
Tracing route to dns.google [8.8.8.8]
over a maximum of 30 hops:

  1    <1 ms    <1 ms    <1 ms  192.168.1.1
  2     9 ms     8 ms    10 ms  ae1.isp.example [198.51.100.1]
  3     *        *        *     Request timed out.
  4    14 ms    13 ms    13 ms  dns.google [8.8.8.8]

Trace complete.
";
        let parsed = parse(output);
        assert_eq!(parsed.skipped, 2);
        assert_eq!(
            parsed.hops,
            vec![
                hop(1, Some("192.168.1.1"), None, &["1", "1", "1"]),
                hop(2, Some("198.51.100.1"), Some("ae1.isp.example"), &["9", "8", "10"]),
                Hop::timeout(3),
                hop(4, Some("8.8.8.8"), Some("dns.google"), &["14", "13", "13"]),
            ]
        );
    }

    #[test]
    fn test_bare_hostname_without_address() {
        let parsed = parse("header\n 7  unresolved.example.net  3.1 ms");
        assert_eq!(
            parsed.hops,
            vec![hop(7, None, Some("unresolved.example.net"), &["3.1"])]
        );
    }

    #[test]
    fn test_partial_timeout_keeps_address() {
        let parsed = parse("header\n 8  *  203.0.113.20  4.4 ms  4.5 ms");
        assert_eq!(
            parsed.hops,
            vec![hop(8, Some("203.0.113.20"), None, &["4.4", "4.5"])]
        );

        let parsed = parse("header\n 8  * edge.example.net (203.0.113.21)  4.4 ms");
        assert_eq!(
            parsed.hops,
            vec![hop(8, Some("203.0.113.21"), Some("edge.example.net"), &["4.4"])]
        );
    }

    #[test]
    fn test_address_without_samples_is_kept() {
        let parsed = parse("header\n 9  203.0.113.30 (203.0.113.30)  !H");
        assert_eq!(parsed.hops, vec![hop(9, Some("203.0.113.30"), None, &[])]);
    }

    #[test]
    fn test_repeated_addresses_stay_distinct() {
        let output = "header
 4  203.0.113.5 (203.0.113.5)  5.0 ms
 5  203.0.113.5 (203.0.113.5)  5.2 ms
";
        let parsed = parse(output);
        assert_eq!(parsed.hops.len(), 2);
        assert_eq!(parsed.hops[0].ip, parsed.hops[1].ip);
        assert_eq!(parsed.hops[1].hop, 5);
    }

    #[test]
    fn test_hop_numbers_passed_through() {
        let output = "header
 9  203.0.113.1 (203.0.113.1)  1 ms
 2  203.0.113.2 (203.0.113.2)  2 ms
 2  203.0.113.3 (203.0.113.3)  3 ms
";
        let numbers: Vec<u32> = parse(output).hops.iter().map(|h| h.hop).collect();
        assert_eq!(numbers, vec![9, 2, 2]);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let output = "header
    continuation (203.0.113.99)  1.0 ms
garbage line
 3  203.0.113.3 (203.0.113.3)  3.0 ms
";
        let parsed = parse(output);
        assert_eq!(parsed.skipped, 2);
        assert_eq!(parsed.hops.len(), 1);
        assert_eq!(parsed.hops[0].hop, 3);
    }

    #[test]
    fn test_empty_and_header_only() {
        assert_eq!(parse(""), ParsedTrace::default());
        assert_eq!(parse("traceroute to 8.8.8.8 (8.8.8.8), 30 hops max\n\n"), ParsedTrace::default());
    }

    #[test]
    fn test_stdout_without_banner_keeps_first_hop() {
        let output = "\
 1  _gateway (192.168.1.1)  0.512 ms  0.487 ms
 2  ae-5.r01.example.net (203.0.113.9)  11.030 ms
";
        let parsed = parse(output);
        assert_eq!(parsed.skipped, 0);
        let numbers: Vec<u32> = parsed.hops.iter().map(|h| h.hop).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(parsed.hops[0].ip.as_deref(), Some("192.168.1.1"));
    }

    #[test]
    fn test_scoped_link_local_hops() {
        let parsed = parse(" 1  fe80::1%en0  1.2 ms\n 2  _gateway (fe80::1%eth0)  0.9 ms");
        assert_eq!(
            parsed.hops,
            vec![
                hop(1, Some("fe80::1%en0"), None, &["1.2"]),
                hop(2, Some("fe80::1%eth0"), Some("_gateway"), &["0.9"]),
            ]
        );
    }

    #[test]
    fn test_hostname_with_digits_before_ms_is_not_a_sample() {
        let parsed = parse("header\n 2  core5ms.example.net (203.0.113.4)  7.5 ms");
        assert_eq!(parsed.hops[0].rtt, vec!["7.5".to_string()]);
        assert_eq!(parsed.hops[0].hostname.as_deref(), Some("core5ms.example.net"));
    }
}
