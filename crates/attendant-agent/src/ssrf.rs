//! SSRF guard for URL-accessing tools (`web_fetch`, `web_search`, …) —
//! spec.md §6. Every tool that performs outbound HTTP must call
//! [`check_url`] before issuing the request.
//!
//! Mirrors `attendant_terminal::safety`'s allow/deny-list checker shape:
//! one pure function, one reason string on rejection, no network I/O here
//! (DNS resolution happens at the caller's HTTP client, which is expected
//! to re-resolve and can't be second-guessed further without adding a
//! resolver dependency this guard doesn't need).

use reqwest::Url;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Hostnames that resolve (or are routed) to cloud-provider metadata
/// services — never reachable from tool-initiated requests.
const METADATA_HOSTNAMES: &[&str] = &[
    "metadata.google.internal",
    "metadata.goog",
];

/// Check whether `url` is safe for a tool to fetch.
///
/// Returns `Ok(())` if the URL clears every check, or `Err(reason)`
/// describing the first violation found.
pub fn check_url(url: &str) -> Result<(), String> {
    let parsed = Url::parse(url).map_err(|e| format!("not a valid URL: {e}"))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("scheme `{other}` is not HTTP(S)")),
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| "URL has no host".to_string())?;
    let host_lower = host.to_lowercase();

    if host_lower == "localhost"
        || host_lower.ends_with(".localhost")
        || host_lower.ends_with(".local")
        || host_lower.ends_with(".internal")
    {
        return Err(format!("host `{host}` is a loopback/internal name"));
    }

    if METADATA_HOSTNAMES.contains(&host_lower.as_str()) {
        return Err(format!("host `{host}` is a cloud metadata hostname"));
    }

    if let Ok(ip) = host_lower.parse::<IpAddr>() {
        check_ip(ip).map_err(|reason| format!("host `{host}`: {reason}"))?;
    }

    Ok(())
}

fn check_ip(ip: IpAddr) -> Result<(), String> {
    match ip {
        IpAddr::V4(v4) => check_ipv4(v4),
        IpAddr::V6(v6) => check_ipv6(v6),
    }
}

fn check_ipv4(ip: Ipv4Addr) -> Result<(), String> {
    if ip == Ipv4Addr::new(169, 254, 169, 254) {
        return Err("cloud metadata address".to_string());
    }
    let octets = ip.octets();
    let in_range = match octets[0] {
        127 => true,                                  // 127.0.0.0/8 loopback
        10 => true,                                    // 10.0.0.0/8
        172 if (16..=31).contains(&octets[1]) => true,  // 172.16.0.0/12
        192 if octets[1] == 168 => true,                // 192.168.0.0/16
        0 => true,                                      // 0.0.0.0/8
        169 if octets[1] == 254 => true,                // 169.254.0.0/16 link-local
        _ => false,
    };
    if in_range {
        return Err("private or loopback IPv4 range".to_string());
    }
    Ok(())
}

fn check_ipv6(ip: Ipv6Addr) -> Result<(), String> {
    if ip.is_loopback() || ip.is_unspecified() {
        return Err("loopback or unspecified IPv6".to_string());
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return check_ipv4(v4);
    }
    let segments = ip.segments();
    // fe80::/10 link-local
    if (segments[0] & 0xffc0) == 0xfe80 {
        return Err("link-local IPv6 range".to_string());
    }
    // fc00::/7 unique local
    if (segments[0] & 0xfe00) == 0xfc00 {
        return Err("unique-local IPv6 range".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_scheme() {
        assert!(check_url("ftp://example.com/file").is_err());
        assert!(check_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn allows_ordinary_https_url() {
        assert!(check_url("https://example.com/search?q=rust").is_ok());
    }

    #[test]
    fn rejects_localhost() {
        assert!(check_url("http://localhost/").is_err());
        assert!(check_url("http://service.internal/").is_err());
        assert!(check_url("http://box.local/").is_err());
    }

    #[test]
    fn rejects_loopback_ipv4() {
        assert!(check_url("http://127.0.0.1/").is_err());
    }

    #[test]
    fn rejects_private_ipv4_ranges() {
        assert!(check_url("http://10.0.0.5/").is_err());
        assert!(check_url("http://172.16.0.1/").is_err());
        assert!(check_url("http://192.168.1.1/").is_err());
    }

    #[test]
    fn rejects_cloud_metadata_address() {
        assert!(check_url("http://169.254.169.254/latest/meta-data/").is_err());
        assert!(check_url("http://metadata.google.internal/").is_err());
    }

    #[test]
    fn rejects_loopback_and_link_local_ipv6() {
        assert!(check_url("http://[::1]/").is_err());
        assert!(check_url("http://[fe80::1]/").is_err());
        assert!(check_url("http://[fc00::1]/").is_err());
    }

    #[test]
    fn allows_public_ip_literal() {
        assert!(check_url("http://93.184.216.34/").is_ok());
    }
}
