// src/core/scope.rs

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, info, warn};

use crate::core::models::ValidatedHost;
use crate::core::validator::{self, PendingHost};
use crate::error::ValidationError;

const fn v4(a: u8, b: u8, c: u8, d: u8) -> u32 {
    u32::from_be_bytes([a, b, c, d])
}

// Inclusive (low, high) pairs of address ranges a probe must never reach,
// with the rule name that fired. Covers loopback, RFC1918, link-local,
// CGNAT, documentation, benchmarking, multicast and reserved space.
const BLOCKED_V4_RANGES: [(u32, u32, &str); 14] = [
    (v4(0, 0, 0, 0), v4(0, 255, 255, 255), "this-network"),
    (v4(10, 0, 0, 0), v4(10, 255, 255, 255), "rfc1918"),
    (v4(100, 64, 0, 0), v4(100, 127, 255, 255), "cgnat"),
    (v4(127, 0, 0, 0), v4(127, 255, 255, 255), "loopback"),
    (v4(169, 254, 0, 0), v4(169, 254, 255, 255), "link-local"),
    (v4(172, 16, 0, 0), v4(172, 31, 255, 255), "rfc1918"),
    (v4(192, 0, 0, 0), v4(192, 0, 0, 255), "ietf-protocol"),
    (v4(192, 0, 2, 0), v4(192, 0, 2, 255), "documentation"),
    (v4(192, 168, 0, 0), v4(192, 168, 255, 255), "rfc1918"),
    (v4(198, 18, 0, 0), v4(198, 19, 255, 255), "benchmarking"),
    (v4(198, 51, 100, 0), v4(198, 51, 100, 255), "documentation"),
    (v4(203, 0, 113, 0), v4(203, 0, 113, 255), "documentation"),
    (v4(224, 0, 0, 0), v4(239, 255, 255, 255), "multicast"),
    (v4(240, 0, 0, 0), v4(255, 255, 255, 255), "reserved"),
];

fn blocked_v4_rule(addr: Ipv4Addr) -> Option<&'static str> {
    let bits = u32::from(addr);
    BLOCKED_V4_RANGES
        .iter()
        .find(|(lo, hi, _)| bits >= *lo && bits <= *hi)
        .map(|(_, _, rule)| *rule)
}

fn blocked_v6_rule(addr: Ipv6Addr) -> Option<&'static str> {
    if addr.is_unspecified() {
        return Some("unspecified");
    }
    if addr.is_loopback() {
        return Some("loopback");
    }
    let segments = addr.segments();
    if segments[0] & 0xffc0 == 0xfe80 {
        return Some("link-local");
    }
    if segments[0] & 0xfe00 == 0xfc00 {
        return Some("unique-local");
    }
    // IPv4-mapped addresses inherit the IPv4 verdict.
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return blocked_v4_rule(mapped);
    }
    None
}

/// Names the blocklist rule an address falls under, if any.
pub fn blocked_rule(addr: IpAddr) -> Option<&'static str> {
    match addr {
        IpAddr::V4(v4) => blocked_v4_rule(v4),
        IpAddr::V6(v6) => blocked_v6_rule(v6),
    }
}

/// Authorizes targets against the approved scope and resolves them to
/// public addresses before any probe is allowed to connect.
pub struct ScopeGuard {
    resolver: TokioAsyncResolver,
}

impl Default for ScopeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeGuard {
    pub fn new() -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { resolver }
    }

    /// Checks that a validated host sits inside the approved scope.
    ///
    /// An empty scope authorizes nothing. A host is covered when it equals
    /// an approved domain or is a subdomain of one.
    pub fn check_scope(
        &self,
        pending: &PendingHost,
        approved_domains: &[String],
    ) -> Result<(), ValidationError> {
        let covered = approved_domains.iter().any(|approved| {
            validator::is_subdomain_of(&pending.normalized_host, approved.trim())
        });
        if !covered {
            warn!(host = %pending.normalized_host, "Target is outside the approved scope.");
            return Err(ValidationError::OutOfScope {
                host: pending.normalized_host.clone(),
            });
        }
        Ok(())
    }

    /// Resolves a host and rejects it if any answer lands in a blocked range.
    ///
    /// Both address families are queried; a lookup failure in one family is
    /// tolerated as long as the other returns answers. A single blocked
    /// address poisons the whole resolution, so a name that mixes public and
    /// private answers cannot be rebound past the check.
    pub async fn resolve_public(&self, host: &str) -> Result<Vec<IpAddr>, ValidationError> {
        debug!(host, "Resolving target addresses.");
        let (v4_result, v6_result) = tokio::join!(
            self.resolver.ipv4_lookup(host),
            self.resolver.ipv6_lookup(host)
        );

        let mut addresses: Vec<IpAddr> = Vec::new();
        match v4_result {
            Ok(lookup) => addresses.extend(lookup.iter().map(|a| IpAddr::V4(a.0))),
            Err(e) => debug!(host, error = %e, "A lookup returned no usable answer."),
        }
        match v6_result {
            Ok(lookup) => addresses.extend(lookup.iter().map(|aaaa| IpAddr::V6(aaaa.0))),
            Err(e) => debug!(host, error = %e, "AAAA lookup returned no usable answer."),
        }

        if addresses.is_empty() {
            warn!(host, "Host did not resolve to any address.");
            return Err(ValidationError::UnresolvableHost {
                host: host.to_string(),
            });
        }

        confirm_public(host, &addresses)?;
        Ok(addresses)
    }

    /// Runs the full admission chain for a raw target: syntactic
    /// validation, scope authorization, then resolution.
    pub async fn validate_target(
        &self,
        raw_target: &str,
        approved_domains: &[String],
    ) -> Result<ValidatedHost, ValidationError> {
        let pending = validator::validate_host(raw_target)?;
        self.check_scope(&pending, approved_domains)?;
        let resolved_addresses = self.resolve_public(&pending.normalized_host).await?;

        info!(
            host = %pending.normalized_host,
            addresses = %resolved_addresses.len(),
            "Target admitted."
        );

        Ok(ValidatedHost {
            normalized_host: pending.normalized_host,
            etld_plus_one: pending.etld_plus_one,
            resolved_addresses,
        })
    }
}

/// Verifies every resolved address is publicly routable.
///
/// The error names the host only. Which rule fired goes to the debug log,
/// never into the message a caller may persist.
fn confirm_public(host: &str, addresses: &[IpAddr]) -> Result<(), ValidationError> {
    for addr in addresses {
        if let Some(rule) = blocked_rule(*addr) {
            debug!(host, rule, "Resolution hit a blocked range.");
            return Err(ValidationError::PrivateNetworkTarget {
                host: host.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pending(host: &str) -> PendingHost {
        PendingHost {
            normalized_host: host.to_string(),
            etld_plus_one: host
                .split('.')
                .rev()
                .take(2)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("."),
        }
    }

    #[test]
    fn blocks_private_v4_ranges() {
        assert_eq!(blocked_rule("10.0.0.1".parse().unwrap()), Some("rfc1918"));
        assert_eq!(blocked_rule("172.16.0.1".parse().unwrap()), Some("rfc1918"));
        assert_eq!(blocked_rule("172.31.255.254".parse().unwrap()), Some("rfc1918"));
        assert_eq!(blocked_rule("192.168.1.1".parse().unwrap()), Some("rfc1918"));
        assert_eq!(blocked_rule("127.0.0.1".parse().unwrap()), Some("loopback"));
        assert_eq!(blocked_rule("169.254.169.254".parse().unwrap()), Some("link-local"));
        assert_eq!(blocked_rule("100.64.0.1".parse().unwrap()), Some("cgnat"));
        assert_eq!(blocked_rule("198.18.0.1".parse().unwrap()), Some("benchmarking"));
        assert_eq!(blocked_rule("203.0.113.7".parse().unwrap()), Some("documentation"));
        assert_eq!(blocked_rule("224.0.0.1".parse().unwrap()), Some("multicast"));
        assert_eq!(blocked_rule("255.255.255.255".parse().unwrap()), Some("reserved"));
        assert_eq!(blocked_rule("0.1.2.3".parse().unwrap()), Some("this-network"));
    }

    #[test]
    fn boundaries_of_blocked_ranges() {
        assert_eq!(blocked_rule("172.15.255.255".parse().unwrap()), None);
        assert_eq!(blocked_rule("172.32.0.0".parse().unwrap()), None);
        assert_eq!(blocked_rule("9.255.255.255".parse().unwrap()), None);
        assert_eq!(blocked_rule("11.0.0.0".parse().unwrap()), None);
    }

    #[test]
    fn allows_public_addresses() {
        assert_eq!(blocked_rule("8.8.8.8".parse().unwrap()), None);
        assert_eq!(blocked_rule("93.184.216.34".parse().unwrap()), None);
        assert_eq!(blocked_rule("2606:4700::6810:85e5".parse().unwrap()), None);
    }

    #[test]
    fn blocks_special_v6_ranges() {
        assert_eq!(blocked_rule("::1".parse().unwrap()), Some("loopback"));
        assert_eq!(blocked_rule("::".parse().unwrap()), Some("unspecified"));
        assert_eq!(blocked_rule("fe80::1".parse().unwrap()), Some("link-local"));
        assert_eq!(blocked_rule("fc00::1".parse().unwrap()), Some("unique-local"));
        assert_eq!(blocked_rule("fd12:3456::1".parse().unwrap()), Some("unique-local"));
    }

    #[test]
    fn mapped_v6_inherits_v4_verdict() {
        assert_eq!(blocked_rule("::ffff:192.168.0.1".parse().unwrap()), Some("rfc1918"));
        assert_eq!(blocked_rule("::ffff:169.254.169.254".parse().unwrap()), Some("link-local"));
        assert_eq!(blocked_rule("::ffff:8.8.8.8".parse().unwrap()), None);
    }

    #[test]
    fn single_blocked_address_poisons_resolution() {
        let addrs: Vec<IpAddr> = vec![
            "93.184.216.34".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
        ];
        let err = confirm_public("mixed.example.com", &addrs).unwrap_err();
        assert_eq!(
            err,
            ValidationError::PrivateNetworkTarget {
                host: "mixed.example.com".into()
            }
        );
    }

    #[test]
    fn blocked_error_does_not_leak_addresses() {
        let addrs: Vec<IpAddr> = vec!["192.168.7.13".parse().unwrap()];
        let err = confirm_public("internal.example.com", &addrs).unwrap_err();
        let text = err.to_string();
        assert!(!text.contains("192.168.7.13"));
        assert!(text.contains("internal.example.com"));
    }

    #[test]
    fn empty_scope_authorizes_nothing() {
        let guard = ScopeGuard::new();
        let err = guard.check_scope(&pending("example.com"), &[]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::OutOfScope {
                host: "example.com".into()
            }
        );
    }

    #[test]
    fn scope_covers_subdomains_only() {
        let guard = ScopeGuard::new();
        let approved = vec!["example.com".to_string()];
        assert!(guard.check_scope(&pending("example.com"), &approved).is_ok());
        assert!(guard.check_scope(&pending("api.example.com"), &approved).is_ok());
        assert!(guard.check_scope(&pending("other.org"), &approved).is_err());
        assert!(guard
            .check_scope(&pending("example.com.evil.org"), &approved)
            .is_err());
    }
}
