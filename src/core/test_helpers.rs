//! Shared test utilities for core module tests
//!
//! Common helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::core::compiler::{Bridge, NetworkContext};
use crate::core::rules::{BlockRule, ForwardRule, Rule, RuleSet, ServicePreset};
use chrono::{DateTime, TimeZone, Utc};

/// Fixed timestamp so compiled documents compare byte-for-byte
pub fn fixed_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
}

/// Primary-only network context matching the default config
pub fn test_network() -> NetworkContext {
    NetworkContext::new(Bridge::new("lxcbr0", "10.0.3.0/24".parse().unwrap()))
}

/// Context with a secondary docker-style bridge
pub fn test_network_with_secondary() -> NetworkContext {
    test_network().with_secondary(Bridge::new("docker0", "172.17.0.0/16".parse().unwrap()))
}

/// Creates an enabled block rule
pub fn block_rule(ip: &str, range: u8) -> Rule {
    Rule::new_block(
        String::new(),
        BlockRule {
            ip: ip.parse().unwrap(),
            range,
            note: String::new(),
            bantime: 0,
        },
        true,
    )
}

/// Creates an enabled forward rule with customizable target resolution
pub fn forward_rule(
    ip: Option<&str>,
    port: u16,
    preset: ServicePreset,
    service_port: Option<u16>,
) -> Rule {
    Rule::new_forward(
        String::new(),
        ForwardRule {
            ip: ip.map(|s| s.parse().unwrap()),
            port,
            preset,
            service_port,
        },
        true,
    )
}

/// A small mixed rule set: one block, one ssh forward
pub fn sample_rules() -> RuleSet {
    let mut rules = RuleSet::new();
    rules.rules.push(block_rule("123.123.123.123", 32));
    rules
        .rules
        .push(forward_rule(Some("10.0.3.15"), 2210, ServicePreset::Ssh, None));
    rules
}
