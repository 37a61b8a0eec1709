//! Deterministic `iptables-restore` document generation
//!
//! The compiler turns a rule-set snapshot plus an injected [`NetworkContext`]
//! into the complete text document consumed by `iptables-restore`: one
//! stanza each for the `mangle`, `nat` and `filter` tables, in that order.
//!
//! Ordering is load-bearing. Baseline ACLs are emitted in a fixed sequence
//! (conntrack accepts before the invalid drop, funnels before the service
//! accepts), and record-derived directives follow input record order, so the
//! same snapshot always produces byte-identical output for a given
//! timestamp.
//!
//! Records the compiler cannot resolve (a forward with no destination
//! address or port) are skipped and counted, never errors; a half-filled
//! draft must not break the whole ruleset.

use crate::core::rules::RuleSet;
use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use std::fmt::Write;

/// One bridge interface and the subnet behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bridge {
    pub interface: String,
    pub subnet: Ipv4Network,
}

impl Bridge {
    pub fn new(interface: impl Into<String>, subnet: Ipv4Network) -> Self {
        Self {
            interface: interface.into(),
            subnet,
        }
    }

    /// Chain name derived from the interface: uppercase alphanumerics only,
    /// e.g. `docker0` -> `DOCKER0`
    pub fn chain(&self) -> String {
        self.interface
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_uppercase()
    }
}

/// Network context injected by the caller on every compile.
///
/// The primary bridge hosts the managed containers (masquerade + loopback
/// ACLs); an optional secondary bridge gets its own NAT dispatch chain and
/// isolation wiring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkContext {
    pub primary: Bridge,
    pub secondary: Option<Bridge>,
}

impl NetworkContext {
    pub fn new(primary: Bridge) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: Bridge) -> Self {
        self.secondary = Some(secondary);
        self
    }
}

/// Result of one compile pass
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// The complete UTF-8 document, built in memory
    pub text: String,
    /// Rule records that contributed at least one directive
    pub emitted: usize,
    /// Enabled forwards that could not be resolved to a concrete target
    pub skipped: usize,
}

/// Compiles the full ruleset document.
///
/// The caller passes `generated_at` so regeneration is reproducible; the
/// timestamp only appears in the header and trailer comments.
pub fn compile(rules: &RuleSet, net: &NetworkContext, generated_at: DateTime<Utc>) -> CompileOutput {
    let mut out = String::with_capacity(4096);
    let mut emitted = 0usize;
    let mut skipped = 0usize;

    let stamp = generated_at.format("%a %b %-d %H:%M:%S %Y");
    let _ = writeln!(out, "# Generated on {stamp}");

    write_mangle(&mut out, net);
    write_nat(&mut out, rules, net, &mut emitted, &mut skipped);
    write_filter(&mut out, rules, net, &mut emitted);

    let _ = writeln!(out, "# Completed on {stamp}");

    CompileOutput {
        text: out,
        emitted,
        skipped,
    }
}

fn write_mangle(out: &mut String, net: &NetworkContext) {
    let _ = writeln!(out, "*mangle");
    let _ = writeln!(out, ":PREROUTING ACCEPT [0:0]");
    let _ = writeln!(out, ":INPUT ACCEPT [0:0]");
    let _ = writeln!(out, ":FORWARD ACCEPT [0:0]");
    let _ = writeln!(out, ":OUTPUT ACCEPT [0:0]");
    let _ = writeln!(out, ":POSTROUTING ACCEPT [0:0]");

    // DHCP replies to containers need their checksum filled in, the kernel
    // leaves it empty on locally generated packets
    let _ = writeln!(
        out,
        "-A POSTROUTING -o {} -p udp -m udp --dport 68 -j CHECKSUM --checksum-fill",
        net.primary.interface
    );

    let _ = writeln!(out, "COMMIT");
}

fn write_nat(
    out: &mut String,
    rules: &RuleSet,
    net: &NetworkContext,
    emitted: &mut usize,
    skipped: &mut usize,
) {
    let _ = writeln!(out, "*nat");
    let _ = writeln!(out, ":PREROUTING ACCEPT [0:0]");
    let _ = writeln!(out, ":INPUT ACCEPT [0:0]");
    let _ = writeln!(out, ":OUTPUT ACCEPT [0:0]");
    let _ = writeln!(out, ":POSTROUTING ACCEPT [0:0]");

    // Secondary network dispatch must precede the forward rules so its
    // chain exists before PREROUTING references it
    if let Some(secondary) = &net.secondary {
        let chain = secondary.chain();
        let _ = writeln!(out, ":{chain} - [0:0]");
        let _ = writeln!(out, "-A PREROUTING -m addrtype --dst-type LOCAL -j {chain}");
        let _ = writeln!(
            out,
            "-A OUTPUT ! -d 127.0.0.0/8 -m addrtype --dst-type LOCAL -j {chain}"
        );
    }

    for (rule, forward) in rules.forwards() {
        if !rule.enabled {
            continue;
        }

        let Some((ip, dport)) = forward.target() else {
            // Unresolvable draft: no emission, no error
            *skipped += 1;
            continue;
        };

        let _ = writeln!(
            out,
            "-A PREROUTING -p tcp -m tcp --dport {} -j DNAT --to-destination {}:{}",
            forward.port, ip, dport
        );
        let _ = writeln!(
            out,
            "-A PREROUTING -p udp -m udp --dport {} -j DNAT --to-destination {}:{}",
            forward.port, ip, dport
        );
        *emitted += 1;
    }

    let _ = writeln!(
        out,
        "-A POSTROUTING -s {subnet} ! -d {subnet} -j MASQUERADE",
        subnet = net.primary.subnet
    );

    if let Some(secondary) = &net.secondary {
        let _ = writeln!(
            out,
            "-A POSTROUTING -s {} ! -o {} -j MASQUERADE",
            secondary.subnet, secondary.interface
        );
        let _ = writeln!(
            out,
            "-A {} -i {} -j RETURN",
            secondary.chain(),
            secondary.interface
        );
    }

    let _ = writeln!(out, "COMMIT");
}

fn write_filter(out: &mut String, rules: &RuleSet, net: &NetworkContext, emitted: &mut usize) {
    let bridge = &net.primary.interface;

    let _ = writeln!(out, "*filter");
    let _ = writeln!(out, ":INPUT ACCEPT [0:0]");
    let _ = writeln!(out, ":FORWARD ACCEPT [0:0]");
    let _ = writeln!(out, ":OUTPUT ACCEPT [0:0]");
    let _ = writeln!(out, ":fail2ban-ssh - [0:0]");

    if let Some(secondary) = &net.secondary {
        let chain = secondary.chain();
        let _ = writeln!(out, ":{chain} - [0:0]");
        let _ = writeln!(out, ":{chain}-ISOLATION-STAGE-1 - [0:0]");
        let _ = writeln!(out, ":{chain}-ISOLATION-STAGE-2 - [0:0]");
    }

    // SSH brute-force dispatch: the admin port, stock sshd, and the whole
    // forwarded SSH range all funnel into fail2ban-ssh
    let _ = writeln!(out, "-A INPUT -p tcp -m multiport --dports 2020 -j fail2ban-ssh");
    let _ = writeln!(out, "-A INPUT -p tcp -m multiport --dports 22 -j fail2ban-ssh");
    let _ = writeln!(
        out,
        "-A INPUT -p tcp -m multiport --dports 2200:2299 -j fail2ban-ssh"
    );

    // DNS/DHCP from containers on the primary bridge
    let _ = writeln!(out, "-A INPUT -i {bridge} -p tcp -m tcp --dport 53 -j ACCEPT");
    let _ = writeln!(out, "-A INPUT -i {bridge} -p udp -m udp --dport 53 -j ACCEPT");
    let _ = writeln!(out, "-A INPUT -i {bridge} -p tcp -m tcp --dport 67 -j ACCEPT");
    let _ = writeln!(out, "-A INPUT -i {bridge} -p udp -m udp --dport 67 -j ACCEPT");

    let _ = writeln!(out, "-A INPUT -i lo -j ACCEPT");
    let _ = writeln!(
        out,
        "-A INPUT -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT"
    );
    let _ = writeln!(out, "-A INPUT -m conntrack --ctstate INVALID -j DROP");

    for port in [80, 443, 8443] {
        let _ = writeln!(
            out,
            "-A INPUT -p tcp -m tcp --dport {port} -m conntrack --ctstate NEW,ESTABLISHED -j ACCEPT"
        );
    }

    let _ = writeln!(out, "-A FORWARD -o {bridge} -j ACCEPT");
    let _ = writeln!(out, "-A FORWARD -i {bridge} -j ACCEPT");

    let _ = writeln!(out, "-A OUTPUT -o lo -j ACCEPT");
    for port in [80, 443, 8443] {
        let _ = writeln!(
            out,
            "-A OUTPUT -p tcp -m tcp --sport {port} -m conntrack --ctstate ESTABLISHED -j ACCEPT"
        );
    }

    if let Some(secondary) = &net.secondary {
        write_secondary_wiring(out, bridge, secondary);
    }

    for (rule, block) in rules.blocks() {
        if !rule.enabled {
            continue;
        }
        let _ = writeln!(out, "-A INPUT -s {}/{} -j REJECT", block.ip, block.range);
        *emitted += 1;
    }

    let _ = writeln!(out, "-A fail2ban-ssh -j RETURN");
    let _ = writeln!(out, "COMMIT");
}

/// Forward/isolation wiring for the secondary bridge, plus outbound
/// DNS/DHCP on the primary one (the secondary network resolves through it)
fn write_secondary_wiring(out: &mut String, primary_bridge: &str, secondary: &Bridge) {
    let chain = secondary.chain();
    let iface = &secondary.interface;

    let _ = writeln!(out, "-A FORWARD -j {chain}-ISOLATION-STAGE-1");
    let _ = writeln!(
        out,
        "-A FORWARD -o {iface} -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT"
    );
    let _ = writeln!(out, "-A FORWARD -o {iface} -j {chain}");
    let _ = writeln!(out, "-A FORWARD -i {iface} ! -o {iface} -j ACCEPT");
    let _ = writeln!(out, "-A FORWARD -i {iface} -o {iface} -j ACCEPT");
    let _ = writeln!(
        out,
        "-A {chain}-ISOLATION-STAGE-1 -i {iface} ! -o {iface} -j {chain}-ISOLATION-STAGE-2"
    );
    let _ = writeln!(out, "-A {chain}-ISOLATION-STAGE-1 -j RETURN");
    let _ = writeln!(out, "-A {chain}-ISOLATION-STAGE-2 -o {iface} -j DROP");
    let _ = writeln!(out, "-A {chain}-ISOLATION-STAGE-2 -j RETURN");

    let _ = writeln!(
        out,
        "-A OUTPUT -o {primary_bridge} -p tcp -m tcp --sport 53 -j ACCEPT"
    );
    let _ = writeln!(
        out,
        "-A OUTPUT -o {primary_bridge} -p udp -m udp --sport 53 -j ACCEPT"
    );
    let _ = writeln!(
        out,
        "-A OUTPUT -o {primary_bridge} -p udp -m udp --sport 68 -j ACCEPT"
    );
}
