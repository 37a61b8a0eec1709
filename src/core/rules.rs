//! Rule records and the in-memory rule set
//!
//! Two kinds of record share an identity scheme: [`BlockRule`] drops traffic
//! from an address range, [`ForwardRule`] maps an external host port onto a
//! container service. Both carry:
//!
//! - `name`: an opaque UUIDv4 assigned at creation, immutable thereafter
//! - `enabled`: disabled rules emit nothing but keep their port/IP slot
//! - `has_change`: dirty flag, set on every mutation, cleared only by a
//!   successful build cycle
//!
//! A [`RuleSet`] preserves insertion order; the compiler walks it in that
//! order, so compiled output is stable across regenerations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Maximum number of rules allowed in a single store document
///
/// Limit prevents memory exhaustion from malformed store files.
/// The four managed port ranges only cover 400 forwards anyway.
pub const MAX_RULES: usize = 1000;

/// CIDR prefix lengths accepted for block rules
pub const BLOCK_RANGES: [u8; 4] = [8, 16, 24, 32];

/// Service preset for port forwards
///
/// A preset fixes the implied destination port (22/80/3306); `Custom` and
/// `None` leave the destination to the explicit `service_port` field.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum ServicePreset {
    #[default]
    #[strum(serialize = "none")]
    None,
    #[strum(serialize = "ssh")]
    Ssh,
    #[strum(serialize = "http")]
    Http,
    #[strum(serialize = "mysql")]
    Mysql,
    #[strum(serialize = "custom")]
    Custom,
}

impl ServicePreset {
    /// Destination port implied by the preset, if any
    pub const fn implied_port(self) -> Option<u16> {
        match self {
            ServicePreset::Ssh => Some(22),
            ServicePreset::Http => Some(80),
            ServicePreset::Mysql => Some(3306),
            ServicePreset::None | ServicePreset::Custom => None,
        }
    }

    /// Returns lowercase preset name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            ServicePreset::None => "none",
            ServicePreset::Ssh => "ssh",
            ServicePreset::Http => "http",
            ServicePreset::Mysql => "mysql",
            ServicePreset::Custom => "custom",
        }
    }
}

/// Drops inbound traffic from `ip/range`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRule {
    pub ip: IpAddr,
    /// CIDR prefix length, one of [`BLOCK_RANGES`]
    pub range: u8,
    #[serde(default)]
    pub note: String,
    /// Ban duration in seconds, 0 = permanent
    #[serde(default)]
    pub bantime: u64,
}

/// Maps external host `port` onto `ip:service_port`
///
/// `ip` and `service_port` are optional so a half-filled draft can be stored;
/// the compiler skips drafts without error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardRule {
    #[serde(default)]
    pub ip: Option<IpAddr>,
    pub port: u16,
    #[serde(default)]
    pub preset: ServicePreset,
    #[serde(default)]
    pub service_port: Option<u16>,
}

impl ForwardRule {
    /// Destination port: the preset's implied port wins over `service_port`
    pub fn destination_port(&self) -> Option<u16> {
        self.preset.implied_port().or(self.service_port)
    }

    /// Concrete DNAT target, or `None` while the rule is an unresolvable draft
    pub fn target(&self) -> Option<(IpAddr, u16)> {
        Some((self.ip?, self.destination_port()?))
    }
}

/// Tagged rule payload; serialized with a `type` discriminator so the store
/// document stays readable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleKind {
    Block(BlockRule),
    Forward(ForwardRule),
}

impl RuleKind {
    pub const fn kind_name(&self) -> &'static str {
        match self {
            RuleKind::Block(_) => "block",
            RuleKind::Forward(_) => "forward",
        }
    }

    pub const fn as_block(&self) -> Option<&BlockRule> {
        match self {
            RuleKind::Block(b) => Some(b),
            RuleKind::Forward(_) => None,
        }
    }

    pub const fn as_forward(&self) -> Option<&ForwardRule> {
        match self {
            RuleKind::Forward(f) => Some(f),
            RuleKind::Block(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    /// Generated identity, never changes after creation
    pub name: Uuid,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Dirty flag: record needs to be reflected in the next compiled ruleset
    #[serde(default)]
    pub has_change: bool,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub kind: RuleKind,
}

impl Rule {
    /// Creates a block rule with a fresh name and the dirty flag set
    pub fn new_block(label: String, block: BlockRule, enabled: bool) -> Self {
        Self {
            name: Uuid::new_v4(),
            label,
            enabled,
            has_change: true,
            added_at: Utc::now(),
            updated_at: None,
            kind: RuleKind::Block(block),
        }
    }

    /// Creates a forward rule with a fresh name and the dirty flag set
    pub fn new_forward(label: String, forward: ForwardRule, enabled: bool) -> Self {
        Self {
            name: Uuid::new_v4(),
            label,
            enabled,
            has_change: true,
            added_at: Utc::now(),
            updated_at: None,
            kind: RuleKind::Forward(forward),
        }
    }

    /// Stamps an update: bumps `updated_at` and re-dirties the record
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
        self.has_change = true;
    }
}

fn default_true() -> bool {
    true
}

/// The full rule set in insertion order
///
/// This is the unit the store persists and the compiler snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn find(&self, name: &Uuid) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == *name)
    }

    pub fn find_mut(&mut self, name: &Uuid) -> Option<&mut Rule> {
        self.rules.iter_mut().find(|r| r.name == *name)
    }

    /// Removes a rule by name, returning it if present
    pub fn remove(&mut self, name: &Uuid) -> Option<Rule> {
        let pos = self.rules.iter().position(|r| r.name == *name)?;
        Some(self.rules.remove(pos))
    }

    pub fn blocks(&self) -> impl Iterator<Item = (&Rule, &BlockRule)> {
        self.rules
            .iter()
            .filter_map(|r| r.kind.as_block().map(|b| (r, b)))
    }

    pub fn forwards(&self) -> impl Iterator<Item = (&Rule, &ForwardRule)> {
        self.rules
            .iter()
            .filter_map(|r| r.kind.as_forward().map(|f| (r, f)))
    }

    /// True if any block rule already covers this exact address.
    /// Disabled rules still count: disabling does not free the slot.
    pub fn block_ip_taken(&self, ip: &IpAddr) -> bool {
        self.blocks().any(|(_, b)| b.ip == *ip)
    }

    /// True if any forward rule claims this external port, regardless of
    /// preset or enabled state. `except` skips one record (for updates).
    pub fn forward_port_taken(&self, port: u16, except: Option<&Uuid>) -> bool {
        self.forwards()
            .any(|(r, f)| f.port == port && except != Some(&r.name))
    }

    /// Every external port currently claimed by a forward rule
    pub fn claimed_ports(&self) -> Vec<u16> {
        self.forwards().map(|(_, f)| f.port).collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.rules.iter().filter(|r| r.has_change).count()
    }

    /// Clears the dirty flag on every record. Called only after a compile
    /// cycle has successfully written the document.
    pub fn clear_dirty(&mut self) {
        for rule in &mut self.rules {
            rule.has_change = false;
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks().count()
    }

    pub fn forward_count(&self) -> usize {
        self.forwards().count()
    }
}
