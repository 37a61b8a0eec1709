//! Port registry: preset ranges and availability queries
//!
//! Four fixed ranges of external host ports are managed, one per service
//! class. Forwards may only claim ports inside the union of these ranges,
//! and a port stays claimed while its rule exists, even disabled.
//!
//! All queries here are pure functions over a rule-set snapshot; there is
//! no registry state of its own.

use crate::core::rules::RuleSet;
use std::ops::RangeInclusive;

pub const SSH_PORTS: RangeInclusive<u16> = 2200..=2299;
pub const HTTP_PORTS: RangeInclusive<u16> = 8000..=8099;
pub const MYSQL_PORTS: RangeInclusive<u16> = 3300..=3399;
pub const CONSOLE_PORTS: RangeInclusive<u16> = 4200..=4299;

/// Service class selecting one managed port range, or all of them
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum PortClass {
    #[strum(serialize = "ssh")]
    Ssh,
    #[strum(serialize = "http")]
    Http,
    #[strum(serialize = "mysql")]
    Mysql,
    /// Web console forwards (historically named after shellinabox)
    #[strum(serialize = "shell-console", serialize = "shellinabox")]
    Console,
    #[default]
    #[strum(serialize = "all")]
    All,
}

impl PortClass {
    /// The managed range for this class; `None` for [`PortClass::All`]
    pub const fn range(self) -> Option<RangeInclusive<u16>> {
        match self {
            PortClass::Ssh => Some(SSH_PORTS),
            PortClass::Http => Some(HTTP_PORTS),
            PortClass::Mysql => Some(MYSQL_PORTS),
            PortClass::Console => Some(CONSOLE_PORTS),
            PortClass::All => None,
        }
    }

    /// Decimal prefix used to attribute claimed ports to this class.
    ///
    /// Claimed ports are matched by string prefix of the implied service
    /// port ("22", "80", "33", "42") rather than by range membership. The
    /// filter is deliberately loose and kept for compatibility: a claimed
    /// port outside the class range but sharing the prefix is still
    /// subtracted.
    pub const fn prefix(self) -> Option<&'static str> {
        match self {
            PortClass::Ssh => Some("22"),
            PortClass::Http => Some("80"),
            PortClass::Mysql => Some("33"),
            PortClass::Console => Some("42"),
            PortClass::All => None,
        }
    }
}

/// True iff `port` lies inside the union of the four managed ranges
pub fn port_allowed(port: u16) -> bool {
    SSH_PORTS.contains(&port)
        || HTTP_PORTS.contains(&port)
        || MYSQL_PORTS.contains(&port)
        || CONSOLE_PORTS.contains(&port)
}

/// True if any forward rule currently claims `port`, enabled or not
pub fn port_in_use(rules: &RuleSet, port: u16) -> bool {
    rules.forward_port_taken(port, None)
}

/// Total number of ports under management across all classes
pub fn total_managed_ports() -> usize {
    SSH_PORTS.count() + HTTP_PORTS.count() + MYSQL_PORTS.count() + CONSOLE_PORTS.count()
}

/// Free ports for a class, sorted ascending.
///
/// Set-difference of the class range (or the union of all four for
/// [`PortClass::All`]) minus the claimed ports attributed to the class via
/// its prefix filter. For `All`, every claimed port is subtracted.
pub fn available_ports(rules: &RuleSet, class: PortClass) -> Vec<u16> {
    let claimed = rules.claimed_ports();

    let matches_class = |port: u16| -> bool {
        match class.prefix() {
            Some(prefix) => port.to_string().starts_with(prefix),
            None => true,
        }
    };

    let taken: Vec<u16> = claimed.into_iter().filter(|p| matches_class(*p)).collect();

    let mut free: Vec<u16> = match class.range() {
        Some(range) => range.filter(|p| !taken.contains(p)).collect(),
        None => SSH_PORTS
            .chain(MYSQL_PORTS)
            .chain(CONSOLE_PORTS)
            .chain(HTTP_PORTS)
            .filter(|p| !taken.contains(p))
            .collect(),
    };

    free.sort_unstable();
    free
}
