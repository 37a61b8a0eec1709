//! CRUD facade over the rule store
//!
//! Every mutating operation validates its input field by field, then does a
//! load-modify-save against the store under a single mutex so mutations
//! serialize and the builder always reads a consistent snapshot.
//!
//! Results are structured values, never panics: `status`, a per-field
//! `errors` map, and the echoed record. Validation failure leaves the store
//! untouched.

use crate::core::ports::{self, PortClass};
use crate::core::rules::{BlockRule, ForwardRule, Rule, RuleKind, RuleSet, ServicePreset, MAX_RULES};
use crate::core::store::{RuleStore, StoreError};
use crate::validators;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    Success,
    Error,
}

/// Structured result of a facade operation
#[derive(Debug, Clone, Serialize)]
pub struct OpResult {
    pub status: OpStatus,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<serde_json::Value>,
}

impl OpResult {
    pub fn success(values: Option<serde_json::Value>) -> Self {
        Self {
            status: OpStatus::Success,
            errors: BTreeMap::new(),
            values,
        }
    }

    pub fn failure(errors: BTreeMap<String, String>, values: Option<serde_json::Value>) -> Self {
        Self {
            status: OpStatus::Error,
            errors,
            values,
        }
    }

    fn single(field: &str, message: &str, values: Option<serde_json::Value>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), message.to_string());
        Self::failure(errors, values)
    }

    pub fn is_success(&self) -> bool {
        self.status == OpStatus::Success
    }
}

/// Raw input for creating or updating a block rule.
///
/// Fields arrive loosely typed (strings off a CLI or RPC payload) and are
/// validated into the typed record; each failure lands under its own key in
/// the error map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockInput {
    /// Only accepted on update when it matches the stored name
    pub name: Option<String>,
    pub label: Option<String>,
    pub ip: Option<String>,
    pub range: Option<u8>,
    pub note: Option<String>,
    pub bantime: Option<u64>,
    pub enabled: Option<bool>,
}

/// Raw input for creating or updating a forward rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForwardInput {
    /// Only accepted on update when it matches the stored name
    pub name: Option<String>,
    pub label: Option<String>,
    pub ip: Option<String>,
    pub port: Option<String>,
    pub preset: Option<String>,
    pub service_port: Option<String>,
    pub enabled: Option<bool>,
}

/// Record selector for fetch/count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    All,
    Name(Uuid),
    Blocks,
    Forwards,
}

/// Aggregate counts for `status()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSummary {
    pub blocked_rules: usize,
    pub forward_rules: usize,
    pub total: usize,
    pub available: usize,
}

/// The facade itself: one store handle, one mutation lock
pub struct Manager {
    store: RuleStore,
    lock: tokio::sync::Mutex<()>,
}

impl Manager {
    pub fn new(store: RuleStore) -> Self {
        Self {
            store,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    /// Adds an IP block rule.
    ///
    /// Validates address syntax, uniqueness among block rules, and the CIDR
    /// prefix length before anything is persisted.
    pub async fn add_block(&self, input: BlockInput) -> OpResult {
        let _guard = self.lock.lock().await;

        let rules = match self.store.load().await {
            Ok(rules) => rules,
            Err(e) => return store_failure(&e, echo(&input)),
        };

        let mut errors = BTreeMap::new();

        let ip = match input.ip.as_deref() {
            None | Some("") => {
                errors.insert("ip".to_string(), "IP is a required field".to_string());
                None
            }
            Some(raw) => match validators::validate_ip(raw) {
                Ok(ip) => {
                    if rules.block_ip_taken(&ip) {
                        errors.insert("ip".to_string(), "IP already blocked".to_string());
                        None
                    } else {
                        Some(ip)
                    }
                }
                Err(msg) => {
                    errors.insert("ip".to_string(), msg);
                    None
                }
            },
        };

        let range = match input.range {
            None => {
                errors.insert("range".to_string(), "Range is a required field".to_string());
                None
            }
            Some(range) => match validators::validate_block_range(range) {
                Ok(range) => Some(range),
                Err(msg) => {
                    errors.insert("range".to_string(), msg);
                    None
                }
            },
        };

        if !errors.is_empty() {
            return OpResult::failure(errors, echo(&input));
        }

        let (Some(ip), Some(range)) = (ip, range) else {
            // Both validated above; unreachable without an errors entry
            return OpResult::single("ip", "IP is a required field", echo(&input));
        };

        if rules.len() >= MAX_RULES {
            return OpResult::single("store", "Rule limit reached", echo(&input));
        }

        let rule = Rule::new_block(
            validators::sanitize_label(input.label.as_deref().unwrap_or("-")),
            BlockRule {
                ip,
                range,
                note: input.note.clone().unwrap_or_default(),
                bantime: input.bantime.unwrap_or(0),
            },
            input.enabled.unwrap_or(true),
        );

        self.persist_new(rules, rule, echo(&input)).await
    }

    /// Updates an existing block rule in place. The `name` is immutable; a
    /// payload trying to change it is rejected before any validation.
    pub async fn update_block(&self, name: Uuid, input: BlockInput) -> OpResult {
        let _guard = self.lock.lock().await;

        let mut rules = match self.store.load().await {
            Ok(rules) => rules,
            Err(e) => return store_failure(&e, echo(&input)),
        };

        let Some(existing) = rules
            .rules
            .iter()
            .find(|r| r.name == name && r.kind.as_block().is_some())
        else {
            return OpResult::single("query", "Rule not found", echo(&input));
        };

        if let Some(requested) = input.name.as_deref()
            && requested != existing.name.to_string()
        {
            return OpResult::single("name", "Name cannot be changed", echo(&input));
        }

        let mut errors = BTreeMap::new();

        let ip = match input.ip.as_deref() {
            None | Some("") => {
                errors.insert("ip".to_string(), "IP is a required field".to_string());
                None
            }
            Some(raw) => match validators::validate_ip(raw) {
                Ok(ip) => {
                    let taken_by_other = rules
                        .blocks()
                        .any(|(r, b)| b.ip == ip && r.name != name);
                    if taken_by_other {
                        errors.insert("ip".to_string(), "IP already blocked".to_string());
                        None
                    } else {
                        Some(ip)
                    }
                }
                Err(msg) => {
                    errors.insert("ip".to_string(), msg);
                    None
                }
            },
        };

        let range = match input.range {
            None => {
                errors.insert("range".to_string(), "Range is a required field".to_string());
                None
            }
            Some(range) => match validators::validate_block_range(range) {
                Ok(range) => Some(range),
                Err(msg) => {
                    errors.insert("range".to_string(), msg);
                    None
                }
            },
        };

        if !errors.is_empty() {
            return OpResult::failure(errors, echo(&input));
        }

        let Some(rule) = rules.find_mut(&name) else {
            return OpResult::single("query", "Rule not found", echo(&input));
        };

        if let Some(label) = input.label.as_deref() {
            rule.label = validators::sanitize_label(label);
        }
        if let Some(enabled) = input.enabled {
            rule.enabled = enabled;
        }
        if let RuleKind::Block(block) = &mut rule.kind {
            if let Some(ip) = ip {
                block.ip = ip;
            }
            if let Some(range) = range {
                block.range = range;
            }
            if let Some(note) = input.note.clone() {
                block.note = note;
            }
            if let Some(bantime) = input.bantime {
                block.bantime = bantime;
            }
        }
        rule.touch();

        self.persist_updated(rules, name, echo(&input)).await
    }

    /// Adds a port forward rule.
    ///
    /// The external port must be numeric, inside one of the managed ranges,
    /// and not claimed by any other forward (enabled or not).
    pub async fn add_forward(&self, input: ForwardInput) -> OpResult {
        let _guard = self.lock.lock().await;

        let rules = match self.store.load().await {
            Ok(rules) => rules,
            Err(e) => return store_failure(&e, echo(&input)),
        };

        let mut errors = BTreeMap::new();

        let port = validate_forward_port(&rules, input.port.as_deref(), None, true, &mut errors);
        let ip = validate_optional_ip(input.ip.as_deref(), &mut errors);
        let preset = validate_preset(input.preset.as_deref(), &mut errors);
        let service_port = validate_service_port(input.service_port.as_deref(), &mut errors);

        if !errors.is_empty() {
            return OpResult::failure(errors, echo(&input));
        }

        let Some(port) = port else {
            return OpResult::single("port", "Port is a required field", echo(&input));
        };

        if rules.len() >= MAX_RULES {
            return OpResult::single("store", "Rule limit reached", echo(&input));
        }

        let rule = Rule::new_forward(
            validators::sanitize_label(input.label.as_deref().unwrap_or("-")),
            ForwardRule {
                ip,
                port,
                preset: preset.unwrap_or_default(),
                service_port,
            },
            input.enabled.unwrap_or(true),
        );

        self.persist_new(rules, rule, echo(&input)).await
    }

    /// Updates an existing forward rule in place
    pub async fn update_forward(&self, name: Uuid, input: ForwardInput) -> OpResult {
        let _guard = self.lock.lock().await;

        let mut rules = match self.store.load().await {
            Ok(rules) => rules,
            Err(e) => return store_failure(&e, echo(&input)),
        };

        let Some(existing) = rules
            .rules
            .iter()
            .find(|r| r.name == name && r.kind.as_forward().is_some())
        else {
            return OpResult::single("query", "Forward not found", echo(&input));
        };

        if let Some(requested) = input.name.as_deref()
            && requested != existing.name.to_string()
        {
            return OpResult::single("name", "Name cannot be changed", echo(&input));
        }

        let mut errors = BTreeMap::new();

        let port = validate_forward_port(&rules, input.port.as_deref(), Some(&name), false, &mut errors);
        let ip = validate_optional_ip(input.ip.as_deref(), &mut errors);
        let preset = validate_preset(input.preset.as_deref(), &mut errors);
        let service_port = validate_service_port(input.service_port.as_deref(), &mut errors);

        if !errors.is_empty() {
            return OpResult::failure(errors, echo(&input));
        }

        let Some(rule) = rules.find_mut(&name) else {
            return OpResult::single("query", "Forward not found", echo(&input));
        };

        if let Some(label) = input.label.as_deref() {
            rule.label = validators::sanitize_label(label);
        }
        if let Some(enabled) = input.enabled {
            rule.enabled = enabled;
        }
        if let RuleKind::Forward(forward) = &mut rule.kind {
            if let Some(port) = port {
                forward.port = port;
            }
            if ip.is_some() {
                forward.ip = ip;
            }
            if let Some(preset) = preset {
                forward.preset = preset;
            }
            if service_port.is_some() {
                forward.service_port = service_port;
            }
        }
        rule.touch();

        self.persist_updated(rules, name, echo(&input)).await
    }

    /// Removes a rule by name, independent of its dirty state
    pub async fn remove(&self, name: Uuid) -> OpResult {
        let _guard = self.lock.lock().await;

        let mut rules = match self.store.load().await {
            Ok(rules) => rules,
            Err(e) => return store_failure(&e, None),
        };

        let Some(removed) = rules.remove(&name) else {
            return OpResult::single("query", "Rule not found", None);
        };

        if let Err(e) = self.store.save(&rules).await {
            return store_failure(&e, None);
        }

        OpResult::success(serde_json::to_value(&removed).ok())
    }

    /// Marks one rule (or every rule) dirty without changing its data, so
    /// the next build cycle regenerates the document
    pub async fn rebuild(&self, name: Option<Uuid>) -> OpResult {
        let _guard = self.lock.lock().await;

        let mut rules = match self.store.load().await {
            Ok(rules) => rules,
            Err(e) => return store_failure(&e, None),
        };

        match name {
            Some(name) => {
                let Some(rule) = rules.find_mut(&name) else {
                    return OpResult::single("query", "Rule not found", None);
                };
                rule.has_change = true;
            }
            None => {
                for rule in &mut rules.rules {
                    rule.has_change = true;
                }
            }
        }

        if let Err(e) = self.store.save(&rules).await {
            return store_failure(&e, None);
        }

        OpResult::success(None)
    }

    /// Fetches matching rules
    pub async fn fetch(&self, selector: Selector) -> Result<Vec<Rule>, StoreError> {
        let rules = self.store.load().await?;
        Ok(rules
            .rules
            .into_iter()
            .filter(|r| match selector {
                Selector::All => true,
                Selector::Name(name) => r.name == name,
                Selector::Blocks => r.kind.as_block().is_some(),
                Selector::Forwards => r.kind.as_forward().is_some(),
            })
            .collect())
    }

    /// Counts matching rules
    pub async fn count(&self, selector: Selector) -> Result<usize, StoreError> {
        Ok(self.fetch(selector).await?.len())
    }

    /// Aggregate counts over the rule set and the managed port space
    pub async fn status(&self) -> Result<StatusSummary, StoreError> {
        let rules = self.store.load().await?;
        Ok(StatusSummary {
            blocked_rules: rules.block_count(),
            forward_rules: rules.forward_count(),
            total: ports::total_managed_ports(),
            available: ports::available_ports(&rules, PortClass::All).len(),
        })
    }

    /// Free ports within a class's managed range
    pub async fn available_ports(&self, class: PortClass) -> Result<Vec<u16>, StoreError> {
        let rules = self.store.load().await?;
        Ok(ports::available_ports(&rules, class))
    }

    /// True if any forward rule claims this external port
    pub async fn check_port_in_use(&self, port: u16) -> Result<bool, StoreError> {
        let rules = self.store.load().await?;
        Ok(ports::port_in_use(&rules, port))
    }

    /// True iff the port lies inside the union of the managed ranges
    pub fn check_allowed_port(port: u16) -> bool {
        ports::port_allowed(port)
    }

    /// Deletes every rule. With `purge`, the store document itself (and its
    /// checksum sidecar) is removed instead of being rewritten empty.
    pub async fn reset(&self, purge: bool) -> OpResult {
        let _guard = self.lock.lock().await;

        let result = if purge {
            self.store.purge().await
        } else {
            self.store.save(&RuleSet::new()).await
        };

        match result {
            Ok(()) => {
                crate::audit::log_reset(purge, true, None).await;
                OpResult::success(None)
            }
            Err(e) => {
                crate::audit::log_reset(purge, false, Some(e.to_string())).await;
                store_failure(&e, None)
            }
        }
    }

    async fn persist_new(
        &self,
        mut rules: RuleSet,
        rule: Rule,
        input_echo: Option<serde_json::Value>,
    ) -> OpResult {
        let stored = serde_json::to_value(&rule).ok();
        rules.rules.push(rule);

        match self.store.save(&rules).await {
            Ok(()) => OpResult::success(stored),
            Err(e) => store_failure(&e, input_echo),
        }
    }

    async fn persist_updated(
        &self,
        rules: RuleSet,
        name: Uuid,
        input_echo: Option<serde_json::Value>,
    ) -> OpResult {
        let stored = rules.find(&name).and_then(|r| serde_json::to_value(r).ok());

        match self.store.save(&rules).await {
            Ok(()) => OpResult::success(stored),
            Err(e) => store_failure(&e, input_echo),
        }
    }
}

fn echo<T: Serialize>(input: &T) -> Option<serde_json::Value> {
    serde_json::to_value(input).ok()
}

fn store_failure(error: &StoreError, values: Option<serde_json::Value>) -> OpResult {
    tracing::error!("store operation failed: {error}");
    OpResult::single("store", &error.to_string(), values)
}

/// External port validation shared by add and update: numeric, allowed
/// range membership, and uniqueness across all forwards (`except` skips the
/// record being updated; updates may omit the port to keep the stored one).
fn validate_forward_port(
    rules: &RuleSet,
    raw: Option<&str>,
    except: Option<&Uuid>,
    required: bool,
    errors: &mut BTreeMap<String, String>,
) -> Option<u16> {
    let Some(raw) = raw else {
        if required {
            errors.insert("port".to_string(), "Port is a required field".to_string());
        }
        return None;
    };

    let port = match validators::parse_port(raw) {
        Ok(port) => port,
        Err(msg) => {
            errors.insert("port".to_string(), msg);
            return None;
        }
    };

    if rules.forward_port_taken(port, except) {
        errors.insert("port".to_string(), "Port already in use".to_string());
        return None;
    }

    if !ports::port_allowed(port) {
        errors.insert("port".to_string(), "Invalid port number".to_string());
        return None;
    }

    Some(port)
}

fn validate_optional_ip(
    raw: Option<&str>,
    errors: &mut BTreeMap<String, String>,
) -> Option<std::net::IpAddr> {
    match raw {
        None | Some("") => None,
        Some(raw) => match validators::validate_ip(raw) {
            Ok(ip) => Some(ip),
            Err(msg) => {
                errors.insert("ip".to_string(), msg);
                None
            }
        },
    }
}

fn validate_preset(
    raw: Option<&str>,
    errors: &mut BTreeMap<String, String>,
) -> Option<ServicePreset> {
    match raw {
        None | Some("") => None,
        Some(raw) => match ServicePreset::from_str(&raw.to_lowercase()) {
            Ok(preset) => Some(preset),
            Err(_) => {
                errors.insert("preset".to_string(), "Invalid service preset".to_string());
                None
            }
        },
    }
}

fn validate_service_port(
    raw: Option<&str>,
    errors: &mut BTreeMap<String, String>,
) -> Option<u16> {
    match raw {
        None | Some("") => None,
        Some(raw) => match validators::parse_port(raw) {
            Ok(port) => Some(port),
            Err(_) => {
                errors.insert(
                    "service_port".to_string(),
                    "Invalid service port number".to_string(),
                );
                None
            }
        },
    }
}
