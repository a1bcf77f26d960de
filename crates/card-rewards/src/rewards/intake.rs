//! Imports card reward records from the metadata store's JSON export.
//!
//! Records follow the stored column layout (`card_name`, `base_rate`, `reward_structure_type`,
//! `static_rewards`, ...). Rule lists may be inline arrays or JSON-encoded strings, and
//! condition entries may be plain strings or `{id, name}` objects. Everything is normalized
//! here so the rest of the engine only sees canonical keys. Problems with one rule or one card
//! are recorded as [`IntakeIssue`]s and logged; they never fail the whole import.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{info, warn};

use super::domain::{
    canonical_key, CardId, ConditionSet, CreditCard, DynamicTier, PeriodStatus, RewardRule,
    RewardStructure, RewardSystem, RotatingRule, TierId,
};
use super::period::PeriodKind;

#[derive(Debug)]
pub enum CardCatalogError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Shape(&'static str),
}

impl std::fmt::Display for CardCatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CardCatalogError::Io(err) => write!(f, "failed to read card catalog: {}", err),
            CardCatalogError::Json(err) => write!(f, "invalid card catalog JSON: {}", err),
            CardCatalogError::Shape(detail) => write!(f, "unexpected card catalog shape: {}", detail),
        }
    }
}

impl std::error::Error for CardCatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CardCatalogError::Io(err) => Some(err),
            CardCatalogError::Json(err) => Some(err),
            CardCatalogError::Shape(_) => None,
        }
    }
}

impl From<std::io::Error> for CardCatalogError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for CardCatalogError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

/// Recoverable problem found while importing one card.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IntakeIssue {
    #[error("card {card}: {detail}")]
    Configuration { card: String, detail: String },
    #[error("card {card}: skipped {location}: {detail}")]
    MalformedRule {
        card: String,
        location: String,
        detail: String,
    },
    #[error("record {index}: {detail}")]
    UnusableCard { index: usize, detail: String },
}

/// Cards that survived import, plus every issue met on the way.
#[derive(Debug, Clone, Default)]
pub struct CardCatalogImport {
    pub cards: Vec<CreditCard>,
    pub issues: Vec<IntakeIssue>,
}

pub struct CardCatalogImporter;

impl CardCatalogImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<CardCatalogImport, CardCatalogError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<CardCatalogImport, CardCatalogError> {
        let value: Value = serde_json::from_reader(reader)?;
        Self::from_value(&value)
    }

    /// Accepts either a top-level array of card records or an object with a `cards` array.
    pub fn from_value(value: &Value) -> Result<CardCatalogImport, CardCatalogError> {
        let records = match value {
            Value::Array(records) => records,
            Value::Object(map) => match map.get("cards") {
                Some(Value::Array(records)) => records,
                _ => return Err(CardCatalogError::Shape("expected a `cards` array")),
            },
            _ => return Err(CardCatalogError::Shape("expected an array of card records")),
        };

        let mut import = CardCatalogImport::default();
        for (index, record) in records.iter().enumerate() {
            let mut log = IssueLog::default();
            if let Some(card) = parse_card(index, record, &mut log) {
                import.cards.push(card);
            }
            import.issues.extend(log.issues);
        }

        info!(
            cards = import.cards.len(),
            issues = import.issues.len(),
            "imported card catalog"
        );
        Ok(import)
    }
}

#[derive(Default)]
struct IssueLog {
    issues: Vec<IntakeIssue>,
}

impl IssueLog {
    fn push(&mut self, issue: IntakeIssue) {
        warn!(%issue, "card catalog intake issue");
        self.issues.push(issue);
    }

    fn configuration(&mut self, card: &CardId, detail: impl Into<String>) {
        self.push(IntakeIssue::Configuration {
            card: card.0.clone(),
            detail: detail.into(),
        });
    }

    fn malformed_rule(&mut self, card: &CardId, location: String, detail: String) {
        self.push(IntakeIssue::MalformedRule {
            card: card.0.clone(),
            location,
            detail,
        });
    }
}

fn field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| map.get(*name))
        .find(|value| !value.is_null())
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => canonical_key(raw),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Canonical key of one condition entry: the string itself, or an object's `id` falling back
/// to its `name`.
pub fn condition_key(entry: &Value) -> Option<String> {
    match entry {
        Value::Object(map) => map
            .get("id")
            .and_then(scalar_key)
            .or_else(|| map.get("name").and_then(scalar_key)),
        other => scalar_key(other),
    }
}

/// Display label for references such as banks and points programs: `name` wins over `id`.
fn label(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map
            .get("name")
            .and_then(scalar_key)
            .or_else(|| map.get("id").and_then(scalar_key)),
        other => scalar_key(other),
    }
}

fn condition_set(value: Option<&Value>) -> Result<ConditionSet, String> {
    let entries = match value {
        None | Some(Value::Null) => return Ok(ConditionSet::unrestricted()),
        Some(Value::Array(entries)) => entries,
        Some(other) => return Err(format!("condition is not a list: {other}")),
    };

    let mut set = ConditionSet::unrestricted();
    for entry in entries {
        match condition_key(entry) {
            Some(key) => set.insert(&key),
            None if entry.as_str().map(str::trim) == Some("") => {}
            None => return Err(format!("unrecognized condition entry: {entry}")),
        }
    }
    Ok(set)
}

fn parse_rate(value: Option<&Value>) -> Result<f64, String> {
    let rate = match value {
        None | Some(Value::Null) => return Err("missing rate".to_string()),
        Some(Value::Number(number)) => number
            .as_f64()
            .ok_or_else(|| format!("non-numeric rate: {number}"))?,
        Some(Value::String(raw)) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("non-numeric rate: {raw:?}"))?,
        Some(other) => return Err(format!("non-numeric rate: {other}")),
    };

    if !rate.is_finite() {
        return Err(format!("non-finite rate: {rate}"));
    }
    if rate < 0.0 {
        return Err(format!("negative rate: {rate}"));
    }
    Ok(rate)
}

/// Rule lists are stored either inline or as JSON-encoded text.
fn decode_list(value: Option<&Value>) -> Result<Vec<Value>, String> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => Ok(entries.clone()),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(Vec::new()),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(entries)) => Ok(entries),
            Ok(_) => Err("encoded list is not an array".to_string()),
            Err(err) => Err(format!("encoded list is not valid JSON: {err}")),
        },
        Some(other) => Err(format!("expected a list, found {other}")),
    }
}

/// Integer given as a JSON integer, an integral float, or a numeric string.
fn whole_number(value: &Value) -> Option<i64> {
    let number = match value {
        Value::Number(number) => match number.as_i64() {
            Some(count) => return Some(count),
            None => number.as_f64()?,
        },
        Value::String(raw) => {
            let raw = raw.trim();
            match raw.parse::<i64>() {
                Ok(count) => return Some(count),
                Err(_) => raw.parse::<f64>().ok()?,
            }
        }
        _ => return None,
    };
    (number.is_finite() && number.fract() == 0.0 && number.abs() <= i64::MAX as f64)
        .then_some(number as i64)
}

fn parse_rule(value: &Value, default_rate: Option<f64>) -> Result<RewardRule, String> {
    let map = value
        .as_object()
        .ok_or_else(|| "rule is not an object".to_string())?;

    let rate = match (field(map, &["rate"]), default_rate) {
        (None, Some(rate)) => rate,
        (raw, _) => parse_rate(raw)?,
    };

    Ok(RewardRule {
        category: condition_set(field(map, &["category", "categories"]))?,
        payee: condition_set(field(map, &["payee", "payees"]))?,
        payment_method: condition_set(field(
            map,
            &["payment_method", "paymentMethod", "payment_methods"],
        ))?,
        rate,
    })
}

fn period_numbers(value: Option<&Value>, max: u32, what: &str) -> Result<BTreeSet<u32>, String> {
    let entries = match value {
        None | Some(Value::Null) => return Ok(BTreeSet::new()),
        Some(Value::Array(entries)) => entries,
        Some(other) => return Err(format!("{what} is not a list: {other}")),
    };

    entries
        .iter()
        .map(|entry| {
            let number = match entry {
                Value::Number(number) => number.as_u64(),
                Value::String(raw) => raw.trim().parse::<u64>().ok(),
                _ => None,
            };
            match number {
                Some(n) if (1..=u64::from(max)).contains(&n) => Ok(n as u32),
                _ => Err(format!("{what} entry out of range 1-{max}: {entry}")),
            }
        })
        .collect()
}

fn parse_rotating_rule(value: &Value) -> Result<RotatingRule, String> {
    let rule = parse_rule(value, None)?;
    let map = value
        .as_object()
        .ok_or_else(|| "rule is not an object".to_string())?;

    let is_rotating = match field(map, &["is_rotating", "isRotating"]) {
        None => true,
        Some(Value::Bool(flag)) => *flag,
        Some(other) => return Err(format!("is_rotating is not a boolean: {other}")),
    };

    Ok(RotatingRule {
        rule,
        is_rotating,
        months: period_numbers(field(map, &["months"]), 12, "months")?,
        quarters: period_numbers(field(map, &["quarters"]), 4, "quarters")?,
    })
}

fn parse_rules<T>(
    card: &CardId,
    list_name: &str,
    value: Option<&Value>,
    log: &mut IssueLog,
    parse: impl Fn(&Value) -> Result<T, String>,
) -> Vec<T> {
    let entries = match decode_list(value) {
        Ok(entries) => entries,
        Err(detail) => {
            log.configuration(card, format!("{list_name}: {detail}"));
            return Vec::new();
        }
    };

    let mut rules = Vec::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        match parse(entry) {
            Ok(rule) => rules.push(rule),
            Err(detail) => log.malformed_rule(card, format!("{list_name}[{position}]"), detail),
        }
    }
    rules
}

fn parse_tier(card: &CardId, index: usize, value: &Value, log: &mut IssueLog) -> Option<DynamicTier> {
    let location = format!("dynamic_tiers[{index}]");
    let Some(map) = value.as_object() else {
        log.configuration(card, format!("{location}: tier is not an object"));
        return None;
    };

    let id = field(map, &["id"])
        .and_then(scalar_key)
        .unwrap_or_else(|| format!("tier-{}", index + 1));
    let name = field(map, &["name"])
        .and_then(scalar_key)
        .unwrap_or_else(|| id.clone());

    let rate = match parse_rate(field(map, &["rate"])) {
        Ok(rate) => rate,
        Err(detail) => {
            log.configuration(card, format!("{location}: {detail}"));
            return None;
        }
    };

    let max_active = match field(map, &["max_active", "maxActive"]).and_then(whole_number) {
        Some(count) if count > 0 => count as usize,
        other => {
            log.configuration(
                card,
                format!("{location}: max_active must be a positive integer, found {other:?}"),
            );
            return None;
        }
    };

    let eligible_rules = parse_rules(
        card,
        &format!("{location}.eligible_rules"),
        field(map, &["eligible_rules", "eligibleRules", "rules"]),
        log,
        |entry| parse_rule(entry, Some(rate)),
    );

    Some(DynamicTier {
        id: TierId(id),
        name,
        rate,
        eligible_rules,
        max_active,
    })
}

fn parse_period_status(card: &CardId, value: Option<&Value>, log: &mut IssueLog) -> Vec<PeriodStatus> {
    let entries = match decode_list(value) {
        Ok(entries) => entries,
        Err(detail) => {
            log.configuration(card, format!("rotating_period_status: {detail}"));
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<PeriodStatus>(entry) {
            Ok(status) => Some(status),
            Err(err) => {
                log.configuration(card, format!("rotating_period_status entry ignored: {err}"));
                None
            }
        })
        .collect()
}

fn parse_period_kind(
    card: &CardId,
    map: &Map<String, Value>,
    names: &[&str],
    log: &mut IssueLog,
) -> Option<PeriodKind> {
    let parsed = field(map, names)
        .and_then(Value::as_str)
        .and_then(PeriodKind::parse);
    if parsed.is_none() {
        log.configuration(
            card,
            format!("{} must be Monthly or Quarterly; treating card as Static", names[0]),
        );
    }
    parsed
}

fn parse_structure(card: &CardId, map: &Map<String, Value>, log: &mut IssueLog) -> RewardStructure {
    let fallback = RewardStructure::Static { rules: Vec::new() };
    let kind = field(map, &["reward_structure_type", "structure_type"])
        .and_then(Value::as_str)
        .map(|raw| raw.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "static".to_string());

    match kind.as_str() {
        "static" => RewardStructure::Static {
            rules: parse_rules(
                card,
                "static_rewards",
                field(map, &["static_rewards"]),
                log,
                |entry| parse_rule(entry, None),
            ),
        },
        "rotating" => {
            let Some(period) = parse_period_kind(card, map, &["rotation_period"], log) else {
                return fallback;
            };
            RewardStructure::Rotating {
                rules: parse_rules(
                    card,
                    "rotating_rules",
                    field(map, &["rotating_rules"]),
                    log,
                    parse_rotating_rule,
                ),
                period,
                period_status: parse_period_status(card, field(map, &["rotating_period_status"]), log),
            }
        }
        "dynamic" => {
            let Some(activation_period) =
                parse_period_kind(card, map, &["activation_period"], log)
            else {
                return fallback;
            };
            let tiers = match decode_list(field(map, &["dynamic_tiers", "tiers"])) {
                Ok(entries) => entries
                    .iter()
                    .enumerate()
                    .filter_map(|(index, entry)| parse_tier(card, index, entry, log))
                    .collect(),
                Err(detail) => {
                    log.configuration(card, format!("dynamic_tiers: {detail}"));
                    Vec::new()
                }
            };
            RewardStructure::Dynamic {
                tiers,
                activation_period,
                requires_activation: field(map, &["requires_activation"])
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }
        }
        other => {
            log.configuration(
                card,
                format!("unknown reward_structure_type {other:?}; treating card as Static"),
            );
            fallback
        }
    }
}

fn parse_reward_system(card: &CardId, map: &Map<String, Value>, log: &mut IssueLog) -> RewardSystem {
    let system = field(map, &["reward_system"])
        .and_then(Value::as_str)
        .map(|raw| raw.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "cashback".to_string());
    let program = field(map, &["points_program", "points_program_id"]).and_then(label);

    match (system.as_str(), program) {
        ("points", Some(program)) => RewardSystem::Points { program },
        ("points", None) => {
            log.configuration(card, "Points reward system requires a points program; using Cashback");
            RewardSystem::Cashback
        }
        ("cashback", Some(program)) => {
            log.configuration(
                card,
                format!("points program {program:?} ignored for Cashback reward system"),
            );
            RewardSystem::Cashback
        }
        ("cashback", None) => RewardSystem::Cashback,
        (other, _) => {
            log.configuration(card, format!("unknown reward_system {other:?}; using Cashback"));
            RewardSystem::Cashback
        }
    }
}

fn parse_card(index: usize, record: &Value, log: &mut IssueLog) -> Option<CreditCard> {
    let Some(map) = record.as_object() else {
        log.push(IntakeIssue::UnusableCard {
            index,
            detail: "record is not an object".to_string(),
        });
        return None;
    };

    let Some(id) = field(map, &["id", "card_id"]).and_then(scalar_key) else {
        log.push(IntakeIssue::UnusableCard {
            index,
            detail: "record has no card id".to_string(),
        });
        return None;
    };
    let id = CardId(id);

    let name = field(map, &["card_name", "name"])
        .and_then(scalar_key)
        .unwrap_or_else(|| id.0.clone());
    let bank = field(map, &["bank", "bank_name", "bank_id"]).and_then(label);

    let base_rate = match field(map, &["base_rate"]) {
        None => 0.0,
        raw => parse_rate(raw).unwrap_or_else(|detail| {
            log.configuration(&id, format!("base_rate {detail}; using 0"));
            0.0
        }),
    };

    let reward_system = parse_reward_system(&id, map, log);
    let structure = parse_structure(&id, map, log);

    Some(CreditCard {
        id,
        name,
        bank,
        base_rate,
        reward_system,
        structure,
    })
}
