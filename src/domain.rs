// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration domains and their record types.
//!
//! A [`ConfigDomain`] is one category of business configuration (constants,
//! text, flags, formulas, compliance limits, heat sources, municipalities).
//! Remote rows for a domain are turned into a [`DomainMap`]: a sorted map from
//! the domain's business key to the row. Sorting makes the serialized form
//! deterministic, which the snapshot checksum relies on.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Keyed content of one domain. BTreeMap keeps serialization order stable.
pub type DomainMap = BTreeMap<String, Value>;

/// A named category of configuration data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigDomain {
    Calculations,
    Content,
    FeatureFlags,
    Formulas,
    TekRequirements,
    HeatSources,
    Municipalities,
}

impl ConfigDomain {
    pub const ALL: [ConfigDomain; 7] = [
        Self::Calculations,
        Self::Content,
        Self::FeatureFlags,
        Self::Formulas,
        Self::TekRequirements,
        Self::HeatSources,
        Self::Municipalities,
    ];

    /// Stable name used in manifests, metrics and config overrides.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calculations => "calculations",
            Self::Content => "content",
            Self::FeatureFlags => "feature_flags",
            Self::Formulas => "formulas",
            Self::TekRequirements => "tek_requirements",
            Self::HeatSources => "heat_sources",
            Self::Municipalities => "municipalities",
        }
    }

    /// Table name in the remote store.
    #[must_use]
    pub fn table(&self) -> &'static str {
        match self {
            Self::TekRequirements => "tek17_requirements",
            Self::Municipalities => "municipality_price_zones",
            other => other.as_str(),
        }
    }

    /// Column holding the business key in remote rows.
    #[must_use]
    pub fn key_field(&self) -> &'static str {
        match self {
            Self::Calculations | Self::Formulas | Self::HeatSources => "name",
            Self::Content => "key",
            Self::FeatureFlags => "feature_name",
            Self::TekRequirements => "building_type",
            Self::Municipalities => "municipality_code",
        }
    }

    /// Column used to order remote rows.
    #[must_use]
    pub fn order_field(&self) -> &'static str {
        match self {
            Self::HeatSources => "priority",
            other => other.key_field(),
        }
    }

    /// File name of the domain snapshot.
    #[must_use]
    pub fn snapshot_file(&self) -> &'static str {
        match self {
            Self::Calculations => "calculations.json",
            Self::Content => "content-no.json",
            Self::FeatureFlags => "feature-flags.json",
            Self::Formulas => "formulas.json",
            Self::TekRequirements => "tek17-requirements.json",
            Self::HeatSources => "heat-sources.json",
            Self::Municipalities => "municipalities.json",
        }
    }

    /// Optional domains may not have a remote table yet.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::HeatSources)
    }

    /// Domains with compiled-in defaults for cold starts.
    #[must_use]
    pub fn has_hardcoded_fallback(&self) -> bool {
        matches!(
            self,
            Self::Calculations | Self::Formulas | Self::TekRequirements | Self::HeatSources
        )
    }

    /// Turn remote rows into the domain's keyed map.
    ///
    /// Rows without a usable key are dropped. Municipality rows are reshaped
    /// into the snapshot layout; everything else is kept verbatim.
    #[must_use]
    pub fn keyed_map(&self, rows: Vec<Value>) -> DomainMap {
        let key_field = self.key_field();
        let mut map = DomainMap::new();
        for row in rows {
            let Some(key) = row.get(key_field).and_then(key_string) else {
                continue;
            };
            let (key, record) = match self {
                Self::Municipalities => {
                    let code = normalize_municipality_code(&key);
                    let record = municipality_record(&code, &row);
                    (code, record)
                }
                _ => (key, row),
            };
            map.insert(key, record);
        }
        map
    }
}

impl fmt::Display for ConfigDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s || d.table() == s)
            .ok_or_else(|| format!("unknown config domain '{s}'"))
    }
}

/// Keys may arrive as strings or numbers (municipality codes sometimes do).
fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn municipality_record(code: &str, row: &Value) -> Value {
    json!({
        "code": code,
        "name": row.get("municipality_name").cloned().unwrap_or(Value::Null),
        "fylke": row.get("fylke").and_then(Value::as_str).unwrap_or(""),
        "price_zone": row.get("price_zone").cloned().unwrap_or(Value::Null),
        "climate_zone": row.get("climate_zone").cloned().unwrap_or(Value::Null),
        "heating_degree_days": row.get("heating_degree_days").cloned().unwrap_or(Value::Null),
    })
}

/// Normalize a municipality number to four digits (`"301"` → `"0301"`).
#[must_use]
pub fn normalize_municipality_code(code: &str) -> String {
    let trimmed = code.trim().trim_start_matches('0');
    format!("{trimmed:0>4}")
}

// ═══════════════════════════════════════════════════════════════════════════
// Typed records
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calculation {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntry {
    pub key: String,
    pub norwegian_text: String,
    #[serde(default)]
    pub english_text: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub feature_name: String,
    pub enabled: bool,
    #[serde(default)]
    pub rollout_percentage: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A formula row as stored remotely: free text plus declared variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaRecord {
    pub name: String,
    #[serde(alias = "expression")]
    pub formula: String,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TekRequirement {
    pub building_type: String,
    pub max_energy_kwh_m2: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatSource {
    pub name: String,
    #[serde(default)]
    pub norwegian_name: Option<String>,
    #[serde(default)]
    pub efficiency_cop: Option<f64>,
    #[serde(default)]
    pub annual_efficiency: Option<f64>,
    #[serde(default)]
    pub typical_investment_kr: Option<f64>,
    #[serde(default)]
    pub typical_savings_percent: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Municipality {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fylke: Option<String>,
    pub price_zone: PriceZone,
    #[serde(default)]
    pub climate_zone: Option<String>,
    #[serde(default)]
    pub heating_degree_days: Option<f64>,
}

/// Norwegian electricity price zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceZone {
    NO1,
    NO2,
    NO3,
    NO4,
    NO5,
}

impl PriceZone {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NO1 => "NO1",
            Self::NO2 => "NO2",
            Self::NO3 => "NO3",
            Self::NO4 => "NO4",
            Self::NO5 => "NO5",
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::NO1 => "Østlandet (Eastern Norway)",
            Self::NO2 => "Sørlandet (Southern Norway)",
            Self::NO3 => "Midt-Norge (Central Norway)",
            Self::NO4 => "Nord-Norge (Northern Norway)",
            Self::NO5 => "Vestlandet (Western Norway)",
        }
    }
}

impl fmt::Display for PriceZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NO1" => Ok(Self::NO1),
            "NO2" => Ok(Self::NO2),
            "NO3" => Ok(Self::NO3),
            "NO4" => Ok(Self::NO4),
            "NO5" => Ok(Self::NO5),
            other => Err(format!("invalid price zone '{other}'")),
        }
    }
}
