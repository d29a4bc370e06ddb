/// Collections and typed records read by the reminder jobs.
///
/// Documents travel through the store as plain JSON objects so partial-field
/// updates and write events stay field-aware. Each record type decodes the
/// subset of fields it cares about; everything else is ignored.
///
/// Wire field names are camelCase (`cafEnd`, `dailyGoal`, `fcmToken`, ...)
/// because the user-facing application writes them that way.
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type Document = serde_json::Map<String, serde_json::Value>;

pub const FIELD_CAF_END:        &str = "cafEnd";
pub const FIELD_CURRENT_INTAKE: &str = "currentIntake";
pub const FIELD_NOTIFIED:       &str = "notified";

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Caffeine,
    Hydration,
    Users,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Caffeine  => "caffeine",
            Collection::Hydration => "hydration",
            Collection::Users     => "users",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "caffeine"  => Ok(Collection::Caffeine),
            "hydration" => Ok(Collection::Hydration),
            "users"     => Ok(Collection::Users),
            other       => Err(format!("Unknown collection '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaffeineRecord {
    /// When the caffeine crash begins.
    #[serde(default)]
    pub caf_end:  Option<DateTime<Utc>>,
    #[serde(default)]
    pub notified: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationRecord {
    #[serde(default)]
    pub daily_goal:     Option<f64>,
    #[serde(default)]
    pub current_intake: Option<f64>,
    #[serde(default)]
    pub notified:       Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Time of day, e.g. "10:00 PM".
    #[serde(default)]
    pub bedtime:   Option<String>,
    /// Push delivery address.
    #[serde(default)]
    pub fcm_token: Option<String>,
}

impl CaffeineRecord {
    pub fn is_notified(&self) -> bool {
        self.notified.unwrap_or(false)
    }
}

impl HydrationRecord {
    pub fn is_notified(&self) -> bool {
        self.notified.unwrap_or(false)
    }
}

/// Decode a typed record from a raw document.
pub fn decode<R: DeserializeOwned>(doc: &Document) -> Result<R, serde_json::Error> {
    serde_json::from_value(serde_json::Value::Object(doc.clone()))
}

/// The single-field update that sets the dedup flag.
pub fn notified_update(value: bool) -> Document {
    let mut doc = Document::new();
    doc.insert(FIELD_NOTIFIED.to_owned(), serde_json::Value::Bool(value));
    doc
}
