use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Hosted model variant used to generate a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum ModelId {
    #[default]
    #[sqlx(rename = "gemini-2.5-flash")]
    #[serde(rename = "gemini-2.5-flash")]
    Gemini25Flash,
    #[sqlx(rename = "gemini-2.5-pro")]
    #[serde(rename = "gemini-2.5-pro")]
    Gemini25Pro,
    #[sqlx(rename = "gemini-2.5-flash-lite")]
    #[serde(rename = "gemini-2.5-flash-lite")]
    Gemini25FlashLite,
    #[sqlx(rename = "gemini-2.0-flash")]
    #[serde(rename = "gemini-2.0-flash")]
    Gemini20Flash,
}

impl ModelId {
    /// Every supported variant, in the order offered to users.
    pub const ALL: [ModelId; 4] = [
        Self::Gemini25Flash,
        Self::Gemini25Pro,
        Self::Gemini25FlashLite,
        Self::Gemini20Flash,
    ];

    /// Identifier understood by the model endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini25Flash => "gemini-2.5-flash",
            Self::Gemini25Pro => "gemini-2.5-pro",
            Self::Gemini25FlashLite => "gemini-2.5-flash-lite",
            Self::Gemini20Flash => "gemini-2.0-flash",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ModelIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ModelIdParseError(s.to_owned()))
    }
}

fn supported_models() -> String {
    let names: Vec<&str> = ModelId::ALL.iter().map(ModelId::as_str).collect();
    names.join(", ")
}

/// Error returned when parsing an unsupported [`ModelId`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported model {0:?} (expected one of: {supported})", supported = supported_models())]
pub struct ModelIdParseError(pub String);

// ---------------------------------------------------------------------------
// Plan contents
// ---------------------------------------------------------------------------

/// A validated task within a plan.
///
/// Stored inside the plan's `plan_json` array; never a row of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    /// Identifier, unique within the plan.
    pub id: String,
    pub title: String,
    /// Estimated duration in days. Always positive.
    pub duration_days: f64,
    /// Ids of tasks that must finish before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A persisted plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub goal: String,
    pub model_used: ModelId,
    /// Task list in the order the model returned it.
    #[sqlx(rename = "plan_json")]
    pub tasks: Json<Vec<PlannedTask>>,
    pub created_at: DateTime<Utc>,
}

/// Listing row for a plan, without its task bodies.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanSummary {
    pub id: Uuid,
    pub goal: String,
    pub model_used: ModelId,
    pub task_count: i32,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
