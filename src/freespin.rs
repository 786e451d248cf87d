//! Freespin preset schemas and validation
//!
//! Aggregators declare, per game, which bonus-wager fields exist and
//! what bounds they carry. `validate_preset` is the single guard every
//! freespin creation passes through before the upstream request goes
//! out.

use crate::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Bounds and default for one preset field, as declared by the
/// aggregator. Any of the three may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresetField {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimal: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<i64>,
}

/// Field name -> bounds, declared per aggregator/game. Not persisted;
/// fetched live from the freespin adapter. Ordered so validation walks
/// fields deterministically and error reports are stable.
pub type PresetSchema = BTreeMap<String, PresetField>;

/// A validated freespin issuance request, ready for the upstream call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreespinCommand {
    /// Platform-side reference, passed upstream and used for cancellation.
    pub reference_id: String,
    pub player_id: String,
    pub game_symbol: String,
    pub currency: String,
    /// Validated preset values (quantity, bet level, ...).
    pub values: HashMap<String, i64>,
}

/// Validate proposed preset values against the declared schema.
///
/// For every field the schema declares: take the user value if present,
/// else the schema default, else fail (no silent zero). Then enforce
/// `minimal <= value <= maximum`. Fields the schema does not declare are
/// ignored, so callers can pass through newer aggregator fields
/// untouched. Deterministic: same inputs, same output.
pub fn validate_preset(
    user_values: &HashMap<String, i64>,
    schema: &PresetSchema,
) -> EngineResult<HashMap<String, i64>> {
    let mut validated = HashMap::with_capacity(schema.len());
    for (field, bounds) in schema {
        let value = match user_values.get(field).copied().or(bounds.default) {
            Some(v) => v,
            None => {
                return Err(EngineError::InvalidPreset {
                    field: field.clone(),
                    reason: "required field missing and schema declares no default".to_string(),
                })
            }
        };
        if let Some(min) = bounds.minimal {
            if value < min {
                return Err(EngineError::InvalidPreset {
                    field: field.clone(),
                    reason: format!("{} is below the minimum of {}", value, min),
                });
            }
        }
        if let Some(max) = bounds.maximum {
            if value > max {
                return Err(EngineError::InvalidPreset {
                    field: field.clone(),
                    reason: format!("{} is above the maximum of {}", value, max),
                });
            }
        }
        validated.insert(field.clone(), value);
    }
    Ok(validated)
}
