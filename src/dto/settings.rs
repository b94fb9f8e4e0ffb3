use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};

use crate::dao::settings_store::VisualMode;

/// All preferences plus the derived visual mode.
#[derive(Debug, Serialize, ToSchema)]
pub struct SettingsResponse {
    #[schema(value_type = Object)]
    pub settings: Map<String, Value>,
    pub visual_mode: VisualMode,
}

/// A single preference.
#[derive(Debug, Serialize, ToSchema)]
pub struct SettingResponse {
    pub key: String,
    #[schema(value_type = Object)]
    pub value: Value,
}

/// Query of `GET /settings/{key}`: JSON-encoded value returned when the key is unset.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FallbackQuery {
    pub fallback: Option<String>,
}

impl FallbackQuery {
    /// Decode the fallback, treating unparsable text as a plain string.
    pub fn value(&self) -> Value {
        match &self.fallback {
            None => Value::Null,
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())),
        }
    }
}

/// Body of `PUT /settings/{key}`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SettingWriteRequest {
    #[schema(value_type = Object)]
    pub value: Value,
}

/// Outcome of a preference write.
#[derive(Debug, Serialize, ToSchema)]
pub struct SettingWriteResponse {
    pub applied: bool,
    pub visual_mode: VisualMode,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fallback_decodes_json_or_keeps_text() {
        let json_fallback = FallbackQuery {
            fallback: Some("{\"volume\":3}".into()),
        };
        assert_eq!(json_fallback.value(), json!({ "volume": 3 }));

        let text = FallbackQuery {
            fallback: Some("loud".into()),
        };
        assert_eq!(text.value(), json!("loud"));

        assert_eq!(FallbackQuery::default().value(), Value::Null);
    }
}
