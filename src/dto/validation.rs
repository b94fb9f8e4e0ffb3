//! Validation helpers for DTOs.

use serde_json::Value;
use validator::ValidationError;

/// Longest slug or settings key accepted over HTTP.
pub const MAX_KEY_LEN: usize = 128;

/// Validates a game slug or settings key: non-blank once trimmed, bounded, no control characters.
///
/// # Examples
///
/// ```ignore
/// validate_key("aim-pop")   // Ok
/// validate_key("   ")       // Err - blank
/// validate_key("a\nb")      // Err - control character
/// ```
pub fn validate_key(key: &str) -> Result<(), ValidationError> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("key_blank");
        err.message = Some("Key must not be blank".into());
        return Err(err);
    }

    if trimmed.chars().count() > MAX_KEY_LEN {
        let mut err = ValidationError::new("key_length");
        err.message = Some(format!("Key must be at most {MAX_KEY_LEN} characters").into());
        return Err(err);
    }

    if trimmed.chars().any(char::is_control) {
        let mut err = ValidationError::new("key_format");
        err.message = Some("Key must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

/// Progress payloads are opaque, but must be JSON objects.
pub fn validate_object(value: &Value) -> Result<(), ValidationError> {
    if value.is_object() {
        return Ok(());
    }
    let mut err = ValidationError::new("not_an_object");
    err.message = Some("Progress data must be a JSON object".into());
    Err(err)
}
