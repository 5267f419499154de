//! Input validation for the preference memory core
//!
//! Everything user- or LLM-supplied is validated here before it reaches
//! storage: identifiers, preference keys, confidence values, factor names.

use anyhow::{anyhow, Result};

use crate::constants::{CONFIDENCE_MAX, CONFIDENCE_MIN};

/// Maximum lengths for safety
pub const MAX_USER_ID_LENGTH: usize = 128;
pub const MAX_TENANT_ID_LENGTH: usize = 128;
pub const MAX_KEY_LENGTH: usize = 256;
pub const MAX_VALUE_LENGTH: usize = 2_000;
pub const MAX_FACTOR_NAME_LENGTH: usize = 64;
pub const MAX_FACTOR_VALUE_LENGTH: usize = 256;
pub const MAX_FACTORS_PER_CONTEXT: usize = 32;

/// Validate user_id
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(anyhow!("user_id cannot be empty"));
    }

    if user_id.len() > MAX_USER_ID_LENGTH {
        return Err(anyhow!(
            "user_id too long: {} chars (max: {})",
            user_id.len(),
            MAX_USER_ID_LENGTH
        ));
    }

    // Only allow alphanumeric, dash, underscore, @, .
    if !user_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '@' || c == '.')
    {
        return Err(anyhow!(
            "user_id contains invalid characters (allowed: alphanumeric, -, _, @, .)"
        ));
    }

    Ok(())
}

/// Validate tenant_id (same shape rules as user_id)
pub fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    if tenant_id.is_empty() {
        return Err(anyhow!("tenant_id cannot be empty"));
    }

    if tenant_id.len() > MAX_TENANT_ID_LENGTH {
        return Err(anyhow!(
            "tenant_id too long: {} chars (max: {})",
            tenant_id.len(),
            MAX_TENANT_ID_LENGTH
        ));
    }

    if !tenant_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(anyhow!(
            "tenant_id contains invalid characters (allowed: alphanumeric, -, _)"
        ));
    }

    Ok(())
}

/// Validate a composite `domain.key` preference key
///
/// Both segments must be non-empty snake_case identifiers; the domain is the
/// text before the first dot.
pub fn validate_preference_key(key: &str) -> Result<()> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(anyhow!(
            "preference key too long: {} chars (max: {})",
            key.len(),
            MAX_KEY_LENGTH
        ));
    }

    let Some((domain, rest)) = key.split_once('.') else {
        return Err(anyhow!(
            "preference key must be 'domain.key' (e.g. food.cappuccino), got '{key}'"
        ));
    };

    if !is_snake_case(domain) {
        return Err(anyhow!("preference domain '{domain}' must be snake_case"));
    }

    if rest.is_empty() || !rest.split('.').all(is_snake_case) {
        return Err(anyhow!(
            "preference key segment '{rest}' must be snake_case"
        ));
    }

    Ok(())
}

/// Validate a free-text preference value
pub fn validate_preference_value(value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("preference value cannot be empty"));
    }

    if value.len() > MAX_VALUE_LENGTH {
        return Err(anyhow!(
            "preference value too long: {} chars (max: {})",
            value.len(),
            MAX_VALUE_LENGTH
        ));
    }

    Ok(())
}

/// Validate a confidence score against the model bounds [0.0, 0.95]
pub fn validate_confidence(confidence: f32) -> Result<()> {
    if !confidence.is_finite() {
        return Err(anyhow!("confidence must be a finite number"));
    }

    if !(CONFIDENCE_MIN..=CONFIDENCE_MAX).contains(&confidence) {
        return Err(anyhow!(
            "confidence must be between {CONFIDENCE_MIN} and {CONFIDENCE_MAX}, got {confidence}"
        ));
    }

    Ok(())
}

/// Validate a context factor name: snake_case, starting with a letter
pub fn validate_factor_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!("factor name cannot be empty"));
    }

    if name.len() > MAX_FACTOR_NAME_LENGTH {
        return Err(anyhow!(
            "factor name too long: {} chars (max: {})",
            name.len(),
            MAX_FACTOR_NAME_LENGTH
        ));
    }

    if !is_snake_case(name) {
        return Err(anyhow!(
            "factor name '{name}' must be snake_case (lowercase letters, digits, underscores, starting with a letter)"
        ));
    }

    Ok(())
}

/// Validate a context factor value
pub fn validate_factor_value(value: &str) -> Result<()> {
    if value.len() > MAX_FACTOR_VALUE_LENGTH {
        return Err(anyhow!(
            "factor value too long: {} chars (max: {})",
            value.len(),
            MAX_FACTOR_VALUE_LENGTH
        ));
    }

    if value.chars().any(|c| c.is_control()) {
        return Err(anyhow!("factor value contains control characters"));
    }

    Ok(())
}

/// snake_case check without a regex: lowercase letters, digits, underscores,
/// first char a letter. Cheap enough to run on every LLM-supplied key.
fn is_snake_case(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_user_id() {
        assert!(validate_user_id("alice").is_ok());
        assert!(validate_user_id("user-123").is_ok());
        assert!(validate_user_id("test_user").is_ok());
        assert!(validate_user_id("user@example.com").is_ok());
    }

    #[test]
    fn test_invalid_user_id() {
        assert!(validate_user_id("").is_err()); // empty
        assert!(validate_user_id("user/123").is_err()); // invalid char
        assert!(validate_user_id(&"a".repeat(200)).is_err()); // too long
    }

    #[test]
    fn test_valid_tenant_id() {
        assert!(validate_tenant_id("default-tenant").is_ok());
        assert!(validate_tenant_id("acme_corp").is_ok());
    }

    #[test]
    fn test_invalid_tenant_id() {
        assert!(validate_tenant_id("").is_err());
        assert!(validate_tenant_id("tenant one").is_err());
    }

    #[test]
    fn test_valid_preference_keys() {
        assert!(validate_preference_key("food.cappuccino").is_ok());
        assert!(validate_preference_key("music.jazz_fusion").is_ok());
        assert!(validate_preference_key("travel.window_seat_a320").is_ok());
        // Nested keys are allowed
        assert!(validate_preference_key("food.coffee.espresso").is_ok());
    }

    #[test]
    fn test_invalid_preference_keys() {
        assert!(validate_preference_key("cappuccino").is_err()); // no domain
        assert!(validate_preference_key("Food.cappuccino").is_err()); // uppercase
        assert!(validate_preference_key("food.").is_err()); // empty segment
        assert!(validate_preference_key(".cappuccino").is_err()); // empty domain
        assert!(validate_preference_key("food.Capo").is_err()); // uppercase segment
        assert!(validate_preference_key("food.1shot").is_err()); // leading digit
    }

    #[test]
    fn test_confidence_range() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(0.5).is_ok());
        assert!(validate_confidence(0.95).is_ok());
        assert!(validate_confidence(0.96).is_err());
        assert!(validate_confidence(1.0).is_err());
        assert!(validate_confidence(-0.1).is_err());
        assert!(validate_confidence(f32::NAN).is_err());
    }

    #[test]
    fn test_valid_factor_names() {
        assert!(validate_factor_name("time_of_day").is_ok());
        assert!(validate_factor_name("mood").is_ok());
        assert!(validate_factor_name("location2").is_ok());
    }

    #[test]
    fn test_invalid_factor_names() {
        assert!(validate_factor_name("").is_err());
        assert!(validate_factor_name("Time_of_day").is_err()); // uppercase
        assert!(validate_factor_name("time of day").is_err()); // spaces
        assert!(validate_factor_name("2fast").is_err()); // leading digit
        assert!(validate_factor_name("_private").is_err()); // leading underscore
        assert!(validate_factor_name(&"a".repeat(100)).is_err()); // too long
    }

    #[test]
    fn test_factor_values() {
        assert!(validate_factor_value("morning").is_ok());
        assert!(validate_factor_value("caf\u{e9} downtown").is_ok());
        assert!(validate_factor_value("bad\x00value").is_err());
        assert!(validate_factor_value(&"v".repeat(500)).is_err());
    }
}
