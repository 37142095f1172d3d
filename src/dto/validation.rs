//! Validation helpers for DTOs.

use validator::{ValidateEmail, ValidationError};

/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 40;

/// Validates that a player identifier is a usable e-mail address once trimmed.
///
/// # Examples
///
/// ```ignore
/// validate_player_email("Max.Verstappen@Gmail.com ") // Ok
/// validate_player_email("max")                       // Err - not an e-mail
/// ```
pub fn validate_player_email(email: &str) -> Result<(), ValidationError> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("player_email_empty");
        err.message = Some("Player e-mail must not be empty".into());
        return Err(err);
    }

    if !trimmed.validate_email() {
        let mut err = ValidationError::new("player_email_format");
        err.message = Some(format!("`{trimmed}` is not a valid e-mail address").into());
        return Err(err);
    }

    Ok(())
}

/// Validates an optional display name: not blank, bounded, no control characters.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("display_name_empty");
        err.message = Some("Display name must not be blank".into());
        return Err(err);
    }

    let length = trimmed.chars().count();
    if length > MAX_DISPLAY_NAME_CHARS {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Display name must be at most {MAX_DISPLAY_NAME_CHARS} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    if trimmed.chars().any(char::is_control) {
        let mut err = ValidationError::new("display_name_format");
        err.message = Some("Display name must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_player_email_valid() {
        assert!(validate_player_email("driver@gmail.com").is_ok());
        assert!(validate_player_email("  Max.Verstappen@Gmail.com ").is_ok());
        assert!(validate_player_email("first+pit@team.racing").is_ok());
    }

    #[test]
    fn test_validate_player_email_invalid() {
        assert!(validate_player_email("").is_err());
        assert!(validate_player_email("   ").is_err());
        assert!(validate_player_email("driver").is_err());
        assert!(validate_player_email("driver@").is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Max Verstappen").is_ok());
        assert!(validate_display_name("  ").is_err());
        assert!(validate_display_name(&"x".repeat(41)).is_err());
        assert!(validate_display_name("line\nbreak").is_err());
    }
}
