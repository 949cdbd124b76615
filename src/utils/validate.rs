use crate::error::{AppError, AppResult};

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

/// 10 to 15 digits, optional leading `+`, spaces, dashes, dots and parentheses allowed.
pub fn is_valid_phone(phone: &str) -> bool {
    let body = phone.strip_prefix('+').unwrap_or(phone);
    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '.' | '(' | ')'))
    {
        return false;
    }
    let digits = body.chars().filter(char::is_ascii_digit).count();
    (10..=15).contains(&digits)
}

pub fn check_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        )));
    }
    if !password.chars().any(|c| c.is_alphabetic()) || !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(
            "Password must contain at least one letter and one number".to_string(),
        ));
    }
    Ok(())
}

/// Rejects blank strings, naming the field in the error.
pub fn require_text(value: &str, field: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_format() {
        assert!(is_valid_email("rider@pitt.edu"));
        assert!(!is_valid_email("rider.pitt.edu"));
        assert!(!is_valid_email("@pitt.edu"));
        assert!(!is_valid_email("rider@pitt"));
        assert!(!is_valid_email("ri der@pitt.edu"));
    }

    #[test]
    fn phone_format() {
        assert!(is_valid_phone("+1 (412) 555-0100"));
        assert!(is_valid_phone("4125550100"));
        assert!(!is_valid_phone("555-0100"));
        assert!(!is_valid_phone("412-555-01OO"));
    }

    #[test]
    fn password_rules() {
        assert!(check_password("carpool2025").is_ok());
        assert!(matches!(check_password("short1"), Err(AppError::Validation(_))));
        assert!(matches!(check_password("onlyletters"), Err(AppError::Validation(_))));
    }

    #[test]
    fn blank_text_is_rejected() {
        assert!(require_text("Forbes Ave", "start_address").is_ok());
        let err = require_text("   ", "start_address").unwrap_err();
        assert!(err.to_string().contains("start_address is required"));
    }
}
