//! Local credential checks, run before anything is sent to the provider

use crate::error::{Result, SdkError};
use rewards_gateway_client::Credentials;

pub const MIN_PASSWORD_LEN: usize = 8;

/// `local@domain.tld` with no whitespace and exactly one `@`
pub fn validate_email(email: &str) -> Result<()> {
    let invalid = || SdkError::InvalidCredentials("Please enter a valid email address".into());

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) if !host.is_empty() && !tld.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(SdkError::InvalidCredentials(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Score 0..=4: length, an uppercase letter, a digit, a symbol
pub fn password_strength(password: &str) -> u8 {
    [
        password.chars().count() >= MIN_PASSWORD_LEN,
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_ascii_alphanumeric()),
    ]
    .into_iter()
    .filter(|passed| *passed)
    .count() as u8
}

pub fn validate(credentials: &Credentials) -> Result<()> {
    validate_email(credentials.email.trim())?;
    validate_password(&credentials.password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_shapes() {
        assert!(validate_email("ada@example.com").is_ok());
        assert!(validate_email("ada@example").is_err());
        assert!(validate_email("ada example@example.com").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("ada@@example.com").is_err());
        assert!(validate_email("ada@.com").is_err());
    }

    #[test]
    fn test_password_length() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("longenough").is_ok());
    }

    #[test]
    fn test_strength_score() {
        assert_eq!(password_strength(""), 0);
        assert_eq!(password_strength("abc"), 0);
        assert_eq!(password_strength("abcdefgh"), 1);
        assert_eq!(password_strength("Abcdefg1!"), 4);
    }
}
