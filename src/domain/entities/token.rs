//! Bot credential value object.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Gateway credential. Wiped from memory on drop and masked when printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthToken {
    value: String,
}

impl AuthToken {
    const MIN_TOKEN_LENGTH: usize = 50;
    const BOT_PREFIX: &'static str = "Bot ";

    /// Creates a token with format validation. A leading `Bot ` is accepted
    /// and stripped.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let raw = value.into();
        let trimmed = raw.trim();
        let value = trimmed.strip_prefix(Self::BOT_PREFIX).unwrap_or(trimmed);

        if value.len() < Self::MIN_TOKEN_LENGTH {
            return None;
        }

        if value.split('.').count() != 3 {
            return None;
        }

        Some(Self {
            value: value.to_string(),
        })
    }

    /// Creates token without validation.
    #[must_use]
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Returns the raw token as sent in identify and resume payloads.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Returns the REST `Authorization` header value.
    #[must_use]
    pub fn authorization(&self) -> String {
        format!("{}{}", Self::BOT_PREFIX, self.value)
    }

    /// Returns masked token for display.
    #[must_use]
    pub fn masked(&self) -> String {
        if self.value.len() <= 10 {
            return "*".repeat(self.value.len());
        }

        let visible_prefix = &self.value[..4];
        let visible_suffix = &self.value[self.value.len() - 4..];
        format!("{visible_prefix}...{visible_suffix}")
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &self.masked())
            .finish()
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_valid_token() -> String {
        "MTIzNDU2Nzg5MDEyMzQ1Njc4OQ.XXXXXX.YYYYYYYYYYYYYYYYYYYYYYYYYYYY".to_string()
    }

    #[test]
    fn test_valid_token_creation() {
        let token = AuthToken::new(make_valid_token()).unwrap();
        assert_eq!(token.as_str(), make_valid_token());
    }

    #[test]
    fn test_bot_prefix_is_stripped() {
        let token = AuthToken::new(format!("Bot {}", make_valid_token())).unwrap();
        assert_eq!(token.as_str(), make_valid_token());
        assert_eq!(token.authorization(), format!("Bot {}", make_valid_token()));
    }

    #[test]
    fn test_invalid_tokens_rejected() {
        assert!(AuthToken::new("short").is_none());
        assert!(AuthToken::new("a".repeat(60)).is_none());
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let token = AuthToken::new_unchecked(make_valid_token());
        let debug_output = format!("{token:?}");
        let display_output = token.to_string();

        assert!(!debug_output.contains(&make_valid_token()));
        assert!(display_output.contains("..."));
        assert!(!display_output.contains(&make_valid_token()));
    }
}
