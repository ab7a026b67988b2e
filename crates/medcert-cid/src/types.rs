use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Default locale for lookups.
pub const DEFAULT_LOCALE: &str = "pt";

/// A single ICD classification entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidEntry {
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl CidEntry {
    pub fn new(
        code: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            title: title.into(),
            description: description.into(),
        }
    }

    /// Case-insensitive comparison against an already uppercased code.
    pub fn matches_code(&self, normalized_code: &str) -> bool {
        self.code.trim().to_uppercase() == normalized_code
    }
}

/// Bearer token issued by the classification API's identity server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The raw bearer token.
    pub value: String,
    /// Usually `Bearer`; empty when the server omits it.
    #[serde(default)]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Lifetime in seconds as announced by the server.
    pub expires_in: u64,
    /// Absolute expiry, epoch seconds.
    pub expires_at: i64,
}

impl Token {
    /// Builds a token expiring `expires_in` seconds from now.
    pub fn issued_now(value: impl Into<String>, expires_in: u64) -> Self {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Self {
            value: value.into(),
            token_type: String::new(),
            scope: None,
            expires_in,
            expires_at: now.saturating_add(i64::try_from(expires_in).unwrap_or(i64::MAX)),
        }
    }

    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    /// Returns true once the absolute expiry has passed.
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc().unix_timestamp() >= self.expires_at
    }
}

/// Normalizes a locale tag: trimmed, lowercased, `pt` when empty.
pub fn normalize_locale(locale: Option<&str>) -> String {
    match locale.map(str::trim) {
        Some(l) if !l.is_empty() => l.to_ascii_lowercase(),
        _ => DEFAULT_LOCALE.to_string(),
    }
}

/// Normalizes an ICD code for exact lookups: trimmed and uppercased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_locale() {
        assert_eq!(normalize_locale(None), "pt");
        assert_eq!(normalize_locale(Some("  ")), "pt");
        assert_eq!(normalize_locale(Some(" EN ")), "en");
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" z76.3 "), "Z76.3");
    }

    #[test]
    fn test_matches_code_is_case_insensitive() {
        let entry = CidEntry::new("6b00", "Generalized anxiety disorder", "");
        assert!(entry.matches_code("6B00"));
        assert!(!entry.matches_code("6B01"));
    }

    #[test]
    fn test_token_expiry() {
        let token = Token::issued_now("abc", 3600).with_token_type("Bearer");
        assert!(!token.is_expired());
        assert_eq!(token.token_type, "Bearer");

        let expired = Token::issued_now("abc", 0);
        assert!(expired.is_expired());
    }
}
