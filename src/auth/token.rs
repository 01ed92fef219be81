//! Access token values.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Bearer secret. Never printed by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(Arc<str>);

impl AccessToken {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self(secret.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// An access token together with its lifetime.
#[derive(Debug, Clone)]
pub struct Token {
    access_token: AccessToken,
    issued_at: Instant,
    expires_at: Option<Instant>,
}

impl Token {
    /// A token issued now; `ttl = None` means it never expires locally.
    pub fn new(access_token: AccessToken, ttl: Option<Duration>) -> Self {
        let issued_at = Instant::now();
        Self {
            access_token,
            issued_at,
            expires_at: ttl.map(|ttl| issued_at + ttl),
        }
    }

    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    pub fn secret(&self) -> &str {
        self.access_token.secret()
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let token = Token::new(AccessToken::new("00Dxx!secret"), None);
        let printed = format!("{token:?} {}", token.access_token());
        assert!(!printed.contains("secret"));
        assert_eq!(token.secret(), "00Dxx!secret");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let token = Token::new(AccessToken::new("t"), Some(Duration::from_secs(30)));
        assert!(!token.is_expired());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(token.is_expired());

        let forever = Token::new(AccessToken::new("t"), None);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!forever.is_expired());
    }
}
