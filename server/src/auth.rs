//! Authentication gateway: register/login against the user directory and
//! the session token table gating every other command.
//!
//! The transport is connectionless, so identity is carried by an opaque
//! token issued at login/register instead of a per-connection session.

use log::info;
use rand::random;
use shared::{Credentials, SessionToken};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{Result, ServerError};
use crate::persist::Backend;

pub const SESSION_TTL: Duration = Duration::from_secs(1800);

struct SessionEntry {
    username: String,
    last_used: Instant,
}

/// Token table. Tokens idle past the TTL are evicted by the periodic sweep.
pub struct Sessions {
    tokens: HashMap<u128, SessionEntry>,
    ttl: Duration,
}

impl Sessions {
    pub fn new(ttl: Duration) -> Self {
        Sessions {
            tokens: HashMap::new(),
            ttl,
        }
    }

    pub fn issue(&mut self, username: &str) -> SessionToken {
        let mut value: u128 = random();
        while value == 0 || self.tokens.contains_key(&value) {
            value = random();
        }
        self.tokens.insert(
            value,
            SessionEntry {
                username: username.to_string(),
                last_used: Instant::now(),
            },
        );
        SessionToken(value)
    }

    /// Resolves a token to its username, refreshing its idle timer.
    pub fn resolve(&mut self, token: SessionToken) -> Option<String> {
        let entry = self.tokens.get_mut(&token.0)?;
        entry.last_used = Instant::now();
        Some(entry.username.clone())
    }

    pub fn sweep(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.tokens.len();
        self.tokens.retain(|_, entry| entry.last_used.elapsed() <= ttl);
        before - self.tokens.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[derive(Clone)]
pub struct AuthGateway {
    backend: Arc<dyn Backend>,
    sessions: Arc<RwLock<Sessions>>,
}

impl AuthGateway {
    pub fn new(backend: Arc<dyn Backend>, ttl: Duration) -> Self {
        AuthGateway {
            backend,
            sessions: Arc::new(RwLock::new(Sessions::new(ttl))),
        }
    }

    /// Fails when the username already exists; on success the credential is
    /// committed to the directory and a session token is issued.
    pub async fn register(&self, credentials: &Credentials) -> Result<SessionToken> {
        if credentials.username.trim().is_empty() || credentials.secret.is_empty() {
            return Err(ServerError::Auth(
                "username and secret must not be empty".to_string(),
            ));
        }
        if !self.backend.add_user(credentials)? {
            return Err(ServerError::Auth(format!(
                "username {} is already taken",
                credentials.username
            )));
        }
        info!("registered user {}", credentials.username);
        let mut sessions = self.sessions.write().await;
        Ok(sessions.issue(&credentials.username))
    }

    /// Succeeds only on an exact credential match.
    pub async fn login(&self, credentials: &Credentials) -> Result<SessionToken> {
        if !self.backend.verify_user(credentials)? {
            return Err(ServerError::Auth("invalid username or secret".to_string()));
        }
        info!("user {} logged in", credentials.username);
        let mut sessions = self.sessions.write().await;
        Ok(sessions.issue(&credentials.username))
    }

    /// Gate for non-auth commands: maps the request token to a username or
    /// fails with an authorization error.
    pub async fn authenticate(&self, token: Option<SessionToken>) -> Result<String> {
        let token = token.ok_or_else(|| {
            ServerError::Auth("command requires a session token; login first".to_string())
        })?;
        let mut sessions = self.sessions.write().await;
        sessions
            .resolve(token)
            .ok_or_else(|| ServerError::Auth("unknown or expired session token".to_string()))
    }

    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        sessions.sweep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryBackend;

    fn credentials(username: &str, secret: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            secret: secret.to_string(),
        }
    }

    fn gateway() -> AuthGateway {
        AuthGateway::new(Arc::new(MemoryBackend::new()), SESSION_TTL)
    }

    #[tokio::test]
    async fn test_register_then_duplicate_fails() {
        let auth = gateway();

        auth.register(&credentials("alice", "pw1")).await.unwrap();

        let err = auth.register(&credentials("alice", "pw2")).await.unwrap_err();
        assert!(matches!(err, ServerError::Auth(_)));

        // Directory unchanged: the original secret still logs in
        auth.login(&credentials("alice", "pw1")).await.unwrap();
        assert!(auth.login(&credentials("alice", "pw2")).await.is_err());
    }

    #[tokio::test]
    async fn test_login_requires_exact_match() {
        let auth = gateway();
        auth.register(&credentials("alice", "pw1")).await.unwrap();

        assert!(auth.login(&credentials("alice", "pw1")).await.is_ok());
        assert!(auth.login(&credentials("alice", "wrong")).await.is_err());
        assert!(auth.login(&credentials("bob", "pw1")).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_credentials_rejected() {
        let auth = gateway();
        assert!(auth.register(&credentials("", "pw")).await.is_err());
        assert!(auth.register(&credentials("alice", "")).await.is_err());
    }

    #[tokio::test]
    async fn test_token_authenticates_commands() {
        let auth = gateway();
        let token = auth.register(&credentials("alice", "pw1")).await.unwrap();

        let username = auth.authenticate(Some(token)).await.unwrap();
        assert_eq!(username, "alice");

        assert!(auth.authenticate(None).await.is_err());
        assert!(auth.authenticate(Some(SessionToken(12345))).await.is_err());
    }

    #[test]
    fn test_sessions_sweep_evicts_idle_tokens() {
        let mut sessions = Sessions::new(Duration::from_secs(0));
        let token = sessions.issue("alice");
        assert_eq!(sessions.len(), 1);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(sessions.sweep(), 1);
        assert!(sessions.is_empty());
        assert!(sessions.resolve(token).is_none());
    }

    #[test]
    fn test_issued_tokens_are_distinct() {
        let mut sessions = Sessions::new(SESSION_TTL);
        let a = sessions.issue("alice");
        let b = sessions.issue("alice");
        assert_ne!(a, b);
        assert_eq!(sessions.len(), 2);
    }
}
