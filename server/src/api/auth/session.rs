//! Server-side session registry

use std::sync::Arc;
use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::context::AuthContext;
use crate::core::config::{AuthMethod, Role};
use crate::core::constants::{SESSION_SWEEP_INTERVAL_SECS, SESSION_TOKEN_BYTES};
use crate::utils::crypto;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to generate session token: {0}")]
    TokenGeneration(#[from] rand::Error),
}

/// An issued session. The token is the cookie value.
#[derive(Clone)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub role: Role,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub groups: Vec<String>,
    pub method: AuthMethod,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("role", &self.role)
            .field("method", &self.method)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn identity(&self) -> AuthContext {
        AuthContext {
            username: self.username.clone(),
            role: self.role,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            groups: self.groups.clone(),
            method: self.method,
        }
    }
}

/// Maps opaque tokens to sessions and builds the session cookie
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    ttl: Duration,
    cookie_name: String,
    secure_cookie: bool,
}

impl SessionRegistry {
    pub fn new(ttl: Duration, cookie_name: impl Into<String>, secure_cookie: bool) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            cookie_name: cookie_name.into(),
            secure_cookie,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Issue a session for `identity` with the configured lifetime
    pub fn create(&self, identity: &AuthContext) -> Result<Session, SessionError> {
        self.create_with_ttl(identity, self.ttl)
    }

    pub fn create_with_ttl(
        &self,
        identity: &AuthContext,
        ttl: Duration,
    ) -> Result<Session, SessionError> {
        let token = crypto::try_generate_token(SESSION_TOKEN_BYTES)?;
        let issued_at = Utc::now();
        let expires_at = issued_at
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));

        let session = Session {
            token: token.clone(),
            username: identity.username.clone(),
            role: identity.role,
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
            groups: identity.groups.clone(),
            method: identity.method,
            issued_at,
            expires_at,
        };
        self.sessions.insert(token, session.clone());

        tracing::debug!(
            username = %session.username,
            method = %session.method,
            "Session created"
        );
        Ok(session)
    }

    /// Look up a live session. Expired entries are dropped on access.
    pub fn validate(&self, token: &str) -> Option<Session> {
        if token.is_empty() {
            return None;
        }
        let now = Utc::now();
        let session = self.sessions.get(token).map(|s| s.value().clone())?;
        if session.is_expired_at(now) {
            self.sessions.remove_if(token, |_, s| s.is_expired_at(now));
            return None;
        }
        Some(session)
    }

    /// Remove a session. Returns whether it existed.
    pub fn destroy(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Remove every session of `username`
    pub fn destroy_user(&self, username: &str) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.username != username);
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::debug!(username = %username, removed, "Sessions revoked");
        }
        removed
    }

    /// Drop sessions issued under any trust model other than `method`
    pub fn retain_method(&self, method: AuthMethod) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.method == method);
        before.saturating_sub(self.sessions.len())
    }

    /// Purge expired sessions
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired_at(now));
        before.saturating_sub(self.sessions.len())
    }

    /// Cookie carrying `session`'s token, expiring with it
    pub fn session_cookie(&self, session: &Session) -> Cookie<'static> {
        let remaining = (session.expires_at - Utc::now()).num_seconds().max(0);
        Cookie::build((self.cookie_name.clone(), session.token.clone()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookie)
            .max_age(time::Duration::seconds(remaining))
            .build()
    }

    /// Expired, empty cookie that makes the browser drop the session
    pub fn clear_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), ""))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookie)
            .max_age(time::Duration::ZERO)
            .build()
    }

    pub fn start_sweep_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(SESSION_SWEEP_INTERVAL_SECS));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Session sweep task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let removed = registry.sweep();
                        if removed > 0 {
                            tracing::debug!(
                                removed,
                                remaining = registry.len(),
                                "Expired sessions swept"
                            );
                        }
                    }
                }
            }
        })
    }
}
