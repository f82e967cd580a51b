//! Authentication manager
//!
//! Owns every piece of auth state: the account table, issued sessions, the
//! active trust model and the setup flag. Configuration changes (setup,
//! method switch, account edits) run under one lock: the new snapshot is
//! saved first and live state is only replaced once the save succeeded.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use tokio::sync::Mutex;

use super::bypass::BypassMatcher;
use super::context::AuthContext;
use super::directory::{Account, AccountView, UserDirectory, users_config};
use super::forward;
use super::oidc::OidcFlow;
use super::password::{self, PasswordError};
use super::session::{Session, SessionRegistry};
use super::setup::{self, MethodPlan, MethodRequest, SetupError, SetupGate};
use super::trust::{TrustModel, TrustModelCell, TrustModelError};
use crate::api::types::ApiError;
use crate::core::config::{AuthConfig, AuthMethod, FileConfig, Role, UserFileConfig};
use crate::core::persist::ConfigStore;

/// Outcome of identity resolution for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub identity: Option<AuthContext>,
    /// Identity resolution was skipped for this path
    pub bypassed: bool,
}

/// Field changes for `PUT /api/auth/users/{username}`
#[derive(Debug, Default, Clone)]
pub struct AccountUpdate {
    pub role: Option<Role>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
}

pub struct AuthManager {
    directory: UserDirectory,
    sessions: Arc<SessionRegistry>,
    trust: TrustModelCell,
    bypass: BypassMatcher,
    setup: SetupGate,
    oidc: OidcFlow,
    store: Arc<dyn ConfigStore>,
    /// Contents of the writable config file; the mutation lock
    snapshot: Mutex<FileConfig>,
}

impl AuthManager {
    pub fn new(
        config: &AuthConfig,
        snapshot: FileConfig,
        store: Arc<dyn ConfigStore>,
        oidc: OidcFlow,
    ) -> Result<Self, TrustModelError> {
        let model = config
            .method
            .map(|method| {
                TrustModel::from_config(method, config.forward_auth.as_ref(), config.oidc.as_ref())
            })
            .transpose()?;

        match &model {
            Some(model) => {
                tracing::debug!(method = %model.method(), "Authentication method loaded")
            }
            None => {
                tracing::warn!("No authentication method configured, first-run setup required")
            }
        }
        if matches!(model, Some(TrustModel::None)) {
            tracing::warn!("Authentication DISABLED, every request is treated as admin");
        }

        Ok(Self {
            directory: UserDirectory::new(config.users.iter().cloned().map(Account::from)),
            sessions: Arc::new(SessionRegistry::new(
                config.session_ttl,
                config.cookie_name.clone(),
                config.secure_cookie,
            )),
            setup: SetupGate::new(model.is_none()),
            trust: TrustModelCell::new(model),
            bypass: BypassMatcher::default(),
            oidc,
            store,
            snapshot: Mutex::new(snapshot),
        })
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn trust_model(&self) -> Option<Arc<TrustModel>> {
        self.trust.current()
    }

    pub fn method(&self) -> Option<AuthMethod> {
        self.trust.method()
    }

    pub fn needs_setup(&self) -> bool {
        self.setup.is_pending()
    }

    pub fn oidc(&self) -> &OidcFlow {
        &self.oidc
    }

    pub fn session_token<'a>(&self, jar: &'a CookieJar) -> Option<&'a str> {
        jar.get(self.sessions.cookie_name())
            .map(|c| c.value())
            .filter(|v| !v.is_empty())
    }

    // ========================================================================
    // Identity resolution
    // ========================================================================

    /// Resolve the caller of a request to `path`.
    ///
    /// While setup is pending there is no trust model to resolve against; the
    /// request is treated as bypassed and the setup guard decides access.
    pub fn resolve(
        &self,
        path: &str,
        peer: Option<IpAddr>,
        headers: &HeaderMap,
        jar: &CookieJar,
    ) -> Resolution {
        if self.bypass.matches(path) || self.needs_setup() {
            return Resolution {
                identity: None,
                bypassed: true,
            };
        }
        Resolution {
            identity: self.identify(peer, headers, jar),
            bypassed: false,
        }
    }

    /// Identity under the active trust model, ignoring bypass rules
    pub fn identify(
        &self,
        peer: Option<IpAddr>,
        headers: &HeaderMap,
        jar: &CookieJar,
    ) -> Option<AuthContext> {
        let model = self.trust.current()?;
        match model.as_ref() {
            TrustModel::None => Some(AuthContext::virtual_admin()),
            TrustModel::Builtin => {
                let session = self.session_for(jar, AuthMethod::Builtin)?;
                // Deleted accounts lose access immediately; role edits apply
                // to existing sessions
                let account = self.directory.get(&session.username)?;
                Some(AuthContext {
                    username: account.username,
                    role: account.role,
                    email: account.email,
                    display_name: account.display_name,
                    groups: Vec::new(),
                    method: AuthMethod::Builtin,
                })
            }
            TrustModel::Oidc(_) => self
                .session_for(jar, AuthMethod::Oidc)
                .map(|s| s.identity()),
            TrustModel::ForwardAuth(model) => forward::resolve(model, peer, headers),
        }
    }

    fn session_for(&self, jar: &CookieJar, method: AuthMethod) -> Option<Session> {
        let session = self.sessions.validate(self.session_token(jar)?)?;
        if session.method != method {
            tracing::debug!(
                username = %session.username,
                issued_by = %session.method,
                active = %method,
                "Session from inactive method ignored"
            );
            return None;
        }
        Some(session)
    }

    // ========================================================================
    // Builtin login
    // ========================================================================

    /// Verify credentials and issue a session
    pub async fn login(
        self: &Arc<Self>,
        username: String,
        password: String,
    ) -> Result<Session, ApiError> {
        if self.method() != Some(AuthMethod::Builtin) {
            return Err(ApiError::bad_request(
                "LOGIN_UNAVAILABLE",
                "Password login is not enabled",
            ));
        }

        let manager = Arc::clone(self);
        let name = username.clone();
        let account =
            tokio::task::spawn_blocking(move || manager.directory.verify_password(&name, &password))
                .await
                .map_err(ApiError::internal)?;

        let Some(account) = account else {
            tracing::warn!(username = %username, "Failed login attempt");
            return Err(ApiError::unauthorized(
                "INVALID_CREDENTIALS",
                "Invalid username or password",
            ));
        };

        let session = self
            .sessions
            .create(&AuthContext {
                username: account.username,
                role: account.role,
                email: account.email,
                display_name: account.display_name,
                groups: Vec::new(),
                method: AuthMethod::Builtin,
            })
            .map_err(ApiError::internal)?;
        tracing::info!(username = %session.username, "User logged in");
        Ok(session)
    }

    /// Issue a session for an identity the OIDC flow verified
    pub fn create_oidc_session(&self, identity: &AuthContext) -> Result<Session, ApiError> {
        let session = self.sessions.create(identity).map_err(ApiError::internal)?;
        tracing::info!(
            username = %session.username,
            role = %session.role,
            "User logged in via OIDC"
        );
        Ok(session)
    }

    /// Destroy the session behind `token`, if any
    pub fn logout(&self, token: Option<&str>) {
        if let Some(token) = token
            && self.sessions.destroy(token)
        {
            tracing::debug!("Session destroyed on logout");
        }
    }

    // ========================================================================
    // Setup and method switch
    // ========================================================================

    /// Commit first-run setup. Only the first successful call wins.
    ///
    /// Returns the committed method and, for builtin, a session for the new
    /// admin. Failing to issue that session does not fail setup.
    pub async fn commit_setup(
        &self,
        request: MethodRequest,
    ) -> Result<(AuthMethod, Option<Session>), SetupError> {
        if !self.needs_setup() {
            return Err(SetupError::AlreadyCommitted);
        }

        let mut snapshot = self.snapshot.lock().await;
        if !self.needs_setup() {
            return Err(SetupError::AlreadyCommitted);
        }

        let plan = prepare_blocking(request, true).await?;

        let mut next = snapshot.clone();
        let auth = next.auth.get_or_insert_with(Default::default);
        plan.apply(auth);
        if let Some(admin) = &plan.admin {
            auth.users = Some(vec![UserFileConfig::from(admin)]);
        }
        self.store.save(&next).await.map_err(SetupError::Persist)?;
        *snapshot = next;

        let method = plan.method();
        let admin = plan.admin.clone();
        if let Some(admin) = &admin {
            self.directory.load([admin.clone()]);
        }
        self.trust.publish(plan.model);
        self.setup.mark_committed();
        drop(snapshot);

        tracing::info!(method = %method, "Setup completed");

        let session = admin.and_then(|admin| {
            let identity = AuthContext {
                username: admin.username.clone(),
                role: admin.role,
                email: None,
                display_name: None,
                groups: Vec::new(),
                method,
            };
            match self.sessions.create(&identity) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Setup succeeded but the admin session could not be issued"
                    );
                    None
                }
            }
        });

        Ok((method, session))
    }

    /// Replace the active trust model after setup.
    ///
    /// Sessions issued under other methods are revoked.
    pub async fn switch_method(&self, request: MethodRequest) -> Result<AuthMethod, SetupError> {
        if self.needs_setup() {
            return Err(SetupError::Invalid("Complete setup first"));
        }

        let mut snapshot = self.snapshot.lock().await;
        let plan = prepare_blocking(request, false).await?;

        if plan.method() == AuthMethod::Builtin
            && plan.admin.is_none()
            && !self.directory.has_password_admin()
        {
            return Err(SetupError::Invalid(
                "Builtin login needs an admin account with a password",
            ));
        }

        let mut accounts = (*self.directory.snapshot()).clone();
        if let Some(admin) = &plan.admin {
            accounts.insert(admin.username.clone(), admin.clone());
        }

        let mut next = snapshot.clone();
        let auth = next.auth.get_or_insert_with(Default::default);
        plan.apply(auth);
        if plan.admin.is_some() {
            auth.users = Some(users_config(&accounts));
        }
        self.store.save(&next).await.map_err(SetupError::Persist)?;
        *snapshot = next;

        let method = plan.method();
        if plan.admin.is_some() {
            self.directory.load(accounts.into_values());
        }
        self.trust.publish(plan.model);
        let revoked = self.sessions.retain_method(method);
        drop(snapshot);

        tracing::info!(method = %method, revoked, "Authentication method changed");
        Ok(method)
    }

    // ========================================================================
    // Account management
    // ========================================================================

    pub async fn create_user(&self, account: Account) -> Result<AccountView, ApiError> {
        let username = account.username.clone();
        let view = self
            .mutate_accounts(|accounts| {
                if accounts.contains_key(&account.username) {
                    return Err(ApiError::conflict(
                        "USER_EXISTS",
                        format!("User '{}' already exists", account.username),
                    ));
                }
                let view = account.view();
                accounts.insert(account.username.clone(), account);
                Ok(view)
            })
            .await?;
        tracing::info!(username = %username, role = %view.role, "User created");
        Ok(view)
    }

    pub async fn update_user(
        &self,
        username: &str,
        update: AccountUpdate,
    ) -> Result<AccountView, ApiError> {
        let password_changed = update.password_hash.is_some();
        let view = self
            .mutate_accounts(|accounts| {
                let admins = admin_count(accounts);
                let account = accounts.get_mut(username).ok_or_else(|| user_not_found(username))?;

                if let Some(role) = update.role {
                    if account.role == Role::Admin && role != Role::Admin && admins <= 1 {
                        return Err(last_admin());
                    }
                    account.role = role;
                }
                if let Some(email) = update.email {
                    account.email = Some(email).filter(|e| !e.is_empty());
                }
                if let Some(display_name) = update.display_name {
                    account.display_name = Some(display_name).filter(|n| !n.is_empty());
                }
                if let Some(hash) = update.password_hash {
                    account.set_password_hash(hash);
                }
                Ok(account.view())
            })
            .await?;

        if password_changed {
            self.sessions.destroy_user(username);
        }
        tracing::info!(username = %username, password_changed, "User updated");
        Ok(view)
    }

    pub async fn delete_user(&self, username: &str) -> Result<(), ApiError> {
        self.mutate_accounts(|accounts| {
            let account = accounts.get(username).ok_or_else(|| user_not_found(username))?;
            if account.role == Role::Admin && admin_count(accounts) <= 1 {
                return Err(last_admin());
            }
            accounts.remove(username);
            Ok(())
        })
        .await?;

        let revoked = self.sessions.destroy_user(username);
        tracing::info!(username = %username, revoked, "User deleted");
        Ok(())
    }

    /// Self-service password change. Every session of the user is revoked and
    /// a fresh one is returned for the caller.
    pub async fn change_password(
        self: &Arc<Self>,
        identity: &AuthContext,
        current_password: String,
        new_password: String,
    ) -> Result<Session, ApiError> {
        if identity.method != AuthMethod::Builtin {
            return Err(ApiError::bad_request(
                "PASSWORD_UNAVAILABLE",
                "Password changes are only available with builtin login",
            ));
        }

        let manager = Arc::clone(self);
        let name = identity.username.clone();
        let verified = tokio::task::spawn_blocking(move || {
            manager.directory.verify_password(&name, &current_password)
        })
        .await
        .map_err(ApiError::internal)?;
        if verified.is_none() {
            tracing::warn!(
                username = %identity.username,
                "Password change with wrong current password"
            );
            return Err(ApiError::bad_request(
                "INVALID_PASSWORD",
                "Current password is incorrect",
            ));
        }

        let hash = password::hash_new_password(new_password)
            .await
            .map_err(password_error)?;
        self.update_user(
            &identity.username,
            AccountUpdate {
                password_hash: Some(hash),
                ..Default::default()
            },
        )
        .await?;

        self.sessions.create(identity).map_err(ApiError::internal)
    }

    /// Apply `change` to a copy of the account table, persist it, then publish
    async fn mutate_accounts<T>(
        &self,
        change: impl FnOnce(&mut HashMap<String, Account>) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut snapshot = self.snapshot.lock().await;
        let mut accounts = (*self.directory.snapshot()).clone();
        let output = change(&mut accounts)?;

        let mut next = snapshot.clone();
        next.auth.get_or_insert_with(Default::default).users = Some(users_config(&accounts));
        self.store
            .save(&next)
            .await
            .map_err(|e| ApiError::internal(format!("{:#}", e)))?;
        *snapshot = next;
        self.directory.load(accounts.into_values());
        Ok(output)
    }
}

async fn prepare_blocking(
    request: MethodRequest,
    require_admin: bool,
) -> Result<MethodPlan, SetupError> {
    tokio::task::spawn_blocking(move || setup::prepare(request, require_admin))
        .await
        .map_err(|e| SetupError::Password(PasswordError::Hash(e.to_string())))?
}

fn admin_count(accounts: &HashMap<String, Account>) -> usize {
    accounts.values().filter(|a| a.role == Role::Admin).count()
}

fn user_not_found(username: &str) -> ApiError {
    ApiError::not_found("USER_NOT_FOUND", format!("User '{}' not found", username))
}

fn last_admin() -> ApiError {
    ApiError::conflict("LAST_ADMIN", "At least one admin account must remain")
}

/// Map a password policy/hashing failure to the HTTP edge
pub fn password_error(err: PasswordError) -> ApiError {
    match err {
        PasswordError::Hash(detail) => ApiError::internal(detail),
        e => ApiError::bad_request("WEAK_PASSWORD", e.to_string()),
    }
}
