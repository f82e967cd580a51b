use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::utils::file::expand_path;
use crate::utils::net::{IpRange, IpRangeParseError, parse_ranges};
use crate::utils::time::parse_duration;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_FORWARD_EMAIL_HEADER, DEFAULT_FORWARD_GROUPS_HEADER,
    DEFAULT_FORWARD_NAME_HEADER, DEFAULT_FORWARD_USER_HEADER, DEFAULT_HOST, DEFAULT_PORT,
    DEFAULT_RATE_LIMIT_MAX_ATTEMPTS, DEFAULT_RATE_LIMIT_WINDOW_SECS, DEFAULT_SESSION_COOKIE_NAME,
    DEFAULT_SESSION_TTL, OIDC_DEFAULT_EMAIL_CLAIM, OIDC_DEFAULT_GROUPS_CLAIM,
    OIDC_DEFAULT_NAME_CLAIM, OIDC_DEFAULT_SCOPES, OIDC_DEFAULT_USERNAME_CLAIM,
};

// =============================================================================
// Authentication Method Enum
// =============================================================================

/// Trust model selected by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    Builtin,
    ForwardAuth,
    Oidc,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Builtin => "builtin",
            AuthMethod::ForwardAuth => "forward_auth",
            AuthMethod::Oidc => "oidc",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Role Enum
// =============================================================================

/// Account role. `Admin` satisfies every requirement, `User` satisfies `User`
/// and `Viewer`, `Viewer` only itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Viewer => "viewer",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Role::Admin => 2,
            Role::User => 1,
            Role::Viewer => 0,
        }
    }

    /// Whether this role grants at least the privileges of `required`
    pub fn satisfies(&self, required: Role) -> bool {
        self.rank() >= required.rank()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// File Config Structs (for JSON deserialization)
// =============================================================================

/// Server configuration section
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
    /// Reverse proxies whose `X-Forwarded-For` is honored for client addresses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_proxies: Option<Vec<String>>,
}

/// A configured account
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserFileConfig {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Header names read from a trusted reverse proxy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub struct ForwardAuthHeaders {
    pub user: String,
    pub email: String,
    pub groups: String,
    pub name: String,
}

impl Default for ForwardAuthHeaders {
    fn default() -> Self {
        Self {
            user: DEFAULT_FORWARD_USER_HEADER.to_string(),
            email: DEFAULT_FORWARD_EMAIL_HEADER.to_string(),
            groups: DEFAULT_FORWARD_GROUPS_HEADER.to_string(),
            name: DEFAULT_FORWARD_NAME_HEADER.to_string(),
        }
    }
}

/// `auth.forward_auth` section
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct ForwardAuthFileConfig {
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    #[serde(default)]
    pub headers: ForwardAuthHeaders,
    #[serde(default)]
    pub default_role: Role,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admin_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logout_url: Option<String>,
}

/// Why a forward-auth trusted proxy list was rejected
#[derive(Debug, Error)]
pub enum TrustedProxyError {
    #[error("trusted_proxies must contain at least one address range")]
    Empty,
    #[error(transparent)]
    Invalid(#[from] IpRangeParseError),
}

impl ForwardAuthFileConfig {
    /// Parse the trusted proxy list. An empty list trusts nobody and is rejected.
    pub fn trusted_ranges(&self) -> std::result::Result<Vec<IpRange>, TrustedProxyError> {
        if self.trusted_proxies.is_empty() {
            return Err(TrustedProxyError::Empty);
        }
        Ok(parse_ranges(&self.trusted_proxies)?)
    }
}

/// ID token claim names
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub struct OidcClaims {
    pub username: String,
    pub email: String,
    pub groups: String,
    pub name: String,
}

impl Default for OidcClaims {
    fn default() -> Self {
        Self {
            username: OIDC_DEFAULT_USERNAME_CLAIM.to_string(),
            email: OIDC_DEFAULT_EMAIL_CLAIM.to_string(),
            groups: OIDC_DEFAULT_GROUPS_CLAIM.to_string(),
            name: OIDC_DEFAULT_NAME_CLAIM.to_string(),
        }
    }
}

fn default_oidc_scopes() -> Vec<String> {
    OIDC_DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

/// `auth.oidc` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct OidcFileConfig {
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_url: String,
    #[serde(default = "default_oidc_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub claims: OidcClaims,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admin_groups: Vec<String>,
    #[serde(default)]
    pub default_role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logout_url: Option<String>,
}

impl Default for OidcFileConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            client_id: String::new(),
            client_secret: None,
            redirect_url: String::new(),
            scopes: default_oidc_scopes(),
            claims: OidcClaims::default(),
            admin_groups: Vec::new(),
            default_role: Role::default(),
            logout_url: None,
        }
    }
}

impl OidcFileConfig {
    /// Names of required fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.issuer.trim().is_empty() {
            missing.push("issuer");
        }
        if self.client_id.trim().is_empty() {
            missing.push("client_id");
        }
        if self.redirect_url.trim().is_empty() {
            missing.push("redirect_url");
        }
        missing
    }
}

/// Authentication configuration section
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct AuthFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<AuthMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure_cookie: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<UserFileConfig>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_auth: Option<ForwardAuthFileConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Rate limit configuration section
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct RateLimitFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
}

/// File-based configuration (JSON)
///
/// The same file holds the dashboard's own sections (apps, groups, themes...).
/// Those are kept verbatim in `extra` so that saving the auth section never
/// drops them.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerFileConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthFileConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitFileConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FileConfig {
    /// Load configuration from a JSON file
    pub(crate) fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Warn about unknown fields in the auth section
    fn warn_unknown_fields(&self) {
        if let Some(auth) = &self.auth
            && !auth.extra.is_empty()
        {
            let keys_str: String = auth
                .extra
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in auth config section (possible typos)"
            );
        }
        if !self.extra.is_empty() {
            tracing::trace!(
                sections = ?self.extra.keys().collect::<Vec<_>>(),
                "Preserving non-auth config sections"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        // Server
        if let Some(server) = other.server {
            let current = self.server.get_or_insert_with(ServerFileConfig::default);
            if server.host.is_some() {
                tracing::trace!(host = ?server.host, "Merging server.host");
                current.host = server.host;
            }
            if server.port.is_some() {
                tracing::trace!(port = ?server.port, "Merging server.port");
                current.port = server.port;
            }
            if server.static_dir.is_some() {
                tracing::trace!(static_dir = ?server.static_dir, "Merging server.static_dir");
                current.static_dir = server.static_dir;
            }
            if server.trusted_proxies.is_some() {
                tracing::trace!(
                    trusted_proxies = ?server.trusted_proxies,
                    "Merging server.trusted_proxies"
                );
                current.trusted_proxies = server.trusted_proxies;
            }
        }

        // Auth
        if let Some(auth) = other.auth {
            let current = self.auth.get_or_insert_with(AuthFileConfig::default);
            if auth.method.is_some() {
                tracing::trace!(method = ?auth.method, "Merging auth.method");
                current.method = auth.method;
            }
            if auth.session_ttl.is_some() {
                tracing::trace!(session_ttl = ?auth.session_ttl, "Merging auth.session_ttl");
                current.session_ttl = auth.session_ttl;
            }
            if auth.cookie_name.is_some() {
                tracing::trace!(cookie_name = ?auth.cookie_name, "Merging auth.cookie_name");
                current.cookie_name = auth.cookie_name;
            }
            if auth.secure_cookie.is_some() {
                tracing::trace!(secure_cookie = ?auth.secure_cookie, "Merging auth.secure_cookie");
                current.secure_cookie = auth.secure_cookie;
            }
            // Account lists and provider sections are replaced whole, never
            // merged entry by entry
            if let Some(users) = auth.users {
                tracing::trace!(count = users.len(), "Merging auth.users");
                current.users = Some(users);
            }
            if auth.forward_auth.is_some() {
                tracing::trace!("Merging auth.forward_auth");
                current.forward_auth = auth.forward_auth;
            }
            if auth.oidc.is_some() {
                tracing::trace!("Merging auth.oidc");
                current.oidc = auth.oidc;
            }
            current.extra.extend(auth.extra);
        }

        // Rate limit
        if let Some(rate_limit) = other.rate_limit {
            let current = self
                .rate_limit
                .get_or_insert_with(RateLimitFileConfig::default);
            if rate_limit.max_attempts.is_some() {
                tracing::trace!(
                    max_attempts = ?rate_limit.max_attempts,
                    "Merging rate_limit.max_attempts"
                );
                current.max_attempts = rate_limit.max_attempts;
            }
            if rate_limit.window_secs.is_some() {
                tracing::trace!(
                    window_secs = ?rate_limit.window_secs,
                    "Merging rate_limit.window_secs"
                );
                current.window_secs = rate_limit.window_secs;
            }
        }

        if other.debug.is_some() {
            self.debug = other.debug;
        }

        self.extra.extend(other.extra);
    }
}

// =============================================================================
// Resolved Config Structs
// =============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub trusted_proxies: Vec<IpRange>,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// `None` until first-run setup has been committed
    pub method: Option<AuthMethod>,
    pub session_ttl: Duration,
    pub cookie_name: String,
    pub secure_cookie: bool,
    pub users: Vec<UserFileConfig>,
    pub forward_auth: Option<ForwardAuthFileConfig>,
    pub oidc: Option<OidcFileConfig>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RATE_LIMIT_MAX_ATTEMPTS,
            window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub debug: bool,
    /// File that configuration changes are written back to
    pub config_path: PathBuf,
    /// Raw contents of `config_path` at startup; the base for every save
    pub snapshot: FileConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.dashgate/dashgate.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        Self::load_with_profile(cli, get_profile_config_path())
    }

    fn load_with_profile(cli: &CliConfig, profile_path: Option<PathBuf>) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        // 1. Load from profile dir - skip if not exists
        let profile_path = profile_path.filter(|p| p.exists());
        if let Some(ref path) = profile_path {
            let profile_config = FileConfig::load_from_file(path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(path.display().to_string());
        }

        // 2. Load from CLI-specified path OR local directory
        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        let mut snapshot = None;
        if let Some(ref path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(path)?;
            overlay_config.warn_unknown_fields();
            snapshot = Some(overlay_config.clone());
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        // Writes go to the overlay file, then the profile file, then a new
        // local file
        let (config_path, snapshot) = match (overlay_path, snapshot, profile_path) {
            (Some(path), Some(snapshot), _) => (path, snapshot),
            (_, _, Some(path)) => {
                let snapshot = FileConfig::load_from_file(&path)?;
                (path, snapshot)
            }
            _ => (PathBuf::from(CONFIG_FILE_NAME), FileConfig::default()),
        };

        // 3. Extract file config values with defaults
        let file_server = file_config.server.unwrap_or_default();
        let file_auth = file_config.auth.unwrap_or_default();
        let file_rate_limit = file_config.rate_limit.unwrap_or_default();

        // 4. Layer configs: defaults -> file config -> CLI/env overrides
        let host = cli
            .host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT);

        let static_dir = cli
            .static_dir
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .or(file_server.static_dir)
            .map(|p| expand_path(&p));

        let trusted_proxies = parse_ranges(&file_server.trusted_proxies.unwrap_or_default())
            .context("Configuration error: server.trusted_proxies")?;

        let session_ttl_str = cli
            .session_ttl
            .clone()
            .or(file_auth.session_ttl)
            .unwrap_or_else(|| DEFAULT_SESSION_TTL.to_string());
        let session_ttl = parse_duration(&session_ttl_str).with_context(|| {
            format!(
                "Configuration error: invalid auth.session_ttl '{}'",
                session_ttl_str
            )
        })?;

        let rate_limit = RateLimitConfig {
            max_attempts: cli
                .rate_limit_max_attempts
                .or(file_rate_limit.max_attempts)
                .unwrap_or(DEFAULT_RATE_LIMIT_MAX_ATTEMPTS),
            window: Duration::from_secs(
                cli.rate_limit_window_secs
                    .or(file_rate_limit.window_secs)
                    .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            ),
        };

        let config = Self {
            server: ServerConfig {
                host,
                port,
                static_dir,
                trusted_proxies,
            },
            auth: AuthConfig {
                method: file_auth.method,
                session_ttl,
                cookie_name: file_auth
                    .cookie_name
                    .unwrap_or_else(|| DEFAULT_SESSION_COOKIE_NAME.to_string()),
                secure_cookie: cli
                    .secure_cookie
                    .or(file_auth.secure_cookie)
                    .unwrap_or(false),
                users: file_auth.users.unwrap_or_default(),
                forward_auth: file_auth.forward_auth,
                oidc: file_auth.oidc,
            },
            rate_limit,
            debug: cli.debug || file_config.debug.unwrap_or(false),
            config_path,
            snapshot,
        };

        config.validate()?;

        tracing::debug!(
            host = %config.server.host,
            port = config.server.port,
            method = ?config.auth.method,
            users = config.auth.users.len(),
            config_path = %config.config_path.display(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Whether first-run setup still has to pick a trust model
    pub fn needs_setup(&self) -> bool {
        self.auth.method.is_none()
    }

    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }

        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }

        if self.auth.session_ttl.is_zero() {
            anyhow::bail!("Configuration error: auth.session_ttl must be greater than 0");
        }

        if self.auth.cookie_name.trim().is_empty() {
            anyhow::bail!("Configuration error: auth.cookie_name must not be empty");
        }

        if self.rate_limit.max_attempts == 0 {
            anyhow::bail!("Configuration error: rate_limit.max_attempts must be greater than 0");
        }
        if self.rate_limit.window.is_zero() {
            anyhow::bail!("Configuration error: rate_limit.window_secs must be greater than 0");
        }

        let mut seen = std::collections::HashSet::new();
        for user in &self.auth.users {
            if user.username.trim().is_empty() {
                anyhow::bail!("Configuration error: auth.users entries need a username");
            }
            if !seen.insert(user.username.as_str()) {
                anyhow::bail!(
                    "Configuration error: duplicate user '{}' in auth.users",
                    user.username
                );
            }
        }

        match self.auth.method {
            Some(AuthMethod::Builtin) => {
                if !self
                    .auth
                    .users
                    .iter()
                    .any(|u| u.role == Role::Admin && u.password_hash.is_some())
                {
                    tracing::warn!(
                        "auth.method is 'builtin' but no admin account with a password is configured"
                    );
                }
            }
            Some(AuthMethod::ForwardAuth) => {
                let Some(forward) = &self.auth.forward_auth else {
                    anyhow::bail!(
                        "Configuration error: auth.forward_auth is required when auth.method is 'forward_auth'"
                    );
                };
                forward
                    .trusted_ranges()
                    .map_err(|e| anyhow::anyhow!("Configuration error: auth.forward_auth: {}", e))?;
            }
            Some(AuthMethod::Oidc) => {
                let Some(oidc) = &self.auth.oidc else {
                    anyhow::bail!(
                        "Configuration error: auth.oidc is required when auth.method is 'oidc'"
                    );
                };
                let missing = oidc.missing_fields();
                if !missing.is_empty() {
                    anyhow::bail!(
                        "Configuration error: auth.oidc is missing {}",
                        missing.join(", ")
                    );
                }
            }
            Some(AuthMethod::None) => {
                if !is_loopback(&self.server.host) {
                    tracing::warn!(
                        host = %self.server.host,
                        "Authentication is disabled and the server is reachable from the network"
                    );
                }
            }
            None => {}
        }

        Ok(())
    }
}

/// Get the profile config path (~/.dashgate/dashgate.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "127.0.0.1" | "::1" | "[::1]" | "localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_file(json: &str) -> Result<AppConfig> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashgate.json");
        fs::write(&path, json).unwrap();
        let cli = CliConfig {
            config: Some(path),
            ..Default::default()
        };
        AppConfig::load_with_profile(&cli, None)
    }

    #[test]
    fn test_auth_method_serde() {
        let method: AuthMethod = serde_json::from_str(r#""forward_auth""#).unwrap();
        assert_eq!(method, AuthMethod::ForwardAuth);
        assert_eq!(serde_json::to_string(&AuthMethod::Oidc).unwrap(), r#""oidc""#);
        assert_eq!(AuthMethod::None.to_string(), "none");
    }

    #[test]
    fn test_role_satisfies() {
        assert!(Role::Admin.satisfies(Role::Admin));
        assert!(Role::Admin.satisfies(Role::Viewer));
        assert!(Role::User.satisfies(Role::Viewer));
        assert!(!Role::User.satisfies(Role::Admin));
        assert!(!Role::Viewer.satisfies(Role::User));
    }

    #[test]
    fn test_file_config_parse_full() {
        let json = r#"{
            "server": { "host": "0.0.0.0", "port": 8080 },
            "auth": {
                "method": "builtin",
                "session_ttl": "7d",
                "users": [
                    { "username": "alice", "password_hash": "$argon2id$x", "role": "admin" }
                ]
            },
            "apps": [{ "name": "Grafana", "url": "http://grafana" }]
        }"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();

        let server = config.server.as_ref().unwrap();
        assert_eq!(server.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(server.port, Some(8080));
        let auth = config.auth.as_ref().unwrap();
        assert_eq!(auth.method, Some(AuthMethod::Builtin));
        assert_eq!(auth.users.as_ref().unwrap()[0].role, Role::Admin);
        assert!(config.extra.contains_key("apps"));
    }

    #[test]
    fn test_file_config_round_trip_keeps_dashboard_sections() {
        let json = r#"{"auth":{"method":"none"},"apps":[{"name":"x"}],"theme":"dark"}"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["apps"][0]["name"], "x");
        assert_eq!(value["theme"], "dark");
        assert_eq!(value["auth"]["method"], "none");
        assert!(value.get("server").is_none());
    }

    #[test]
    fn test_file_config_defaults_for_provider_sections() {
        let json = r#"{"auth":{"oidc":{"issuer":"https://id.example"},"forward_auth":{}}}"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();
        let auth = config.auth.unwrap();
        let oidc = auth.oidc.unwrap();
        assert_eq!(oidc.claims.username, "preferred_username");
        assert_eq!(oidc.scopes, vec!["openid", "profile", "email", "groups"]);
        assert_eq!(oidc.missing_fields(), vec!["client_id", "redirect_url"]);
        let forward = auth.forward_auth.unwrap();
        assert_eq!(forward.headers.user, "Remote-User");
        assert_eq!(forward.default_role, Role::User);
    }

    #[test]
    fn test_file_config_merge() {
        let mut base: FileConfig = serde_json::from_str(
            r#"{"server":{"host":"base","port":1000},"auth":{"method":"none","cookie_name":"a"},"apps":[1]}"#,
        )
        .unwrap();
        let overlay: FileConfig = serde_json::from_str(
            r#"{"server":{"port":2000},"auth":{"method":"builtin"},"groups":[2]}"#,
        )
        .unwrap();
        base.merge(overlay);

        let server = base.server.as_ref().unwrap();
        assert_eq!(server.host.as_deref(), Some("base"));
        assert_eq!(server.port, Some(2000));
        let auth = base.auth.as_ref().unwrap();
        assert_eq!(auth.method, Some(AuthMethod::Builtin));
        assert_eq!(auth.cookie_name.as_deref(), Some("a"));
        assert!(base.extra.contains_key("apps"));
        assert!(base.extra.contains_key("groups"));
    }

    #[test]
    fn test_app_config_defaults() {
        let cli = CliConfig::default();
        let config = AppConfig::load_with_profile(&cli, None).unwrap();

        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.auth.session_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(config.auth.cookie_name, DEFAULT_SESSION_COOKIE_NAME);
        assert!(!config.auth.secure_cookie);
        assert!(config.needs_setup());
        assert_eq!(config.rate_limit.max_attempts, 5);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
    }

    #[test]
    fn test_app_config_cli_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        fs::write(
            &path,
            r#"{"server":{"host":"file.host","port":9000},"auth":{"session_ttl":"1h"}}"#,
        )
        .unwrap();
        let cli = CliConfig {
            host: Some("cli.host".to_string()),
            port: Some(3000),
            debug: true,
            config: Some(path.clone()),
            static_dir: None,
            secure_cookie: Some(true),
            session_ttl: Some("2w".to_string()),
            rate_limit_max_attempts: Some(3),
            rate_limit_window_secs: Some(30),
        };
        let config = AppConfig::load_with_profile(&cli, None).unwrap();

        assert_eq!(config.server.host, "cli.host");
        assert_eq!(config.server.port, 3000);
        assert!(config.debug);
        assert!(config.auth.secure_cookie);
        assert_eq!(config.auth.session_ttl, Duration::from_secs(14 * 86400));
        assert_eq!(config.rate_limit.max_attempts, 3);
        assert_eq!(config.config_path, path);
    }

    #[test]
    fn test_app_config_missing_cli_path_fails() {
        let cli = CliConfig {
            config: Some(PathBuf::from("/nonexistent/dashgate.json")),
            ..Default::default()
        };
        assert!(AppConfig::load_with_profile(&cli, None).is_err());
    }

    #[test]
    fn test_app_config_profile_is_save_target_without_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("dashgate.json");
        fs::write(&profile, r#"{"auth":{"method":"none"},"apps":[]}"#).unwrap();
        let config = AppConfig::load_with_profile(&CliConfig::default(), Some(profile.clone()))
            .unwrap();
        assert_eq!(config.config_path, profile);
        assert_eq!(config.auth.method, Some(AuthMethod::None));
        assert!(config.snapshot.extra.contains_key("apps"));
        assert!(!config.needs_setup());
    }

    #[test]
    fn test_app_config_validation_port_zero() {
        let err = load_file(r#"{"server":{"port":0}}"#).unwrap_err();
        assert!(err.to_string().contains("server.port"));
    }

    #[test]
    fn test_app_config_validation_empty_host() {
        let err = load_file(r#"{"server":{"host":""}}"#).unwrap_err();
        assert!(err.to_string().contains("server.host"));
    }

    #[test]
    fn test_app_config_validation_bad_session_ttl() {
        let err = load_file(r#"{"auth":{"session_ttl":"forever"}}"#).unwrap_err();
        assert!(err.to_string().contains("session_ttl"));
    }

    #[test]
    fn test_app_config_validation_forward_auth_requires_proxies() {
        let err = load_file(r#"{"auth":{"method":"forward_auth","forward_auth":{}}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("trusted_proxies"));

        let err = load_file(
            r#"{"auth":{"method":"forward_auth","forward_auth":{"trusted_proxies":["nope"]}}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("nope"));

        let config = load_file(
            r#"{"auth":{"method":"forward_auth","forward_auth":{"trusted_proxies":["10.0.0.0/8"]}}}"#,
        )
        .unwrap();
        assert_eq!(config.auth.method, Some(AuthMethod::ForwardAuth));
    }

    #[test]
    fn test_app_config_validation_incomplete_oidc() {
        let err = load_file(r#"{"auth":{"method":"oidc","oidc":{"issuer":"https://id"}}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn test_app_config_validation_duplicate_users() {
        let err = load_file(
            r#"{"auth":{"users":[{"username":"a","role":"admin"},{"username":"a","role":"user"}]}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_app_config_validation_bad_server_proxy() {
        assert!(load_file(r#"{"server":{"trusted_proxies":["300.0.0.1"]}}"#).is_err());
    }

    #[test]
    fn test_empty_file_is_pending_setup() {
        let config = load_file("").unwrap();
        assert!(config.needs_setup());
        assert_eq!(config.snapshot, FileConfig::default());
    }
}
