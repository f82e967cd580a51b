// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "Dashgate";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "dashgate";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".dashgate";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "dashgate.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "DASHGATE_CONFIG";

// =============================================================================
// Environment Variables
// =============================================================================

/// Environment variable for debug mode
pub const ENV_DEBUG: &str = "DASHGATE_DEBUG";

/// Environment variable for server host
pub const ENV_HOST: &str = "DASHGATE_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "DASHGATE_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "DASHGATE_LOG";

/// Environment variable for the static frontend directory
pub const ENV_STATIC_DIR: &str = "DASHGATE_STATIC_DIR";

/// Environment variable forcing the `Secure` cookie flag
pub const ENV_SECURE_COOKIE: &str = "DASHGATE_SECURE_COOKIE";

/// Environment variable for session lifetime (e.g. `24h`, `7d`)
pub const ENV_SESSION_TTL: &str = "DASHGATE_SESSION_TTL";

/// Environment variable for max login/setup attempts per window
pub const ENV_RATE_LIMIT_MAX_ATTEMPTS: &str = "DASHGATE_RATE_LIMIT_MAX_ATTEMPTS";

/// Environment variable for the rate limit window in seconds
pub const ENV_RATE_LIMIT_WINDOW_SECS: &str = "DASHGATE_RATE_LIMIT_WINDOW_SECS";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 7575;

/// Graceful shutdown timeout for background tasks
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Prefix of the protected JSON API
pub const API_PREFIX: &str = "/api/";

/// Login page that unauthenticated page navigations are sent to
pub const LOGIN_PAGE_PATH: &str = "/login";

// =============================================================================
// Request Body Limits
// =============================================================================

/// Default body limit for API requests (64KB)
pub const DEFAULT_API_BODY_LIMIT: usize = 64 * 1024;

/// Body limit for bulk configuration and theme endpoints (1MB)
pub const CONFIG_BODY_LIMIT: usize = 1024 * 1024;

/// Body limit for custom icon uploads (5MB)
pub const ICON_BODY_LIMIT: usize = 5 * 1024 * 1024;

// =============================================================================
// Sessions
// =============================================================================

/// Default session cookie name
pub const DEFAULT_SESSION_COOKIE_NAME: &str = "dashgate_session";

/// Default session lifetime
pub const DEFAULT_SESSION_TTL: &str = "24h";

/// Random bytes per session token (hex encoded to 64 chars)
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Interval between expired-session sweeps
pub const SESSION_SWEEP_INTERVAL_SECS: u64 = 300;

// =============================================================================
// Accounts
// =============================================================================

/// Minimum password length for builtin accounts
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum password length (bounds hashing cost)
pub const MAX_PASSWORD_LENGTH: usize = 256;

/// Maximum username length
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Username of the synthesized identity when authentication is disabled
pub const VIRTUAL_ADMIN_USERNAME: &str = "admin";

// =============================================================================
// Rate Limiting
// =============================================================================

/// Default attempts allowed per window on login/setup
pub const DEFAULT_RATE_LIMIT_MAX_ATTEMPTS: u32 = 5;

/// Default sliding window length in seconds
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Interval between rate limiter sweeps
pub const RATE_LIMIT_SWEEP_INTERVAL_SECS: u64 = 60;

// =============================================================================
// Forward Auth
// =============================================================================

pub const DEFAULT_FORWARD_USER_HEADER: &str = "Remote-User";
pub const DEFAULT_FORWARD_EMAIL_HEADER: &str = "Remote-Email";
pub const DEFAULT_FORWARD_GROUPS_HEADER: &str = "Remote-Groups";
pub const DEFAULT_FORWARD_NAME_HEADER: &str = "Remote-Name";

// =============================================================================
// OIDC
// =============================================================================

/// Lifetime of a pending authorization request (state/nonce/PKCE verifier)
pub const OIDC_STATE_TTL_SECS: u64 = 600;

/// Maximum number of concurrently pending authorization requests
pub const OIDC_MAX_PENDING_LOGINS: u64 = 10_000;

/// Timeout for every call to the identity provider
pub const OIDC_HTTP_TIMEOUT_SECS: u64 = 10;

/// How long discovery documents and JWKS are cached
pub const OIDC_DISCOVERY_TTL_SECS: u64 = 3600;

/// Default scopes requested from the provider
pub const OIDC_DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email", "groups"];

pub const OIDC_DEFAULT_USERNAME_CLAIM: &str = "preferred_username";
pub const OIDC_DEFAULT_EMAIL_CLAIM: &str = "email";
pub const OIDC_DEFAULT_GROUPS_CLAIM: &str = "groups";
pub const OIDC_DEFAULT_NAME_CLAIM: &str = "name";
