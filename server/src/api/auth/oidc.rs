//! OpenID Connect authorization-code flow
//!
//! `begin_login` stores a single-use pending login (state, nonce, PKCE
//! verifier) and returns the provider authorization URL. `handle_callback`
//! consumes the state, redeems the code, verifies the ID token against the
//! provider JWKS and maps its claims to an [`AuthContext`].
//!
//! Provider discovery documents and key sets are cached; an unknown `kid`
//! forces one key set refresh to pick up rotated keys.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use moka::future::Cache as AsyncCache;
use moka::sync::Cache;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::context::{AuthContext, role_from_groups};
use super::trust::OidcModel;
use crate::core::config::AuthMethod;
use crate::core::constants::{
    OIDC_DISCOVERY_TTL_SECS, OIDC_HTTP_TIMEOUT_SECS, OIDC_MAX_PENDING_LOGINS, OIDC_STATE_TTL_SECS,
};
use crate::utils::crypto;

/// Clock skew tolerated on `exp`/`iat`
const ID_TOKEN_LEEWAY_SECS: u64 = 60;

/// Random bytes for state, nonce and PKCE verifier (43 chars base64url)
const FLOW_TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum OidcError {
    #[error("Login state is unknown, expired or already used")]
    InvalidState,
    #[error("Identity provider unreachable: {0}")]
    Unavailable(String),
    #[error("Token exchange failed: {0}")]
    Exchange(String),
    #[error("ID token rejected: {0}")]
    InvalidToken(String),
    #[error("ID token has no usable '{0}' claim")]
    MissingClaim(String),
    #[error("Failed to generate login state: {0}")]
    Random(#[from] rand::Error),
}

impl OidcError {
    /// Value of the `error` query parameter on the login page redirect
    pub fn login_error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "oidc_unavailable",
            _ => "oidc_failed",
        }
    }
}

/// Subset of the OpenID provider metadata document
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Parameters of the authorization code redemption
#[derive(Debug)]
pub struct TokenRequest<'a> {
    pub code: &'a str,
    pub redirect_uri: &'a str,
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
    pub code_verifier: &'a str,
}

/// HTTP side of the flow, separated so the protocol logic can be exercised
/// without a live provider
#[async_trait]
pub trait OidcProvider: Send + Sync {
    async fn discover(&self, issuer: &str) -> Result<ProviderMetadata, OidcError>;
    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<JwkSet, OidcError>;
    async fn exchange_code(
        &self,
        token_endpoint: &str,
        request: &TokenRequest<'_>,
    ) -> Result<TokenResponse, OidcError>;
}

/// `reqwest` implementation with a bounded timeout on every call
pub struct HttpOidcProvider {
    client: reqwest::Client,
}

impl HttpOidcProvider {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(OIDC_HTTP_TIMEOUT_SECS))
            .user_agent(format!("Dashgate/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

fn transport_error(e: reqwest::Error) -> OidcError {
    OidcError::Unavailable(e.to_string())
}

#[async_trait]
impl OidcProvider for HttpOidcProvider {
    async fn discover(&self, issuer: &str) -> Result<ProviderMetadata, OidcError> {
        let url = format!("{}/.well-known/openid-configuration", issuer);
        let resp = self.client.get(&url).send().await.map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(OidcError::Unavailable(format!(
                "discovery returned HTTP {}",
                resp.status()
            )));
        }
        resp.json::<ProviderMetadata>()
            .await
            .map_err(|e| OidcError::Unavailable(format!("invalid discovery document: {}", e)))
    }

    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<JwkSet, OidcError> {
        let resp = self
            .client
            .get(jwks_uri)
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(OidcError::Unavailable(format!(
                "JWKS returned HTTP {}",
                resp.status()
            )));
        }
        resp.json::<JwkSet>()
            .await
            .map_err(|e| OidcError::Unavailable(format!("invalid JWKS: {}", e)))
    }

    async fn exchange_code(
        &self,
        token_endpoint: &str,
        request: &TokenRequest<'_>,
    ) -> Result<TokenResponse, OidcError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", request.code),
            ("redirect_uri", request.redirect_uri),
            ("client_id", request.client_id),
            ("code_verifier", request.code_verifier),
        ];
        if let Some(secret) = request.client_secret {
            form.push(("client_secret", secret));
        }

        let resp = self
            .client
            .post(token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(OidcError::Unavailable(format!(
                "token endpoint returned HTTP {}",
                status
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(OidcError::Exchange(format!("HTTP {}: {}", status, snippet)));
        }
        resp.json::<TokenResponse>()
            .await
            .map_err(|e| OidcError::Exchange(format!("invalid token response: {}", e)))
    }
}

#[derive(Debug, Clone)]
struct PendingLogin {
    issuer: String,
    nonce: String,
    code_verifier: String,
}

/// Orchestrates login and callback against the active OIDC model
pub struct OidcFlow {
    provider: Arc<dyn OidcProvider>,
    pending: Cache<String, PendingLogin>,
    metadata: AsyncCache<String, Arc<ProviderMetadata>>,
    jwks: AsyncCache<String, Arc<JwkSet>>,
}

impl OidcFlow {
    pub fn new(provider: Arc<dyn OidcProvider>) -> Self {
        let discovery_ttl = Duration::from_secs(OIDC_DISCOVERY_TTL_SECS);
        Self {
            provider,
            pending: Cache::builder()
                .max_capacity(OIDC_MAX_PENDING_LOGINS)
                .time_to_live(Duration::from_secs(OIDC_STATE_TTL_SECS))
                .build(),
            metadata: AsyncCache::builder()
                .max_capacity(16)
                .time_to_live(discovery_ttl)
                .build(),
            jwks: AsyncCache::builder()
                .max_capacity(16)
                .time_to_live(discovery_ttl)
                .build(),
        }
    }

    /// Build the provider authorization URL for a new login attempt
    pub async fn begin_login(&self, model: &OidcModel) -> Result<String, OidcError> {
        let config = &model.config;
        let metadata = self.metadata(&config.issuer).await?;

        let state = crypto::try_generate_url_token(FLOW_TOKEN_BYTES)?;
        let nonce = crypto::try_generate_url_token(FLOW_TOKEN_BYTES)?;
        let code_verifier = crypto::try_generate_url_token(FLOW_TOKEN_BYTES)?;
        let code_challenge = crypto::pkce_challenge(&code_verifier);

        let scope = config.scopes.join(" ");
        let url = reqwest::Url::parse_with_params(
            &metadata.authorization_endpoint,
            &[
                ("response_type", "code"),
                ("client_id", config.client_id.as_str()),
                ("redirect_uri", config.redirect_url.as_str()),
                ("scope", scope.as_str()),
                ("state", state.as_str()),
                ("nonce", nonce.as_str()),
                ("code_challenge", code_challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| OidcError::Unavailable(format!("invalid authorization endpoint: {}", e)))?;

        self.pending.insert(
            state,
            PendingLogin {
                issuer: config.issuer.clone(),
                nonce,
                code_verifier,
            },
        );

        Ok(url.into())
    }

    /// Complete a login. The state is consumed whether or not the rest of the
    /// flow succeeds.
    pub async fn handle_callback(
        &self,
        model: &OidcModel,
        code: &str,
        state: &str,
    ) -> Result<AuthContext, OidcError> {
        let config = &model.config;
        let pending = self.pending.remove(state).ok_or(OidcError::InvalidState)?;
        if pending.issuer != config.issuer {
            return Err(OidcError::InvalidState);
        }

        let metadata = self.metadata(&config.issuer).await?;
        let tokens = self
            .provider
            .exchange_code(
                &metadata.token_endpoint,
                &TokenRequest {
                    code,
                    redirect_uri: &config.redirect_url,
                    client_id: &config.client_id,
                    client_secret: config.client_secret.as_deref(),
                    code_verifier: &pending.code_verifier,
                },
            )
            .await?;
        let id_token = tokens
            .id_token
            .ok_or_else(|| OidcError::Exchange("token response has no id_token".to_string()))?;

        let claims = self
            .verify_id_token(model, &metadata, &id_token, &pending.nonce)
            .await?;
        identity_from_claims(model, &claims)
    }

    async fn metadata(&self, issuer: &str) -> Result<Arc<ProviderMetadata>, OidcError> {
        if let Some(metadata) = self.metadata.get(issuer).await {
            return Ok(metadata);
        }
        let metadata = Arc::new(self.provider.discover(issuer).await?);
        tracing::debug!(issuer = %issuer, "OIDC discovery document fetched");
        self.metadata
            .insert(issuer.to_string(), metadata.clone())
            .await;
        Ok(metadata)
    }

    async fn key_set(&self, jwks_uri: &str, refresh: bool) -> Result<Arc<JwkSet>, OidcError> {
        if !refresh && let Some(jwks) = self.jwks.get(jwks_uri).await {
            return Ok(jwks);
        }
        let jwks = Arc::new(self.provider.fetch_jwks(jwks_uri).await?);
        self.jwks.insert(jwks_uri.to_string(), jwks.clone()).await;
        Ok(jwks)
    }

    async fn decoding_key(
        &self,
        jwks_uri: &str,
        kid: Option<&str>,
    ) -> Result<DecodingKey, OidcError> {
        for refresh in [false, true] {
            let jwks = self.key_set(jwks_uri, refresh).await?;
            let jwk = match kid {
                Some(kid) => jwks.find(kid),
                None if jwks.keys.len() == 1 => jwks.keys.first(),
                None => None,
            };
            if let Some(jwk) = jwk {
                return DecodingKey::from_jwk(jwk)
                    .map_err(|e| OidcError::InvalidToken(format!("unusable signing key: {}", e)));
            }
        }
        Err(OidcError::InvalidToken(format!(
            "no signing key matches kid {:?}",
            kid
        )))
    }

    async fn verify_id_token(
        &self,
        model: &OidcModel,
        metadata: &ProviderMetadata,
        id_token: &str,
        expected_nonce: &str,
    ) -> Result<Map<String, Value>, OidcError> {
        let header = decode_header(id_token)
            .map_err(|e| OidcError::InvalidToken(format!("malformed header: {}", e)))?;
        if !is_asymmetric(header.alg) {
            return Err(OidcError::InvalidToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        let key = self
            .decoding_key(&metadata.jwks_uri, header.kid.as_deref())
            .await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = ID_TOKEN_LEEWAY_SECS;
        validation.set_issuer(&[metadata.issuer.as_str()]);
        validation.set_audience(&[model.config.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let data = decode::<Map<String, Value>>(id_token, &key, &validation)
            .map_err(|e| OidcError::InvalidToken(e.to_string()))?;

        let nonce = data.claims.get("nonce").and_then(Value::as_str).unwrap_or("");
        if !crypto::constant_time_eq(nonce, expected_nonce) {
            return Err(OidcError::InvalidToken("nonce mismatch".to_string()));
        }

        Ok(data.claims)
    }
}

fn is_asymmetric(alg: Algorithm) -> bool {
    matches!(
        alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
            | Algorithm::ES256
            | Algorithm::ES384
            | Algorithm::EdDSA
    )
}

fn string_claim(claims: &Map<String, Value>, name: &str) -> Option<String> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Groups may be a JSON array of strings or a single string
fn groups_claim(claims: &Map<String, Value>, name: &str) -> Vec<String> {
    match claims.get(name) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(group)) if !group.is_empty() => vec![group.clone()],
        _ => Vec::new(),
    }
}

fn identity_from_claims(
    model: &OidcModel,
    claims: &Map<String, Value>,
) -> Result<AuthContext, OidcError> {
    let names = &model.config.claims;
    let username = string_claim(claims, &names.username)
        .or_else(|| {
            tracing::debug!(claim = %names.username, "Username claim absent, falling back to sub");
            string_claim(claims, "sub")
        })
        .ok_or_else(|| OidcError::MissingClaim(names.username.clone()))?;

    let groups = groups_claim(claims, &names.groups);
    let role = role_from_groups(
        &groups,
        &model.config.admin_groups,
        model.config.default_role,
    );

    Ok(AuthContext {
        username,
        role,
        email: string_claim(claims, &names.email),
        display_name: string_claim(claims, &names.name),
        groups,
        method: AuthMethod::Oidc,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::core::config::Role;

    fn flow(provider: Arc<FakeProvider>) -> OidcFlow {
        OidcFlow::new(provider)
    }

    #[tokio::test]
    async fn test_begin_login_builds_authorization_url() {
        let provider = Arc::new(FakeProvider::default());
        let flow = flow(provider.clone());
        let url = flow.begin_login(&model()).await.unwrap();

        assert!(url.starts_with("https://id.example.com/authorize?"));
        assert_eq!(query_param(&url, "response_type"), "code");
        assert_eq!(query_param(&url, "client_id"), CLIENT_ID);
        assert_eq!(query_param(&url, "scope"), "openid profile email groups");
        assert_eq!(query_param(&url, "code_challenge_method"), "S256");
        assert_eq!(query_param(&url, "state").len(), 43);

        // Discovery is cached across logins
        flow.begin_login(&model()).await.unwrap();
        assert_eq!(provider.discover_calls(), 1);
    }

    #[tokio::test]
    async fn test_callback_success_maps_claims() {
        let provider = Arc::new(FakeProvider::default());
        let flow = flow(provider.clone());
        let url = flow.begin_login(&model()).await.unwrap();
        let state = query_param(&url, "state");
        let nonce = query_param(&url, "nonce");
        *provider.id_token.lock() = Some(sign(&claims(&nonce)));

        let identity = flow.handle_callback(&model(), "good-code", &state).await.unwrap();
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.role, Role::Admin);
        assert_eq!(identity.email.as_deref(), Some("alice@example.com"));
        assert_eq!(identity.display_name.as_deref(), Some("Alice"));
        assert_eq!(identity.method, AuthMethod::Oidc);

        // PKCE verifier sent to the token endpoint matches the challenge
        let verifier = provider.last_verifier.lock().clone().unwrap();
        assert_eq!(
            crypto::pkce_challenge(&verifier),
            query_param(&url, "code_challenge")
        );
    }

    #[tokio::test]
    async fn test_state_is_single_use() {
        let provider = Arc::new(FakeProvider::default());
        let flow = flow(provider.clone());
        let url = flow.begin_login(&model()).await.unwrap();
        let state = query_param(&url, "state");
        *provider.id_token.lock() = Some(sign(&claims(&query_param(&url, "nonce"))));

        flow.handle_callback(&model(), "good-code", &state).await.unwrap();
        let replay = flow.handle_callback(&model(), "good-code", &state).await;
        assert!(matches!(replay, Err(OidcError::InvalidState)));

        let unknown = flow.handle_callback(&model(), "good-code", "forged").await;
        assert!(matches!(unknown, Err(OidcError::InvalidState)));
    }

    #[tokio::test]
    async fn test_rejects_nonce_mismatch() {
        let provider = Arc::new(FakeProvider::default());
        let flow = flow(provider.clone());
        let url = flow.begin_login(&model()).await.unwrap();
        *provider.id_token.lock() = Some(sign(&claims("some-other-nonce")));

        let result = flow
            .handle_callback(&model(), "good-code", &query_param(&url, "state"))
            .await;
        assert!(matches!(result, Err(OidcError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_rejects_wrong_audience_and_expired() {
        let provider = Arc::new(FakeProvider::default());
        let flow = flow(provider.clone());

        let url = flow.begin_login(&model()).await.unwrap();
        let mut wrong_aud = claims(&query_param(&url, "nonce"));
        wrong_aud["aud"] = Value::from("someone-else");
        *provider.id_token.lock() = Some(sign(&wrong_aud));
        let result = flow
            .handle_callback(&model(), "good-code", &query_param(&url, "state"))
            .await;
        assert!(matches!(result, Err(OidcError::InvalidToken(_))));

        let url = flow.begin_login(&model()).await.unwrap();
        let mut expired = claims(&query_param(&url, "nonce"));
        expired["exp"] = Value::from(chrono::Utc::now().timestamp() - 3600);
        *provider.id_token.lock() = Some(sign(&expired));
        let result = flow
            .handle_callback(&model(), "good-code", &query_param(&url, "state"))
            .await;
        assert!(matches!(result, Err(OidcError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_exchange_failure_and_unavailable_provider() {
        let provider = Arc::new(FakeProvider::default());
        let flow = flow(provider.clone());
        let url = flow.begin_login(&model()).await.unwrap();
        let err = flow
            .handle_callback(&model(), "bad-code", &query_param(&url, "state"))
            .await
            .unwrap_err();
        assert!(matches!(err, OidcError::Exchange(_)));
        assert_eq!(err.login_error_code(), "oidc_failed");

        let down = OidcFlow::new(Arc::new(FakeProvider {
            unavailable: true,
            ..Default::default()
        }));
        let err = down.begin_login(&model()).await.unwrap_err();
        assert_eq!(err.login_error_code(), "oidc_unavailable");
    }

    #[test]
    fn test_identity_from_claims_defaults() {
        let mut claims = Map::new();
        claims.insert("sub".into(), Value::from("user-123"));
        claims.insert("groups".into(), Value::from("staff"));
        let identity = identity_from_claims(&model(), &claims).unwrap();
        assert_eq!(identity.username, "user-123");
        assert_eq!(identity.groups, vec!["staff"]);
        assert_eq!(identity.role, Role::User);

        assert!(matches!(
            identity_from_claims(&model(), &Map::new()),
            Err(OidcError::MissingClaim(_))
        ));
    }
}
