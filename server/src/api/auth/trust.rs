//! Active trust model

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::core::config::{
    AuthMethod, ForwardAuthFileConfig, ForwardAuthHeaders, OidcFileConfig, Role,
    TrustedProxyError,
};
use crate::utils::net::IpRange;

#[derive(Debug, Error)]
pub enum TrustModelError {
    #[error("auth.{0} section is required for this method")]
    MissingSection(&'static str),
    #[error("forward_auth: {0}")]
    TrustedProxies(#[from] TrustedProxyError),
    #[error("oidc: missing {0}")]
    OidcFields(String),
}

/// Header-based identity from a trusted reverse proxy
#[derive(Debug, Clone)]
pub struct ForwardAuthModel {
    pub trusted_proxies: Vec<IpRange>,
    pub headers: ForwardAuthHeaders,
    pub default_role: Role,
    pub admin_groups: Vec<String>,
    pub logout_url: Option<String>,
}

impl ForwardAuthModel {
    pub fn from_config(config: &ForwardAuthFileConfig) -> Result<Self, TrustModelError> {
        Ok(Self {
            trusted_proxies: config.trusted_ranges()?,
            headers: config.headers.clone(),
            default_role: config.default_role,
            admin_groups: config.admin_groups.clone(),
            logout_url: config.logout_url.clone(),
        })
    }
}

/// Validated OIDC client settings
#[derive(Debug, Clone)]
pub struct OidcModel {
    pub config: OidcFileConfig,
}

impl OidcModel {
    pub fn from_config(config: &OidcFileConfig) -> Result<Self, TrustModelError> {
        let missing = config.missing_fields();
        if !missing.is_empty() {
            return Err(TrustModelError::OidcFields(missing.join(", ")));
        }
        let mut config = config.clone();
        config.issuer = config.issuer.trim_end_matches('/').to_string();
        Ok(Self { config })
    }
}

/// Exactly one trust model is active once setup has been committed
#[derive(Debug, Clone)]
pub enum TrustModel {
    /// Authentication disabled; every request is the virtual admin
    None,
    /// Username/password accounts from the configuration file
    Builtin,
    ForwardAuth(ForwardAuthModel),
    Oidc(OidcModel),
}

impl TrustModel {
    pub fn from_config(
        method: AuthMethod,
        forward_auth: Option<&ForwardAuthFileConfig>,
        oidc: Option<&OidcFileConfig>,
    ) -> Result<Self, TrustModelError> {
        match method {
            AuthMethod::None => Ok(Self::None),
            AuthMethod::Builtin => Ok(Self::Builtin),
            AuthMethod::ForwardAuth => {
                let config = forward_auth.ok_or(TrustModelError::MissingSection("forward_auth"))?;
                Ok(Self::ForwardAuth(ForwardAuthModel::from_config(config)?))
            }
            AuthMethod::Oidc => {
                let config = oidc.ok_or(TrustModelError::MissingSection("oidc"))?;
                Ok(Self::Oidc(OidcModel::from_config(config)?))
            }
        }
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            Self::None => AuthMethod::None,
            Self::Builtin => AuthMethod::Builtin,
            Self::ForwardAuth(_) => AuthMethod::ForwardAuth,
            Self::Oidc(_) => AuthMethod::Oidc,
        }
    }

    /// Where the browser should go after a local logout, when the identity
    /// lives upstream
    pub fn logout_url(&self) -> Option<&str> {
        match self {
            Self::ForwardAuth(m) => m.logout_url.as_deref(),
            Self::Oidc(m) => m.config.logout_url.as_deref(),
            Self::None | Self::Builtin => None,
        }
    }
}

/// Holder for the active trust model. `None` while first-run setup is pending.
#[derive(Default)]
pub struct TrustModelCell {
    inner: RwLock<Option<Arc<TrustModel>>>,
}

impl TrustModelCell {
    pub fn new(model: Option<TrustModel>) -> Self {
        Self {
            inner: RwLock::new(model.map(Arc::new)),
        }
    }

    pub fn current(&self) -> Option<Arc<TrustModel>> {
        self.inner.read().clone()
    }

    pub fn method(&self) -> Option<AuthMethod> {
        self.inner.read().as_ref().map(|m| m.method())
    }

    /// Replace the active model in one step
    pub fn publish(&self, model: TrustModel) {
        let method = model.method();
        *self.inner.write() = Some(Arc::new(model));
        tracing::info!(method = %method, "Authentication method active");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_auth_requires_ranges() {
        let empty = ForwardAuthFileConfig::default();
        assert!(matches!(
            TrustModel::from_config(AuthMethod::ForwardAuth, Some(&empty), None),
            Err(TrustModelError::TrustedProxies(TrustedProxyError::Empty))
        ));
        assert!(matches!(
            TrustModel::from_config(AuthMethod::ForwardAuth, None, None),
            Err(TrustModelError::MissingSection("forward_auth"))
        ));

        let config = ForwardAuthFileConfig {
            trusted_proxies: vec!["172.16.0.0/12".into()],
            ..Default::default()
        };
        let model = TrustModel::from_config(AuthMethod::ForwardAuth, Some(&config), None).unwrap();
        assert_eq!(model.method(), AuthMethod::ForwardAuth);
    }

    #[test]
    fn test_oidc_requires_fields_and_trims_issuer() {
        let partial = OidcFileConfig {
            issuer: "https://id.example.com/".into(),
            ..Default::default()
        };
        let err = TrustModel::from_config(AuthMethod::Oidc, None, Some(&partial)).unwrap_err();
        assert!(err.to_string().contains("client_id"));

        let full = OidcFileConfig {
            client_id: "dashgate".into(),
            redirect_url: "https://dash.example.com/api/auth/oidc/callback".into(),
            logout_url: Some("https://id.example.com/logout".into()),
            ..partial
        };
        let model = TrustModel::from_config(AuthMethod::Oidc, None, Some(&full)).unwrap();
        match &model {
            TrustModel::Oidc(m) => assert_eq!(m.config.issuer, "https://id.example.com"),
            other => panic!("unexpected model {:?}", other),
        }
        assert_eq!(model.logout_url(), Some("https://id.example.com/logout"));
    }

    #[test]
    fn test_cell_publish_replaces_model() {
        let cell = TrustModelCell::new(None);
        assert!(cell.current().is_none());
        cell.publish(TrustModel::Builtin);
        let held = cell.current().unwrap();
        cell.publish(TrustModel::None);
        assert_eq!(held.method(), AuthMethod::Builtin);
        assert_eq!(cell.method(), Some(AuthMethod::None));
    }
}
