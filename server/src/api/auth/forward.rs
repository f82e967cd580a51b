//! Identity from headers set by a trusted reverse proxy

use std::net::IpAddr;

use axum::http::HeaderMap;

use super::context::{AuthContext, role_from_groups};
use super::trust::ForwardAuthModel;
use crate::core::config::AuthMethod;
use crate::utils::net::any_contains;

/// Resolve the forwarded identity.
///
/// Headers are only honored when the direct peer lies within a trusted proxy
/// range. Anything else, including a missing peer address, yields no identity.
pub fn resolve(
    model: &ForwardAuthModel,
    peer: Option<IpAddr>,
    headers: &HeaderMap,
) -> Option<AuthContext> {
    let Some(peer) = peer else {
        tracing::warn!("Forward auth request without a peer address");
        return None;
    };

    if !any_contains(&model.trusted_proxies, peer) {
        if headers.contains_key(model.headers.user.as_str()) {
            tracing::warn!(
                peer = %peer,
                header = %model.headers.user,
                "Ignoring identity headers from untrusted address"
            );
        }
        return None;
    }

    let username = header_str(headers, &model.headers.user)?;

    let groups: Vec<String> = header_str(headers, &model.headers.groups)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let role = role_from_groups(&groups, &model.admin_groups, model.default_role);

    Some(AuthContext {
        username: username.to_string(),
        role,
        email: header_str(headers, &model.headers.email).map(str::to_string),
        display_name: header_str(headers, &model.headers.name).map(str::to_string),
        groups,
        method: AuthMethod::ForwardAuth,
    })
}

/// Non-empty, trimmed header value
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ForwardAuthFileConfig, Role};

    fn model() -> ForwardAuthModel {
        ForwardAuthModel::from_config(&ForwardAuthFileConfig {
            trusted_proxies: vec!["10.0.0.0/8".into()],
            admin_groups: vec!["admins".into()],
            default_role: Role::Viewer,
            ..Default::default()
        })
        .unwrap()
    }

    // Header names must be lowercase for `&'static str` insertion
    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, v.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_trusted_peer_with_headers() {
        let h = headers(&[
            ("remote-user", "alice"),
            ("remote-email", "alice@example.com"),
            ("remote-groups", "dev, admins"),
            ("remote-name", "Alice"),
        ]);
        let ctx = resolve(&model(), Some("10.1.1.1".parse().unwrap()), &h).unwrap();
        assert_eq!(ctx.username, "alice");
        assert_eq!(ctx.role, Role::Admin);
        assert_eq!(ctx.email.as_deref(), Some("alice@example.com"));
        assert_eq!(ctx.display_name.as_deref(), Some("Alice"));
        assert_eq!(ctx.groups, vec!["dev", "admins"]);
        assert_eq!(ctx.method, AuthMethod::ForwardAuth);
    }

    #[test]
    fn test_default_role_without_admin_group() {
        let h = headers(&[("remote-user", "bob"), ("remote-groups", "dev")]);
        let ctx = resolve(&model(), Some("10.0.0.5".parse().unwrap()), &h).unwrap();
        assert_eq!(ctx.role, Role::Viewer);
    }

    #[test]
    fn test_untrusted_peer_is_ignored() {
        let h = headers(&[("remote-user", "mallory"), ("remote-groups", "admins")]);
        assert!(resolve(&model(), Some("192.168.1.10".parse().unwrap()), &h).is_none());
        assert!(resolve(&model(), None, &h).is_none());
    }

    #[test]
    fn test_missing_or_empty_username() {
        let ip = Some("10.0.0.1".parse().unwrap());
        assert!(resolve(&model(), ip, &HeaderMap::new()).is_none());
        assert!(resolve(&model(), ip, &headers(&[("remote-user", "  ")])).is_none());
    }
}
