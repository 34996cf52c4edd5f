use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// How the caller was identified, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Bearer,
    Session,
    Ip,
}

/// Resolved caller identity plus the raw request attributes the
/// behavioral detector wants.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    /// Stable keyed identifier; all store keys hang off this.
    pub id: String,
    pub kind: IdentityKind,
    pub ip_address: String,
    pub user_agent: Option<String>,
}

/// Derives a stable identity for each request: bearer token first, then
/// session cookie, then a keyed composite of IP and user agent. Raw
/// tokens and IPs never appear in store keys; everything is hashed with
/// the server secret so keys are unlinkable without it.
#[derive(Clone)]
pub struct IdentityResolver {
    server_secret: String,
}

impl IdentityResolver {
    pub fn new(server_secret: String) -> Self {
        Self { server_secret }
    }

    fn keyed_hash(&self, material: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        hasher.update(b":");
        hasher.update(self.server_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Resolve the caller from request headers and the connection address.
    pub fn resolve(&self, headers: &HeaderMap, remote_ip: &str) -> CallerIdentity {
        let ip_address = client_ip(headers, remote_ip);
        let user_agent = headers
            .get("user-agent")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        if let Some(token) = bearer_token(headers) {
            return CallerIdentity {
                id: format!("u:{}", self.keyed_hash(token)),
                kind: IdentityKind::Bearer,
                ip_address,
                user_agent,
            };
        }

        if let Some(session) = session_cookie(headers) {
            return CallerIdentity {
                id: format!("s:{}", self.keyed_hash(&session)),
                kind: IdentityKind::Session,
                ip_address,
                user_agent,
            };
        }

        let material = format!(
            "{}:{}",
            ip_address,
            user_agent.as_deref().unwrap_or("unknown")
        );
        CallerIdentity {
            id: format!("ip:{}", self.keyed_hash(&material)),
            kind: IdentityKind::Ip,
            ip_address,
            user_agent,
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get("cookie").and_then(|h| h.to_str().ok())?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        if name == "session_id" && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}

/// First hop of X-Forwarded-For when present, else the socket address.
fn client_ip(headers: &HeaderMap, remote_ip: &str) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| remote_ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn resolver() -> IdentityResolver {
        IdentityResolver::new("test_secret".to_string())
    }

    #[test]
    fn test_bearer_outranks_session_and_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer tok123"));
        headers.insert("cookie", HeaderValue::from_static("session_id=sess1"));
        let identity = resolver().resolve(&headers, "10.0.0.1");
        assert_eq!(identity.kind, IdentityKind::Bearer);
        assert!(identity.id.starts_with("u:"));
    }

    #[test]
    fn test_session_cookie_used_without_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            HeaderValue::from_static("theme=dark; session_id=sess1"),
        );
        let identity = resolver().resolve(&headers, "10.0.0.1");
        assert_eq!(identity.kind, IdentityKind::Session);
        assert!(identity.id.starts_with("s:"));
    }

    #[test]
    fn test_anonymous_falls_back_to_ip_composite() {
        let headers = HeaderMap::new();
        let identity = resolver().resolve(&headers, "10.0.0.1");
        assert_eq!(identity.kind, IdentityKind::Ip);
        assert!(identity.id.starts_with("ip:"));
        assert_eq!(identity.ip_address, "10.0.0.1");
    }

    #[test]
    fn test_same_inputs_same_identity() {
        let headers = HeaderMap::new();
        let a = resolver().resolve(&headers, "10.0.0.1");
        let b = resolver().resolve(&headers, "10.0.0.1");
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_different_secrets_unlinkable() {
        let headers = HeaderMap::new();
        let a = IdentityResolver::new("one".to_string()).resolve(&headers, "10.0.0.1");
        let b = IdentityResolver::new("two".to_string()).resolve(&headers, "10.0.0.1");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_forwarded_for_first_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.2"),
        );
        let identity = resolver().resolve(&headers, "10.0.0.1");
        assert_eq!(identity.ip_address, "203.0.113.7");
    }

    #[test]
    fn test_raw_ip_never_in_identity() {
        let headers = HeaderMap::new();
        let identity = resolver().resolve(&headers, "203.0.113.7");
        assert!(!identity.id.contains("203.0.113.7"));
    }
}
