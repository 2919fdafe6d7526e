//! Selection of the credentials used for upstream calls.

use lorastack_registry::access::parse_token;

/// Credentials attached to every upstream call made for a request.
#[derive(Clone, PartialEq, Eq)]
pub enum CallCredentials {
    /// The `Authorization` header of the incoming request.
    Forwarded(String),
    /// The server's own API key, used for stations that authenticate with
    /// a gateway token the access server does not know.
    Fallback(String),
}

impl std::fmt::Debug for CallCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forwarded(_) => f.write_str("Forwarded([REDACTED])"),
            Self::Fallback(_) => f.write_str("Fallback([REDACTED])"),
        }
    }
}

impl CallCredentials {
    /// The token to present upstream.
    pub fn token(&self) -> &str {
        match self {
            Self::Forwarded(header) => bearer_token(header)
                .or_else(|| key_token(header))
                .unwrap_or(header),
            Self::Fallback(key) => key,
        }
    }
}

/// The token of a `Bearer` authorization header.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// The token of a `Key` authorization header, as sent by The Things
/// Gateway.
pub fn key_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("key").then(|| token.trim())
}

/// Outcome of selecting credentials for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selected {
    pub call: CallCredentials,
    /// The gateway token presented in the request when the fallback is
    /// used. Compared with, or stored as, the gateway's CUPS credentials.
    pub presented: Option<String>,
}

/// Pick the credentials for upstream calls.
///
/// A bearer API key or access token is forwarded as is. Any other
/// authorization is accepted only with a configured fallback key, and is
/// returned as the presented gateway token. Without either, `None`.
pub fn select(authorization: Option<&str>, fallback: Option<&str>) -> Option<Selected> {
    let header = authorization.map(str::trim).filter(|h| !h.is_empty());
    if let Some(header) = header {
        if bearer_token(header).is_some_and(|token| parse_token(token).is_ok()) {
            return Some(Selected {
                call: CallCredentials::Forwarded(header.to_string()),
                presented: None,
            });
        }
    }
    let fallback = fallback.filter(|k| !k.is_empty())?;
    let presented = header
        .map(|h| bearer_token(h).unwrap_or(h).to_string())
        .filter(|t| !t.is_empty());
    Some(Selected {
        call: CallCredentials::Fallback(fallback.to_string()),
        presented,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const KEY: &str = "NNSXS.ABCDEF0123456789.00112233445566778899";

    #[test]
    fn forwards_bearer_api_keys_and_access_tokens() {
        let selected = select(Some(&format!("Bearer {KEY}")), Some("fallback")).unwrap();
        assert_eq!(selected.call, CallCredentials::Forwarded(format!("Bearer {KEY}")));
        assert_eq!(selected.call.token(), KEY);
        assert!(selected.presented.is_none());

        let selected = select(Some("bearer MFRWG.ID.SECRET"), None).unwrap();
        assert!(matches!(selected.call, CallCredentials::Forwarded(_)));
    }

    #[test]
    fn gateway_tokens_use_the_fallback() {
        let selected = select(Some("gateway-token"), Some("fallback")).unwrap();
        assert_eq!(selected.call, CallCredentials::Fallback("fallback".to_string()));
        assert_eq!(selected.call.token(), "fallback");
        assert_eq!(selected.presented.as_deref(), Some("gateway-token"));

        let selected = select(Some("Bearer not-an-api-key"), Some("fallback")).unwrap();
        assert_eq!(selected.presented.as_deref(), Some("not-an-api-key"));

        let selected = select(None, Some("fallback")).unwrap();
        assert!(selected.presented.is_none());
    }

    #[test]
    fn nothing_usable() {
        assert!(select(Some("gateway-token"), None).is_none());
        assert!(select(None, None).is_none());
        assert!(select(Some("gateway-token"), Some("")).is_none());
    }

    #[test]
    fn key_scheme_is_forwarded_token() {
        assert_eq!(key_token(&format!("Key {KEY}")), Some(KEY));
        assert_eq!(key_token(&format!("Bearer {KEY}")), None);
        let call = CallCredentials::Forwarded(format!("key {KEY}"));
        assert_eq!(call.token(), KEY);
    }

    #[test]
    fn debug_hides_tokens() {
        let rendered = format!("{:?}", CallCredentials::Fallback(KEY.to_string()));
        assert!(!rendered.contains("NNSXS"));
    }
}
