use serde::{Deserialize, Serialize};

/// Production Generative Language API host.
pub const DEFAULT_UPSTREAM_URL: &str = "https://generativelanguage.googleapis.com";

pub const DEFAULT_PORT: u16 = 8000;

/// External configuration for the relay, resolved once at startup.
///
/// Everything comes from the process environment; there is no config file
/// and no state on disk. Callers log presence of secrets, never values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy master credential. Unset means open mode: any (or no) bearer
    /// token is accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_key: Option<String>,
    /// Default comma-separated upstream key list, used when a request does
    /// not carry its own `x-google-api-key` override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_api_keys: Option<String>,
    /// Upstream base URL. Overridable mainly so tests can point the relay
    /// at a local stub.
    pub upstream_url: String,
    /// Default listen port; the `serve --port` flag wins.
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            master_key: None,
            default_api_keys: None,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let master_key = non_blank(lookup("GEMINI_RELAY_MASTER_KEY"));
        let default_api_keys = non_blank(lookup("GEMINI_RELAY_API_KEYS"));
        let upstream_url = non_blank(lookup("GEMINI_RELAY_UPSTREAM_URL"))
            .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string());
        let port = non_blank(lookup("GEMINI_RELAY_PORT"))
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            master_key,
            default_api_keys,
            upstream_url,
            port,
        }
    }
}

/// Whitespace-only environment values count as unset.
fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_yields_open_mode_defaults() {
        let cfg = ProxyConfig::from_lookup(lookup_from(&[]));
        assert_eq!(cfg.master_key, None);
        assert_eq!(cfg.default_api_keys, None);
        assert_eq!(cfg.upstream_url, DEFAULT_UPSTREAM_URL);
        assert_eq!(cfg.port, DEFAULT_PORT);
    }

    #[test]
    fn values_are_trimmed_and_whitespace_counts_as_unset() {
        let cfg = ProxyConfig::from_lookup(lookup_from(&[
            ("GEMINI_RELAY_MASTER_KEY", "  secret  "),
            ("GEMINI_RELAY_API_KEYS", "   "),
            ("GEMINI_RELAY_UPSTREAM_URL", " http://127.0.0.1:9 "),
        ]));
        assert_eq!(cfg.master_key.as_deref(), Some("secret"));
        assert_eq!(cfg.default_api_keys, None);
        assert_eq!(cfg.upstream_url, "http://127.0.0.1:9");
    }

    #[test]
    fn unparsable_port_falls_back_to_default() {
        let cfg = ProxyConfig::from_lookup(lookup_from(&[("GEMINI_RELAY_PORT", "not-a-port")]));
        assert_eq!(cfg.port, DEFAULT_PORT);

        let cfg = ProxyConfig::from_lookup(lookup_from(&[("GEMINI_RELAY_PORT", "9107")]));
        assert_eq!(cfg.port, 9107);
    }
}
