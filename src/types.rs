// src/types.rs
// Data model for Spark chat sessions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// Default endpoint when the caller does not pick one
pub const DEFAULT_URL: &str = "wss://spark-api.xf-yun.com/v3.5/chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// App id plus the key pair used for URL signing
#[derive(Clone)]
pub struct SessionCredentials {
    pub app_id: String,
    pub api_key: String,
    pub api_secret: String,
}

impl SessionCredentials {
    pub fn new(
        app_id: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

// Keys stay out of logs and panic messages.
impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("app_id", &self.app_id)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Server-side protocol variant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Domain {
    /// `/v1.1/chat`
    General,
    /// `/v2.1/chat`
    GeneralV2,
    /// `/v3.1/chat`
    GeneralV3,
    /// `/v3.5/chat`
    GeneralV35,
    /// Caller-supplied identifier the client has no built-in knowledge of
    Custom(String),
}

impl Domain {
    /// Map an endpoint path to its domain, defaulting to `generalv3.5`
    pub fn from_path(path: &str) -> Self {
        match path {
            "/v1.1/chat" => Domain::General,
            "/v2.1/chat" => Domain::GeneralV2,
            "/v3.1/chat" => Domain::GeneralV3,
            "/v3.5/chat" => Domain::GeneralV35,
            _ => Domain::GeneralV35,
        }
    }

    pub fn from_url(url: &Url) -> Self {
        Self::from_path(url.path())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Domain::General => "general",
            Domain::GeneralV2 => "generalv2",
            Domain::GeneralV3 => "generalv3",
            Domain::GeneralV35 => "generalv3.5",
            Domain::Custom(name) => name,
        }
    }

    pub fn supports_system(&self) -> bool {
        matches!(self, Domain::GeneralV35)
    }

    /// Upper bound on `max_tokens` for this domain
    pub fn max_tokens_cap(&self) -> u32 {
        match self {
            Domain::General => 4096,
            _ => ChatParameters::MAX_TOKENS_LIMIT,
        }
    }
}

impl FromStr for Domain {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "general" => Domain::General,
            "generalv2" => Domain::GeneralV2,
            "generalv3" => Domain::GeneralV3,
            "generalv3.5" => Domain::GeneralV35,
            other => Domain::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sampling parameters for one request
#[derive(Debug, Clone, PartialEq)]
pub struct ChatParameters {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_k: u8,
    /// Overrides the domain derived from the endpoint path
    pub domain: Option<Domain>,
    /// Correlation id; a random one is generated when absent
    pub chat_id: Option<String>,
}

impl ChatParameters {
    pub const MAX_TOKENS_LIMIT: u32 = 8192;

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_top_k(mut self, top_k: u8) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    /// Domain that will be sent for an endpoint URL
    pub fn resolve_domain(&self, url: &Url) -> Domain {
        self.domain.clone().unwrap_or_else(|| Domain::from_url(url))
    }

    /// Copy with every value forced into its documented range for `domain`
    pub fn clamped_for(&self, domain: &Domain) -> Self {
        let temperature = if self.temperature.is_nan() {
            0.5
        } else {
            self.temperature.clamp(0.0, 1.0)
        };

        Self {
            temperature,
            max_tokens: self.max_tokens.clamp(1, domain.max_tokens_cap()),
            top_k: self.top_k.clamp(1, 5),
            domain: self.domain.clone(),
            chat_id: self.chat_id.clone(),
        }
    }
}

impl Default for ChatParameters {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            max_tokens: 2048,
            top_k: 4,
            domain: None,
            chat_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_from_path() {
        assert_eq!(Domain::from_path("/v1.1/chat"), Domain::General);
        assert_eq!(Domain::from_path("/v2.1/chat"), Domain::GeneralV2);
        assert_eq!(Domain::from_path("/v3.1/chat"), Domain::GeneralV3);
        assert_eq!(Domain::from_path("/v3.5/chat"), Domain::GeneralV35);
        assert_eq!(Domain::from_path("/v9/unknown"), Domain::GeneralV35);
    }

    #[test]
    fn test_domain_from_url_ignores_query() {
        let url = Url::parse("wss://spark-api.xf-yun.com/v3.1/chat?x=1").unwrap();
        assert_eq!(Domain::from_url(&url).as_str(), "generalv3");
    }

    #[test]
    fn test_only_v35_supports_system() {
        assert!(Domain::GeneralV35.supports_system());
        assert!(!Domain::General.supports_system());
        assert!(!Domain::GeneralV2.supports_system());
        assert!(!Domain::GeneralV3.supports_system());
        assert!(!Domain::Custom("4.0Ultra".into()).supports_system());
    }

    #[test]
    fn test_domain_parse_roundtrip_names() {
        for name in ["general", "generalv2", "generalv3", "generalv3.5", "4.0Ultra"] {
            let domain: Domain = name.parse().unwrap();
            assert_eq!(domain.to_string(), name);
        }
    }

    #[test]
    fn test_parameters_defaults() {
        let params = ChatParameters::default();
        assert_eq!(params.temperature, 0.5);
        assert_eq!(params.max_tokens, 2048);
        assert_eq!(params.top_k, 4);
        assert!(params.domain.is_none());
        assert!(params.chat_id.is_none());
    }

    #[test]
    fn test_general_caps_max_tokens() {
        let params = ChatParameters::default().with_max_tokens(8000);
        assert_eq!(params.clamped_for(&Domain::General).max_tokens, 4096);
        assert_eq!(params.clamped_for(&Domain::GeneralV35).max_tokens, 8000);
    }

    #[test]
    fn test_clamps_out_of_range_values() {
        let params = ChatParameters::default()
            .with_temperature(3.0)
            .with_max_tokens(0)
            .with_top_k(9);
        let clamped = params.clamped_for(&Domain::GeneralV3);
        assert_eq!(clamped.temperature, 1.0);
        assert_eq!(clamped.max_tokens, 1);
        assert_eq!(clamped.top_k, 5);
    }

    #[test]
    fn test_explicit_domain_overrides_path() {
        let url = Url::parse("wss://spark-api.xf-yun.com/v3.1/chat").unwrap();
        let params = ChatParameters::default().with_domain(Domain::General);
        assert_eq!(params.resolve_domain(&url), Domain::General);
        assert_eq!(ChatParameters::default().resolve_domain(&url), Domain::GeneralV3);
    }

    #[test]
    fn test_credentials_debug_redacts_keys() {
        let creds = SessionCredentials::new("app", "key-123", "secret-456");
        let out = format!("{:?}", creds);
        assert!(out.contains("app"));
        assert!(!out.contains("key-123"));
        assert!(!out.contains("secret-456"));
    }

    #[test]
    fn test_message_serializes_lowercase_role() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
