/// Webhook the chat talks to when the user has not overridden it.
pub const DEFAULT_WEBHOOK_URL: &str = "https://automation.tutorline.app/webhook/tutor-chat";

/// Public CORS relays, tried in this order before the direct URL.
pub const DEFAULT_RELAY_PREFIXES: &[&str] = &[
    "https://corsproxy.io/?",
    "https://api.allorigins.win/raw?url=",
];

/// One way of reaching the configured webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// Relay prefix concatenated with the URL-encoded webhook URL.
    Relay(String),
    /// The webhook URL itself.
    Direct,
}

impl Candidate {
    pub fn resolve(&self, primary_url: &str) -> String {
        match self {
            Candidate::Relay(prefix) => format!("{}{}", prefix, urlencoding::encode(primary_url)),
            Candidate::Direct => primary_url.to_string(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Candidate::Relay(prefix) => prefix,
            Candidate::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub primary_url: String,
    relays: Vec<String>,
}

impl EndpointConfig {
    /// Endpoint using the built-in relay list.
    pub fn new(primary_url: impl Into<String>) -> Self {
        Self::with_relays(
            primary_url,
            DEFAULT_RELAY_PREFIXES.iter().map(|p| p.to_string()).collect(),
        )
    }

    pub fn with_relays(primary_url: impl Into<String>, relays: Vec<String>) -> Self {
        Self {
            primary_url: primary_url.into(),
            relays,
        }
    }

    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    /// Ordered candidate resolvers: every relay first, then the direct URL.
    pub fn candidates(&self) -> Vec<Candidate> {
        self.relays
            .iter()
            .cloned()
            .map(Candidate::Relay)
            .chain(std::iter::once(Candidate::Direct))
            .collect()
    }

    /// Fully-formed request targets, in the order they are tried.
    pub fn candidate_urls(&self) -> Vec<String> {
        self.candidates()
            .iter()
            .map(|c| c.resolve(&self.primary_url))
            .collect()
    }

    pub fn is_default(&self) -> bool {
        self.primary_url == DEFAULT_WEBHOOK_URL
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WEBHOOK_URL)
    }
}
