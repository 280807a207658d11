use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::error::FetchError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// How the client treats 3xx responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectPolicy {
    /// Follow at most this many redirects.
    Follow(usize),
    /// Hand the 3xx response back to the caller.
    None,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        RedirectPolicy::Follow(10)
    }
}

/// Options shared by every request the fetch client makes.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Used when a request does not set its own timeout.
    pub timeout: Duration,

    /// Upper bound for any per-request timeout.
    pub max_timeout: Duration,

    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,

    pub redirect: RedirectPolicy,

    pub user_agent: String,

    /// Sent with every request; per-request headers override them.
    pub headers: HeaderMap,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            redirect: RedirectPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: FetchConfig::get_default_headers(),
        }
    }
}

impl FetchConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        default_headers
    }

    /// Adds or replaces a base header from configuration strings.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, FetchError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FetchError::InvalidRequest(format!("header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::InvalidRequest(format!("header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Clamps a requested timeout to `max_timeout`, falling back to the
    /// default when none is given. Never returns zero.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        let timeout = requested.unwrap_or(self.timeout).min(self.max_timeout);
        if timeout.is_zero() {
            self.timeout.min(self.max_timeout).max(Duration::from_millis(1))
        } else {
            timeout
        }
    }
}
