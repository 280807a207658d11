use serde::{Deserialize, Serialize};

const BLOCK_STATUSES: &[u16] = &[403, 429, 451];

fn default_signatures() -> Vec<String> {
    [
        "error code: 1020",
        "cf-error-code",
        "attention required! | cloudflare",
        "sorry, you have been blocked",
        "<title>just a moment...</title>",
        "access denied",
        "request blocked",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Hosts known to reject requests from datacenter ranges, and the response
/// markers that identify such a rejection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockList {
    /// Segment hosts that must be fetched through the gateway.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Hosts whose key endpoints must be fetched through the gateway.
    #[serde(default)]
    pub key_hosts: Vec<String>,
    /// Lowercase body fragments of an anti-bot rejection page.
    #[serde(default = "default_signatures")]
    pub signatures: Vec<String>,
}

impl Default for BlockList {
    fn default() -> Self {
        Self {
            hosts: vec![],
            key_hosts: vec![],
            signatures: default_signatures(),
        }
    }
}

fn host_matches(entries: &[String], host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    entries.iter().any(|entry| {
        let entry = entry
            .trim()
            .trim_start_matches("*.")
            .trim_start_matches('.')
            .to_ascii_lowercase();
        !entry.is_empty()
            && (host == entry
                || host
                    .strip_suffix(entry.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')))
    })
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

impl BlockList {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            ..Default::default()
        }
    }

    /// Exact host or any subdomain of a listed host.
    pub fn matches_host(&self, host: &str) -> bool {
        host_matches(&self.hosts, host)
    }

    pub fn matches_url(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| self.matches_host(&host))
    }

    pub fn requires_key_proxy(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| {
            host_matches(&self.key_hosts, &host) || host_matches(&self.hosts, &host)
        })
    }

    /// A direct response that looks like an anti-bot rejection rather than a
    /// genuine client error.
    pub fn is_block_signature(&self, status: u16, body: &[u8]) -> bool {
        if !BLOCK_STATUSES.contains(&status) {
            return false;
        }
        let head = &body[..body.len().min(16 * 1024)];
        let text = String::from_utf8_lossy(head).to_ascii_lowercase();
        self.signatures
            .iter()
            .any(|marker| text.contains(marker.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocklist() -> BlockList {
        BlockList {
            hosts: vec!["blocked-cdn.example".into(), "*.edge.example".into()],
            key_hosts: vec!["keys.example".into()],
            ..Default::default()
        }
    }

    #[test]
    fn matches_host_and_subdomains_only() {
        let list = blocklist();
        assert!(list.matches_host("blocked-cdn.example"));
        assert!(list.matches_host("s1.blocked-cdn.example"));
        assert!(list.matches_host("a.b.edge.example"));
        assert!(!list.matches_host("notblocked-cdn.example"));
        assert!(!list.matches_host("cdn.example"));
    }

    #[test]
    fn url_matching_uses_host() {
        let list = blocklist();
        assert!(list.matches_url("https://S1.Blocked-CDN.example/seg-1.ts?x=1"));
        assert!(!list.matches_url("https://cdn.example/list.m3u8"));
        assert!(!list.matches_url("not a url"));
    }

    #[test]
    fn key_proxy_covers_key_hosts() {
        let list = blocklist();
        assert!(list.requires_key_proxy("https://keys.example/k/1"));
        assert!(list.requires_key_proxy("https://blocked-cdn.example/k/1"));
        assert!(!list.requires_key_proxy("https://cdn.example/k/1"));
    }

    #[test]
    fn detects_block_signature() {
        let list = BlockList::default();
        assert!(list.is_block_signature(403, b"<html>error code: 1020</html>"));
        assert!(list.is_block_signature(
            403,
            b"<title>Attention Required! | Cloudflare</title>"
        ));
        assert!(!list.is_block_signature(403, b"{\"error\":\"forbidden\"}"));
        assert!(!list.is_block_signature(404, b"error code: 1020"));
    }
}
