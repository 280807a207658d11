use serde::{Deserialize, Serialize};
use std::fmt;

use super::MediaType;
use crate::extractor::error::ExtractorError;

pub const DEFAULT_ID_SYSTEM: &str = "tmdb";

/// Identifies what to resolve. Immutable once built.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ContentReference {
    pub id_system: String,
    pub id: String,
    pub media_type: MediaType,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl ContentReference {
    pub fn movie(id_system: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id_system: id_system.into(),
            id: id.into(),
            media_type: MediaType::Movie,
            season: None,
            episode: None,
        }
    }

    pub fn episode(
        id_system: impl Into<String>,
        id: impl Into<String>,
        season: u32,
        episode: u32,
    ) -> Self {
        Self {
            id_system: id_system.into(),
            id: id.into(),
            media_type: MediaType::Tv,
            season: Some(season),
            episode: Some(episode),
        }
    }

    /// Checks the reference is resolvable: a non-empty id, and a season and
    /// episode (both >= 1) when the media type is tv.
    pub fn validate(&self) -> Result<(), ExtractorError> {
        if self.id.trim().is_empty() {
            return Err(ExtractorError::InvalidRequest("id is required".to_string()));
        }
        if self.id_system.trim().is_empty() {
            return Err(ExtractorError::InvalidRequest(
                "id system is required".to_string(),
            ));
        }
        if self.media_type == MediaType::Tv {
            match (self.season, self.episode) {
                (Some(s), Some(e)) if s >= 1 && e >= 1 => {}
                (Some(_), Some(_)) => {
                    return Err(ExtractorError::InvalidRequest(
                        "season and episode must be >= 1".to_string(),
                    ));
                }
                _ => {
                    return Err(ExtractorError::InvalidRequest(
                        "season and episode are required for tv".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Template variables used when rendering provider urls.
    pub fn template_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id_system", self.id_system.clone()),
            ("id", self.id.clone()),
            ("type", self.media_type.to_string()),
            ("season", self.season.map(|s| s.to_string()).unwrap_or_default()),
            (
                "episode",
                self.episode.map(|e| e.to_string()).unwrap_or_default(),
            ),
        ]
    }
}

impl fmt::Display for ContentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.season, self.episode) {
            (Some(s), Some(e)) => write!(
                f,
                "{}:{} {} S{:02}E{:02}",
                self.id_system, self.id, self.media_type, s, e
            ),
            _ => write!(f, "{}:{} {}", self.id_system, self.id, self.media_type),
        }
    }
}

/// One resolution call. Not persisted.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub reference: ContentReference,
    pub provider_hint: Option<String>,
}

impl ExtractionRequest {
    pub fn new(reference: ContentReference) -> Self {
        Self {
            reference,
            provider_hint: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider_hint = Some(provider.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tv_requires_season_and_episode() {
        let mut reference = ContentReference::episode("tmdb", "1399", 1, 2);
        assert!(reference.validate().is_ok());

        reference.episode = None;
        assert!(matches!(
            reference.validate(),
            Err(ExtractorError::InvalidRequest(_))
        ));

        reference.episode = Some(0);
        assert!(reference.validate().is_err());
    }

    #[test]
    fn empty_id_is_rejected() {
        let reference = ContentReference::movie("tmdb", "  ");
        assert!(reference.validate().is_err());
    }

    #[test]
    fn display_includes_episode() {
        let reference = ContentReference::episode("tmdb", "1399", 3, 7);
        assert_eq!(reference.to_string(), "tmdb:1399 tv S03E07");
    }
}
