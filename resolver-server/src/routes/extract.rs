use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use embed_resolver::extractor::ErrorKind;
use embed_resolver::media::{
    ContentReference, DEFAULT_ID_SYSTEM, ExtractionRequest, ExtractionResult, MediaType,
};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractQuery {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub season: Option<String>,
    pub episode: Option<String>,
    pub provider: Option<String>,
    pub id_system: Option<String>,
}

fn parse_number(name: &str, value: Option<&str>) -> Result<Option<u32>, String> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u32>()
            .map(Some)
            .map_err(|_| format!("{name} must be a positive integer")),
    }
}

impl ExtractQuery {
    /// Checks every parameter before any provider is contacted.
    pub fn into_request(self) -> Result<ExtractionRequest, String> {
        let id = self
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or("id is required")?;
        let media_type: MediaType = self
            .media_type
            .as_deref()
            .ok_or("type is required")?
            .parse()
            .map_err(|_| "type must be movie or tv".to_string())?;

        let reference = ContentReference {
            id_system: self
                .id_system
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ID_SYSTEM.to_string()),
            id,
            media_type,
            season: parse_number("season", self.season.as_deref())?,
            episode: parse_number("episode", self.episode.as_deref())?,
        };
        reference.validate().map_err(|e| e.to_string())?;

        let mut request = ExtractionRequest::new(reference);
        if let Some(provider) = self.provider.filter(|p| !p.trim().is_empty()) {
            request = request.with_provider(provider);
        }
        Ok(request)
    }
}

fn status_for(result: &ExtractionResult) -> StatusCode {
    match result.kind() {
        _ if result.is_success() => StatusCode::OK,
        Some(ErrorKind::InvalidRequest) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// `GET /extract`. The body is always the structured result.
pub async fn extract(
    State(state): State<AppState>,
    Query(query): Query<ExtractQuery>,
) -> (StatusCode, Json<ExtractionResult>) {
    let request = match query.into_request() {
        Ok(request) => request,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ExtractionResult::invalid_request(message)),
            );
        }
    };

    let result = state.registry.extract(&request).await;
    (status_for(&result), Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> ExtractQuery {
        let get = |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        };
        ExtractQuery {
            id: get("id"),
            media_type: get("type"),
            season: get("season"),
            episode: get("episode"),
            provider: get("provider"),
            id_system: get("idSystem"),
        }
    }

    #[test]
    fn movie_defaults_to_tmdb() {
        let request = query(&[("id", "550"), ("type", "movie")])
            .into_request()
            .unwrap();
        assert_eq!(request.reference.id_system, "tmdb");
        assert!(request.provider_hint.is_none());
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(query(&[("type", "movie")]).into_request().is_err());
        assert!(query(&[("id", "550"), ("type", "anime")]).into_request().is_err());
        assert!(
            query(&[("id", "1399"), ("type", "tv"), ("season", "1")])
                .into_request()
                .is_err()
        );
        assert!(
            query(&[("id", "1399"), ("type", "tv"), ("season", "x"), ("episode", "1")])
                .into_request()
                .is_err()
        );
    }
}
