use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GeocodingConfig;
use crate::error::{AppError, AppResult};

const RESULT_LIMIT: u8 = 5;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AddressCandidate {
    pub label: String,
    pub lat: f64,
    pub lng: f64,
}

#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn search(&self, query: &str) -> AppResult<Vec<AddressCandidate>>;
}

/// Forward geocoding through the Mapbox Places API.
pub struct MapboxGeocoder {
    client: reqwest::Client,
    api_base: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    place_name: String,
    /// `[lng, lat]`
    center: Vec<f64>,
}

impl MapboxGeocoder {
    pub fn new(config: &GeocodingConfig) -> Self {
        if config.mapbox_access_token.is_none() {
            tracing::warn!("MAPBOX_ACCESS_TOKEN not set, address lookup is disabled");
        }

        Self {
            client: reqwest::Client::new(),
            api_base: config.mapbox_api_base.clone(),
            access_token: config.mapbox_access_token.clone(),
        }
    }

    fn search_url(&self, query: &str, token: &str) -> AppResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.api_base)
            .map_err(|e| AppError::Internal(format!("Invalid MAPBOX_API_BASE: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| AppError::Internal("MAPBOX_API_BASE cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(["geocoding", "v5", "mapbox.places", &format!("{}.json", query)]);

        url.query_pairs_mut()
            .append_pair("access_token", token)
            .append_pair("limit", &RESULT_LIMIT.to_string())
            .append_pair("autocomplete", "true");

        Ok(url)
    }
}

fn parse_features(body: &str) -> AppResult<Vec<AddressCandidate>> {
    let collection: FeatureCollection = serde_json::from_str(body)
        .map_err(|e| AppError::ExternalService(format!("Unexpected geocoding response: {}", e)))?;

    Ok(collection
        .features
        .into_iter()
        .filter_map(|f| match f.center.as_slice() {
            [lng, lat] => Some(AddressCandidate {
                label: f.place_name,
                lat: *lat,
                lng: *lng,
            }),
            _ => None,
        })
        .collect())
}

#[async_trait]
impl AddressLookup for MapboxGeocoder {
    async fn search(&self, query: &str) -> AppResult<Vec<AddressCandidate>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::Validation("Search query is required".to_string()));
        }

        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| AppError::ExternalService("Address lookup is not configured".to_string()))?;

        let url = self.search_url(query, token)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Geocoding request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::ExternalService(format!("Geocoding request failed: {}", e)))?;

        if !status.is_success() {
            return Err(AppError::ExternalService(format!(
                "Geocoding service returned {}",
                status
            )));
        }

        let candidates = parse_features(&body)?;
        tracing::debug!(query = %query, results = candidates.len(), "Address lookup");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geocoder(token: Option<&str>) -> MapboxGeocoder {
        MapboxGeocoder::new(&GeocodingConfig {
            mapbox_access_token: token.map(str::to_string),
            mapbox_api_base: "https://api.mapbox.com".to_string(),
        })
    }

    #[test]
    fn features_are_read_as_lng_lat() {
        let body = r#"{
            "type": "FeatureCollection",
            "features": [
                { "place_name": "Pittsburgh International Airport", "center": [-80.2329, 40.4915] },
                { "place_name": "Broken", "center": [1.0] }
            ]
        }"#;

        let candidates = parse_features(body).unwrap();
        assert_eq!(
            candidates,
            vec![AddressCandidate {
                label: "Pittsburgh International Airport".into(),
                lat: 40.4915,
                lng: -80.2329,
            }]
        );
    }

    #[test]
    fn empty_collection_yields_no_candidates() {
        assert!(parse_features(r#"{"type":"FeatureCollection"}"#).unwrap().is_empty());
    }

    #[test]
    fn query_is_escaped_into_the_path() {
        let url = geocoder(Some("pk.test"))
            .search_url("5000 Forbes Ave/Pittsburgh", "pk.test")
            .unwrap();

        assert!(url
            .path()
            .starts_with("/geocoding/v5/mapbox.places/5000%20Forbes%20Ave%2FPittsburgh.json"));
        assert!(url.query().unwrap().contains("access_token=pk.test"));
        assert!(url.query().unwrap().contains("limit=5"));
    }

    #[tokio::test]
    async fn missing_token_is_reported() {
        let err = geocoder(None).search("Oakland").await.unwrap_err();
        assert!(matches!(err, AppError::ExternalService(_)));
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let err = geocoder(Some("pk.test")).search("   ").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
