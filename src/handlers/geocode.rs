use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::AppResult;
use crate::services::geocoding::AddressCandidate;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GeocodeQuery {
    #[serde(default)]
    pub q: String,
}

/// Address autocomplete for ride and request forms
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<GeocodeQuery>,
) -> AppResult<Json<Vec<AddressCandidate>>> {
    let candidates = state.geocoder.search(&query.q).await?;
    Ok(Json(candidates))
}
