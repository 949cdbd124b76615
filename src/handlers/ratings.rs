use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use uuid::Uuid;

use crate::entities::{rating, user};
use crate::error::{AppError, AppResult};
use crate::handlers::users::{load_public_profiles, PublicProfile};
use crate::services::ratings::{self, NewRating};
use crate::utils::jwt::Claims;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ReceivedRating {
    #[serde(flatten)]
    pub rating: rating::Model,
    pub rater: Option<PublicProfile>,
}

#[derive(Debug, Serialize)]
pub struct UserRatings {
    pub user_id: Uuid,
    pub average: f64,
    pub count: i32,
    pub ratings: Vec<ReceivedRating>,
}

pub async fn create_rating(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<NewRating>,
) -> AppResult<(StatusCode, Json<rating::Model>)> {
    let rating = ratings::create(&state, claims.sub, payload).await?;
    Ok((StatusCode::CREATED, Json(rating)))
}

/// Ratings a user has received, newest first, with their aggregate
pub async fn user_ratings(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserRatings>> {
    let ratee = user::Entity::find_by_id(user_id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let received = rating::Entity::find()
        .filter(rating::Column::RateeId.eq(user_id))
        .order_by_desc(rating::Column::CreatedAt)
        .all(&*state.db)
        .await?;

    let raters = load_public_profiles(&*state.db, received.iter().map(|r| r.rater_id)).await?;

    Ok(Json(UserRatings {
        user_id,
        average: ratee.average_rating(),
        count: ratee.rating_count,
        ratings: received
            .into_iter()
            .map(|rating| ReceivedRating {
                rater: raters.get(&rating.rater_id).cloned(),
                rating,
            })
            .collect(),
    }))
}
