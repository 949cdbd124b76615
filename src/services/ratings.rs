use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::{booking, rating, ride, user};
use crate::error::{AppError, AppResult};
use crate::services::lifecycle::{self, MAX_STARS, MIN_STARS};
use crate::AppState;

const MAX_REVIEW_CHARS: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct NewRating {
    pub booking_id: Uuid,
    pub stars: i32,
    pub review: Option<String>,
}

fn normalize_review(review: Option<String>) -> AppResult<Option<String>> {
    let Some(review) = review else {
        return Ok(None);
    };
    let review = review.trim();
    if review.is_empty() {
        return Ok(None);
    }
    if review.chars().count() > MAX_REVIEW_CHARS {
        return Err(AppError::Validation(format!(
            "Review cannot exceed {} characters",
            MAX_REVIEW_CHARS
        )));
    }
    Ok(Some(review.to_string()))
}

/// Record `rater`'s rating of the other party on a completed booking and fold
/// it into the ratee's running aggregate.
pub async fn create(state: &AppState, rater: Uuid, input: NewRating) -> AppResult<rating::Model> {
    if !(MIN_STARS..=MAX_STARS).contains(&input.stars) {
        return Err(AppError::Validation(format!(
            "Stars must be between {} and {}",
            MIN_STARS, MAX_STARS
        )));
    }
    let review = normalize_review(input.review)?;

    let txn = state.db.begin().await?;

    let booking = booking::Entity::find_by_id(input.booking_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;

    let ride = ride::Entity::find_by_id(booking.ride_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Ride not found".to_string()))?;

    let already_rated = rating::Entity::find()
        .filter(rating::Column::BookingId.eq(booking.id))
        .one(&txn)
        .await?
        .is_some();

    let ratee = lifecycle::check_rating(&booking, &ride, rater, input.stars, already_rated)?;

    let new_rating = rating::ActiveModel {
        id: Set(Uuid::new_v4()),
        booking_id: Set(booking.id),
        rater_id: Set(rater),
        ratee_id: Set(ratee),
        stars: Set(input.stars),
        review: Set(review),
        created_at: Set(Utc::now().fixed_offset()),
    };
    // A concurrent insert trips the unique booking_id index and surfaces as Conflict
    let rating = new_rating.insert(&txn).await?;

    user::Entity::update_many()
        .col_expr(
            user::Column::RatingSum,
            Expr::col(user::Column::RatingSum).add(i64::from(input.stars)),
        )
        .col_expr(user::Column::RatingCount, Expr::col(user::Column::RatingCount).add(1))
        .filter(user::Column::Id.eq(ratee))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    tracing::info!(
        booking_id = %booking.id,
        rater_id = %rater,
        ratee_id = %ratee,
        stars = input.stars,
        "Rating recorded"
    );

    Ok(rating)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    use crate::entities::booking::{BookingStatus, PaymentStatus};
    use crate::test_support::{
        binds, booking_on, logged_statements, ride_for, state_with, RecordingProcessor,
    };

    fn rating_of(booking: &booking::Model, rater_id: Uuid, ratee_id: Uuid, stars: i32) -> rating::Model {
        rating::Model {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            rater_id,
            ratee_id,
            stars,
            review: None,
            created_at: Utc::now().fixed_offset(),
        }
    }

    #[tokio::test]
    async fn rating_updates_the_ratee_aggregate() {
        let driver = Uuid::new_v4();
        let rider = Uuid::new_v4();
        let ride = ride_for(driver, 3);
        let mut booking = booking_on(&ride, rider, 1, BookingStatus::Completed);
        booking.payment_status = PaymentStatus::Charged;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![booking.clone()]])
            .append_query_results([vec![ride.clone()]])
            .append_query_results([
                Vec::<rating::Model>::new(),
                vec![rating_of(&booking, rider, driver, 4)],
            ])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let state = state_with(db, Arc::new(RecordingProcessor::default()));

        let input = NewRating {
            booking_id: booking.id,
            stars: 4,
            review: Some(" Friendly driver ".to_string()),
        };
        let rating = create(&state, rider, input).await.unwrap();
        assert_eq!(rating.ratee_id, driver);

        let statements = logged_statements(state);
        let inserts: Vec<_> = statements
            .iter()
            .filter(|s| s.sql.starts_with(r#"INSERT INTO "rating""#))
            .collect();
        assert_eq!(inserts.len(), 1);
        assert!(binds(inserts[0], driver));
        assert!(binds(inserts[0], "Friendly driver"));

        let aggregate: Vec<_> = statements
            .iter()
            .filter(|s| s.sql.starts_with(r#"UPDATE "user" "#))
            .collect();
        assert_eq!(aggregate.len(), 1);
        assert!(aggregate[0].sql.contains(r#""rating_sum" +"#));
        assert!(aggregate[0].sql.contains(r#""rating_count" +"#));
        assert!(binds(aggregate[0], 4i64));
        assert!(binds(aggregate[0], 1i32));
        assert!(binds(aggregate[0], driver));
        assert_eq!(statements.last().map(|s| s.sql.as_str()), Some("COMMIT"));
    }

    #[tokio::test]
    async fn second_rating_is_a_conflict() {
        let driver = Uuid::new_v4();
        let rider = Uuid::new_v4();
        let ride = ride_for(driver, 3);
        let booking = booking_on(&ride, rider, 1, BookingStatus::Completed);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![booking.clone()]])
            .append_query_results([vec![ride.clone()]])
            .append_query_results([vec![rating_of(&booking, driver, rider, 5)]])
            .into_connection();
        let state = state_with(db, Arc::new(RecordingProcessor::default()));

        let input = NewRating {
            booking_id: booking.id,
            stars: 3,
            review: None,
        };
        let err = create(&state, driver, input).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let statements = logged_statements(state);
        assert!(!statements.iter().any(|s| s.sql.starts_with("INSERT")));
    }

    #[tokio::test]
    async fn stars_are_checked_before_any_query() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let state = state_with(db, Arc::new(RecordingProcessor::default()));

        let input = NewRating {
            booking_id: Uuid::new_v4(),
            stars: 6,
            review: None,
        };
        let err = create(&state, Uuid::new_v4(), input).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn blank_review_is_dropped() {
        assert_eq!(normalize_review(None).unwrap(), None);
        assert_eq!(normalize_review(Some("   ".into())).unwrap(), None);
        assert_eq!(
            normalize_review(Some("  Smooth ride  ".into())).unwrap(),
            Some("Smooth ride".to_string())
        );
    }

    #[test]
    fn overlong_review_is_rejected() {
        let review = "a".repeat(MAX_REVIEW_CHARS + 1);
        assert!(matches!(
            normalize_review(Some(review)),
            Err(AppError::Validation(_))
        ));
    }
}
