//! Heuristic ranking of rides against ride requests.
//!
//! The score is a weighted blend of three sub-scores, each in `[0, 1]`:
//! departure-time proximity (50%), price fit (25%) and endpoint proximity (25%).
//! Scoring is pure and recomputed on every query.

use serde::Serialize;

use crate::entities::{ride, ride_request};
use crate::utils::geo::{proximity_score, Coordinates};

pub const TIME_WEIGHT: f64 = 0.5;
pub const PRICE_WEIGHT: f64 = 0.25;
pub const ROUTE_WEIGHT: f64 = 0.25;

/// Endpoint distance at which route fit drops to zero.
pub const ROUTE_CUTOFF_M: f64 = 5000.0;

/// Candidates must score strictly above this to be returned.
pub const MIN_MATCH_SCORE: f64 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub time: f64,
    pub price: f64,
    pub route: f64,
    pub total: f64,
}

/// A candidate that passed seat filtering and the score threshold.
#[derive(Debug, Clone, Serialize)]
pub struct Scored<T> {
    #[serde(flatten)]
    pub item: T,
    pub remaining_seats: i32,
    pub match_score: f64,
}

/// `max(0, 1 - Δt / 2W)` where `W` is the rider's flexibility window.
pub fn time_score(departure_ms: i64, desired_ms: i64, flexibility_minutes: i32) -> f64 {
    let delta_ms = (departure_ms - desired_ms).unsigned_abs() as f64;
    let window_ms = f64::from(flexibility_minutes.max(0)) * 60_000.0;

    if window_ms == 0.0 {
        return if delta_ms == 0.0 { 1.0 } else { 0.0 };
    }

    (1.0 - delta_ms / (2.0 * window_ms)).max(0.0)
}

pub fn price_score(price_per_seat: f64, max_price: Option<f64>) -> f64 {
    match max_price {
        Some(max) if price_per_seat > 0.0 => (max / price_per_seat).clamp(0.0, 1.0),
        _ => 1.0,
    }
}

pub fn route_score(ride: &ride::Model, request: &ride_request::Model) -> f64 {
    let start = Coordinates::new(ride.start_lat, ride.start_lng)
        .distance_to(&Coordinates::new(request.pickup_lat, request.pickup_lng));
    let end = Coordinates::new(ride.end_lat, ride.end_lng)
        .distance_to(&Coordinates::new(request.dropoff_lat, request.dropoff_lng));

    (proximity_score(start, ROUTE_CUTOFF_M) + proximity_score(end, ROUTE_CUTOFF_M)) / 2.0
}

pub fn breakdown(ride: &ride::Model, request: &ride_request::Model) -> ScoreBreakdown {
    let time = time_score(
        ride.departure_time.timestamp_millis(),
        request.desired_time.timestamp_millis(),
        request.time_flexibility,
    );
    let price = price_score(ride.price_per_seat, request.max_price);
    let route = route_score(ride, request);

    ScoreBreakdown {
        time,
        price,
        route,
        total: TIME_WEIGHT * time + PRICE_WEIGHT * price + ROUTE_WEIGHT * route,
    }
}

pub fn score(ride: &ride::Model, request: &ride_request::Model) -> f64 {
    breakdown(ride, request).total
}

/// Rank rides for a request. Each ride is paired with its remaining seats.
pub fn rank_rides(
    request: &ride_request::Model,
    rides: impl IntoIterator<Item = (ride::Model, i32)>,
) -> Vec<Scored<ride::Model>> {
    let mut matches: Vec<_> = rides
        .into_iter()
        .filter(|(_, remaining)| *remaining >= request.seats_needed)
        .map(|(ride, remaining)| Scored {
            match_score: score(&ride, request),
            item: ride,
            remaining_seats: remaining,
        })
        .filter(|m| m.match_score > MIN_MATCH_SCORE)
        .collect();

    sort_descending(&mut matches);
    matches
}

/// Rank requests for a ride with `remaining_seats` still unsold.
pub fn rank_requests(
    ride: &ride::Model,
    remaining_seats: i32,
    requests: impl IntoIterator<Item = ride_request::Model>,
) -> Vec<Scored<ride_request::Model>> {
    let mut matches: Vec<_> = requests
        .into_iter()
        .filter(|request| remaining_seats >= request.seats_needed)
        .map(|request| Scored {
            match_score: score(ride, &request),
            item: request,
            remaining_seats,
        })
        .filter(|m| m.match_score > MIN_MATCH_SCORE)
        .collect();

    sort_descending(&mut matches);
    matches
}

fn sort_descending<T>(matches: &mut [Scored<T>]) {
    matches.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
    use uuid::Uuid;

    use crate::entities::ride::{RideStatus, RouteFlexibility};
    use crate::entities::ride_request::RideRequestStatus;

    // Cathedral of Learning -> Pittsburgh International Airport
    const START: (f64, f64) = (40.4443, -79.9532);
    const END: (f64, f64) = (40.4915, -80.2329);

    fn at(minutes: i64) -> DateTime<FixedOffset> {
        let base = Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0).unwrap();
        (base + Duration::minutes(minutes)).fixed_offset()
    }

    fn ride(departure: DateTime<FixedOffset>, price: f64) -> ride::Model {
        ride::Model {
            id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            start_lat: START.0,
            start_lng: START.1,
            start_address: "Cathedral of Learning".into(),
            end_lat: END.0,
            end_lng: END.1,
            end_address: "PIT Airport".into(),
            departure_time: departure,
            available_seats: 3,
            price_per_seat: price,
            route_flexibility: RouteFlexibility::Flexible,
            status: RideStatus::Active,
            created_at: at(-600),
            updated_at: at(-600),
        }
    }

    fn request(desired: DateTime<FixedOffset>, max_price: Option<f64>) -> ride_request::Model {
        ride_request::Model {
            id: Uuid::new_v4(),
            rider_id: Uuid::new_v4(),
            pickup_lat: START.0,
            pickup_lng: START.1,
            pickup_address: "Cathedral of Learning".into(),
            dropoff_lat: END.0,
            dropoff_lng: END.1,
            dropoff_address: "PIT Airport".into(),
            desired_time: desired,
            time_flexibility: 30,
            seats_needed: 1,
            max_price,
            status: RideRequestStatus::Open,
            created_at: at(-600),
            updated_at: at(-600),
        }
    }

    #[test]
    fn exact_match_scores_one() {
        let r = ride(at(0), 10.0);
        let q = request(at(0), Some(10.0));

        let b = breakdown(&r, &q);
        assert_eq!(b.time, 1.0);
        assert_eq!(b.price, 1.0);
        assert_eq!(b.route, 1.0);
        assert_eq!(b.total, 1.0);
    }

    #[test]
    fn time_score_falls_off_linearly_to_twice_the_window() {
        assert_eq!(time_score(0, 0, 30), 1.0);
        let half = time_score(30 * 60_000, 0, 30);
        assert!((half - 0.5).abs() < 1e-12);
        assert_eq!(time_score(60 * 60_000, 0, 30), 0.0);
        assert_eq!(time_score(0, 90 * 60_000, 30), 0.0);
    }

    #[test]
    fn zero_window_only_accepts_exact_time() {
        assert_eq!(time_score(1_000, 1_000, 0), 1.0);
        assert_eq!(time_score(1_001, 1_000, 0), 0.0);
    }

    #[test]
    fn price_score_is_capped_at_one() {
        assert_eq!(price_score(10.0, None), 1.0);
        assert_eq!(price_score(8.0, Some(10.0)), 1.0);
        assert!((price_score(20.0, Some(10.0)) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn far_endpoint_contributes_nothing() {
        let r = ride(at(0), 10.0);
        let mut q = request(at(0), None);
        // ~11 km north of the ride's start
        q.pickup_lat = START.0 + 0.1;

        let route = route_score(&r, &q);
        assert!((route - 0.5).abs() < 1e-12);

        q.dropoff_lat = END.0 + 0.1;
        assert_eq!(route_score(&r, &q), 0.0);
    }

    #[test]
    fn score_is_deterministic() {
        let r = ride(at(12), 14.5);
        let mut q = request(at(0), Some(11.0));
        q.pickup_lng += 0.01;

        assert_eq!(score(&r, &q).to_bits(), score(&r, &q).to_bits());
    }

    #[test]
    fn rank_rides_filters_seats_and_threshold_then_sorts() {
        let q = request(at(0), Some(10.0));

        let best = ride(at(0), 10.0);
        let good = ride(at(20), 10.0);
        let full = ride(at(0), 10.0);
        // Far in time and route, cheap enough: 0.25 total
        let mut poor = ride(at(600), 10.0);
        poor.start_lat += 1.0;
        poor.end_lat += 1.0;

        let ranked = rank_rides(
            &q,
            vec![
                (good.clone(), 2),
                (full.clone(), 0),
                (poor.clone(), 3),
                (best.clone(), 1),
            ],
        );

        let ids: Vec<_> = ranked.iter().map(|m| m.item.id).collect();
        assert_eq!(ids, vec![best.id, good.id]);
        assert_eq!(ranked[0].remaining_seats, 1);
        assert!(ranked[0].match_score >= ranked[1].match_score);
    }

    #[test]
    fn rank_requests_skips_requests_needing_more_seats() {
        let r = ride(at(0), 10.0);
        let small = request(at(0), None);
        let mut large = request(at(0), None);
        large.seats_needed = 3;

        let ranked = rank_requests(&r, 2, vec![small.clone(), large]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].item.id, small.id);
    }
}
