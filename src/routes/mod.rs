use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::handlers::{
    auth, bookings, geocode, health, messages, payments, ratings, realtime, requests, rides, users,
};
use crate::middleware::auth::auth_middleware;
use crate::middleware::rate_limit::create_public_governor;
use crate::middleware::user_rate_limit::create_user_governor;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    // Register and login are limited per IP before any account exists
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .layer(create_public_governor());

    let user_routes = Router::new()
        .route("/me", get(users::get_me).put(users::update_me))
        .route("/{id}", get(users::get_user));

    let ride_routes = Router::new()
        .route("/", post(rides::create_ride).get(rides::list_rides))
        .route("/mine", get(rides::my_rides))
        .route(
            "/{id}",
            get(rides::get_ride)
                .put(rides::update_ride)
                .delete(rides::cancel_ride),
        )
        .route("/{id}/matches", get(rides::ride_matches));

    let request_routes = Router::new()
        .route("/", post(requests::create_request))
        .route("/mine", get(requests::my_requests))
        .route(
            "/{id}",
            get(requests::get_request)
                .put(requests::update_request)
                .delete(requests::cancel_request),
        )
        .route("/{id}/matches", get(requests::request_matches));

    let booking_routes = Router::new()
        .route("/", post(bookings::create_booking))
        .route("/mine", get(bookings::my_bookings))
        .route("/{id}", get(bookings::get_booking))
        .route("/{id}/confirm", put(bookings::confirm_booking))
        .route("/{id}/complete", put(bookings::complete_booking))
        .route("/{id}/cancel", put(bookings::cancel_booking));

    let payment_routes = Router::new()
        .route("/create-intent", post(payments::create_intent))
        .route("/refund", post(payments::refund))
        .route("/status/{booking_id}", get(payments::payment_status));

    let rating_routes = Router::new()
        .route("/", post(ratings::create_rating))
        .route("/user/{user_id}", get(ratings::user_ratings));

    let message_routes = Router::new()
        .route("/", post(messages::send_message))
        .route("/conversations", get(messages::conversations))
        .route("/{id}", get(messages::history))
        .route("/{id}/read", put(messages::mark_read));

    // Everything below requires a bearer token and is limited per user.
    // Layers run bottom-up: auth first, then the user-keyed governor.
    let protected = Router::new()
        .nest("/users", user_routes)
        .nest("/rides", ride_routes)
        .nest("/requests", request_routes)
        .nest("/bookings", booking_routes)
        .nest("/payments", payment_routes)
        .nest("/ratings", rating_routes)
        .nest("/messages", message_routes)
        .route("/geocode", get(geocode::search))
        .layer(create_user_governor())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(realtime::ws_handler))
        .nest("/api/auth", auth_routes)
        .nest("/api", protected)
        .with_state(state)
}
