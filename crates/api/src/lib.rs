//! HTTP boundary for the booking and payment reconciliation core.
//!
//! Thin handlers over the domain services, with structured logging
//! (tracing) and Prometheus metrics. The acting user comes from the
//! `x-user-id` header set by an upstream gateway.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{delete, get, post, put};
use domain::contract::DEFAULT_CLAIM_TTL_SECS;
use domain::{
    ContractService, CounterLedger, FeedbackService, Notifier, RoomService, SubscriptionService,
};
use metrics_exporter_prometheus::PrometheusHandle;
use payments::PaymentGateway;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S, G>
where
    S: Store,
    G: PaymentGateway,
{
    pub rooms: RoomService<S>,
    pub contracts: ContractService<S, G>,
    pub subscriptions: SubscriptionService<S, G>,
    pub feedback: FeedbackService<S>,
    pub ledger: CounterLedger<S>,
}

impl<S, G> AppState<S, G>
where
    S: Store + Clone,
    G: PaymentGateway + Clone,
{
    /// Wires every service to the same store, gateway and notifier.
    pub fn new(store: S, gateway: G, notifier: Arc<dyn Notifier>, claim_ttl: Duration) -> Self {
        let claim_ttl = chrono::Duration::from_std(claim_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_CLAIM_TTL_SECS));
        Self {
            rooms: RoomService::new(store.clone()),
            contracts: ContractService::new(store.clone(), gateway.clone(), Arc::clone(&notifier))
                .with_claim_ttl(claim_ttl),
            subscriptions: SubscriptionService::new(store.clone(), gateway, notifier),
            feedback: FeedbackService::new(store.clone()),
            ledger: CounterLedger::new(store),
        }
    }
}

pub type SharedState<S, G> = Arc<AppState<S, G>>;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, G>(state: SharedState<S, G>, metrics_handle: PrometheusHandle) -> Router
where
    S: Store + 'static,
    G: PaymentGateway + 'static,
{
    use routes::{bookings, canteens, contracts, feedback, hostels, subscriptions};

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/hostels", post(hostels::create::<S, G>))
        .route("/hostels/{id}", get(hostels::get::<S, G>))
        .route(
            "/hostels/{id}/rooms",
            post(hostels::add_room::<S, G>).get(hostels::list_rooms::<S, G>),
        )
        .route("/hostels/{id}/reconcile", post(hostels::reconcile::<S, G>))
        .route("/rooms/{id}", delete(hostels::remove_room::<S, G>))
        .route("/bookings/orders", post(bookings::initiate::<S, G>))
        .route("/bookings/confirm", post(bookings::confirm::<S, G>))
        .route("/contracts", get(contracts::list_mine::<S, G>))
        .route("/contracts/{id}", get(contracts::get::<S, G>))
        .route("/contracts/{id}/approve", post(contracts::approve::<S, G>))
        .route("/contracts/{id}/reject", post(contracts::reject::<S, G>))
        .route("/contracts/{id}/cancel", post(contracts::cancel::<S, G>))
        .route("/canteens", post(canteens::create::<S, G>))
        .route("/canteens/{id}", get(canteens::get::<S, G>))
        .route("/canteens/{id}/reconcile", post(canteens::reconcile::<S, G>))
        .route(
            "/subscriptions/orders",
            post(subscriptions::create_order::<S, G>),
        )
        .route("/subscriptions/expire", post(subscriptions::expire::<S, G>))
        .route("/subscriptions/{id}", get(subscriptions::get::<S, G>))
        .route(
            "/subscriptions/{id}/verify",
            post(subscriptions::verify::<S, G>),
        )
        .route(
            "/subscriptions/{id}/cancel",
            post(subscriptions::cancel::<S, G>),
        )
        .route(
            "/subscriptions/{id}/pause",
            post(subscriptions::pause::<S, G>),
        )
        .route(
            "/subscriptions/{id}/resume",
            post(subscriptions::resume::<S, G>),
        )
        .route("/feedback", put(feedback::upsert::<S, G>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
