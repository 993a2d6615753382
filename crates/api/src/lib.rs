//! HTTP API for workshop and consulting purchases.
//!
//! Customer routes run purchases and answer availability questions; the
//! `/admin` routes hold blockouts, coupons, workshop capacity and sales
//! figures. Structured logging goes through `tracing`, counters and
//! histograms through `metrics` with a Prometheus exporter.

pub mod config;
pub mod error;
pub mod routes;
pub mod tasks;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use common::{SharedClock, SystemClock};
use domain::{AvailabilityEngine, BookingRegistry, Catalog, CouponLedger};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{Projection, ProjectionProcessor, SalesView};
use saga::{
    Administration, InMemoryPaymentGateway, NotificationScheduler, Notifier, PaymentCoordinator,
    PaymentGateway, PurchaseSaga, TracingNotifier,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore + Clone> {
    pub saga: Arc<PurchaseSaga<S>>,
    pub admin: Administration<S>,
    pub availability: Arc<AvailabilityEngine<S>>,
    pub notifications: Arc<NotificationScheduler<S>>,
    pub sales: SalesView,
    pub projection_processor: ProjectionProcessor<S>,
}

/// External collaborators of the purchase flow.
pub struct Services {
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: SharedClock,
}

impl Default for Services {
    /// In-memory gateway, log-only notifier and the system clock.
    fn default() -> Self {
        Self {
            gateway: Arc::new(InMemoryPaymentGateway::new()),
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let admin = Router::new()
        .route(
            "/blockouts",
            post(routes::admin::block::<S>).get(routes::admin::list_blockouts::<S>),
        )
        .route("/blockouts/{date}", delete(routes::admin::unblock::<S>))
        .route("/coupons", post(routes::admin::create_coupon::<S>))
        .route("/coupons/{code}", get(routes::admin::get_coupon::<S>))
        .route(
            "/coupons/{code}/deactivate",
            post(routes::admin::deactivate_coupon::<S>),
        )
        .route("/workshops/{id}", get(routes::admin::get_workshop::<S>))
        .route(
            "/workshops/{id}/capacity",
            put(routes::admin::set_capacity::<S>),
        )
        .route("/sales", get(routes::admin::sales::<S>));

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/purchases", post(routes::purchases::create::<S>))
        .route("/purchases/{id}", get(routes::purchases::get::<S>))
        .route("/purchases/{id}/cancel", post(routes::purchases::cancel::<S>))
        .route(
            "/availability/{date}",
            get(routes::availability::date::<S>),
        )
        .route(
            "/availability/{date}/slots",
            get(routes::availability::slots::<S>),
        )
        .nest("/admin", admin)
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

/// Wires every component over one event store.
pub fn create_state<S: EventStore + Clone + 'static>(
    event_store: S,
    config: &Config,
    services: Services,
) -> Arc<AppState<S>> {
    let clock = services.clock;
    let availability = Arc::new(AvailabilityEngine::new(
        event_store.clone(),
        config.business_hours(),
        clock.clone(),
    ));
    let bookings = Arc::new(BookingRegistry::new(
        event_store.clone(),
        availability.clone(),
        Arc::new(Catalog::standard()),
        clock.clone(),
    ));
    let coupons = Arc::new(CouponLedger::new(event_store.clone(), clock.clone()));
    let payments = Arc::new(PaymentCoordinator::new(
        event_store.clone(),
        services.gateway,
        config.payment_settings(),
        clock.clone(),
    ));
    let notifications = Arc::new(NotificationScheduler::new(
        event_store.clone(),
        services.notifier,
        clock.clone(),
    ));
    let saga = Arc::new(PurchaseSaga::new(
        event_store.clone(),
        bookings.clone(),
        coupons.clone(),
        payments.clone(),
        notifications.clone(),
        clock,
    ));
    let admin = Administration::new(bookings, coupons, payments);

    let sales = SalesView::new();
    let mut processor = ProjectionProcessor::new(event_store);
    processor.register(Box::new(sales.clone()) as Box<dyn Projection>);

    Arc::new(AppState {
        saga,
        admin,
        availability,
        notifications,
        sales,
        projection_processor: processor,
    })
}

/// Creates the application state with the default collaborators.
pub fn create_default_state<S: EventStore + Clone + 'static>(
    event_store: S,
    config: &Config,
) -> Arc<AppState<S>> {
    create_state(event_store, config, Services::default())
}
