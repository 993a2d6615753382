//! Background sweeps run next to the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use event_store::EventStore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::AppState;
use crate::config::Config;

/// Sends follow-up emails that have come due. Each tick awaits the previous
/// sweep, so sweeps never overlap.
pub fn spawn_notification_sweep<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match state.notifications.process_due_emails().await {
                Ok(0) => {}
                Ok(sent) => tracing::info!(sent, "notification sweep delivered emails"),
                Err(e) => tracing::error!(error = %e, "notification sweep failed"),
            }
        }
    })
}

/// Retries compensations parked after a failed step.
pub fn spawn_compensation_retry<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; start-up recovery already ran.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if state.saga.pending_compensations().is_empty() {
                continue;
            }
            match state.saga.retry_pending_compensations().await {
                Ok(finished) => tracing::info!(finished, "compensation retry sweep done"),
                Err(e) => tracing::error!(error = %e, "compensation retry sweep failed"),
            }
        }
    })
}

/// Starts every sweep with the configured periods.
pub fn spawn_all<S: EventStore + Clone + 'static>(
    state: &Arc<AppState<S>>,
    config: &Config,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_notification_sweep(state.clone(), config.notification_sweep),
        spawn_compensation_retry(state.clone(), config.compensation_retry),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Services, create_state};
    use chrono::{NaiveDate, TimeZone, Utc};
    use common::ManualClock;
    use event_store::InMemoryEventStore;
    use saga::{
        Attendee, Contact, InMemoryNotifier, InMemoryPaymentGateway, PurchaseRequest,
        PurchaseStatus,
    };

    #[tokio::test]
    async fn test_notification_sweep_sends_due_emails() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap(),
        ));
        let notifier = InMemoryNotifier::new();
        let state = create_state(
            InMemoryEventStore::new(),
            &Config::default(),
            Services {
                gateway: Arc::new(InMemoryPaymentGateway::new()),
                notifier: Arc::new(notifier.clone()),
                clock: clock.clone(),
            },
        );

        let result = state
            .saga
            .process_purchase(PurchaseRequest {
                product_id: "ai-foundations-1day".into(),
                start: NaiveDate::from_ymd_opt(2025, 6, 2)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
                attendees: vec![Attendee {
                    name: "Ada".to_string(),
                    email: "ada@example.com".to_string(),
                }],
                contact: Contact {
                    name: "Ada".to_string(),
                    email: "ada@example.com".to_string(),
                    phone: None,
                },
                coupon_code: None,
                payment_source: "tok_visa".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(result.status, PurchaseStatus::Completed);

        // After the session every follow-up has come due.
        clock.set(Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap());
        let handle = spawn_notification_sweep(state.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(!notifier.sent().is_empty());
    }
}
