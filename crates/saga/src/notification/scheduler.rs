use std::collections::HashSet;
use std::sync::Arc;

use common::{AggregateId, SharedClock, StreamId};
use domain::{Aggregate, CommandHandler};
use event_store::EventStore;
use tokio::sync::Mutex;

use crate::error::SagaError;
use crate::services::{Notification, Notifier};

use super::{NotificationSchedule, ScheduleRequest};

/// Plans follow-up emails per purchase and sends them when due.
///
/// Sending is driven by [`process_due_emails`](Self::process_due_emails),
/// called from a timer. Each tag is claimed on the schedule's stream before
/// it is handed to the notifier, so no tag goes out twice even when sweeps
/// from several processes overlap.
///
/// Finished and cancelled schedules never become due again; a sweep skips
/// them once seen without replaying their streams.
pub struct NotificationScheduler<S: EventStore> {
    handler: CommandHandler<S, NotificationSchedule>,
    notifier: Arc<dyn Notifier>,
    clock: SharedClock,
    /// Held by the running sweep; the set lists schedules already closed.
    sweep: Mutex<HashSet<StreamId>>,
}

impl<S: EventStore> NotificationScheduler<S> {
    pub fn new(store: S, notifier: Arc<dyn Notifier>, clock: SharedClock) -> Self {
        Self {
            handler: CommandHandler::new(store),
            notifier,
            clock,
            sweep: Mutex::new(HashSet::new()),
        }
    }

    /// Records the schedule for a purchase. Scheduling twice returns the
    /// first schedule.
    #[tracing::instrument(skip(self, request), fields(purchase_id = %request.purchase_id))]
    pub async fn schedule_follow_up_emails(
        &self,
        request: ScheduleRequest,
    ) -> Result<NotificationSchedule, SagaError> {
        let stream = NotificationSchedule::stream_for(request.purchase_id);
        if let Some(existing) = self.handler.load_existing(&stream).await? {
            return Ok(existing);
        }

        let at = self.clock.now();
        match self
            .handler
            .execute(&stream, |schedule| schedule.create(request, at))
            .await
        {
            Ok(result) => {
                let schedule = result.aggregate;
                tracing::info!(
                    emails = schedule.emails().len(),
                    next_due = ?schedule.next_email_due(),
                    "follow-up emails scheduled"
                );
                Ok(schedule)
            }
            // Scheduled concurrently by another caller.
            Err(e) => self.handler.load_existing(&stream).await?.ok_or(e.into()),
        }
    }

    /// Sends every email that is due. Returns how many were delivered.
    ///
    /// A failed delivery is logged and counted; the tag stays claimed and is
    /// not sent again.
    pub async fn process_due_emails(&self) -> Result<usize, SagaError> {
        let mut closed = self.sweep.lock().await;
        let now = self.clock.now();
        let streams = self
            .handler
            .store()
            .stream_ids(NotificationSchedule::aggregate_type())
            .await?;

        let mut delivered = 0;
        for stream in streams {
            if closed.contains(&stream) {
                continue;
            }
            loop {
                let schedule = self.handler.load(&stream).await?;
                if schedule.is_finished() {
                    closed.insert(stream.clone());
                    break;
                }
                let Some(email) = schedule.due_at(now) else {
                    break;
                };
                let Some(request) = schedule.request() else {
                    break;
                };
                let tag = email.tag.clone();

                match self
                    .handler
                    .execute(&stream, |s| s.claim(&tag, now))
                    .await
                {
                    Ok(result) if result.events.is_empty() => continue,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(stream = %stream, %tag, error = %e, "could not claim email");
                        break;
                    }
                }

                let notification = Notification {
                    purchase_id: request.purchase_id,
                    tag: tag.clone(),
                    recipient_name: request.recipient_name.clone(),
                    recipient_email: request.recipient_email.clone(),
                    product_name: request.product_name.clone(),
                    event_start: request.start.and_utc(),
                };
                match self.notifier.send(&notification).await {
                    Ok(()) => {
                        delivered += 1;
                        metrics::counter!("notifications_sent_total", "tag" => tag.clone())
                            .increment(1);
                        tracing::info!(purchase_id = %request.purchase_id, %tag, "follow-up email sent");
                    }
                    Err(e) => {
                        metrics::counter!("notifications_failed_total").increment(1);
                        tracing::warn!(purchase_id = %request.purchase_id, %tag, error = %e, "follow-up email failed");
                    }
                }
            }
        }
        Ok(delivered)
    }

    /// Stops all unsent emails of a purchase. Returns false if the purchase
    /// had no schedule.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_schedule(&self, purchase_id: AggregateId) -> Result<bool, SagaError> {
        let stream = NotificationSchedule::stream_for(purchase_id);
        if self.handler.load_existing(&stream).await?.is_none() {
            return Ok(false);
        }
        let at = self.clock.now();
        let result = self
            .handler
            .execute_with_retry(&stream, |schedule| schedule.cancel(at))
            .await?;
        if !result.events.is_empty() {
            tracing::info!("follow-up emails cancelled");
        }
        Ok(true)
    }

    #[cfg(test)]
    async fn closed_schedules(&self) -> usize {
        self.sweep.lock().await.len()
    }

    pub async fn get_schedule(
        &self,
        purchase_id: AggregateId,
    ) -> Result<NotificationSchedule, SagaError> {
        self.handler
            .load_existing(&NotificationSchedule::stream_for(purchase_id))
            .await?
            .ok_or(SagaError::ScheduleNotFound(purchase_id))
    }
}
