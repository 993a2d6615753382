use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use common::{AggregateId, StreamId};
use domain::{Aggregate, DomainError, DomainEvent, ProductKind};
use event_store::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which sequence of follow-up emails a purchase gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Workshop,
    Consulting,
}

impl Track {
    pub fn for_kind(kind: ProductKind) -> Self {
        match kind {
            ProductKind::Workshop { .. } => Track::Workshop,
            ProductKind::Consulting { .. } => Track::Consulting,
        }
    }

    /// Tags in sending order with their due times.
    ///
    /// Session times are wall-clock times in UTC.
    pub fn plan(
        &self,
        purchased_at: DateTime<Utc>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Vec<ScheduledEmail> {
        let start = start.and_utc();
        let end = end.and_utc();
        let candidates = match self {
            Track::Workshop => vec![
                ("welcome", purchased_at),
                ("preparation", purchased_at + Duration::hours(24)),
                ("final_reminder", start - Duration::hours(48)),
                ("post_event", end + Duration::hours(24)),
            ],
            Track::Consulting => vec![
                ("confirmation", purchased_at),
                ("24h_before", start - Duration::hours(24)),
                ("1h_before", start - Duration::hours(1)),
            ],
        };

        let mut plan: Vec<ScheduledEmail> = Vec::with_capacity(candidates.len());
        for (i, (tag, due_at)) in candidates.into_iter().enumerate() {
            if i > 0 && due_at < purchased_at {
                continue;
            }
            if plan.last().is_some_and(|prev| due_at < prev.due_at) {
                continue;
            }
            plan.push(ScheduledEmail {
                tag: tag.to_string(),
                due_at,
            });
        }
        plan
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEmail {
    pub tag: String,
    pub due_at: DateTime<Utc>,
}

/// Input of [`super::NotificationScheduler::schedule_follow_up_emails`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub purchase_id: AggregateId,
    pub track: Track,
    pub recipient_name: String,
    pub recipient_email: String,
    pub product_name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum NotificationEvent {
    ScheduleCreated(ScheduleCreatedData),
    /// The tag was taken by a sweep; it is never sent twice.
    EmailClaimed { tag: String, claimed_at: DateTime<Utc> },
    ScheduleCancelled { cancelled_at: DateTime<Utc> },
}

impl DomainEvent for NotificationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            NotificationEvent::ScheduleCreated(_) => "ScheduleCreated",
            NotificationEvent::EmailClaimed { .. } => "EmailClaimed",
            NotificationEvent::ScheduleCancelled { .. } => "ScheduleCancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleCreatedData {
    pub request: ScheduleRequest,
    pub emails: Vec<ScheduledEmail>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Follow-up emails already scheduled")]
    AlreadyScheduled,

    #[error("No follow-up emails scheduled")]
    NotScheduled,

    #[error("Schedule is cancelled")]
    Cancelled,

    #[error("Email {found} claimed out of order, next is {expected:?}")]
    OutOfOrder {
        expected: Option<String>,
        found: String,
    },
}

impl From<NotificationError> for DomainError {
    fn from(e: NotificationError) -> Self {
        match e {
            NotificationError::Cancelled => DomainError::InvalidState {
                entity: "notification schedule",
                state: "cancelled".to_string(),
                action: "claim",
            },
            _ => DomainError::Validation(e.to_string()),
        }
    }
}

/// Follow-up emails of one purchase.
#[derive(Debug, Clone, Default)]
pub struct NotificationSchedule {
    request: Option<ScheduleRequest>,
    emails: Vec<ScheduledEmail>,
    sent: Vec<String>,
    cancelled_at: Option<DateTime<Utc>>,
    version: Version,
}

impl NotificationSchedule {
    pub fn stream_for(purchase_id: AggregateId) -> StreamId {
        StreamId::of("notifications", purchase_id)
    }
}

impl Aggregate for NotificationSchedule {
    type Event = NotificationEvent;
    type Error = NotificationError;

    fn aggregate_type() -> &'static str {
        "NotificationSchedule"
    }

    fn exists(&self) -> bool {
        self.request.is_some()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            NotificationEvent::ScheduleCreated(data) => {
                self.request = Some(data.request);
                self.emails = data.emails;
            }
            NotificationEvent::EmailClaimed { tag, .. } => {
                self.sent.push(tag);
            }
            NotificationEvent::ScheduleCancelled { cancelled_at } => {
                self.cancelled_at = Some(cancelled_at);
            }
        }
    }
}

// Query methods
impl NotificationSchedule {
    pub fn request(&self) -> Option<&ScheduleRequest> {
        self.request.as_ref()
    }

    pub fn purchase_id(&self) -> Option<AggregateId> {
        self.request.as_ref().map(|r| r.purchase_id)
    }

    pub fn track(&self) -> Option<Track> {
        self.request.as_ref().map(|r| r.track)
    }

    pub fn emails(&self) -> &[ScheduledEmail] {
        &self.emails
    }

    pub fn sent_tags(&self) -> &[String] {
        &self.sent
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// The first email not yet sent, unless the schedule is cancelled.
    pub fn next_email(&self) -> Option<&ScheduledEmail> {
        if self.is_cancelled() {
            return None;
        }
        self.emails.iter().find(|e| !self.sent.contains(&e.tag))
    }

    pub fn next_email_due(&self) -> Option<DateTime<Utc>> {
        self.next_email().map(|e| e.due_at)
    }

    /// The next email if it is due at `now`.
    pub fn due_at(&self, now: DateTime<Utc>) -> Option<&ScheduledEmail> {
        self.next_email().filter(|e| e.due_at <= now)
    }

    pub fn is_finished(&self) -> bool {
        self.exists() && self.next_email().is_none()
    }
}

// Command methods (return events)
impl NotificationSchedule {
    pub fn create(
        &self,
        request: ScheduleRequest,
        at: DateTime<Utc>,
    ) -> Result<Vec<NotificationEvent>, NotificationError> {
        if self.exists() {
            return Err(NotificationError::AlreadyScheduled);
        }
        let emails = request
            .track
            .plan(request.purchased_at, request.start, request.end);
        Ok(vec![NotificationEvent::ScheduleCreated(ScheduleCreatedData {
            request,
            emails,
            created_at: at,
        })])
    }

    /// Takes `tag` for sending. Tags go out in order and at most once.
    pub fn claim(
        &self,
        tag: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<NotificationEvent>, NotificationError> {
        if !self.exists() {
            return Err(NotificationError::NotScheduled);
        }
        if self.sent.iter().any(|t| t == tag) {
            return Ok(vec![]);
        }
        if self.is_cancelled() {
            return Err(NotificationError::Cancelled);
        }
        let expected = self.next_email().map(|e| e.tag.clone());
        if expected.as_deref() != Some(tag) {
            return Err(NotificationError::OutOfOrder {
                expected,
                found: tag.to_string(),
            });
        }
        Ok(vec![NotificationEvent::EmailClaimed {
            tag: tag.to_string(),
            claimed_at: at,
        }])
    }

    pub fn cancel(&self, at: DateTime<Utc>) -> Result<Vec<NotificationEvent>, NotificationError> {
        if !self.exists() {
            return Err(NotificationError::NotScheduled);
        }
        if self.is_cancelled() {
            return Ok(vec![]);
        }
        Ok(vec![NotificationEvent::ScheduleCancelled { cancelled_at: at }])
    }
}
