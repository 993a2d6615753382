//! Follow-up email schedules, one stream per purchase.

mod schedule;
mod scheduler;

pub use schedule::{
    NotificationError, NotificationEvent, NotificationSchedule, ScheduleCreatedData,
    ScheduleRequest, ScheduledEmail, Track,
};
pub use scheduler::NotificationScheduler;
