use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::item::{TodoId, TodoItem};

pub const REMINDER_TITLE: &str = "Reminder";

/// Wall-clock match in some time zone, down to the minute. Seconds are never
/// part of a trigger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarTrigger {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl CalendarTrigger {
    pub fn at<Tz: TimeZone>(time: &DateTime<Utc>, tz: &Tz) -> Self {
        let local = time.with_timezone(tz);
        Self {
            year: local.year(),
            month: local.month(),
            day: local.day(),
            hour: local.hour(),
            minute: local.minute(),
        }
    }

    pub fn naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)?.and_hms_opt(
            self.hour,
            self.minute,
            0,
        )
    }

    /// True once the wall clock of `now` has reached the trigger minute.
    pub fn is_due<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        self.naive()
            .map(|at| at <= now.naive_local())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRequest {
    pub id: TodoId,
    pub title: String,
    pub body: String,
    pub trigger: CalendarTrigger,
    pub repeats: bool,
}

impl NotificationRequest {
    /// One-shot reminder for `item`, matched against the local wall clock.
    pub fn for_item(item: &TodoItem) -> Self {
        Self::for_item_in(item, &Local)
    }

    pub fn for_item_in<Tz: TimeZone>(item: &TodoItem, tz: &Tz) -> Self {
        Self {
            id: item.id,
            title: REMINDER_TITLE.to_string(),
            body: item.name.clone(),
            trigger: CalendarTrigger::at(&item.time, tz),
            repeats: false,
        }
    }
}

/// Platform-specific reminder adapters implement this trait.
pub trait NotificationSink: Send + Sync {
    /// Registers `request`, replacing any pending request with the same id.
    fn schedule(&self, request: NotificationRequest);
    /// Drops the pending request for `id`. Unknown ids are ignored.
    fn cancel(&self, id: &TodoId);
}

#[derive(Debug, Default)]
struct SchedulerState {
    pending: BTreeMap<TodoId, NotificationRequest>,
    authorized: bool,
}

/// In-process reminder table. Clones share the same pending set, so a view
/// can poll for due reminders while the store holds another handle.
#[derive(Debug, Clone, Default)]
pub struct LocalScheduler {
    state: Arc<Mutex<SchedulerState>>,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of the one-time permission request made at startup.
    pub fn set_authorized(&self, authorized: bool) {
        self.state.lock().authorized = authorized;
    }

    pub fn is_pending(&self, id: &TodoId) -> bool {
        self.state.lock().pending.contains_key(id)
    }

    pub fn pending(&self) -> Vec<NotificationRequest> {
        let mut pending: Vec<NotificationRequest> =
            self.state.lock().pending.values().cloned().collect();
        pending.sort_by(|a, b| a.trigger.cmp(&b.trigger));
        pending
    }

    /// Removes and returns every request whose trigger minute has been
    /// reached, earliest first. Nothing fires while unauthorized.
    pub fn take_due<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Vec<NotificationRequest> {
        let mut state = self.state.lock();
        if !state.authorized {
            return Vec::new();
        }
        let due_ids: Vec<TodoId> = state
            .pending
            .iter()
            .filter(|(_, request)| request.trigger.is_due(now))
            .map(|(id, _)| *id)
            .collect();
        let mut due: Vec<NotificationRequest> = due_ids
            .iter()
            .filter_map(|id| state.pending.remove(id))
            .collect();
        due.sort_by(|a, b| a.trigger.cmp(&b.trigger));
        due
    }
}

impl NotificationSink for LocalScheduler {
    fn schedule(&self, request: NotificationRequest) {
        tracing::debug!(id = %request.id, trigger = ?request.trigger, "scheduling reminder");
        self.state.lock().pending.insert(request.id, request);
    }

    fn cancel(&self, id: &TodoId) {
        if self.state.lock().pending.remove(id).is_some() {
            tracing::debug!(%id, "cancelled reminder");
        }
    }
}
