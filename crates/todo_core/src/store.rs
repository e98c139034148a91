use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Local, Utc};
use serde::de::Error as _;

use crate::{
    error::{IndexError, PersistenceError, ValidationError},
    item::{Priority, TodoId, TodoItem},
    notifications::{CalendarTrigger, NotificationRequest, NotificationSink},
    settings::{MemorySettingsStore, SettingsStore},
};

/// Settings key the list is stored under unless overridden.
pub const DEFAULT_SETTINGS_KEY: &str = "TodoList";

/// When the store writes itself back to its settings store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistPolicy {
    /// Only when [`TodoStore::save`] is called.
    #[default]
    Manual,
    /// After every successful add or delete, in addition to explicit saves.
    AfterEachMutation,
}

pub struct TodoStore {
    items: Vec<TodoItem>,
    key: String,
    policy: PersistPolicy,
    settings: Box<dyn SettingsStore>,
    notification_sink: Option<Box<dyn NotificationSink>>,
}

pub struct TodoStoreBuilder {
    key: String,
    policy: PersistPolicy,
    settings: Option<Box<dyn SettingsStore>>,
    notification_sink: Option<Box<dyn NotificationSink>>,
}

impl TodoStoreBuilder {
    pub fn new() -> Self {
        Self {
            key: DEFAULT_SETTINGS_KEY.to_string(),
            policy: PersistPolicy::default(),
            settings: None,
            notification_sink: None,
        }
    }

    pub fn with_settings_store(mut self, settings: Box<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_notification_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.notification_sink = Some(sink);
        self
    }

    pub fn settings_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn persist_policy(mut self, policy: PersistPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds an empty store. Nothing is read until [`TodoStore::load`].
    pub fn build(self) -> TodoStore {
        TodoStore {
            items: Vec::new(),
            key: self.key,
            policy: self.policy,
            settings: self
                .settings
                .unwrap_or_else(|| Box::new(MemorySettingsStore::new())),
            notification_sink: self.notification_sink,
        }
    }
}

impl Default for TodoStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TodoStore {
    pub fn builder() -> TodoStoreBuilder {
        TodoStoreBuilder::new()
    }

    pub fn items(&self) -> &[TodoItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TodoItem> {
        self.items.get(index)
    }

    pub fn index_of(&self, id: &TodoId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == id)
    }

    pub fn add(
        &mut self,
        name: &str,
        time: DateTime<Utc>,
        priority: Priority,
    ) -> Result<TodoItem, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        let item = TodoItem::new(name.to_string(), time, priority);
        self.items.push(item.clone());
        tracing::debug!(id = %item.id, name = %item.name, "todo added");
        if let Some(sink) = &self.notification_sink {
            sink.schedule(NotificationRequest::for_item(&item));
        }
        self.persist_after_mutation();
        Ok(item)
    }

    pub fn delete(&mut self, index: usize) -> Result<TodoItem, IndexError> {
        self.check_index(index)?;
        let removed = self.remove_and_cancel(index);
        self.persist_after_mutation();
        Ok(removed)
    }

    /// Removes every item at `indices`. Either all indices are valid and all
    /// items are removed, or nothing changes. The removed items come back in
    /// their former list order.
    pub fn delete_many(&mut self, indices: &BTreeSet<usize>) -> Result<Vec<TodoItem>, IndexError> {
        for &index in indices {
            self.check_index(index)?;
        }
        if indices.is_empty() {
            return Ok(Vec::new());
        }
        let mut removed: Vec<TodoItem> = indices
            .iter()
            .rev()
            .map(|&index| self.remove_and_cancel(index))
            .collect();
        removed.reverse();
        self.persist_after_mutation();
        Ok(removed)
    }

    pub fn save(&self) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(&self.items).map_err(PersistenceError::EncodeFailed)?;
        self.settings
            .save(&self.key, &bytes)
            .map_err(PersistenceError::WriteFailed)?;
        tracing::debug!(key = %self.key, count = self.items.len(), "todo list saved");
        Ok(())
    }

    /// Replaces the list with the stored one. A missing value leaves the list
    /// as is; so does an undecodable one, which is only logged.
    pub fn load(&mut self) -> Result<(), PersistenceError> {
        let Some(bytes) = self
            .settings
            .load(&self.key)
            .map_err(PersistenceError::ReadFailed)?
        else {
            tracing::debug!(key = %self.key, "no stored todo list");
            return Ok(());
        };
        match decode_items(&bytes) {
            Ok(items) => {
                tracing::debug!(key = %self.key, count = items.len(), "todo list loaded");
                self.cancel_dropped(&items);
                self.items = items;
            }
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "ignoring unreadable todo list");
            }
        }
        Ok(())
    }

    /// Re-issues reminders for items whose trigger minute has not passed at
    /// `now`. Returns how many were scheduled.
    pub fn reschedule_all(&self, now: DateTime<Utc>) -> usize {
        let Some(sink) = &self.notification_sink else {
            return 0;
        };
        let current = CalendarTrigger::at(&now, &Local);
        let mut scheduled = 0;
        for item in &self.items {
            let request = NotificationRequest::for_item(item);
            if request.trigger < current {
                continue;
            }
            sink.schedule(request);
            scheduled += 1;
        }
        tracing::debug!(scheduled, total = self.items.len(), "reminders rescheduled");
        scheduled
    }

    fn check_index(&self, index: usize) -> Result<(), IndexError> {
        if index >= self.items.len() {
            return Err(IndexError::OutOfRange {
                index,
                len: self.items.len(),
            });
        }
        Ok(())
    }

    fn remove_and_cancel(&mut self, index: usize) -> TodoItem {
        let removed = self.items.remove(index);
        tracing::debug!(id = %removed.id, index, "todo deleted");
        if let Some(sink) = &self.notification_sink {
            sink.cancel(&removed.id);
        }
        removed
    }

    /// Cancels reminders of in-memory items that `incoming` does not carry.
    fn cancel_dropped(&self, incoming: &[TodoItem]) {
        let Some(sink) = &self.notification_sink else {
            return;
        };
        let kept: HashSet<TodoId> = incoming.iter().map(|item| item.id).collect();
        for item in self.items.iter().filter(|item| !kept.contains(&item.id)) {
            sink.cancel(&item.id);
        }
    }

    fn persist_after_mutation(&self) {
        if self.policy != PersistPolicy::AfterEachMutation {
            return;
        }
        if let Err(err) = self.save() {
            tracing::warn!(error = %err, "failed to persist todo list; continuing in memory");
        }
    }
}

fn decode_items(bytes: &[u8]) -> Result<Vec<TodoItem>, PersistenceError> {
    let items: Vec<TodoItem> =
        serde_json::from_slice(bytes).map_err(PersistenceError::DecodeFailed)?;
    let mut seen = HashSet::with_capacity(items.len());
    if let Some(dup) = items.iter().find(|item| !seen.insert(item.id)) {
        return Err(PersistenceError::DecodeFailed(serde_json::Error::custom(
            format!("duplicate todo id {}", dup.id),
        )));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SettingsError;
    use crate::notifications::LocalScheduler;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 24, h, m, 0).unwrap()
    }

    fn store_with(scheduler: &LocalScheduler, settings: &MemorySettingsStore) -> TodoStore {
        TodoStore::builder()
            .with_notification_sink(Box::new(scheduler.clone()))
            .with_settings_store(Box::new(settings.clone()))
            .build()
    }

    struct BrokenSettings;

    impl SettingsStore for BrokenSettings {
        fn save(&self, _key: &str, _bytes: &[u8]) -> Result<(), SettingsError> {
            Err(SettingsError::Io(std::io::Error::other("disk full")))
        }

        fn load(&self, _key: &str) -> Result<Option<Vec<u8>>, SettingsError> {
            Err(SettingsError::Io(std::io::Error::other("unreadable")))
        }
    }

    #[test]
    fn add_trims_name_and_schedules_reminder() {
        let scheduler = LocalScheduler::new();
        let mut store = store_with(&scheduler, &MemorySettingsStore::new());

        let item = store.add("  Buy milk \n", at(14, 30), Priority::High).unwrap();
        assert_eq!(item.name, "Buy milk");
        assert_eq!(item.time, at(14, 30));
        assert_eq!(item.priority, Priority::High);
        assert_eq!(store.items(), &[item.clone()]);

        let pending = scheduler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, item.id);
        assert_eq!(pending[0].body, "Buy milk");
    }

    #[test]
    fn blank_names_are_rejected_without_side_effects() {
        let scheduler = LocalScheduler::new();
        let settings = MemorySettingsStore::new();
        let mut store = TodoStore::builder()
            .with_notification_sink(Box::new(scheduler.clone()))
            .with_settings_store(Box::new(settings.clone()))
            .persist_policy(PersistPolicy::AfterEachMutation)
            .build();

        for name in ["", "   ", "\t\n"] {
            assert_eq!(
                store.add(name, at(9, 0), Priority::Low),
                Err(ValidationError::EmptyName)
            );
        }
        assert!(store.is_empty());
        assert!(scheduler.pending().is_empty());
        assert!(!settings.contains(DEFAULT_SETTINGS_KEY));
    }

    #[test]
    fn ids_stay_unique_across_adds() {
        let mut store = TodoStore::builder().build();
        for n in 0..50 {
            store.add(&format!("task {n}"), at(8, 0), Priority::Medium).unwrap();
        }
        let ids: HashSet<TodoId> = store.items().iter().map(|item| item.id).collect();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn delete_shifts_later_items_and_cancels_reminder() {
        let scheduler = LocalScheduler::new();
        let mut store = store_with(&scheduler, &MemorySettingsStore::new());
        let a = store.add("A", at(8, 0), Priority::Low).unwrap();
        let b = store.add("B", at(9, 0), Priority::Medium).unwrap();
        let c = store.add("C", at(10, 0), Priority::High).unwrap();

        let removed = store.delete(1).unwrap();
        assert_eq!(removed, b);
        assert_eq!(store.items(), &[a.clone(), c.clone()]);
        assert!(!scheduler.is_pending(&b.id));
        assert!(scheduler.is_pending(&a.id));
        assert!(scheduler.is_pending(&c.id));
        assert_eq!(store.index_of(&c.id), Some(1));
    }

    #[test]
    fn out_of_range_delete_changes_nothing() {
        let scheduler = LocalScheduler::new();
        let mut store = store_with(&scheduler, &MemorySettingsStore::new());
        let a = store.add("A", at(8, 0), Priority::Low).unwrap();

        assert_eq!(
            store.delete(1),
            Err(IndexError::OutOfRange { index: 1, len: 1 })
        );
        assert_eq!(store.items(), &[a.clone()]);
        assert!(scheduler.is_pending(&a.id));
    }

    #[test]
    fn milk_scenario_schedules_then_cancels() {
        let scheduler = LocalScheduler::new();
        let mut store = store_with(&scheduler, &MemorySettingsStore::new());

        let milk = store.add("Buy milk", at(14, 30), Priority::Medium).unwrap();
        assert!(scheduler.is_pending(&milk.id));
        assert!(store.add("", at(9, 0), Priority::High).is_err());
        assert_eq!(store.len(), 1);

        store.delete(0).unwrap();
        assert!(store.is_empty());
        assert!(!scheduler.is_pending(&milk.id));
    }

    #[test]
    fn delete_many_keeps_untouched_items_intact() {
        let scheduler = LocalScheduler::new();
        let mut store = store_with(&scheduler, &MemorySettingsStore::new());
        let a = store.add("A", at(8, 0), Priority::Low).unwrap();
        let b = store.add("B", at(20, 15), Priority::High).unwrap();

        let removed = store.delete_many(&BTreeSet::from([0])).unwrap();
        assert_eq!(removed, vec![a.clone()]);
        assert_eq!(store.items(), &[b.clone()]);
        assert!(!scheduler.is_pending(&a.id));
        assert!(scheduler.is_pending(&b.id));
    }

    #[test]
    fn delete_many_returns_items_in_list_order() {
        let mut store = TodoStore::builder().build();
        let names = ["A", "B", "C", "D", "E"];
        for name in names {
            store.add(name, at(8, 0), Priority::Medium).unwrap();
        }

        let removed = store.delete_many(&BTreeSet::from([4, 0, 2])).unwrap();
        let removed_names: Vec<&str> = removed.iter().map(|item| item.name.as_str()).collect();
        assert_eq!(removed_names, ["A", "C", "E"]);
        let left: Vec<&str> = store.items().iter().map(|item| item.name.as_str()).collect();
        assert_eq!(left, ["B", "D"]);
    }

    #[test]
    fn delete_many_with_bad_index_removes_nothing() {
        let scheduler = LocalScheduler::new();
        let mut store = store_with(&scheduler, &MemorySettingsStore::new());
        store.add("A", at(8, 0), Priority::Low).unwrap();
        store.add("B", at(9, 0), Priority::Low).unwrap();

        assert_eq!(
            store.delete_many(&BTreeSet::from([0, 7])),
            Err(IndexError::OutOfRange { index: 7, len: 2 })
        );
        assert_eq!(store.len(), 2);
        assert_eq!(scheduler.pending().len(), 2);
    }

    #[test]
    fn save_then_load_on_fresh_store_restores_list() {
        let settings = MemorySettingsStore::new();
        let mut store = store_with(&LocalScheduler::new(), &settings);
        store.add("A", at(8, 0), Priority::Low).unwrap();
        store.add("B", at(9, 45), Priority::High).unwrap();
        store.save().unwrap();

        let mut fresh = store_with(&LocalScheduler::new(), &settings);
        fresh.load().unwrap();
        assert_eq!(fresh.items(), store.items());
    }

    #[test]
    fn load_without_stored_value_leaves_list_empty() {
        let mut store = TodoStore::builder().build();
        store.load().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn load_cancels_reminders_of_replaced_items() {
        let settings = MemorySettingsStore::new();
        let mut writer = TodoStore::builder()
            .with_settings_store(Box::new(settings.clone()))
            .build();
        let stored = writer.add("Stored", at(11, 0), Priority::Medium).unwrap();
        writer.save().unwrap();

        let scheduler = LocalScheduler::new();
        let mut store = store_with(&scheduler, &settings);
        let unsaved = store.add("Unsaved", at(8, 0), Priority::Low).unwrap();
        assert!(scheduler.is_pending(&unsaved.id));

        store.load().unwrap();
        assert_eq!(store.items(), &[stored]);
        assert!(!scheduler.is_pending(&unsaved.id));
    }

    #[test]
    fn load_keeps_reminders_of_items_still_listed() {
        let settings = MemorySettingsStore::new();
        let scheduler = LocalScheduler::new();
        let mut store = store_with(&scheduler, &settings);
        let item = store.add("Stays", at(8, 0), Priority::Low).unwrap();
        store.save().unwrap();

        store.load().unwrap();
        assert!(scheduler.is_pending(&item.id));
    }

    #[test]
    fn corrupt_or_duplicated_blobs_are_ignored() {
        let settings = MemorySettingsStore::new();
        let mut store = store_with(&LocalScheduler::new(), &settings);
        let kept = store.add("Keep me", at(8, 0), Priority::Low).unwrap();

        settings.save(DEFAULT_SETTINGS_KEY, b"{not json").unwrap();
        store.load().unwrap();
        assert_eq!(store.items(), &[kept.clone()]);

        let duplicated = serde_json::to_vec(&vec![kept.clone(), kept.clone()]).unwrap();
        settings.save(DEFAULT_SETTINGS_KEY, &duplicated).unwrap();
        store.load().unwrap();
        assert_eq!(store.items(), &[kept]);
    }

    #[test]
    fn persistence_failures_leave_memory_untouched() {
        let mut store = TodoStore::builder()
            .with_settings_store(Box::new(BrokenSettings))
            .persist_policy(PersistPolicy::AfterEachMutation)
            .build();

        let item = store.add("Still here", at(8, 0), Priority::Low).unwrap();
        assert!(matches!(store.save(), Err(PersistenceError::WriteFailed(_))));
        assert!(matches!(store.load(), Err(PersistenceError::ReadFailed(_))));
        assert_eq!(store.items(), &[item]);
    }

    #[test]
    fn eager_policy_persists_each_mutation() {
        let settings = MemorySettingsStore::new();
        let mut store = TodoStore::builder()
            .with_settings_store(Box::new(settings.clone()))
            .settings_key("Errands")
            .persist_policy(PersistPolicy::AfterEachMutation)
            .build();

        store.add("A", at(8, 0), Priority::Low).unwrap();
        let stored: Vec<TodoItem> =
            serde_json::from_slice(&settings.load("Errands").unwrap().unwrap()).unwrap();
        assert_eq!(stored.len(), 1);

        store.delete(0).unwrap();
        let stored: Vec<TodoItem> =
            serde_json::from_slice(&settings.load("Errands").unwrap().unwrap()).unwrap();
        assert!(stored.is_empty());
    }

    #[test]
    fn manual_policy_does_not_write_on_mutation() {
        let settings = MemorySettingsStore::new();
        let mut store = store_with(&LocalScheduler::new(), &settings);
        store.add("A", at(8, 0), Priority::Low).unwrap();
        assert!(!settings.contains(DEFAULT_SETTINGS_KEY));
    }

    #[test]
    fn reschedule_all_skips_past_minutes() {
        let settings = MemorySettingsStore::new();
        let now = Utc::now();
        let mut store = TodoStore::builder()
            .with_settings_store(Box::new(settings.clone()))
            .build();
        store.add("Past", now - Duration::hours(2), Priority::Low).unwrap();
        store.add("Future", now + Duration::hours(2), Priority::Low).unwrap();
        store.save().unwrap();

        let scheduler = LocalScheduler::new();
        let mut restored = store_with(&scheduler, &settings);
        restored.load().unwrap();
        assert!(scheduler.pending().is_empty());

        assert_eq!(restored.reschedule_all(now), 1);
        let pending = scheduler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body, "Future");
    }
}
