//! # Dirty Tracking
//!
//! `Tracked<T>` wraps a `Model` instance with an `original` snapshot (values
//! as loaded from the DB or as of the last successful save) alongside the
//! live `current` instance, diffing their `to_map()` output on demand rather
//! than instrumenting per-field setters — `#[derive(Model)]` only emits
//! metadata and `to_map()`, not tracking setters, so this module keeps that
//! division of labor and builds change-tracking on top of it.

use std::collections::HashMap;

use crate::model::Model;

/// The `(old, new)` pair for one changed attribute.
pub type Change = (Option<String>, Option<String>);

/// Wraps a model instance with dirty-tracking state. `T` must be `Clone` so
/// `original` can hold an independent snapshot alongside the live value.
#[derive(Debug, Clone)]
pub struct Tracked<T> {
    current: T,
    original_map: HashMap<String, String>,
    previous_changes: HashMap<String, Change>,
    new_record: bool,
    destroyed: bool,
}

impl<T: Model + Clone> Tracked<T> {
    /// Wraps a freshly-loaded record: `original` is seeded from its own
    /// current state, so `changed?` starts `false`.
    pub fn loaded(instance: T) -> Self {
        let original_map = instance.to_map();
        Self { current: instance, original_map, previous_changes: HashMap::new(), new_record: false, destroyed: false }
    }

    /// Wraps a new, unsaved record.
    pub fn new_record(instance: T) -> Self {
        Self {
            original_map: HashMap::new(),
            current: instance,
            previous_changes: HashMap::new(),
            new_record: true,
            destroyed: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.current
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.current
    }

    pub fn into_inner(self) -> T {
        self.current
    }

    pub fn is_new_record(&self) -> bool {
        self.new_record
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// `changed_attributes[name] = (orig, current)` for every attribute
    /// whose current value differs from the snapshot.
    pub fn changed_attributes(&self) -> HashMap<String, Change> {
        let current_map = self.current.to_map();
        let mut changes = HashMap::new();
        for (key, current_value) in &current_map {
            let orig = self.original_map.get(key).cloned();
            if orig.as_deref() != Some(current_value.as_str()) {
                changes.insert(key.clone(), (orig, Some(current_value.clone())));
            }
        }
        for (key, orig_value) in &self.original_map {
            if !current_map.contains_key(key) {
                changes.insert(key.clone(), (Some(orig_value.clone()), None));
            }
        }
        changes
    }

    pub fn is_changed(&self) -> bool {
        !self.changed_attributes().is_empty()
    }

    /// `true` if `attr` differs between `original` and `current`.
    pub fn attribute_changed(&self, attr: &str) -> bool {
        self.changed_attributes().contains_key(attr)
    }

    /// The value `attr` held in `original`, or `None` if unset/unchanged
    /// data is irrelevant — mirrors `<name>_was`.
    pub fn attribute_was(&self, attr: &str) -> Option<String> {
        self.original_map.get(attr).cloned()
    }

    /// `(old, new)` for `attr`, or `None` if unchanged — mirrors `<name>_change`.
    pub fn attribute_change(&self, attr: &str) -> Option<Change> {
        self.changed_attributes().remove(attr)
    }

    /// Snapshot taken after the last successful save.
    pub fn previous_changes(&self) -> &HashMap<String, Change> {
        &self.previous_changes
    }

    /// Commits `current` as the new `original`, archives the delta into
    /// `previous_changes`, and clears `changed_attributes` — called after a
    /// successful insert or update.
    pub fn mark_saved(&mut self) {
        let changes = self.changed_attributes();
        self.previous_changes = changes;
        self.original_map = self.current.to_map();
        self.new_record = false;
    }

    /// Reverts `current`'s change tracking by discarding any delta —
    /// used by `restore_attributes`. Note this only resets the *tracked*
    /// view; the caller is responsible for mutating `current` itself back
    /// to the original values if a true revert of field values is desired.
    pub fn restore_attributes(&mut self) {
        self.previous_changes.clear();
    }

    pub fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    #[derive(Clone)]
    struct Account {
        id: i32,
        name: String,
    }

    impl Model for Account {
        fn table_name() -> &'static str {
            "account"
        }
        fn columns() -> Vec<crate::model::ColumnInfo> {
            vec![]
        }
        fn active_columns() -> Vec<&'static str> {
            vec!["id", "name"]
        }
        fn to_map(&self) -> Map<String, String> {
            let mut m = Map::new();
            m.insert("id".to_string(), self.id.to_string());
            m.insert("name".to_string(), self.name.clone());
            m
        }
    }

    #[test]
    fn loaded_record_starts_clean() {
        let tracked = Tracked::loaded(Account { id: 1, name: "A".to_string() });
        assert!(!tracked.is_changed());
        assert!(tracked.previous_changes().is_empty());
    }

    #[test]
    fn mutating_then_reverting_clears_the_change() {
        let mut tracked = Tracked::loaded(Account { id: 1, name: "A".to_string() });
        tracked.get_mut().name = "B".to_string();
        assert!(tracked.is_changed());
        tracked.get_mut().name = "A".to_string();
        assert!(!tracked.is_changed());
    }

    #[test]
    fn save_archives_previous_changes_and_resets_original() {
        let mut tracked = Tracked::loaded(Account { id: 1, name: "A".to_string() });
        tracked.get_mut().name = "B".to_string();
        tracked.mark_saved();
        assert!(!tracked.is_changed());
        assert_eq!(tracked.previous_changes().get("name"), Some(&(Some("A".to_string()), Some("B".to_string()))));
    }
}
