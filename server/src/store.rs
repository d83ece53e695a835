//! In-memory record store: owns the worker set, identifier generation and
//! the collection version counter. Pure data structure, no I/O.

use chrono::{DateTime, Utc};
use shared::{Worker, WorkerDraft};
use std::collections::HashMap;

use crate::error::{Result, ServerError};

/// The worker collection keyed by identifier.
///
/// Identifiers are positive, store-generated and never reused; creation
/// timestamps are stamped exactly once, at insertion. Every successful
/// mutation bumps `version`, which the transport layer uses to decide
/// whether a client already holds the current snapshot.
pub struct Store {
    records: HashMap<u64, Worker>,
    next_id: u64,
    capacity: u64,
    version: u64,
    // Timestamps handed out so far never exceed this, keeping creation
    // times non-decreasing in insertion order even if the clock steps back.
    last_stamp: DateTime<Utc>,
    initialized_at: DateTime<Utc>,
}

impl Store {
    pub fn new(capacity: u64) -> Self {
        let now = Utc::now();
        Store {
            records: HashMap::new(),
            next_id: 1,
            capacity,
            version: 0,
            last_stamp: now,
            initialized_at: now,
        }
    }

    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now().max(self.last_stamp);
        self.last_stamp = now;
        now
    }

    /// Assigns the next unused identifier, stamps the creation time and
    /// adds the record. Fails without mutating when the identifier space
    /// is exhausted.
    pub fn insert(&mut self, draft: WorkerDraft) -> Result<u64> {
        if self.next_id > self.capacity {
            return Err(ServerError::Capacity(format!(
                "identifier space exhausted at {}",
                self.capacity
            )));
        }
        let id = self.next_id;
        self.next_id += 1;
        let created_at = self.stamp();
        self.records.insert(id, Worker::from_draft(id, created_at, draft));
        self.version += 1;
        Ok(id)
    }

    /// Removes the record if present. Absent ids are a no-op returning false.
    pub fn remove(&mut self, id: u64) -> bool {
        if self.records.remove(&id).is_some() {
            self.version += 1;
            true
        } else {
            false
        }
    }

    /// Remove-then-insert with a fixed id: the original identifier and
    /// creation timestamp are preserved, re-stamping is suppressed.
    pub fn replace(&mut self, id: u64, draft: WorkerDraft) -> bool {
        let created_at = match self.records.get(&id) {
            Some(existing) => existing.created_at,
            None => return false,
        };
        self.records.insert(id, Worker::from_draft(id, created_at, draft));
        self.version += 1;
        true
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.version += 1;
    }

    pub fn contains(&self, id: u64) -> bool {
        self.records.contains_key(&id)
    }

    pub fn get(&self, id: u64) -> Option<&Worker> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Defensive copy of the current record set, in arbitrary order.
    pub fn all(&self) -> Vec<Worker> {
        self.records.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Worker> {
        self.records.values()
    }

    /// Replaces the working set from a persistence snapshot. Ids and
    /// timestamps come from storage, not fresh generation; id generation
    /// resumes above the highest loaded id.
    pub fn bulk_load(&mut self, records: Vec<Worker>) {
        self.records = records.into_iter().map(|w| (w.id, w)).collect();
        self.next_id = self.records.keys().max().copied().unwrap_or(0) + 1;
        if let Some(max_stamp) = self.records.values().map(|w| w.created_at).max() {
            self.last_stamp = self.last_stamp.max(max_stamp);
        }
        self.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn initialized_at(&self) -> DateTime<Utc> {
        self.initialized_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Coordinates, Organization, Position, Status};

    fn draft(name: &str, salary: f64) -> WorkerDraft {
        WorkerDraft {
            name: name.to_string(),
            coordinates: Coordinates { x: 0.0, y: 0.0 },
            salary,
            end_date: None,
            position: Position::Laborer,
            status: Status::Hired,
            organization: Organization {
                name: "Acme".to_string(),
                org_type: None,
                annual_turnover: None,
                address: None,
            },
        }
    }

    #[test]
    fn test_insert_assigns_distinct_increasing_ids() {
        let mut store = Store::new(u64::MAX);
        let a = store.insert(draft("a", 100.0)).unwrap();
        let b = store.insert(draft("b", 200.0)).unwrap();
        let c = store.insert(draft("c", 300.0)).unwrap();

        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_timestamps_non_decreasing_in_insertion_order() {
        let mut store = Store::new(u64::MAX);
        let mut stamps = Vec::new();
        for i in 0..20 {
            let id = store.insert(draft(&format!("w{}", i), 100.0)).unwrap();
            stamps.push(store.get(id).unwrap().created_at);
        }
        for pair in stamps.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_capacity_exhaustion_fails_without_mutation() {
        let mut store = Store::new(2);
        store.insert(draft("a", 100.0)).unwrap();
        store.insert(draft("b", 100.0)).unwrap();

        let err = store.insert(draft("c", 100.0)).unwrap_err();
        assert!(matches!(err, ServerError::Capacity(_)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut store = Store::new(u64::MAX);
        let before = store.version();
        assert!(!store.remove(99));
        assert_eq!(store.version(), before);
    }

    #[test]
    fn test_replace_preserves_id_and_creation_time() {
        let mut store = Store::new(u64::MAX);
        let id = store.insert(draft("old", 100.0)).unwrap();
        let created_at = store.get(id).unwrap().created_at;

        assert!(store.replace(id, draft("new", 555.0)));

        let replaced = store.get(id).unwrap();
        assert_eq!(replaced.id, id);
        assert_eq!(replaced.created_at, created_at);
        assert_eq!(replaced.name, "new");
        assert!(!store.replace(99, draft("ghost", 1.0)));
    }

    #[test]
    fn test_ids_not_reused_after_removal() {
        let mut store = Store::new(u64::MAX);
        let a = store.insert(draft("a", 100.0)).unwrap();
        store.remove(a);
        let b = store.insert(draft("b", 100.0)).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut store = Store::new(u64::MAX);
        store.insert(draft("a", 100.0)).unwrap();
        store.insert(draft("b", 100.0)).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert!(store.all().is_empty());
    }

    #[test]
    fn test_bulk_load_resumes_id_generation() {
        let mut store = Store::new(u64::MAX);
        store.insert(draft("seed", 100.0)).unwrap();
        let snapshot = {
            let mut other = Store::new(u64::MAX);
            other.insert(draft("a", 100.0)).unwrap();
            other.insert(draft("b", 200.0)).unwrap();
            other.insert(draft("c", 300.0)).unwrap();
            other.all()
        };

        store.bulk_load(snapshot.clone());
        assert_eq!(store.len(), 3);

        let next = store.insert(draft("d", 400.0)).unwrap();
        assert_eq!(next, 4);

        // Loaded records keep their ids and timestamps verbatim
        for worker in snapshot {
            let loaded = store.get(worker.id).unwrap();
            assert_eq!(loaded, &worker);
        }
    }

    #[test]
    fn test_version_bumps_on_mutation_only() {
        let mut store = Store::new(u64::MAX);
        let v0 = store.version();
        let id = store.insert(draft("a", 100.0)).unwrap();
        let v1 = store.version();
        assert!(v1 > v0);

        store.all();
        assert!(store.contains(id));
        assert_eq!(store.version(), v1);

        store.remove(id);
        assert!(store.version() > v1);
    }
}
