//! Command surface over the record store.
//!
//! Wraps the store in an exclusive-write / shared-read lock so concurrently
//! dispatched requests never observe a torn record set. Every mutating
//! operation is atomic under the write lock; no partial mutation is ever
//! reported as success.

use shared::{display_order, salary_order, Status, Worker, WorkerDraft};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, ServerError};
use crate::store::Store;

#[derive(Clone)]
pub struct Interaction {
    store: Arc<RwLock<Store>>,
}

impl Interaction {
    pub fn new(store: Store) -> Self {
        Interaction {
            store: Arc::new(RwLock::new(store)),
        }
    }

    /// One formatted line per record, sorted by coordinates then id so the
    /// output order is reproducible.
    pub async fn show(&self) -> String {
        let store = self.store.read().await;
        let mut workers = store.all();
        workers.sort_by(display_order);
        workers
            .iter()
            .map(Worker::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn info(&self) -> String {
        let store = self.store.read().await;
        format!(
            "collection type: HashMap<u64, Worker>\nsize: {}\ninitialized: {}",
            store.len(),
            store.initialized_at().to_rfc3339()
        )
    }

    pub async fn add(&self, draft: WorkerDraft) -> Result<u64> {
        draft.validate().map_err(ServerError::Validation)?;
        let mut store = self.store.write().await;
        store.insert(draft)
    }

    /// Replaces the record in place, preserving the original id no matter
    /// what the payload claimed. Fails with `NotFound` when absent.
    pub async fn update(&self, id: u64, draft: WorkerDraft) -> Result<()> {
        draft.validate().map_err(ServerError::Validation)?;
        let mut store = self.store.write().await;
        if store.replace(id, draft) {
            Ok(())
        } else {
            Err(ServerError::NotFound(id))
        }
    }

    pub async fn remove_by_id(&self, id: u64) -> bool {
        let mut store = self.store.write().await;
        store.remove(id)
    }

    pub async fn clear(&self) {
        let mut store = self.store.write().await;
        store.clear();
    }

    /// Inserts only when the salary is strictly below the current minimum.
    /// An empty collection accepts the record: it is vacuously minimal.
    /// Returns the new id, or None when nothing was added.
    pub async fn add_if_min(&self, draft: WorkerDraft) -> Result<Option<u64>> {
        draft.validate().map_err(ServerError::Validation)?;
        let mut store = self.store.write().await;
        let minimum = store
            .iter()
            .map(|w| w.salary)
            .min_by(|a, b| a.total_cmp(b));
        match minimum {
            Some(min) if draft.salary.total_cmp(&min).is_lt() => store.insert(draft).map(Some),
            Some(_) => Ok(None),
            None => store.insert(draft).map(Some),
        }
    }

    /// Removes every record with salary strictly greater than the reference
    /// payload's; records with equal salary stay. Operates on a salary-sorted
    /// snapshot so duplicate salaries are processed deterministically.
    pub async fn remove_greater(&self, reference: &WorkerDraft) -> Vec<u64> {
        self.remove_by_salary(reference, std::cmp::Ordering::Greater)
            .await
    }

    /// Counterpart of `remove_greater` for strictly lower salaries.
    pub async fn remove_lower(&self, reference: &WorkerDraft) -> Vec<u64> {
        self.remove_by_salary(reference, std::cmp::Ordering::Less)
            .await
    }

    async fn remove_by_salary(
        &self,
        reference: &WorkerDraft,
        which: std::cmp::Ordering,
    ) -> Vec<u64> {
        let mut store = self.store.write().await;
        let mut sorted = store.all();
        sorted.sort_by(salary_order);
        let ids: Vec<u64> = sorted
            .iter()
            .filter(|w| w.salary.total_cmp(&reference.salary) == which)
            .map(|w| w.id)
            .collect();
        for id in &ids {
            store.remove(*id);
        }
        ids
    }

    pub async fn count_by_status(&self, status: Status) -> usize {
        let store = self.store.read().await;
        store.iter().filter(|w| w.status == status).count()
    }

    /// Formatted lines sorted strictly by salary ascending.
    pub async fn print_ascending(&self) -> String {
        let store = self.store.read().await;
        let mut workers = store.all();
        workers.sort_by(salary_order);
        workers
            .iter()
            .map(Worker::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Distinct organization names in first-seen order over one iteration
    /// of the collection. Callers may not rely on any order beyond being
    /// stable within a single call.
    pub async fn unique_organizations(&self) -> Vec<String> {
        let store = self.store.read().await;
        let mut names: Vec<String> = Vec::new();
        for worker in store.iter() {
            if !names.contains(&worker.organization.name) {
                names.push(worker.organization.name.clone());
            }
        }
        names
    }

    pub async fn find_by_id(&self, id: u64) -> bool {
        let store = self.store.read().await;
        store.contains(id)
    }

    pub async fn size(&self) -> usize {
        let store = self.store.read().await;
        store.len()
    }

    pub async fn version(&self) -> u64 {
        let store = self.store.read().await;
        store.version()
    }

    /// Defensive copy of the collection together with the version it
    /// corresponds to, read under a single lock acquisition.
    pub async fn versioned_snapshot(&self) -> (u64, Vec<Worker>) {
        let store = self.store.read().await;
        (store.version(), store.all())
    }

    pub async fn snapshot(&self) -> Vec<Worker> {
        let store = self.store.read().await;
        store.all()
    }

    pub async fn bulk_load(&self, records: Vec<Worker>) {
        let mut store = self.store.write().await;
        store.bulk_load(records);
    }
}
