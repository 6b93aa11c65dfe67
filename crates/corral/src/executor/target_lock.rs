/*
 *  Copyright 2025-2026 Corral Maintainers
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Per-target exclusive locks.
//!
//! At most one job runs against a given instance at a time. Locks are never
//! waited on: a worker that finds its target busy re-dispatches the job
//! later and moves on, so a slow job cannot pin the whole pool.
//!
//! The table is sharded by target hash to keep unrelated targets off the
//! same mutex.

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const SHARD_COUNT: usize = 16;

struct LockTable {
    shards: Vec<Mutex<HashSet<String>>>,
}

impl LockTable {
    fn shard(&self, target: &str) -> &Mutex<HashSet<String>> {
        let mut hasher = DefaultHasher::new();
        target.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }
}

#[derive(Clone)]
pub struct TargetLockManager {
    table: Arc<LockTable>,
}

impl std::fmt::Debug for TargetLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetLockManager")
            .field("held", &self.held_count())
            .finish()
    }
}

impl Default for TargetLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetLockManager {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(HashSet::new())).collect();
        Self {
            table: Arc::new(LockTable { shards }),
        }
    }

    /// Takes the lock for `target` if nobody holds it.
    pub fn try_acquire(&self, target: &str) -> Option<TargetLockGuard> {
        let acquired = self.table.shard(target).lock().insert(target.to_string());
        acquired.then(|| TargetLockGuard {
            target: Some(target.to_string()),
            table: self.table.clone(),
        })
    }

    pub fn is_locked(&self, target: &str) -> bool {
        self.table.shard(target).lock().contains(target)
    }

    pub fn held_count(&self) -> usize {
        self.table.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Snapshot of every target currently locked.
    pub fn held_targets(&self) -> Vec<String> {
        self.table
            .shards
            .iter()
            .flat_map(|s| s.lock().iter().cloned().collect::<Vec<_>>())
            .collect()
    }
}

/// Holds a target lock until released or dropped.
pub struct TargetLockGuard {
    target: Option<String>,
    table: Arc<LockTable>,
}

impl TargetLockGuard {
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Releases the lock early. Returns `false` if it was already released.
    pub fn release(&mut self) -> bool {
        match self.target.take() {
            Some(target) => {
                self.table.shard(&target).lock().remove(&target);
                true
            }
            None => false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.target.is_some()
    }
}

impl Drop for TargetLockGuard {
    fn drop(&mut self) {
        self.release();
    }
}
