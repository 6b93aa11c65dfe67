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

//! Best-effort event bus for status notifications.
//!
//! Publishing never blocks a worker: when the buffer is full, or nobody holds
//! the receiver any more, the event is dropped. Subscribers that need the
//! authoritative state read the job store.

use crate::database::universal_types::UniversalUuid;
use crate::models::job::Job;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JobUpdate,
    StateChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::JobUpdate => "job_update",
            EventType::StateChange => "state_change",
        }
    }
}

/// One notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub job_id: Option<UniversalUuid>,
    pub target: String,
    pub payload: serde_json::Value,
    /// Unix seconds.
    pub timestamp: i64,
}

impl Event {
    /// Snapshot of a job's status after a transition.
    pub fn job_update(job: &Job) -> Self {
        Self {
            event_type: EventType::JobUpdate,
            job_id: Some(job.id),
            target: job.target.clone(),
            payload: json!({
                "job_type": job.job_type.as_str(),
                "status": job.status.as_str(),
                "error": job.error,
                "attempt_count": job.attempt_count,
            }),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// An instance's power state changed.
    pub fn state_change(job_id: Option<UniversalUuid>, target: &str, status: &str) -> Self {
        Self {
            event_type: EventType::StateChange,
            job_id,
            target: target.to_string(),
            payload: json!({ "status": status }),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

pub struct EventBus {
    sender: mpsc::Sender<Event>,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
    dropped: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues an event without waiting. Returns whether it was accepted.
    pub fn publish(&self, event: Event) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping event: {}", e);
                false
            }
        }
    }

    /// Hands out the receiving end. Only the first caller gets it.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<Event>> {
        self.receiver.lock().take()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
