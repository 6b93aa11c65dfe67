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

//! Job execution: per-target locks, retry policy, the single-job executor
//! and the worker pool that drives it.

pub mod job_executor;
pub mod retry;
pub mod target_lock;
pub mod worker_pool;

pub use job_executor::{ExecutorSettings, JobExecutor, JobTimeouts, ProcessOutcome};
pub use retry::RetryPolicy;
pub use target_lock::{TargetLockGuard, TargetLockManager};
pub use worker_pool::WorkerPool;
