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

//! # Corral
//!
//! A single-host control plane for OS-level containers. Lifecycle requests
//! become durably tracked jobs that a pool of workers executes against a
//! pluggable [`RuntimeProvider`], while two shared resources are guarded:
//! aggregate compute capacity ([`quota`]) and a finite pool of IPv4
//! addresses ([`ipam`]).
//!
//! ## Lifecycle of a request
//!
//! 1. [`admission::JobAdmission`] validates the request and, for creates,
//!    checks the global CPU and memory ceiling.
//! 2. The job is persisted as `PENDING` and its id is handed to the
//!    [`dispatcher::Dispatcher`].
//! 3. A worker claims the per-target lock, marks the job `IN_PROGRESS` and
//!    calls the provider with retry and a per-type timeout.
//! 4. The job ends `COMPLETED` or `FAILED`; every transition is published on
//!    the [`events::EventBus`].
//!
//! Jobs touching the same instance never overlap. Jobs stuck `IN_PROGRESS`
//! after a crash are returned to `PENDING` by the [`maintenance`] sweep.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use corral::{ControlPlane, ControlPlaneConfig, JobRequest};
//! use corral::models::job::CreateInstanceSpec;
//!
//! let config = ControlPlaneConfig::builder()
//!     .database_url("/var/lib/corral/corral.db")
//!     .build();
//! let control_plane = ControlPlane::builder()
//!     .with_config(config)
//!     .provider(provider)
//!     .build()
//!     .await?;
//!
//! let job = control_plane
//!     .submit(JobRequest::create_instance(
//!         CreateInstanceSpec::new("web-1", "ubuntu/24.04").with_limit("limits.cpu", "2"),
//!     ))
//!     .await?;
//! ```

pub mod admission;
pub mod config;
pub mod control_plane;
pub mod dal;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executor;
pub mod ipam;
pub mod limits;
pub mod logging;
pub mod maintenance;
pub mod models;
pub mod provider;
pub mod quota;
pub mod sync;
pub mod tier;

pub use admission::{JobAdmission, JobRequest};
pub use config::{ControlPlaneConfig, ControlPlaneConfigBuilder};
pub use control_plane::{ControlPlane, ControlPlaneBuilder};
pub use dal::DAL;
pub use database::universal_types::{UniversalTimestamp, UniversalUuid};
pub use database::Database;
pub use error::{
    AdmissionError, ConfigError, ControlPlaneError, DatabaseError, ExecutorError, IpamError,
    ProviderError, SyncError,
};
pub use events::{Event, EventBus, EventType};
pub use ipam::IpPoolManager;
pub use logging::init_logging;
pub use provider::RuntimeProvider;
pub use tier::Tier;
