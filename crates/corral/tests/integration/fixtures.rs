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

//! Shared test fixtures: a fresh SQLite database per test and an in-memory
//! runtime provider that records every call.

#![allow(dead_code)]

use async_trait::async_trait;
use corral::dal::DAL;
use corral::database::Database;
use corral::error::ProviderError;
use corral::models::job::{CreateInstanceSpec, Job, PortMapping, StateAction};
use corral::models::network::NewNetwork;
use corral::provider::{
    AddressFamily, FileEntry, InstanceState, InterfaceAddress, NetworkAssignment,
    ProviderInstance, RuntimeProvider, Snapshot, PRIMARY_INTERFACE,
};
use corral::{IpPoolManager, UniversalTimestamp, UniversalUuid};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

static INIT: Once = Once::new();

/// A migrated database in its own temporary directory.
///
/// The directory lives as long as the fixture.
pub struct TestFixture {
    _dir: TempDir,
    database: Database,
}

impl TestFixture {
    pub async fn new() -> Self {
        INIT.call_once(|| corral::init_logging(None));

        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("corral.db");
        let url = path.to_str().expect("temp path is not UTF-8").to_string();
        let database = Database::try_new(&url).expect("failed to open database");
        database
            .run_migrations()
            .await
            .expect("failed to run migrations");

        Self {
            _dir: dir,
            database,
        }
    }

    pub fn database(&self) -> Database {
        self.database.clone()
    }

    pub fn dal(&self) -> DAL {
        DAL::new(self.database.clone())
    }

    /// Registers a private pool and returns the manager for it.
    pub async fn ipam_with_pool(&self, cidr: &str, gateway: &str) -> IpPoolManager {
        let ipam = IpPoolManager::new(self.dal(), corral::tier::PoolPolicy::Any);
        ipam.create_network(NewNetwork::new("default", cidr, gateway))
            .await
            .expect("failed to create pool");
        ipam
    }
}

#[derive(Debug, Clone)]
struct MockInstance {
    status: String,
    instance_type: String,
    config: BTreeMap<String, String>,
    addresses: Vec<InterfaceAddress>,
    snapshots: Vec<String>,
    ports: Vec<PortMapping>,
}

/// In-memory runtime.
///
/// Every call is recorded as `"<operation>:<instance>"`. Calls sleep for
/// the configured delay while counted as in flight for their instance, so
/// tests can detect two calls overlapping on the same target.
#[derive(Default)]
pub struct MockProvider {
    instances: Mutex<BTreeMap<String, MockInstance>>,
    calls: Mutex<Vec<String>>,
    in_flight: Mutex<HashMap<String, usize>>,
    overlapped: AtomicBool,
    max_concurrent: AtomicUsize,
    total_in_flight: AtomicUsize,
    delay: Mutex<Duration>,
    transient_failures: AtomicU32,
    fatal: AtomicBool,
    panic_on_call: AtomicBool,
    fail_state_queries: AtomicBool,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let provider = Self::default();
        *provider.delay.lock() = delay;
        Arc::new(provider)
    }

    /// The next `count` mutating calls fail with a transient error.
    pub fn fail_transiently(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Every mutating call fails fatally.
    pub fn fail_fatally(&self) {
        self.fatal.store(true, Ordering::SeqCst);
    }

    pub fn panic_on_call(&self) {
        self.panic_on_call.store(true, Ordering::SeqCst);
    }

    pub fn fail_state_queries(&self) {
        self.fail_state_queries.store(true, Ordering::SeqCst);
    }

    /// Adds an instance directly, as if created outside the control plane.
    pub fn seed_instance(&self, name: &str, status: &str, limits: &[(&str, &str)], ipv4: Option<&str>) {
        let config = limits
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let addresses = ipv4
            .map(|address| {
                vec![InterfaceAddress {
                    interface: PRIMARY_INTERFACE.to_string(),
                    family: AddressFamily::Inet,
                    address: address.to_string(),
                }]
            })
            .unwrap_or_default();
        self.instances.lock().insert(
            name.to_string(),
            MockInstance {
                status: status.to_string(),
                instance_type: "container".to_string(),
                config,
                addresses,
                snapshots: Vec::new(),
                ports: Vec::new(),
            },
        );
    }

    pub fn seed_snapshot(&self, name: &str, snapshot: &str) {
        if let Some(instance) = self.instances.lock().get_mut(name) {
            instance.snapshots.push(snapshot.to_string());
        }
    }

    pub fn seed_port(&self, name: &str, mapping: PortMapping) {
        if let Some(instance) = self.instances.lock().get_mut(name) {
            instance.ports.push(mapping);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn has_instance(&self, name: &str) -> bool {
        self.instances.lock().contains_key(name)
    }

    pub fn status_of(&self, name: &str) -> Option<String> {
        self.instances.lock().get(name).map(|i| i.status.clone())
    }

    pub fn snapshots_of(&self, name: &str) -> Vec<String> {
        self.instances
            .lock()
            .get(name)
            .map(|i| i.snapshots.clone())
            .unwrap_or_default()
    }

    pub fn config_of(&self, name: &str) -> BTreeMap<String, String> {
        self.instances
            .lock()
            .get(name)
            .map(|i| i.config.clone())
            .unwrap_or_default()
    }

    /// True if two calls ever ran at the same time against one instance.
    pub fn saw_overlap(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    /// Highest number of calls in flight at once across all instances.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Records the call and simulates runtime latency and failures.
    async fn enter(&self, operation: &str, name: &str) -> Result<(), ProviderError> {
        self.calls.lock().push(format!("{}:{}", operation, name));

        {
            let mut in_flight = self.in_flight.lock();
            let count = in_flight.entry(name.to_string()).or_insert(0);
            *count += 1;
            if *count > 1 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
        }
        let total = self.total_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(total, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.total_in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.in_flight.lock().get_mut(name) {
            *count -= 1;
        }

        if self.panic_on_call.load(Ordering::SeqCst) {
            panic!("runtime exploded");
        }
        if self.fatal.load(Ordering::SeqCst) {
            return Err(ProviderError::Fatal("runtime refused the operation".into()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Transient("runtime busy".into()));
        }
        Ok(())
    }

    fn with_instance<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut MockInstance) -> T,
    ) -> Result<T, ProviderError> {
        self.instances
            .lock()
            .get_mut(name)
            .map(f)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }
}

#[async_trait]
impl RuntimeProvider for MockProvider {
    async fn list_instances(&self) -> Result<Vec<ProviderInstance>, ProviderError> {
        Ok(self
            .instances
            .lock()
            .iter()
            .map(|(name, instance)| ProviderInstance {
                name: name.clone(),
                status: instance.status.clone(),
                instance_type: instance.instance_type.clone(),
                config: instance.config.clone(),
            })
            .collect())
    }

    async fn get_state(&self, name: &str) -> Result<InstanceState, ProviderError> {
        if self.fail_state_queries.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("state endpoint unavailable".into()));
        }
        self.with_instance(name, |instance| InstanceState {
            status: instance.status.clone(),
            addresses: instance.addresses.clone(),
        })
    }

    async fn create_instance(
        &self,
        spec: &CreateInstanceSpec,
        network: Option<&NetworkAssignment>,
    ) -> Result<(), ProviderError> {
        self.enter("create", &spec.name).await?;

        let mut config = spec.limits.clone();
        config.insert("volatile.base_image".to_string(), spec.image.clone());
        let addresses = network
            .map(|assignment| {
                vec![InterfaceAddress {
                    interface: PRIMARY_INTERFACE.to_string(),
                    family: AddressFamily::Inet,
                    address: assignment.address.clone(),
                }]
            })
            .unwrap_or_default();

        self.instances.lock().insert(
            spec.name.clone(),
            MockInstance {
                status: "Running".to_string(),
                instance_type: spec.instance_type.clone(),
                config,
                addresses,
                snapshots: Vec::new(),
                ports: Vec::new(),
            },
        );
        Ok(())
    }

    async fn delete_instance(&self, name: &str) -> Result<(), ProviderError> {
        self.enter("delete", name).await?;
        self.instances
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn change_state(&self, name: &str, action: StateAction) -> Result<(), ProviderError> {
        self.enter(action.as_str(), name).await?;
        let status = match action {
            StateAction::Start | StateAction::Restart | StateAction::Unfreeze => "Running",
            StateAction::Stop => "Stopped",
            StateAction::Freeze => "Frozen",
        };
        self.with_instance(name, |instance| instance.status = status.to_string())
    }

    async fn update_limits(
        &self,
        name: &str,
        limits: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        self.enter("update_limits", name).await?;
        self.with_instance(name, |instance| {
            instance
                .config
                .extend(limits.iter().map(|(k, v)| (k.clone(), v.clone())))
        })
    }

    async fn list_snapshots(&self, name: &str) -> Result<Vec<Snapshot>, ProviderError> {
        self.with_instance(name, |instance| {
            instance
                .snapshots
                .iter()
                .map(|snapshot| Snapshot {
                    name: snapshot.clone(),
                    created_at: None,
                })
                .collect()
        })
    }

    async fn create_snapshot(&self, name: &str, snapshot: &str) -> Result<(), ProviderError> {
        self.enter("create_snapshot", name).await?;
        self.with_instance(name, |instance| instance.snapshots.push(snapshot.to_string()))
    }

    async fn restore_snapshot(&self, name: &str, snapshot: &str) -> Result<(), ProviderError> {
        self.enter("restore_snapshot", name).await?;
        let found = self.with_instance(name, |instance| {
            instance.snapshots.iter().any(|s| s == snapshot)
        })?;
        if found {
            Ok(())
        } else {
            Err(ProviderError::NotFound(format!("{}/{}", name, snapshot)))
        }
    }

    async fn delete_snapshot(&self, name: &str, snapshot: &str) -> Result<(), ProviderError> {
        self.enter("delete_snapshot", name).await?;
        self.with_instance(name, |instance| instance.snapshots.retain(|s| s != snapshot))
    }

    async fn list_ports(&self, name: &str) -> Result<Vec<PortMapping>, ProviderError> {
        self.with_instance(name, |instance| instance.ports.clone())
    }

    async fn add_port(&self, name: &str, mapping: &PortMapping) -> Result<(), ProviderError> {
        self.enter("add_port", name).await?;
        self.with_instance(name, |instance| instance.ports.push(mapping.clone()))
    }

    async fn remove_port(&self, name: &str, host_port: u16) -> Result<(), ProviderError> {
        self.enter("remove_port", name).await?;
        self.with_instance(name, |instance| {
            instance.ports.retain(|p| p.host_port != host_port)
        })
    }

    async fn list_files(&self, name: &str, path: &str) -> Result<Vec<FileEntry>, ProviderError> {
        self.with_instance(name, |_| {
            vec![FileEntry {
                name: "hosts".to_string(),
                path: format!("{}/hosts", path.trim_end_matches('/')),
                is_dir: false,
                size: 128,
            }]
        })
    }

    async fn delete_file(&self, name: &str, _path: &str) -> Result<(), ProviderError> {
        self.enter("delete_file", name).await?;
        self.with_instance(name, |_| ())
    }
}

/// Moves a job's `started_at` into the past.
pub async fn backdate_started(fixture: &TestFixture, job_id: UniversalUuid, age: Duration) {
    use corral::database::schema::jobs;
    use diesel::prelude::*;

    let started = UniversalTimestamp::ago(age).to_naive();
    let id = job_id.to_string();
    let conn = fixture.database().get_connection().await.unwrap();
    conn.interact(move |conn| {
        diesel::update(jobs::table.find(id))
            .set(jobs::started_at.eq(Some(started)))
            .execute(conn)
    })
    .await
    .unwrap()
    .unwrap();
}

/// Overwrites an instance's stored limits with text that is not a JSON map.
pub async fn corrupt_instance_limits(fixture: &TestFixture, name: &str) {
    use corral::database::schema::instances;
    use diesel::prelude::*;

    let name = name.to_string();
    let conn = fixture.database().get_connection().await.unwrap();
    conn.interact(move |conn| {
        diesel::update(instances::table.find(name))
            .set(instances::limits.eq("not a map"))
            .execute(conn)
    })
    .await
    .unwrap()
    .unwrap();
}

/// Moves a job's `finished_at` into the past.
pub async fn backdate_finished(fixture: &TestFixture, job_id: UniversalUuid, age: Duration) {
    use corral::database::schema::jobs;
    use diesel::prelude::*;

    let finished = UniversalTimestamp::ago(age).to_naive();
    let id = job_id.to_string();
    let conn = fixture.database().get_connection().await.unwrap();
    conn.interact(move |conn| {
        diesel::update(jobs::table.find(id))
            .set(jobs::finished_at.eq(Some(finished)))
            .execute(conn)
    })
    .await
    .unwrap()
    .unwrap();
}

/// Polls the job until it reaches a terminal status.
pub async fn wait_for_terminal(dal: &DAL, job_id: UniversalUuid, within: Duration) -> Job {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let job = dal.job().get(job_id).await.unwrap().expect("job disappeared");
        if job.status.is_terminal() {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {} still {} after {:?}", job_id, job.status, within);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Overwrites a job's attempt counter.
pub async fn set_attempt_count(fixture: &TestFixture, job_id: UniversalUuid, attempts: i32) {
    use corral::database::schema::jobs;
    use diesel::prelude::*;

    let id = job_id.to_string();
    let conn = fixture.database().get_connection().await.unwrap();
    conn.interact(move |conn| {
        diesel::update(jobs::table.find(id))
            .set(jobs::attempt_count.eq(attempts))
            .execute(conn)
    })
    .await
    .unwrap()
    .unwrap();
}
