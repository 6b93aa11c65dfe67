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

use crate::fixtures::{set_attempt_count, wait_for_terminal, MockProvider, TestFixture};
use corral::dal::DAL;
use corral::dispatcher::Dispatcher;
use corral::events::{EventBus, EventType};
use corral::maintenance::{MaintenanceScheduler, MaintenanceSettings};
use corral::executor::{
    ExecutorSettings, JobExecutor, JobTimeouts, ProcessOutcome, RetryPolicy, WorkerPool,
};
use corral::models::instance::{BackupPolicy, NewInstance, KEY_CPU, KEY_IPV4};
use corral::models::job::{
    CreateInstanceSpec, Job, JobPayload, JobStatus, NewJob, PortMapping, PortProtocol,
    StateAction,
};
use corral::tier::Tier;
use corral::UniversalUuid;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

fn fast_settings() -> ExecutorSettings {
    ExecutorSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            jitter: false,
        },
        timeouts: JobTimeouts {
            long: Duration::from_secs(5),
            short: Duration::from_secs(5),
        },
        tier: Tier::Free.policy(),
    }
}

struct Harness {
    fixture: TestFixture,
    provider: Arc<MockProvider>,
    executor: JobExecutor,
    events: Arc<EventBus>,
    receiver: mpsc::Receiver<UniversalUuid>,
}

impl Harness {
    async fn new(provider: Arc<MockProvider>, settings: ExecutorSettings) -> Self {
        let fixture = TestFixture::new().await;
        let ipam = fixture.ipam_with_pool("10.0.0.0/24", "10.0.0.1").await;
        let (dispatcher, receiver) = Dispatcher::new(100, Duration::from_millis(20));
        let events = Arc::new(EventBus::new(100));
        let executor = JobExecutor::new(
            fixture.dal(),
            provider.clone(),
            ipam,
            dispatcher,
            events.clone(),
            settings,
        );
        Self {
            fixture,
            provider,
            executor,
            events,
            receiver,
        }
    }

    fn dal(&self) -> DAL {
        self.fixture.dal()
    }

    async fn enqueue(&self, target: &str, payload: JobPayload) -> Job {
        self.dal()
            .job()
            .create(NewJob::new(target, payload))
            .await
            .unwrap()
    }

    async fn run(&self, target: &str, payload: JobPayload) -> (ProcessOutcome, Job) {
        let job = self.enqueue(target, payload).await;
        let outcome = self.executor.process(job.id).await.unwrap();
        let job = self.dal().job().get(job.id).await.unwrap().unwrap();
        (outcome, job)
    }

    async fn track_instance(&self, name: &str) {
        self.dal()
            .instance()
            .create(NewInstance {
                name: name.into(),
                image: "ubuntu/24.04".into(),
                limits: BTreeMap::new(),
                user_data: None,
                instance_type: "container".into(),
                backup: BackupPolicy::default(),
            })
            .await
            .unwrap();
    }
}

fn create_payload(name: &str) -> JobPayload {
    JobPayload::CreateInstance(
        CreateInstanceSpec::new(name, "ubuntu/24.04").with_limit(KEY_CPU, "2"),
    )
}

fn state(action: StateAction) -> JobPayload {
    JobPayload::StateChange { action }
}

#[tokio::test]
async fn test_create_allocates_address_and_tracks_instance() {
    let harness = Harness::new(MockProvider::new(), fast_settings()).await;

    let (outcome, job) = harness.run("web-1", create_payload("web-1")).await;
    assert_eq!(outcome, ProcessOutcome::Completed);
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.started_at.is_some() && job.finished_at.is_some());

    assert!(harness.provider.has_instance("web-1"));
    let instance = harness.dal().instance().get("web-1").await.unwrap().unwrap();
    assert_eq!(instance.ipv4(), Some("10.0.0.2"));
    assert_eq!(instance.limits.get(KEY_CPU).map(String::as_str), Some("2"));
    assert_eq!(
        harness.dal().network().lease_for_instance("web-1").await.unwrap().unwrap().ip,
        "10.0.0.2"
    );
}

#[tokio::test]
async fn test_failed_create_releases_its_address() {
    let provider = MockProvider::new();
    provider.fail_fatally();
    let harness = Harness::new(provider, fast_settings()).await;

    let (outcome, job) = harness.run("web-1", create_payload("web-1")).await;
    assert_eq!(outcome, ProcessOutcome::Failed);
    assert!(job.error.unwrap().contains("runtime refused"));
    assert!(harness
        .dal()
        .network()
        .lease_for_instance("web-1")
        .await
        .unwrap()
        .is_none());
    assert!(!harness.dal().instance().exists("web-1").await.unwrap());
}

#[tokio::test]
async fn test_create_without_free_address_fails_before_provider_call() {
    let harness = Harness::new(MockProvider::new(), fast_settings()).await;
    let pool = harness.dal().network().list().await.unwrap().remove(0);
    harness.dal().network().delete(pool.id).await.unwrap();

    let (outcome, job) = harness.run("web-1", create_payload("web-1")).await;
    assert_eq!(outcome, ProcessOutcome::Failed);
    assert!(job.error.unwrap().contains("No IP addresses available"));
    assert_eq!(harness.provider.call_count("create:"), 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let provider = MockProvider::new();
    provider.fail_transiently(2);
    let harness = Harness::new(provider, fast_settings()).await;

    let (outcome, job) = harness.run("web-1", create_payload("web-1")).await;
    assert_eq!(outcome, ProcessOutcome::Completed);
    assert_eq!(job.attempt_count, 2);
    assert!(job.error.is_none());
    assert_eq!(harness.provider.call_count("create:web-1"), 3);
}

#[tokio::test]
async fn test_retries_stop_at_attempt_ceiling() {
    let provider = MockProvider::new();
    provider.fail_transiently(10);
    let harness = Harness::new(provider, fast_settings()).await;

    let (outcome, job) = harness.run("web-1", state(StateAction::Start)).await;
    assert_eq!(outcome, ProcessOutcome::Failed);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt_count, 2);
    assert_eq!(harness.provider.call_count("start:web-1"), 3);
    assert!(job.error.unwrap().contains("runtime busy"));
}

#[tokio::test]
async fn test_fatal_errors_are_not_retried() {
    let provider = MockProvider::new();
    provider.seed_instance("web-1", "Running", &[], None);
    provider.fail_fatally();
    let harness = Harness::new(provider, fast_settings()).await;

    let (outcome, job) = harness.run("web-1", state(StateAction::Stop)).await;
    assert_eq!(outcome, ProcessOutcome::Failed);
    assert_eq!(job.attempt_count, 0);
    assert_eq!(harness.provider.call_count("stop:web-1"), 1);
}

#[tokio::test]
async fn test_slow_provider_call_times_out() {
    let provider = MockProvider::with_delay(Duration::from_millis(500));
    provider.seed_instance("web-1", "Running", &[], None);
    let mut settings = fast_settings();
    settings.retry.max_attempts = 1;
    settings.timeouts.short = Duration::from_millis(50);
    let harness = Harness::new(provider, settings).await;

    let (outcome, job) = harness.run("web-1", state(StateAction::Stop)).await;
    assert_eq!(outcome, ProcessOutcome::Failed);
    assert!(job.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_maintenance_leaves_running_job_alone() {
    let provider = MockProvider::with_delay(Duration::from_millis(600));
    provider.seed_instance("web-1", "Stopped", &[], None);
    let harness = Harness::new(provider, fast_settings()).await;
    let job = harness.enqueue("web-1", state(StateAction::Start)).await;

    let (sweep_dispatcher, _sweep_receiver) = Dispatcher::new(10, Duration::from_millis(10));
    let settings = MaintenanceSettings {
        stale_after: Duration::from_millis(100),
        ..MaintenanceSettings::default()
    };
    let scheduler = MaintenanceScheduler::new(harness.dal(), sweep_dispatcher, settings)
        .with_locks(harness.executor.locks().clone());

    let (outcome, report) = tokio::join!(harness.executor.process(job.id), async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.run_once().await
    });

    assert_eq!(report.recovered, 0);
    assert_eq!(outcome.unwrap(), ProcessOutcome::Completed);
    let job = harness.dal().job().get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempt_count, 0);
    assert_eq!(harness.provider.call_count("start:web-1"), 1);
}

#[tokio::test]
async fn test_panicking_job_fails_and_releases_lock() {
    let provider = MockProvider::new();
    provider.seed_instance("web-1", "Running", &[], None);
    provider.panic_on_call();
    let harness = Harness::new(provider, fast_settings()).await;

    let (outcome, job) = harness.run("web-1", state(StateAction::Stop)).await;
    assert_eq!(outcome, ProcessOutcome::Failed);
    assert!(job.error.unwrap().contains("runtime exploded"));
    assert!(!harness.executor.locks().is_locked("web-1"));
    assert_eq!(harness.executor.locks().held_count(), 0);
}

#[tokio::test]
async fn test_exhausted_job_fails_without_provider_call() {
    let provider = MockProvider::new();
    provider.seed_instance("web-1", "Running", &[], None);
    let harness = Harness::new(provider, fast_settings()).await;

    let job = harness.enqueue("web-1", state(StateAction::Stop)).await;
    set_attempt_count(&harness.fixture, job.id, 3).await;

    let outcome = harness.executor.process(job.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed);
    let job = harness.dal().job().get(job.id).await.unwrap().unwrap();
    assert!(job.error.unwrap().contains("Attempt ceiling"));
    assert!(harness.provider.calls().is_empty());
}

#[tokio::test]
async fn test_non_pending_jobs_are_skipped() {
    let provider = MockProvider::new();
    provider.seed_instance("web-1", "Running", &[], None);
    let harness = Harness::new(provider, fast_settings()).await;

    let (_, job) = harness.run("web-1", state(StateAction::Stop)).await;
    assert_eq!(job.status, JobStatus::Completed);

    // A duplicate signal for a finished job does nothing.
    assert_eq!(
        harness.executor.process(job.id).await.unwrap(),
        ProcessOutcome::Skipped
    );
    assert_eq!(
        harness.executor.process(UniversalUuid::new_v4()).await.unwrap(),
        ProcessOutcome::Skipped
    );
    assert_eq!(harness.provider.call_count("stop:"), 1);
}

#[tokio::test]
async fn test_busy_target_is_requeued() {
    let mut harness = Harness::new(MockProvider::new(), fast_settings()).await;
    let job = harness.enqueue("web-1", state(StateAction::Start)).await;

    let guard = harness.executor.locks().try_acquire("web-1").unwrap();
    assert_eq!(
        harness.executor.process(job.id).await.unwrap(),
        ProcessOutcome::Requeued
    );
    let still = harness.dal().job().get(job.id).await.unwrap().unwrap();
    assert_eq!(still.status, JobStatus::Pending);
    drop(guard);

    let redispatched = tokio::time::timeout(Duration::from_secs(2), harness.receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(redispatched, job.id);
}

#[tokio::test]
async fn test_jobs_on_one_target_never_overlap() {
    let provider = MockProvider::with_delay(Duration::from_millis(25));
    provider.seed_instance("web-1", "Running", &[], None);
    provider.seed_instance("web-2", "Running", &[], None);
    let mut harness = Harness::new(provider, fast_settings()).await;

    let mut ids = Vec::new();
    for action in [
        StateAction::Stop,
        StateAction::Start,
        StateAction::Restart,
        StateAction::Freeze,
        StateAction::Unfreeze,
    ] {
        ids.push(harness.enqueue("web-1", state(action)).await.id);
        ids.push(harness.enqueue("web-2", state(action)).await.id);
    }

    // Feed the pool from a dispatcher whose queue the executor re-dispatches into.
    let (shutdown_tx, _) = broadcast::channel(1);
    let receiver = std::mem::replace(&mut harness.receiver, mpsc::channel(1).1);
    let (feeder, feed_rx) = mpsc::channel(100);
    let pool = WorkerPool::spawn(4, harness.executor.clone(), feed_rx, &shutdown_tx);

    let forward = tokio::spawn({
        let feeder = feeder.clone();
        async move {
            let mut receiver = receiver;
            while let Some(id) = receiver.recv().await {
                if feeder.send(id).await.is_err() {
                    break;
                }
            }
        }
    });
    for id in &ids {
        feeder.send(*id).await.unwrap();
    }

    for id in &ids {
        let job = wait_for_terminal(&harness.dal(), *id, Duration::from_secs(10)).await;
        assert_eq!(job.status, JobStatus::Completed, "job {:?}", job);
    }
    assert!(!harness.provider.saw_overlap());

    let _ = shutdown_tx.send(());
    pool.join().await;
    forward.abort();
}

#[tokio::test]
async fn test_delete_releases_address_and_row() {
    let harness = Harness::new(MockProvider::new(), fast_settings()).await;
    harness.run("web-1", create_payload("web-1")).await;

    let (outcome, _) = harness.run("web-1", JobPayload::DeleteInstance).await;
    assert_eq!(outcome, ProcessOutcome::Completed);
    assert!(!harness.provider.has_instance("web-1"));
    assert!(!harness.dal().instance().exists("web-1").await.unwrap());
    assert!(harness
        .dal()
        .network()
        .lease_for_instance("web-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_delete_of_missing_instance_succeeds() {
    let harness = Harness::new(MockProvider::new(), fast_settings()).await;
    let (outcome, _) = harness.run("ghost", JobPayload::DeleteInstance).await;
    assert_eq!(outcome, ProcessOutcome::Completed);
}

#[tokio::test]
async fn test_state_change_updates_status_and_publishes() {
    let provider = MockProvider::new();
    provider.seed_instance("web-1", "Running", &[], None);
    let harness = Harness::new(provider, fast_settings()).await;
    harness.track_instance("web-1").await;
    let mut events = harness.events.take_receiver().unwrap();

    let (outcome, job) = harness.run("web-1", state(StateAction::Stop)).await;
    assert_eq!(outcome, ProcessOutcome::Completed);
    assert_eq!(harness.provider.status_of("web-1").as_deref(), Some("Stopped"));
    let instance = harness.dal().instance().get("web-1").await.unwrap().unwrap();
    assert_eq!(instance.status(), Some("STOPPED"));

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    let updates: Vec<_> = received
        .iter()
        .filter(|e| e.event_type == EventType::JobUpdate)
        .collect();
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().all(|e| e.job_id == Some(job.id)));
    assert!(received
        .iter()
        .any(|e| e.event_type == EventType::StateChange && e.target == "web-1"));
}

#[tokio::test]
async fn test_update_limits_merges_into_row() {
    let provider = MockProvider::new();
    provider.seed_instance("web-1", "Running", &[], None);
    let harness = Harness::new(provider, fast_settings()).await;
    harness.track_instance("web-1").await;

    let payload = JobPayload::UpdateLimits {
        cpu: Some("4".into()),
        memory: Some("2GB".into()),
    };
    let (outcome, _) = harness.run("web-1", payload).await;
    assert_eq!(outcome, ProcessOutcome::Completed);

    let instance = harness.dal().instance().get("web-1").await.unwrap().unwrap();
    assert_eq!(instance.limits.get("limits.cpu").map(String::as_str), Some("4"));
    assert_eq!(instance.limits.get("limits.memory").map(String::as_str), Some("2GB"));
    assert_eq!(
        harness.provider.config_of("web-1").get("limits.cpu").map(String::as_str),
        Some("4")
    );
}

#[tokio::test]
async fn test_port_forward_limit_per_protocol() {
    let provider = MockProvider::new();
    provider.seed_instance("web-1", "Running", &[], None);
    for port in [8080, 8081, 8082] {
        provider.seed_port(
            "web-1",
            PortMapping {
                host_port: port,
                container_port: 80,
                protocol: PortProtocol::Tcp,
            },
        );
    }
    let harness = Harness::new(provider, fast_settings()).await;

    let tcp = JobPayload::AddPort(PortMapping {
        host_port: 8083,
        container_port: 80,
        protocol: PortProtocol::Tcp,
    });
    let (outcome, job) = harness.run("web-1", tcp).await;
    assert_eq!(outcome, ProcessOutcome::Failed);
    assert!(job.error.unwrap().contains("Port limit"));

    let udp = JobPayload::AddPort(PortMapping {
        host_port: 5353,
        container_port: 53,
        protocol: PortProtocol::Udp,
    });
    let (outcome, _) = harness.run("web-1", udp).await;
    assert_eq!(outcome, ProcessOutcome::Completed);

    let (outcome, _) = harness
        .run("web-1", JobPayload::RemovePort { host_port: 8080 })
        .await;
    assert_eq!(outcome, ProcessOutcome::Completed);
}

#[tokio::test]
async fn test_snapshot_lifecycle() {
    let provider = MockProvider::new();
    provider.seed_instance("web-1", "Running", &[], None);
    let harness = Harness::new(provider, fast_settings()).await;

    let snap = |name: &str| name.to_string();
    let (outcome, _) = harness
        .run(
            "web-1",
            JobPayload::CreateSnapshot {
                snapshot_name: snap("before-upgrade"),
            },
        )
        .await;
    assert_eq!(outcome, ProcessOutcome::Completed);

    let (outcome, _) = harness
        .run(
            "web-1",
            JobPayload::RestoreSnapshot {
                snapshot_name: snap("before-upgrade"),
            },
        )
        .await;
    assert_eq!(outcome, ProcessOutcome::Completed);

    let (outcome, job) = harness
        .run(
            "web-1",
            JobPayload::RestoreSnapshot {
                snapshot_name: snap("missing"),
            },
        )
        .await;
    assert_eq!(outcome, ProcessOutcome::Failed);
    assert_eq!(job.attempt_count, 0);

    let (outcome, _) = harness
        .run(
            "web-1",
            JobPayload::DeleteSnapshot {
                snapshot_name: snap("before-upgrade"),
            },
        )
        .await;
    assert_eq!(outcome, ProcessOutcome::Completed);
    assert!(harness.provider.snapshots_of("web-1").is_empty());
}

#[tokio::test]
async fn test_backup_prunes_beyond_retention() {
    let provider = MockProvider::new();
    provider.seed_instance("web-1", "Running", &[], None);
    provider.seed_snapshot("web-1", "backup-20240101-000000");
    provider.seed_snapshot("web-1", "backup-20240102-000000");
    provider.seed_snapshot("web-1", "manual");
    let harness = Harness::new(provider, fast_settings()).await;
    harness.track_instance("web-1").await;
    harness
        .dal()
        .instance()
        .update_backup_policy(
            "web-1",
            &BackupPolicy {
                schedule: "@daily".into(),
                retention: 2,
                enabled: true,
            },
        )
        .await
        .unwrap();

    let (outcome, _) = harness.run("web-1", JobPayload::Backup).await;
    assert_eq!(outcome, ProcessOutcome::Completed);

    let snapshots = harness.provider.snapshots_of("web-1");
    assert!(snapshots.contains(&"manual".to_string()));
    assert!(!snapshots.contains(&"backup-20240101-000000".to_string()));
    assert!(snapshots.contains(&"backup-20240102-000000".to_string()));
    assert_eq!(
        snapshots.iter().filter(|s| s.starts_with("backup-")).count(),
        2
    );
}

#[tokio::test]
async fn test_undecodable_payload_fails() {
    use corral::database::schema::jobs;
    use diesel::prelude::*;

    let harness = Harness::new(MockProvider::new(), fast_settings()).await;
    let job = harness.enqueue("web-1", JobPayload::Backup).await;

    let id = job.id.to_string();
    let conn = harness.fixture.database().get_connection().await.unwrap();
    conn.interact(move |conn| {
        diesel::update(jobs::table.find(id))
            .set(jobs::payload.eq("{\"kind\":\"teleport\"}"))
            .execute(conn)
    })
    .await
    .unwrap()
    .unwrap();
    drop(conn);

    let outcome = harness.executor.process(job.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed);
    let job = harness.dal().job().get(job.id).await.unwrap().unwrap();
    assert!(job.error.unwrap().contains("Invalid job payload"));
}

#[tokio::test]
async fn test_state_change_on_untracked_instance_still_completes() {
    let provider = MockProvider::new();
    provider.seed_instance("web-1", "Running", &[], None);
    let harness = Harness::new(provider, fast_settings()).await;

    let (outcome, _) = harness.run("web-1", state(StateAction::Freeze)).await;
    assert_eq!(outcome, ProcessOutcome::Completed);
    assert_eq!(harness.provider.status_of("web-1").as_deref(), Some("Frozen"));
    assert!(harness.dal().instance().get("web-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_address_recorded_on_instance_matches_lease() {
    let harness = Harness::new(MockProvider::new(), fast_settings()).await;
    harness.run("web-1", create_payload("web-1")).await;
    harness.run("web-2", create_payload("web-2")).await;

    let a = harness.dal().instance().get("web-1").await.unwrap().unwrap();
    let b = harness.dal().instance().get("web-2").await.unwrap().unwrap();
    assert_eq!(a.limits.get(KEY_IPV4).map(String::as_str), Some("10.0.0.2"));
    assert_eq!(b.limits.get(KEY_IPV4).map(String::as_str), Some("10.0.0.3"));
}
