//! Reconciliation engine: applies domain events to the mirror.
//!
//! Every event maps to one transition handler through a single `match`, and
//! every handler commits its writes as one unit. Handlers report what they did
//! as an [`Outcome`] instead of logging and swallowing, so the same code serves
//! live listening and resync.

use std::sync::Arc;

use issuetrack_core::{ChainEvent, CommitTime, EventMeta, IssueStatus};
use tracing::{debug, error, info, warn};

use crate::error::{IndexerError, Result};
use crate::listener::TimestampResolver;
use crate::storage::{NewStack, OrganizationRecord, ProjectRecord, Storage};

pub mod retry;

pub use retry::{Backoff, RetryPolicy, Sleeper, TokioSleeper};

/// What applying one event did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Rows were written.
    Applied,

    /// The rows already existed; nothing changed.
    AlreadyApplied,

    /// The event was given up on; nothing changed.
    Dropped {
        /// Why the event was dropped
        reason: String,
    },
}

/// Applies decoded chain events against [`Storage`].
#[derive(Clone)]
pub struct Reconciler {
    storage: Storage,
    resolver: Arc<TimestampResolver>,
    retry: RetryPolicy,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(storage: Storage, resolver: Arc<TimestampResolver>, retry: RetryPolicy) -> Self {
        Self {
            storage,
            resolver,
            retry,
        }
    }

    /// Store the reconciler writes to.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Resolve the commit time of the event's block, then apply the event.
    ///
    /// A failed timestamp lookup fails only this event.
    pub async fn apply(&self, event: &ChainEvent, meta: EventMeta) -> Result<Outcome> {
        let timestamp = self.resolver.resolve(meta.block_number).await?;
        self.apply_at(event, meta, timestamp).await
    }

    /// Apply an event whose commit time is already known.
    pub async fn apply_at(
        &self,
        event: &ChainEvent,
        meta: EventMeta,
        timestamp: CommitTime,
    ) -> Result<Outcome> {
        match event {
            ChainEvent::OrganizationRegistered {
                id,
                name,
                description,
                contact,
            } => {
                let record = OrganizationRecord {
                    id: id.clone(),
                    name: name.clone(),
                    description: description.clone(),
                    contact: contact.clone(),
                    timestamp,
                };
                self.organization_registered(record, meta).await
            }
            ChainEvent::ProjectCreated {
                project_id,
                name,
                organization_id,
            } => {
                let record = ProjectRecord {
                    id: project_id.clone(),
                    organization_id: organization_id.clone(),
                    name: name.clone(),
                    timestamp,
                };
                self.project_created(record, meta).await
            }
            ChainEvent::IssuesAdded {
                project_id,
                issue_ids,
            } => self.issues_added(project_id, issue_ids, timestamp, meta).await,
            ChainEvent::IssueStatusChanged { issue_ids, status } => {
                self.issue_status_changed(issue_ids, *status, timestamp, meta)
                    .await
            }
            ChainEvent::StackAdded {
                project_id,
                name,
                version,
            } => {
                let stack = NewStack {
                    project_id: project_id.clone(),
                    name: name.clone(),
                    version: *version,
                    timestamp,
                };
                self.stack_added(stack, meta).await
            }
        }
    }

    async fn organization_registered(
        &self,
        record: OrganizationRecord,
        meta: EventMeta,
    ) -> Result<Outcome> {
        if self.storage.create_organization(&record).await? {
            info!(
                organization = %record.id,
                block_number = meta.block_number,
                "Organization created"
            );
            Ok(Outcome::Applied)
        } else {
            debug!(organization = %record.id, "Organization already present");
            Ok(Outcome::AlreadyApplied)
        }
    }

    /// The organization must already exist: chain order guarantees it, so a
    /// miss is not retried.
    async fn project_created(&self, record: ProjectRecord, meta: EventMeta) -> Result<Outcome> {
        match self.storage.create_project(&record).await {
            Ok(true) => {
                info!(
                    project = %record.id,
                    organization = %record.organization_id,
                    block_number = meta.block_number,
                    "Project created"
                );
                Ok(Outcome::Applied)
            }
            Ok(false) => {
                debug!(project = %record.id, "Project already present");
                Ok(Outcome::AlreadyApplied)
            }
            Err(e) => {
                if let IndexerError::DependencyNotFound { .. } = e {
                    error!(
                        project = %record.id,
                        organization = %record.organization_id,
                        block_number = meta.block_number,
                        "Project references an unknown organization"
                    );
                }
                Err(e)
            }
        }
    }

    async fn issues_added(
        &self,
        project_id: &str,
        issue_ids: &[String],
        timestamp: CommitTime,
        meta: EventMeta,
    ) -> Result<Outcome> {
        let created = self
            .storage
            .create_issues(project_id, issue_ids, timestamp)
            .await?;

        info!(
            project = %project_id,
            issues = created,
            block_number = meta.block_number,
            "Issues reported"
        );

        Ok(Outcome::Applied)
    }

    async fn issue_status_changed(
        &self,
        issue_ids: &[String],
        status: IssueStatus,
        timestamp: CommitTime,
        meta: EventMeta,
    ) -> Result<Outcome> {
        let updated = self
            .storage
            .update_issue_status(issue_ids, status, timestamp)
            .await?;

        info!(
            %status,
            issues = updated,
            block_number = meta.block_number,
            "Issue status changed"
        );

        Ok(Outcome::Applied)
    }

    /// Live handlers run concurrently, so the project may be committed by a
    /// sibling task a moment after this event arrives. Retry the existence
    /// check on the policy's schedule; after the last attempt drop the event.
    async fn stack_added(&self, stack: NewStack, meta: EventMeta) -> Result<Outcome> {
        let max_attempts = self.retry.max_attempts();

        for attempt in 1..=max_attempts {
            match self.storage.create_stack(&stack).await {
                Ok(row_id) => {
                    info!(
                        project = %stack.project_id,
                        stack = %stack.name,
                        version = stack.version,
                        row_id,
                        block_number = meta.block_number,
                        "Stack created"
                    );
                    return Ok(Outcome::Applied);
                }
                Err(IndexerError::DependencyNotFound { .. }) => {
                    warn!(
                        project = %stack.project_id,
                        attempt,
                        max_attempts,
                        "Project not found for stack, retrying"
                    );
                    if attempt < max_attempts {
                        self.retry.pause(attempt).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        error!(
            project = %stack.project_id,
            stack = %stack.name,
            version = stack.version,
            block_number = meta.block_number,
            log_index = meta.log_index,
            max_attempts,
            "Dropping stack: project never appeared"
        );

        Ok(Outcome::Dropped {
            reason: format!(
                "project {} not found after {} attempts",
                stack.project_id, max_attempts
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::source::{ChainSource, Delivery, EventStream};
    use crate::storage::test_support::setup_storage;
    use async_trait::async_trait;
    use chrono::DateTime;
    use issuetrack_core::EventKind;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Block `n` commits at `n * 12` seconds.
    struct BlockClock;

    #[async_trait]
    impl ChainSource for BlockClock {
        async fn subscribe(&self, _kind: EventKind) -> Result<EventStream> {
            Err(IndexerError::Transport("not supported".to_string()))
        }

        async fn query_range(&self, _: EventKind, _: u64, _: u64) -> Result<Vec<Delivery>> {
            Ok(Vec::new())
        }

        async fn tip(&self) -> Result<u64> {
            Ok(0)
        }

        async fn block_timestamp(&self, block_number: u64) -> Result<CommitTime> {
            if block_number == u64::MAX {
                return Err(IndexerError::Transport("unreachable".to_string()));
            }
            Ok(DateTime::from_timestamp(block_number as i64 * 12, 0).unwrap())
        }
    }

    /// Records requested delays and can run a store mutation on a given pause.
    #[derive(Default)]
    struct ScriptedSleeper {
        delays: Mutex<Vec<Duration>>,
        on_pause: Mutex<Option<(usize, Storage)>>,
    }

    #[async_trait]
    impl Sleeper for ScriptedSleeper {
        async fn sleep(&self, duration: Duration) {
            let count = {
                let mut delays = self.delays.lock();
                delays.push(duration);
                delays.len()
            };

            let hook = self.on_pause.lock().clone();
            if let Some((at, storage)) = hook {
                if at == count {
                    storage
                        .create_project(&ProjectRecord {
                            id: "p1".to_string(),
                            organization_id: "org1".to_string(),
                            name: "Core".to_string(),
                            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
                        })
                        .await
                        .unwrap();
                }
            }
        }
    }

    fn reconciler(storage: Storage, sleeper: Arc<ScriptedSleeper>) -> Reconciler {
        let resolver = Arc::new(TimestampResolver::new(Arc::new(BlockClock), 16));
        let retry = RetryPolicy::fixed(5, Duration::from_secs(1)).with_sleeper(sleeper);
        Reconciler::new(storage, resolver, retry)
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn org_registered() -> ChainEvent {
        ChainEvent::OrganizationRegistered {
            id: "org1".to_string(),
            name: "Acme".to_string(),
            description: "d".to_string(),
            contact: "c".to_string(),
        }
    }

    fn project_created() -> ChainEvent {
        ChainEvent::ProjectCreated {
            project_id: "p1".to_string(),
            name: "Core".to_string(),
            organization_id: "org1".to_string(),
        }
    }

    async fn scenario_a(engine: &Reconciler) {
        assert_eq!(
            engine
                .apply(&org_registered(), EventMeta::new(1, 0))
                .await
                .unwrap(),
            Outcome::Applied
        );
        assert_eq!(
            engine
                .apply(&project_created(), EventMeta::new(2, 0))
                .await
                .unwrap(),
            Outcome::Applied
        );
        let issues = ChainEvent::IssuesAdded {
            project_id: "p1".to_string(),
            issue_ids: ids(&["i1", "i2"]),
        };
        assert_eq!(
            engine.apply(&issues, EventMeta::new(3, 0)).await.unwrap(),
            Outcome::Applied
        );
    }

    #[tokio::test]
    async fn test_scenario_a_org_project_issues() {
        let (storage, _temp_db) = setup_storage().await;
        let engine = reconciler(storage.clone(), Arc::default());

        scenario_a(&engine).await;

        assert!(storage.get_organization("org1").await.unwrap().is_some());
        let project = storage.get_project("p1").await.unwrap().unwrap();
        assert_eq!(project.organization_id, "org1");
        assert_eq!(project.timestamp.timestamp(), 24);

        let issues = storage.list_issues().await.unwrap();
        assert_eq!(
            issues.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["i1", "i2"]
        );
        assert!(issues.iter().all(|i| i.status == IssueStatus::Reported));

        let trail = storage.list_transactions().await.unwrap();
        assert_eq!(trail.len(), 2);
        assert!(trail.iter().all(|t| t.status == IssueStatus::Reported));
        assert!(trail.iter().all(|t| t.timestamp.timestamp() == 36));
        assert_eq!(
            trail.iter().map(|t| t.issue_id.as_str()).collect::<Vec<_>>(),
            vec!["i1", "i2"]
        );

        storage.close().await;
    }

    #[tokio::test]
    async fn test_scenario_b_status_change() {
        let (storage, _temp_db) = setup_storage().await;
        let engine = reconciler(storage.clone(), Arc::default());
        scenario_a(&engine).await;

        let change = ChainEvent::IssueStatusChanged {
            issue_ids: ids(&["i1"]),
            status: IssueStatus::Fixed,
        };
        assert_eq!(
            engine.apply(&change, EventMeta::new(4, 0)).await.unwrap(),
            Outcome::Applied
        );

        let i1 = storage.get_issue("i1").await.unwrap().unwrap();
        assert_eq!(i1.status, IssueStatus::Fixed);
        assert_eq!(i1.timestamp.timestamp(), 48);

        let i1_trail: Vec<_> = storage
            .list_transactions_for("i1")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.status)
            .collect();
        assert_eq!(i1_trail, vec![IssueStatus::Reported, IssueStatus::Fixed]);

        let i2_trail = storage.list_transactions_for("i2").await.unwrap();
        assert_eq!(i2_trail.len(), 1);
        assert_eq!(i2_trail[0].status, IssueStatus::Reported);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_status_change_for_every_status() {
        let (storage, _temp_db) = setup_storage().await;
        let engine = reconciler(storage.clone(), Arc::default());
        scenario_a(&engine).await;

        for (offset, status) in IssueStatus::ALL.into_iter().enumerate() {
            let block = 10 + offset as u64;
            let change = ChainEvent::IssueStatusChanged {
                issue_ids: ids(&["i1", "i2"]),
                status,
            };
            engine
                .apply(&change, EventMeta::new(block, 0))
                .await
                .unwrap();

            for issue_id in ["i1", "i2"] {
                let issue = storage.get_issue(issue_id).await.unwrap().unwrap();
                assert_eq!(issue.status, status);

                let trail = storage.list_transactions_for(issue_id).await.unwrap();
                // Initial Reported row plus one per change so far.
                assert_eq!(trail.len(), offset + 2);
                let last = trail.last().unwrap();
                assert_eq!(last.status, status);
                assert_eq!(last.timestamp.timestamp(), block as i64 * 12);
            }
        }

        // Re-emitting a status is recorded, not collapsed.
        let sequence: Vec<_> = storage
            .list_transactions_for("i1")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.status)
            .collect();
        assert_eq!(
            sequence,
            vec![
                IssueStatus::Reported,
                IssueStatus::Reported,
                IssueStatus::Verified,
                IssueStatus::Fixed,
                IssueStatus::Closed,
            ]
        );

        storage.close().await;
    }

    #[tokio::test]
    async fn test_organization_registered_twice_is_idempotent() {
        let (storage, _temp_db) = setup_storage().await;
        let engine = reconciler(storage.clone(), Arc::default());

        let first = engine
            .apply(&org_registered(), EventMeta::new(1, 0))
            .await
            .unwrap();
        let second = engine
            .apply(&org_registered(), EventMeta::new(1, 0))
            .await
            .unwrap();

        assert_eq!(first, Outcome::Applied);
        assert_eq!(second, Outcome::AlreadyApplied);
        assert_eq!(storage.list_organizations().await.unwrap().len(), 1);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_project_without_organization_is_not_retried() {
        let (storage, _temp_db) = setup_storage().await;
        let sleeper = Arc::new(ScriptedSleeper::default());
        let engine = reconciler(storage.clone(), sleeper.clone());

        let err = engine
            .apply(&project_created(), EventMeta::new(2, 0))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IndexerError::DependencyNotFound {
                entity: "organization",
                ..
            }
        ));
        assert!(sleeper.delays.lock().is_empty());
        assert!(storage.list_projects().await.unwrap().is_empty());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_duplicate_issue_batch_commits_nothing() {
        let (storage, _temp_db) = setup_storage().await;
        let engine = reconciler(storage.clone(), Arc::default());
        scenario_a(&engine).await;

        let again = ChainEvent::IssuesAdded {
            project_id: "p1".to_string(),
            issue_ids: ids(&["i3", "i1"]),
        };
        let err = engine.apply(&again, EventMeta::new(5, 0)).await.unwrap_err();
        assert!(matches!(err, IndexerError::ConstraintViolation { .. }));

        assert!(storage.get_issue("i3").await.unwrap().is_none());
        assert_eq!(storage.list_transactions().await.unwrap().len(), 2);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_scenario_c_stack_for_missing_project_is_dropped() {
        let (storage, _temp_db) = setup_storage().await;
        let sleeper = Arc::new(ScriptedSleeper::default());
        let engine = reconciler(storage.clone(), sleeper.clone());

        let stack = ChainEvent::StackAdded {
            project_id: "p-missing".to_string(),
            name: "node".to_string(),
            version: 1,
        };
        let outcome = engine.apply(&stack, EventMeta::new(9, 0)).await.unwrap();

        assert!(matches!(outcome, Outcome::Dropped { .. }));
        // Five attempts, a one second pause between each.
        assert_eq!(*sleeper.delays.lock(), vec![Duration::from_secs(1); 4]);
        assert!(storage.list_stacks().await.unwrap().is_empty());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_stack_created_once_project_commits_within_window() {
        let (storage, _temp_db) = setup_storage().await;
        let sleeper = Arc::new(ScriptedSleeper::default());
        let engine = reconciler(storage.clone(), sleeper.clone());

        engine
            .apply(&org_registered(), EventMeta::new(1, 0))
            .await
            .unwrap();
        // The project lands while the stack handler waits out its second pause.
        *sleeper.on_pause.lock() = Some((2, storage.clone()));

        let stack = ChainEvent::StackAdded {
            project_id: "p1".to_string(),
            name: "node".to_string(),
            version: 1,
        };
        let outcome = engine.apply(&stack, EventMeta::new(3, 1)).await.unwrap();

        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(sleeper.delays.lock().len(), 2);

        let stacks = storage.list_stacks_for("p1").await.unwrap();
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0].name, "node");
        assert_eq!(stacks[0].version, 1);
        assert_eq!(stacks[0].timestamp.timestamp(), 36);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_timestamp_failure_fails_only_that_event() {
        let (storage, _temp_db) = setup_storage().await;
        let engine = reconciler(storage.clone(), Arc::default());

        let err = engine
            .apply(&org_registered(), EventMeta::new(u64::MAX, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::TimestampUnavailable { .. }));
        assert!(storage.list_organizations().await.unwrap().is_empty());

        engine
            .apply(&org_registered(), EventMeta::new(1, 0))
            .await
            .unwrap();
        assert_eq!(storage.list_organizations().await.unwrap().len(), 1);

        storage.close().await;
    }
}
