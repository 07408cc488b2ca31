//! Shared fixtures for the pipeline integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use issuetrack_indexer::config::ListenerConfig;
use issuetrack_indexer::listener::events::{
    IssueStatusChanged, IssuesAdded, OrganizationRegistered, ProjectCreated, StackAdded,
};
use issuetrack_indexer::listener::{MemorySource, RawEntry, RawEventArgs, TimestampResolver};
use issuetrack_indexer::storage::{
    IssueRecord, OrganizationRecord, ProjectRecord, StackRecord, Storage, TransactionRecord,
};
use issuetrack_indexer::{Indexer, Reconciler, RetryPolicy};
use tempfile::NamedTempFile;

pub async fn setup_storage() -> (Storage, NamedTempFile) {
    let temp_db = NamedTempFile::new().unwrap();
    let storage = Storage::new_with_path(temp_db.path(), None, None)
        .await
        .unwrap();
    storage.run_migrations().await.unwrap();
    (storage, temp_db)
}

/// Five attempts, 100ms apart.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::fixed(5, Duration::from_millis(100))
}

pub fn indexer(
    source: Arc<MemorySource>,
    storage: Storage,
    max_concurrent_handlers: usize,
) -> Indexer {
    let resolver = Arc::new(TimestampResolver::new(source.clone(), 64));
    let reconciler = Reconciler::new(storage, resolver, fast_retry());
    let config = ListenerConfig {
        queue_capacity: 16,
        max_concurrent_handlers,
        ..ListenerConfig::default()
    };
    Indexer::new(source, reconciler, config)
}

pub fn org(id: &str, block_number: u64, log_index: u64) -> RawEntry {
    RawEntry::new(
        RawEventArgs::OrganizationRegistered(OrganizationRegistered {
            id: id.to_string(),
            name: format!("{id} name"),
            description: "d".to_string(),
            contact: "c".to_string(),
        }),
        block_number,
        log_index,
    )
}

pub fn project(project_id: u64, org_id: &str, block_number: u64, log_index: u64) -> RawEntry {
    RawEntry::new(
        RawEventArgs::ProjectCreated(ProjectCreated {
            projectId: U256::from(project_id),
            name: format!("project {project_id}"),
            organizationId: org_id.to_string(),
        }),
        block_number,
        log_index,
    )
}

pub fn issues(project_id: u64, ids: &[&str], block_number: u64, log_index: u64) -> RawEntry {
    RawEntry::new(
        RawEventArgs::IssuesAdded(IssuesAdded {
            issueIds: ids.iter().map(|id| id.to_string()).collect(),
            projectId: U256::from(project_id),
        }),
        block_number,
        log_index,
    )
}

pub fn status(ids: &[&str], index: u8, block_number: u64, log_index: u64) -> RawEntry {
    RawEntry::new(
        RawEventArgs::IssueStatusChanged(IssueStatusChanged {
            issueIds: ids.iter().map(|id| id.to_string()).collect(),
            status: index,
        }),
        block_number,
        log_index,
    )
}

pub fn stack(
    project_id: u64,
    name: &str,
    version: u64,
    block_number: u64,
    log_index: u64,
) -> RawEntry {
    RawEntry::new(
        RawEventArgs::StackAdded(StackAdded {
            projectId: U256::from(project_id),
            name: name.to_string(),
            version: U256::from(version),
        }),
        block_number,
        log_index,
    )
}

/// Poll `check` every 10ms for up to five seconds.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Full table contents, in a stable order.
#[derive(Debug, PartialEq, Eq)]
pub struct Dump {
    pub organizations: Vec<OrganizationRecord>,
    pub projects: Vec<ProjectRecord>,
    pub issues: Vec<IssueRecord>,
    pub transactions: Vec<TransactionRecord>,
    pub stacks: Vec<StackRecord>,
}

pub async fn dump(storage: &Storage) -> Dump {
    Dump {
        organizations: storage.list_organizations().await.unwrap(),
        projects: storage.list_projects().await.unwrap(),
        issues: storage.list_issues().await.unwrap(),
        transactions: storage.list_transactions().await.unwrap(),
        stacks: storage.list_stacks().await.unwrap(),
    }
}
