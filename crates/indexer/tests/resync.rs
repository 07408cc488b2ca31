//! Resync: sequential full replay from block 0 to the tip.

mod common;

use std::sync::Arc;

use common::*;
use issuetrack_indexer::listener::{map_entry, MemorySource, RawEntry};
use issuetrack_indexer::{EventKind, Indexer, IndexerError, IssueStatus, Outcome};

/// Apply one entry directly through the indexer's engine.
async fn apply(indexer: &Indexer, entry: RawEntry) -> Outcome {
    let (event, meta) = map_entry(&entry).unwrap();
    indexer.reconciler().apply(&event, meta).await.unwrap()
}

/// A small chain history covering every event kind.
fn history() -> Arc<MemorySource> {
    let source = Arc::new(MemorySource::new());
    source.push(org("org1", 1, 0));
    source.push(org("org2", 1, 1));
    source.push(project(1, "org1", 2, 0));
    source.push(project(2, "org2", 2, 1));
    source.push(issues(1, &["i1", "i2"], 3, 0));
    source.push(issues(2, &["i3"], 3, 1));
    source.push(status(&["i1", "i3"], 1, 4, 0));
    source.push(status(&["i1"], 3, 5, 0));
    source.push(stack(1, "node", 20, 6, 0));
    source.push(stack(2, "postgres", 16, 6, 1));
    source
}

#[tokio::test]
async fn test_resync_replays_every_kind() {
    let (storage, _temp_db) = setup_storage().await;
    let source = history();
    let indexer = indexer(source.clone(), storage.clone(), 4);

    let report = indexer.resync().await.unwrap();

    assert_eq!(report.tip, 6);
    for (kind, applied) in [
        (EventKind::OrganizationRegistered, 2),
        (EventKind::ProjectCreated, 2),
        (EventKind::IssuesAdded, 2),
        (EventKind::IssueStatusChanged, 2),
        (EventKind::StackAdded, 2),
    ] {
        assert_eq!(report.tallies.get(kind).applied, applied, "{kind}");
    }
    assert_eq!(report.tallies.total().skipped, 0);

    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.organization_count, 2);
    assert_eq!(stats.project_count, 2);
    assert_eq!(stats.issue_count, 3);
    // 3 reported + 2 verified + 1 closed
    assert_eq!(stats.transaction_count, 6);
    assert_eq!(stats.stack_count, 2);

    let i1 = storage.get_issue("i1").await.unwrap().unwrap();
    assert_eq!(i1.status, IssueStatus::Closed);
    assert_eq!(i1.timestamp.timestamp(), 60);
    let trail: Vec<_> = storage
        .list_transactions_for("i1")
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.status)
        .collect();
    assert_eq!(
        trail,
        vec![
            IssueStatus::Reported,
            IssueStatus::Verified,
            IssueStatus::Closed
        ]
    );

    let i3 = storage.get_issue("i3").await.unwrap().unwrap();
    assert_eq!(i3.status, IssueStatus::Verified);

    storage.close().await;
}

#[tokio::test]
async fn test_resync_applies_kinds_in_dependency_order() {
    let (storage, _temp_db) = setup_storage().await;
    let source = Arc::new(MemorySource::new());
    // The stack is logged in an earlier block than its project, yet resync
    // still applies all projects first.
    source.push(stack(9, "node", 1, 1, 0));
    source.push(org("org1", 2, 0));
    source.push(project(9, "org1", 3, 0));

    let indexer = indexer(source, storage.clone(), 4);
    let report = indexer.resync().await.unwrap();

    assert_eq!(report.tallies.get(EventKind::StackAdded).applied, 1);
    assert_eq!(report.tallies.get(EventKind::StackAdded).dropped, 0);
    assert_eq!(storage.list_stacks_for("9").await.unwrap().len(), 1);

    storage.close().await;
}

#[tokio::test]
async fn test_resync_skips_undecodable_entries() {
    let (storage, _temp_db) = setup_storage().await;
    let source = history();
    source.push_malformed(EventKind::IssuesAdded, 3, 5, "truncated data");
    source.push(status(&["i2"], 42, 5, 1));

    let indexer = indexer(source, storage.clone(), 4);
    let report = indexer.resync().await.unwrap();

    assert_eq!(report.tallies.get(EventKind::IssuesAdded).skipped, 1);
    assert_eq!(report.tallies.get(EventKind::IssuesAdded).applied, 2);
    assert_eq!(report.tallies.get(EventKind::IssueStatusChanged).skipped, 1);
    assert_eq!(report.tallies.get(EventKind::StackAdded).applied, 2);

    let i2 = storage.get_issue("i2").await.unwrap().unwrap();
    assert_eq!(i2.status, IssueStatus::Reported);

    storage.close().await;
}

#[tokio::test]
async fn test_resync_is_deterministic() {
    let (first, _first_db) = setup_storage().await;
    let (second, _second_db) = setup_storage().await;
    let source = history();

    indexer(source.clone(), first.clone(), 4)
        .resync()
        .await
        .unwrap();
    indexer(source.clone(), second.clone(), 4)
        .resync()
        .await
        .unwrap();

    let dumped = dump(&first).await;
    assert_eq!(dumped, dump(&second).await);
    assert_eq!(dumped.transactions.len(), 6);

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn test_second_resync_aborts_without_changing_contents() {
    let (storage, _temp_db) = setup_storage().await;
    let source = history();
    let indexer = indexer(source, storage.clone(), 4);

    indexer.resync().await.unwrap();
    let before = dump(&storage).await;

    // Organizations and projects replay as no-ops, then the first issue batch
    // collides with the rows already mirrored.
    let err = indexer.resync().await.unwrap_err();
    assert!(matches!(
        err,
        IndexerError::ConstraintViolation {
            entity: "issue",
            ..
        }
    ));

    assert_eq!(dump(&storage).await, before);

    storage.close().await;
}

#[tokio::test]
async fn test_resync_aborts_on_first_engine_error() {
    let (storage, _temp_db) = setup_storage().await;
    let source = Arc::new(MemorySource::new());
    source.push(org("org1", 1, 0));
    source.push(project(1, "org1", 2, 0));
    source.push(project(2, "ghost", 2, 1));
    source.push(project(3, "org1", 2, 2));

    let indexer = indexer(source, storage.clone(), 4);
    let err = indexer.resync().await.unwrap_err();

    assert!(matches!(
        err,
        IndexerError::DependencyNotFound {
            entity: "organization",
            ..
        }
    ));
    // Work before the failure stays committed; nothing after it ran.
    assert!(storage.project_exists("1").await.unwrap());
    assert!(!storage.project_exists("3").await.unwrap());

    storage.close().await;
}

#[tokio::test]
async fn test_resync_drops_stack_without_project() {
    let (storage, _temp_db) = setup_storage().await;
    let source = Arc::new(MemorySource::new());
    source.push(stack(404, "node", 1, 1, 0));

    let indexer = indexer(source, storage.clone(), 4);
    let report = indexer.resync().await.unwrap();

    assert_eq!(report.tallies.get(EventKind::StackAdded).dropped, 1);
    assert!(storage.list_stacks().await.unwrap().is_empty());

    storage.close().await;
}

#[tokio::test]
async fn test_resync_fails_on_released_source() {
    let (storage, _temp_db) = setup_storage().await;
    let source = history();
    let indexer = indexer(source, storage.clone(), 4);

    indexer.shutdown().await;

    assert!(matches!(
        indexer.resync().await,
        Err(IndexerError::Transport(_))
    ));
    assert_eq!(storage.stats().await.unwrap().organization_count, 0);

    storage.close().await;
}

#[tokio::test]
async fn test_resync_if_empty_replays_fresh_store() {
    let (storage, _temp_db) = setup_storage().await;
    let indexer = indexer(history(), storage.clone(), 4);

    let report = indexer.resync_if_empty().await.unwrap().unwrap();

    assert_eq!(report.tip, 6);
    assert_eq!(storage.stats().await.unwrap().issue_count, 3);

    storage.close().await;
}

#[tokio::test]
async fn test_resync_if_empty_skips_populated_store() {
    let (storage, _temp_db) = setup_storage().await;
    let indexer = indexer(history(), storage.clone(), 4);

    indexer.resync().await.unwrap();
    let before = dump(&storage).await;

    // A restart with a startup resync must not trip over its own rows.
    assert!(indexer.resync_if_empty().await.unwrap().is_none());
    assert_eq!(dump(&storage).await, before);

    storage.close().await;
}

#[tokio::test]
async fn test_dropped_stack_is_not_recovered_by_resync() {
    let (storage, _temp_db) = setup_storage().await;
    let source = Arc::new(MemorySource::new());
    let indexer = indexer(source.clone(), storage.clone(), 4);

    assert_eq!(apply(&indexer, org("org1", 1, 0)).await, Outcome::Applied);
    assert_eq!(
        apply(&indexer, project(1, "org1", 2, 0)).await,
        Outcome::Applied
    );
    assert_eq!(
        apply(&indexer, issues(1, &["i1"], 3, 0)).await,
        Outcome::Applied
    );
    assert!(matches!(
        apply(&indexer, stack(2, "node", 1, 4, 0)).await,
        Outcome::Dropped { .. }
    ));

    // The missing project shows up on chain afterwards.
    source.push(org("org1", 1, 0));
    source.push(project(1, "org1", 2, 0));
    source.push(issues(1, &["i1"], 3, 0));
    source.push(stack(2, "node", 1, 4, 0));
    source.push(project(2, "org1", 5, 0));

    // Replaying collides with the mirrored issues before reaching stacks.
    assert!(matches!(
        indexer.resync().await,
        Err(IndexerError::ConstraintViolation {
            entity: "issue",
            ..
        })
    ));
    assert!(indexer.resync_if_empty().await.unwrap().is_none());
    assert!(storage.list_stacks().await.unwrap().is_empty());

    storage.close().await;
}
