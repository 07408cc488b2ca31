//! Database types for the indexer storage layer.

use issuetrack_core::{CommitTime, IssueStatus};

/// An organization as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationRecord {
    /// Chain-assigned id (primary key)
    pub id: String,

    /// Display name
    pub name: String,

    /// Free-form description
    pub description: String,

    /// Contact handle
    pub contact: String,

    /// Block commit time of the registering event
    pub timestamp: CommitTime,
}

/// A project as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    /// Chain-assigned id (primary key)
    pub id: String,

    /// Owning organization (must exist)
    pub organization_id: String,

    /// Display name
    pub name: String,

    /// Block commit time of the creating event
    pub timestamp: CommitTime,
}

/// An issue as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRecord {
    /// Chain-assigned id (primary key)
    pub id: String,

    /// Owning project
    pub project_id: String,

    /// Current status
    pub status: IssueStatus,

    /// Commit time of the last status change
    pub timestamp: CommitTime,
}

/// One row of an issue's append-only status trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Local row id (insertion order)
    pub id: i64,

    /// Issue this row belongs to
    pub issue_id: String,

    /// Status the issue entered
    pub status: IssueStatus,

    /// Commit time of the status change
    pub timestamp: CommitTime,
}

/// A stack entry attached to a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRecord {
    /// Local row id (insertion order)
    pub id: i64,

    /// Owning project
    pub project_id: String,

    /// Component name
    pub name: String,

    /// Component version
    pub version: i64,

    /// Block commit time of the adding event
    pub timestamp: CommitTime,
}

/// Stack fields supplied by an event, before a row id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStack {
    /// Owning project
    pub project_id: String,

    /// Component name
    pub name: String,

    /// Component version
    pub version: i64,

    /// Block commit time of the adding event
    pub timestamp: CommitTime,
}
