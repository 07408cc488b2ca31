//! Core types for the issue-tracker mirror.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Lifecycle status of an issue.
///
/// The contract encodes the status as an index; the mapping is fixed:
/// `Reported(0) -> Verified(1) -> Fixed(2) -> Closed(3)`. No transition graph
/// is enforced beyond index validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueStatus {
    /// Freshly added issue.
    Reported,
    /// Confirmed by a maintainer.
    Verified,
    /// A fix has landed.
    Fixed,
    /// Terminal state.
    Closed,
}

impl IssueStatus {
    /// All statuses in index order.
    pub const ALL: [IssueStatus; 4] = [
        IssueStatus::Reported,
        IssueStatus::Verified,
        IssueStatus::Fixed,
        IssueStatus::Closed,
    ];

    /// Map a contract status index (0..=3) to a status.
    pub fn from_index(index: u8) -> Result<Self, CoreError> {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .ok_or(CoreError::UnknownStatusIndex(index))
    }

    /// Contract status index.
    pub const fn index(&self) -> u8 {
        match self {
            IssueStatus::Reported => 0,
            IssueStatus::Verified => 1,
            IssueStatus::Fixed => 2,
            IssueStatus::Closed => 3,
        }
    }

    /// Database string representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Reported => "REPORTED",
            IssueStatus::Verified => "VERIFIED",
            IssueStatus::Fixed => "FIXED",
            IssueStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REPORTED" => Ok(IssueStatus::Reported),
            "VERIFIED" => Ok(IssueStatus::Verified),
            "FIXED" => Ok(IssueStatus::Fixed),
            "CLOSED" => Ok(IssueStatus::Closed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

impl Serialize for IssueStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IssueStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// The five event kinds emitted by the IssueTracker contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// `OrganizationRegistered`
    OrganizationRegistered,
    /// `ProjectCreated`
    ProjectCreated,
    /// `IssuesAdded`
    IssuesAdded,
    /// `IssueStatusChanged`
    IssueStatusChanged,
    /// `StackAdded`
    StackAdded,
}

impl EventKind {
    /// Parents before children: the order a full resync replays kinds in.
    pub const RESYNC_ORDER: [EventKind; 5] = [
        EventKind::OrganizationRegistered,
        EventKind::ProjectCreated,
        EventKind::IssuesAdded,
        EventKind::IssueStatusChanged,
        EventKind::StackAdded,
    ];

    /// Solidity event name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrganizationRegistered => "OrganizationRegistered",
            EventKind::ProjectCreated => "ProjectCreated",
            EventKind::IssuesAdded => "IssuesAdded",
            EventKind::IssueStatusChanged => "IssueStatusChanged",
            EventKind::StackAdded => "StackAdded",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded, validated domain event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A new organization was registered.
    OrganizationRegistered {
        /// Chain-assigned organization id
        id: String,
        /// Display name
        name: String,
        /// Free-form description
        description: String,
        /// Contact handle
        contact: String,
    },

    /// A project was created under an organization.
    ProjectCreated {
        /// Chain-assigned project id (decimal rendering of the uint256)
        project_id: String,
        /// Display name
        name: String,
        /// Owning organization
        organization_id: String,
    },

    /// A batch of issues was reported against a project.
    IssuesAdded {
        /// Owning project
        project_id: String,
        /// Chain-assigned issue ids
        issue_ids: Vec<String>,
    },

    /// Every listed issue moved to `status`.
    IssueStatusChanged {
        /// Affected issues
        issue_ids: Vec<String>,
        /// New status (already validated from the contract index)
        status: IssueStatus,
    },

    /// A technology stack entry was attached to a project.
    StackAdded {
        /// Owning project
        project_id: String,
        /// Stack component name
        name: String,
        /// Stack component version
        version: i64,
    },
}

impl ChainEvent {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            ChainEvent::OrganizationRegistered { .. } => EventKind::OrganizationRegistered,
            ChainEvent::ProjectCreated { .. } => EventKind::ProjectCreated,
            ChainEvent::IssuesAdded { .. } => EventKind::IssuesAdded,
            ChainEvent::IssueStatusChanged { .. } => EventKind::IssueStatusChanged,
            ChainEvent::StackAdded { .. } => EventKind::StackAdded,
        }
    }

    /// Identifiers carried by the event, for log context.
    pub fn subject(&self) -> String {
        match self {
            ChainEvent::OrganizationRegistered { id, .. } => format!("organization={id}"),
            ChainEvent::ProjectCreated {
                project_id,
                organization_id,
                ..
            } => format!("project={project_id} organization={organization_id}"),
            ChainEvent::IssuesAdded {
                project_id,
                issue_ids,
            } => format!("project={project_id} issues=[{}]", issue_ids.join(",")),
            ChainEvent::IssueStatusChanged { issue_ids, status } => {
                format!("issues=[{}] status={status}", issue_ids.join(","))
            }
            ChainEvent::StackAdded {
                project_id,
                name,
                version,
            } => format!("project={project_id} stack={name}@{version}"),
        }
    }
}

/// Chain coordinates of an event.
///
/// Ordering is lexicographic on `(block_number, log_index)`, i.e. chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventMeta {
    /// Block containing the log
    pub block_number: u64,
    /// Position of the log within the block
    pub log_index: u64,
}

impl EventMeta {
    /// Create new event coordinates.
    pub const fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

/// Wall-clock commit time of a block.
pub type CommitTime = DateTime<Utc>;
