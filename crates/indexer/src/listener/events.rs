//! IssueTracker event definitions and log decoding.

use alloy::primitives::B256;
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use issuetrack_core::{EventKind, EventMeta};

use crate::error::{IndexerError, Result};

// Define the IssueTracker events using Alloy's sol! macro
sol! {
    /// A new organization was registered.
    #[derive(Debug, PartialEq, Eq)]
    event OrganizationRegistered(string id, string name, string description, string contact);

    /// A project was created under an organization.
    #[derive(Debug, PartialEq, Eq)]
    event ProjectCreated(uint256 projectId, string name, string organizationId);

    /// A batch of issues was reported against a project.
    #[derive(Debug, PartialEq, Eq)]
    event IssuesAdded(string[] issueIds, uint256 projectId);

    /// Every listed issue moved to the status at `status`.
    #[derive(Debug, PartialEq, Eq)]
    event IssueStatusChanged(string[] issueIds, uint8 status);

    /// A stack component was attached to a project.
    #[derive(Debug, PartialEq, Eq)]
    event StackAdded(uint256 projectId, string name, uint256 version);
}

/// ABI-decoded arguments of one contract log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEventArgs {
    /// `OrganizationRegistered` arguments
    OrganizationRegistered(OrganizationRegistered),
    /// `ProjectCreated` arguments
    ProjectCreated(ProjectCreated),
    /// `IssuesAdded` arguments
    IssuesAdded(IssuesAdded),
    /// `IssueStatusChanged` arguments
    IssueStatusChanged(IssueStatusChanged),
    /// `StackAdded` arguments
    StackAdded(StackAdded),
}

impl RawEventArgs {
    /// The kind of event these arguments belong to.
    pub fn kind(&self) -> EventKind {
        match self {
            RawEventArgs::OrganizationRegistered(_) => EventKind::OrganizationRegistered,
            RawEventArgs::ProjectCreated(_) => EventKind::ProjectCreated,
            RawEventArgs::IssuesAdded(_) => EventKind::IssuesAdded,
            RawEventArgs::IssueStatusChanged(_) => EventKind::IssueStatusChanged,
            RawEventArgs::StackAdded(_) => EventKind::StackAdded,
        }
    }
}

/// A raw entry delivered by a chain source: decoded args plus chain coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Decoded event arguments
    pub args: RawEventArgs,

    /// Block number where the event occurred
    pub block_number: u64,

    /// Log index within the block
    pub log_index: u64,
}

impl RawEntry {
    /// Create a raw entry.
    pub fn new(args: RawEventArgs, block_number: u64, log_index: u64) -> Self {
        Self {
            args,
            block_number,
            log_index,
        }
    }

    /// Kind of the carried event.
    pub fn kind(&self) -> EventKind {
        self.args.kind()
    }

    /// Chain coordinates of the entry.
    pub fn meta(&self) -> EventMeta {
        EventMeta::new(self.block_number, self.log_index)
    }
}

/// topic0 of the given event kind.
pub fn signature_hash(kind: EventKind) -> B256 {
    match kind {
        EventKind::OrganizationRegistered => OrganizationRegistered::SIGNATURE_HASH,
        EventKind::ProjectCreated => ProjectCreated::SIGNATURE_HASH,
        EventKind::IssuesAdded => IssuesAdded::SIGNATURE_HASH,
        EventKind::IssueStatusChanged => IssueStatusChanged::SIGNATURE_HASH,
        EventKind::StackAdded => StackAdded::SIGNATURE_HASH,
    }
}

/// Decode an Alloy log of the expected kind into a raw entry.
pub fn decode_log(kind: EventKind, log: &Log) -> Result<RawEntry> {
    let args = match kind {
        EventKind::OrganizationRegistered => {
            RawEventArgs::OrganizationRegistered(decode_args(kind, log)?)
        }
        EventKind::ProjectCreated => RawEventArgs::ProjectCreated(decode_args(kind, log)?),
        EventKind::IssuesAdded => RawEventArgs::IssuesAdded(decode_args(kind, log)?),
        EventKind::IssueStatusChanged => RawEventArgs::IssueStatusChanged(decode_args(kind, log)?),
        EventKind::StackAdded => RawEventArgs::StackAdded(decode_args(kind, log)?),
    };

    let block_number = log.block_number.ok_or_else(|| IndexerError::Decode {
        kind,
        reason: "log missing block_number".to_string(),
    })?;
    let log_index = log.log_index.ok_or_else(|| IndexerError::Decode {
        kind,
        reason: "log missing log_index".to_string(),
    })?;

    Ok(RawEntry::new(args, block_number, log_index))
}

fn decode_args<E: SolEvent>(kind: EventKind, log: &Log) -> Result<E> {
    E::decode_log(log.as_ref(), true)
        .map(|decoded| decoded.data)
        .map_err(|e| IndexerError::Decode {
            kind,
            reason: e.to_string(),
        })
}
