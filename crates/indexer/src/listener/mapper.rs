//! Raw entry → domain event mapping. Pure, no I/O.

use alloy::primitives::U256;
use issuetrack_core::{ChainEvent, EventKind, EventMeta, IssueStatus};

use super::events::{RawEntry, RawEventArgs};
use crate::error::{IndexerError, Result};

/// Map a raw entry to exactly one typed domain event plus its coordinates.
///
/// Status indices outside 0..=3 are rejected here with `UnknownStatusIndex`,
/// so they never reach the engine.
pub fn map_entry(entry: &RawEntry) -> Result<(ChainEvent, EventMeta)> {
    let event = match &entry.args {
        RawEventArgs::OrganizationRegistered(args) => ChainEvent::OrganizationRegistered {
            id: args.id.clone(),
            name: args.name.clone(),
            description: args.description.clone(),
            contact: args.contact.clone(),
        },
        RawEventArgs::ProjectCreated(args) => ChainEvent::ProjectCreated {
            project_id: args.projectId.to_string(),
            name: args.name.clone(),
            organization_id: args.organizationId.clone(),
        },
        RawEventArgs::IssuesAdded(args) => ChainEvent::IssuesAdded {
            project_id: args.projectId.to_string(),
            issue_ids: args.issueIds.clone(),
        },
        RawEventArgs::IssueStatusChanged(args) => ChainEvent::IssueStatusChanged {
            issue_ids: args.issueIds.clone(),
            status: IssueStatus::from_index(args.status)?,
        },
        RawEventArgs::StackAdded(args) => ChainEvent::StackAdded {
            project_id: args.projectId.to_string(),
            name: args.name.clone(),
            version: version_to_i64(args.version)?,
        },
    };

    Ok((event, entry.meta()))
}

fn version_to_i64(version: U256) -> Result<i64> {
    i64::try_from(version).map_err(|_| IndexerError::Decode {
        kind: EventKind::StackAdded,
        reason: format!("stack version {version} does not fit in i64"),
    })
}
