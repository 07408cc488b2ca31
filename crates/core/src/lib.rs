//! # issuetrack-core
//!
//! Domain types shared by the issue-tracker chain mirror.
//!
//! The IssueTracker contract emits five events. This crate gives them a typed
//! shape ([`ChainEvent`]), names their kinds ([`EventKind`]), and defines the
//! issue status progression ([`IssueStatus`]). Nothing here performs I/O.

#![warn(missing_docs)]

pub mod error;
pub mod types;

pub use error::{CoreError, Result};
pub use types::*;
