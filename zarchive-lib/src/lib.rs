#![allow(clippy::collapsible_if)]
#![allow(clippy::collapsible_else_if)]

//! Zarchive-lib is the core of zarchive: a persistent, searchable chat
//! archive with live, bidirectional paging subscriptions. The canonical
//! binary crate is `zarchive`.
//!
//! The big pieces: a two-tier reverse [`index`] (memory-mapped frozen tier
//! plus an in-memory dynamic overlay), [`iterators`] compiled from the
//! [`query`] language, the [`coordinator`] that owns the index and every
//! subscription, the [`comm`] layer that makes flaky channels behave like
//! exactly-once sessions, and the [`server`] loop that runs it all as a
//! single cooperative task.

#[macro_use]
mod json;

#[macro_use]
extern crate lazy_static;

pub mod comm;

pub mod coordinator;
pub use coordinator::{Coordinator, Subscription};

mod error;
pub use error::{Error, ErrorKind};

pub mod index;
pub use index::{ConsolidatedIndex, IndexBuilder};

pub mod iterators;

pub mod logfiles;

/// The tunable constants of the archive.
pub mod magic;

mod paths;
pub use paths::ArchivePaths;

pub mod protocol;

pub mod query;

mod server;
pub use server::{Server, ServerEvent};

pub mod tokenize;

pub mod zgram;

#[cfg(test)]
pub(crate) mod testutil;

/// Builds a frozen index over everything if none has been published yet,
/// then opens the consolidated index. This is the standard bring-up path.
pub fn open_or_bootstrap(paths: std::sync::Arc<ArchivePaths>) -> Result<ConsolidatedIndex, Error> {
    if !paths.index_path().exists() {
        tracing::info!("no frozen index found; building one from the logs");
        IndexBuilder::clear_scratch(&paths)?;
        IndexBuilder::build(
            &paths,
            &logfiles::InterFileRange::everything(true),
            &logfiles::InterFileRange::everything(false),
        )?;
        paths.publish_build()?;
    }
    ConsolidatedIndex::open(paths)
}
