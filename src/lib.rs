//! Local, searchable mirror of a remote mail store.
//!
//! Folders are reconciled against the store by [`sync::Synchronizer`],
//! incoming inbox mail is routed by [`classifier`], and [`query::QueryService`]
//! serves paged, thread-grouped views of the cache. [`engine::MailEngine`]
//! ties these together for the calling layer.

pub mod classifier;
pub mod config;
pub mod db;
pub mod document;
pub mod engine;
pub mod error;
pub mod filters;
pub mod folders;
pub mod models;
pub mod query;
pub mod remote;
pub mod status;
pub mod sync;
pub mod threads;

pub use config::Config;
pub use engine::MailEngine;
pub use error::{Error, Result};
pub use query::{PAGE_SIZE, Page, View};
pub use sync::{SyncOutcome, SyncReport};
pub use threads::{Thread, ThreadMember};
