//! Bulk unpin and delete for Misskey accounts.
//!
//! [`misskey::MisskeyClient`] talks to the server, [`cleanup::CleanupRunner`]
//! sequences a run and publishes [`events::ProgressEvent`]s that
//! [`reporter`] renders.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod events;
pub mod misskey;
pub mod reporter;
pub mod retry;
pub mod types;
