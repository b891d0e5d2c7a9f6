//! Relato Node - Local store, sync coordinator and filesystem media
//!
//! Ties the building blocks from `relato-core` to a concrete node: a
//! SQLite-backed incident store, the periodic drain toward the remote
//! incident service, and a filesystem media store for received photos.

pub mod config;
pub mod media_fs;
pub mod remote;
pub mod store;
pub mod sync;

pub use config::Config;
pub use media_fs::FsMediaStore;
pub use remote::{NoRemoteService, RemoteIncidentService, SubmitOutcome};
pub use store::IncidentStore;
pub use sync::{DrainReport, SyncCoordinator};
