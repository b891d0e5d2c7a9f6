//! Relato Core - Shared types, crypto, envelope codec and peer transport
//!
//! This crate provides the building blocks for the Relato offline-first
//! incident reporting system: the incident data model, passphrase-derived
//! payload encryption, the wire codec, and the one-message-per-connection
//! peer transport.

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod incident;
pub mod media;
pub mod passphrase;
pub mod transport;

pub use error::{CryptoError, Error, ProtocolError, Result, SyncError, TransportError};
pub use incident::{Incident, IncidentDraft, Origin, SyncState};
pub use media::MediaStore;
pub use passphrase::{FixedPassphraseProvider, PassphraseCache, PassphraseProvider};
pub use transport::{PeerAddress, PeerClient, PeerComms, PeerEvent, PeerServer, DEFAULT_PORT};
