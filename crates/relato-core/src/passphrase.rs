//! Passphrase acquisition collaborator
//!
//! Decryption needs a human-supplied secret. The provider is asynchronous
//! so a transport task is never blocked while a person types; the cache is
//! explicit session state owned by the caller, cleared whenever a
//! decryption attempt fails.

use crate::error::ProtocolError;

/// Asynchronous source of passphrases (human-in-the-loop).
///
/// Implementations resolve when the user answers the prompt, or fail with
/// [`ProtocolError::UserCancelled`] when the user dismisses it.
#[allow(async_fn_in_trait)]
pub trait PassphraseProvider: Send + Sync {
    async fn request(&self) -> Result<String, ProtocolError>;
}

/// One cached passphrase per sharing session.
///
/// Kept by the caller and passed into the codec, so the cache's lifetime is
/// visible at the call site instead of living in ambient mutable state.
#[derive(Debug, Default)]
pub struct PassphraseCache {
    cached: Option<String>,
}

impl PassphraseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache, e.g. with the passphrase used for an outbound share.
    pub fn set(&mut self, passphrase: impl Into<String>) {
        self.cached = Some(passphrase.into());
    }

    pub fn get(&self) -> Option<&str> {
        self.cached.as_deref()
    }

    /// Forget the cached passphrase after a failed decrypt.
    pub fn clear(&mut self) {
        self.cached = None;
    }
}

/// Non-interactive provider backed by a configured passphrase.
///
/// Answers every prompt with the same secret, without limit; with no
/// passphrase configured every prompt is refused as cancelled.
pub struct FixedPassphraseProvider {
    passphrase: Option<String>,
}

impl FixedPassphraseProvider {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(passphrase.into()),
        }
    }

    /// A provider that refuses every prompt.
    pub fn refusing() -> Self {
        Self { passphrase: None }
    }
}

impl PassphraseProvider for FixedPassphraseProvider {
    async fn request(&self) -> Result<String, ProtocolError> {
        self.passphrase
            .clone()
            .ok_or(ProtocolError::UserCancelled)
    }
}

/// A provider answering prompts from a fixed script, for tests.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Each queued entry answers one prompt; `None` simulates the user
    /// cancelling. An exhausted queue also cancels.
    pub struct QueuePassphraseProvider {
        answers: Mutex<VecDeque<Option<String>>>,
        requests_served: Mutex<u32>,
    }

    impl QueuePassphraseProvider {
        pub fn new(answers: impl IntoIterator<Item = Option<String>>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().collect()),
                requests_served: Mutex::new(0),
            }
        }

        /// A provider that always answers with the same passphrase.
        pub fn fixed(passphrase: impl Into<String>) -> Self {
            let pass = passphrase.into();
            Self::new(std::iter::repeat(Some(pass)).take(32).collect::<Vec<_>>())
        }

        /// How many prompts have been answered so far.
        pub fn requests_served(&self) -> u32 {
            *self.requests_served.lock().unwrap()
        }
    }

    impl PassphraseProvider for QueuePassphraseProvider {
        async fn request(&self) -> Result<String, ProtocolError> {
            *self.requests_served.lock().unwrap() += 1;
            match self.answers.lock().unwrap().pop_front() {
                Some(Some(pass)) => Ok(pass),
                _ => Err(ProtocolError::UserCancelled),
            }
        }
    }

}
