//! Envelope codec: incident <-> wire message
//!
//! A wire message is newline-terminated UTF-8 text carrying either a JSON
//! payload with stable key names or, when a passphrase was supplied at
//! encode time, the base64 crypto blob produced from that JSON.
//!
//! Decoding first tries the plaintext parse; anything that is not JSON is
//! treated as an encrypted blob and run through an explicit retry-once
//! state machine (`AwaitingPassphrase -> Decrypting -> Decoded | Failed`).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::media::MediaStore;
use crate::passphrase::{PassphraseCache, PassphraseProvider};
use crate::{crypto, Error, Incident, IncidentDraft, Result};

/// Wire timestamp format, kept for compatibility with existing peers.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The JSON payload exchanged between peers.
///
/// Optional fields are omitted when absent; an absent `urgency` decodes as
/// `false`. The claimed `id` is advisory only: receivers assign their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    id: i64,
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    symbolic_location: Option<String>,
    #[serde(default)]
    urgency: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    photo_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    photo_inline_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    video_ref: Option<String>,
}

fn is_remote_ref(media_ref: &str) -> bool {
    media_ref.starts_with("http://") || media_ref.starts_with("https://")
}

/// Serialize an incident into a wire message.
///
/// A local (non-URL) photo reference is read back through the media store
/// in its bounded, recompressed form and embedded as base64; URL references
/// and videos are passed by reference only. When `passphrase` is given the
/// JSON payload is encrypted and the crypto blob becomes the message.
pub fn encode(
    incident: &Incident,
    passphrase: Option<&str>,
    media: &dyn MediaStore,
) -> Result<String> {
    let photo_inline_base64 = match incident.photo_ref.as_deref() {
        Some(media_ref) if !is_remote_ref(media_ref) => {
            match media.read_for_embedding(media_ref) {
                Ok(bytes) => Some(BASE64.encode(bytes)),
                Err(e) => {
                    tracing::warn!("skipping photo embed for {}: {}", media_ref, e);
                    None
                }
            }
        }
        _ => None,
    };

    let payload = WirePayload {
        id: incident.id,
        description: incident.description.clone(),
        symbolic_location: incident.symbolic_location.clone(),
        urgency: incident.urgent,
        timestamp: Some(incident.timestamp.format(TIMESTAMP_FORMAT).to_string()),
        latitude: incident.latitude,
        longitude: incident.longitude,
        photo_ref: incident.photo_ref.clone(),
        photo_inline_base64,
        video_ref: incident.video_ref.clone(),
    };

    let json = serde_json::to_string(&payload)?;

    match passphrase {
        Some(pass) => Ok(crypto::encrypt(json.as_bytes(), pass)?),
        None => Ok(json),
    }
}

/// Decode state machine for encrypted messages.
enum DecodeState {
    AwaitingPassphrase { attempt: u8 },
    Decrypting { passphrase: String, attempt: u8 },
    Failed,
}

/// Decode a wire message into an incident draft.
///
/// Plaintext JSON decodes directly. Otherwise the message is treated as a
/// crypto blob: the passphrase comes from `cache` when present, else from
/// the async `provider` (a suspension point; the caller's transport task is
/// not blocked). A failed decrypt clears the cache and re-prompts exactly
/// once; a second failure reports [`ProtocolError::UndecodableMessage`].
pub async fn decode<P: PassphraseProvider + ?Sized>(
    message: &str,
    cache: &mut PassphraseCache,
    provider: &P,
    media: &dyn MediaStore,
) -> Result<IncidentDraft> {
    let message = message.trim_end_matches('\n');

    // Plaintext mode, kept for backward compatibility.
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(message) {
        return payload_to_draft(value, media);
    }

    let mut state = match cache.get() {
        Some(pass) => DecodeState::Decrypting {
            passphrase: pass.to_string(),
            attempt: 1,
        },
        None => DecodeState::AwaitingPassphrase { attempt: 1 },
    };

    loop {
        state = match state {
            DecodeState::AwaitingPassphrase { attempt } => {
                let passphrase = provider.request().await?;
                cache.set(passphrase.clone());
                DecodeState::Decrypting { passphrase, attempt }
            }
            DecodeState::Decrypting { passphrase, attempt } => {
                match crypto::decrypt(message, &passphrase) {
                    Ok(plain) => {
                        let text = String::from_utf8(plain).map_err(|_| {
                            Error::Protocol(ProtocolError::MalformedPayload(
                                "decrypted payload is not UTF-8".to_string(),
                            ))
                        })?;
                        let value =
                            serde_json::from_str::<serde_json::Value>(&text).map_err(|e| {
                                Error::Protocol(ProtocolError::MalformedPayload(format!(
                                    "decrypted payload is not JSON: {e}"
                                )))
                            })?;
                        return payload_to_draft(value, media);
                    }
                    Err(e) => {
                        tracing::warn!("decrypt attempt {} failed: {}", attempt, e);
                        cache.clear();
                        if attempt >= 2 {
                            DecodeState::Failed
                        } else {
                            DecodeState::AwaitingPassphrase {
                                attempt: attempt + 1,
                            }
                        }
                    }
                }
            }
            DecodeState::Failed => {
                return Err(ProtocolError::UndecodableMessage.into());
            }
        };
    }
}

/// Convert a parsed JSON payload into a draft, materializing any inline
/// photo through the media store.
fn payload_to_draft(value: serde_json::Value, media: &dyn MediaStore) -> Result<IncidentDraft> {
    let payload: WirePayload = serde_json::from_value(value)
        .map_err(|e| Error::Protocol(ProtocolError::MalformedPayload(e.to_string())))?;

    let timestamp = match payload.timestamp.as_deref() {
        Some(raw) => match NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
            Ok(naive) => DateTime::from_naive_utc_and_offset(naive, Utc),
            Err(e) => {
                tracing::warn!("unparseable timestamp {:?}: {}; using receive time", raw, e);
                Utc::now()
            }
        },
        None => Utc::now(),
    };

    // Inline photo bytes become a local reference; the draft never carries
    // raw media.
    let photo_ref = match payload.photo_inline_base64.as_deref() {
        Some(inline) => match BASE64.decode(inline.trim()) {
            Ok(bytes) => Some(media.write_bytes(&bytes)?),
            Err(e) => {
                tracing::warn!("discarding undecodable inline photo: {}", e);
                payload.photo_ref
            }
        },
        None => payload.photo_ref,
    };

    let draft = IncidentDraft {
        description: payload.description,
        symbolic_location: payload.symbolic_location,
        latitude: payload.latitude,
        longitude: payload.longitude,
        timestamp,
        urgent: payload.urgency,
        photo_ref,
        video_ref: payload.video_ref,
    };

    draft
        .validate()
        .map_err(|e| Error::Protocol(ProtocolError::MalformedPayload(e)))?;

    Ok(draft)
}
