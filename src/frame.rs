//! Encoded still images moving through the relay.
//!
//! Outbound samples are raw base64 JPEG text with any data-URI header
//! removed. Inbound processed frames are checked to be base64 and shown
//! behind the fixed JPEG data-URI header.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;

use crate::error::RelayError;

/// Header prepended to processed frames before they reach the display.
pub const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// One sampled frame, ready to transmit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSample {
    payload: String,
}

impl FrameSample {
    /// Build a sample from a capture snapshot, dropping any data-URI header.
    ///
    /// Returns `None` when nothing is left after the header, which is what a
    /// capture surface that is not ready yet produces (`data:,`).
    #[must_use]
    pub fn from_snapshot(snapshot: &str) -> Option<Self> {
        let payload = strip_data_uri_header(snapshot).trim();
        if payload.is_empty() {
            return None;
        }
        Some(Self {
            payload: payload.to_owned(),
        })
    }

    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> String {
        self.payload
    }
}

/// The latest image returned by the processing service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedFrame {
    payload: String,
}

impl ProcessedFrame {
    /// Validate an inbound payload.
    ///
    /// A data-URI header, if the service sent one, is tolerated and removed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::EmptyPayload`] for empty input and
    /// [`RelayError::InvalidPayload`] when the text is not base64.
    pub fn from_payload(payload: &str) -> Result<Self, RelayError> {
        let payload = strip_data_uri_header(payload).trim();
        if payload.is_empty() {
            return Err(RelayError::EmptyPayload);
        }
        BASE64_STANDARD.decode(payload)?;
        Ok(Self {
            payload: payload.to_owned(),
        })
    }

    /// Raw base64 text as received.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Display value: the payload behind the JPEG data-URI header.
    #[must_use]
    pub fn data_uri(&self) -> String {
        format!("{JPEG_DATA_URI_PREFIX}{}", self.payload)
    }

    /// Decoded JPEG bytes.
    ///
    /// # Errors
    ///
    /// Never fails for frames built by [`ProcessedFrame::from_payload`]; the
    /// `Result` mirrors the underlying decoder.
    pub fn decode(&self) -> Result<Vec<u8>, RelayError> {
        Ok(BASE64_STANDARD.decode(&self.payload)?)
    }
}

/// Strip a `data:<mime>;base64,` style header, leaving the encoded payload.
///
/// Text without a `data:` header is returned unchanged.
#[must_use]
pub fn strip_data_uri_header(encoded: &str) -> &str {
    match encoded.split_once(',') {
        Some((header, payload)) if header.starts_with("data:") => payload,
        _ => encoded,
    }
}

/// Wrap raw JPEG bytes as a data URI, the form capture surfaces hand out.
#[must_use]
pub fn jpeg_data_uri(bytes: &[u8]) -> String {
    format!("{JPEG_DATA_URI_PREFIX}{}", BASE64_STANDARD.encode(bytes))
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
