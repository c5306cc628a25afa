//! # Protocol Errors

use thiserror::Error;

/// Errors raised while encoding or decoding wire frames.
///
/// Decoding never fails for a frame that is merely incomplete: partial data
/// stays buffered until the rest arrives. Only a stream that can no longer be
/// trusted is reported, and it is reported before any event of the offending
/// frame is handed out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError
{
    /// The byte stream lost framing and could not be recovered
    ///
    /// The session must be torn down; continuing would risk applying events
    /// from a misaligned stream.
    #[error("Protocol desynchronised: {0}")]
    Desync(String),

    /// A message payload does not fit into a single frame
    #[error("Payload of {size} bytes exceeds the {max} byte frame limit")]
    Oversized
    {
        /// Size of the payload that was rejected
        size: usize,
        /// Maximum payload size accepted by the protocol
        max: usize,
    },

    /// A checksum-valid frame whose payload does not match its kind
    #[error("Malformed {kind} payload: {reason}")]
    Malformed
    {
        /// Name of the frame kind that failed to parse
        kind: &'static str,
        /// What was wrong with the payload
        reason: String,
    },
}

/// Convenience alias for protocol results.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
