//! Envelope serialization and stream framing.
//!
//! Frame format: `[u32 len_le][payload]`. The length prefix is checked
//! against a sanity cap before any allocation; a reader that observes a
//! corrupt length fails the connection rather than guessing at resync.

use std::io::{self, Read, Write};

use crate::constants::MAX_FRAME_BYTES;
use crate::errors::ProtocolError;
use crate::messages::Envelope;

const LEN_PREFIX: usize = size_of::<u32>();

/// Serialize an envelope to its JSON frame payload.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Decode a frame payload into an envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Write one length-prefixed frame.
pub fn write_frame(w: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame exceeds u32 length"))?;
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            ProtocolError::FrameTooLarge { len, max: MAX_FRAME_BYTES }.to_string(),
        ));
    }
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

/// Read one length-prefixed frame. Returns `None` on a clean end of stream
/// (EOF before any prefix byte).
pub fn read_frame(r: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; LEN_PREFIX];
    match r.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(prefix);
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            ProtocolError::FrameTooLarge { len, max: MAX_FRAME_BYTES }.to_string(),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(Some(payload))
}
