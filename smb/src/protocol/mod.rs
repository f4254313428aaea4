//! SMB2/3 wire-format definitions.
//!
//! - `header`: the 64-byte packet header (sync and async layouts), command codes,
//!   flags and the transform header used for sealed messages.
//! - `body`: request/response bodies for every command the client issues.
//! - `message`: [`SMBMessage`](message::SMBMessage), a header paired with its body.
//!
//! Every decoder validates the structure size first and reads variable regions
//! through a bounds-checked cursor, so offsets claimed by the peer are never
//! trusted beyond the received buffer.

pub mod body;
pub mod header;
pub mod message;
