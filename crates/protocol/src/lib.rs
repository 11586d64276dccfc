//! Wire protocol for the Tether control channel.
//!
//! Everything that crosses the channel is a JSON [`Envelope`] — a
//! (channel, action) pair plus an opaque payload. Binary payloads never
//! travel raw inside the text channel; they pass through the [`codec`]
//! transform (gzip + base64) first.

pub mod codec;
pub mod constants;
pub mod envelope;

pub use codec::{CodecError, unwrap, wrap};
pub use envelope::{Envelope, EnvelopeError};
