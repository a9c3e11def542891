//! Streaming Request Lifecycle
//!
//! Two layers turn a streamed HTTP body into typed records:
//!
//! ```text
//!   InferenceApi::open_stream ──► ByteStream (arbitrary chunk boundaries)
//!                                     │
//!                          RequestChannel::next()
//!                    (cancellation checked per chunk)
//!                                     │
//!                                     ▼
//!                      StreamDecoder ──► one record per line
//! ```
//!
//! - [`StreamDecoder`] is synchronous and pull-based; it can be driven from
//!   any source of byte chunks, async or not.
//! - [`RequestChannel`] owns one call: registry entry, cancellation token,
//!   transport body and decoder.

mod channel;
mod decoder;

pub use channel::{stream_chat, stream_generate, stream_pull, RequestChannel};
pub use decoder::{decode_chunks, DecodePoll, DecodedRecords, DecoderStats, StreamDecoder};
