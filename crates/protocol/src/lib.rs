//! Wire types and framing for the books/reviews streams.
//!
//! Every message on the wire is a one-byte type tag followed by a JSON body. The tag lets
//! [`decode`] dispatch without peeking into the payload, and keeps `Eof` tokens distinguishable
//! from data packets without a schema registry.

mod codec;
mod types;

pub use codec::{decode, encode, DecodeError, PacketType};
pub use types::{Book, Eof, EnrichedReview, Packet, Review};
