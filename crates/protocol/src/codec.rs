use crate::types::{Book, Eof, EnrichedReview, Packet, Review};

/// One-byte discriminator prefixed to every encoded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Book = 1,
    Review = 2,
    EnrichedReview = 3,
    Eof = 4,
}

impl PacketType {
    fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            1 => Ok(PacketType::Book),
            2 => Ok(PacketType::Review),
            3 => Ok(PacketType::EnrichedReview),
            4 => Ok(PacketType::Eof),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("message body is empty, missing the type tag byte")]
    EmptyMessage,

    #[error("unknown packet type tag: {0}")]
    UnknownType(u8),

    #[error("malformed json payload: {source:?}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

/// Decodes one broker message body into a tagged [`Packet`]. The first byte selects
/// which `serde_json` shape the remainder of the body is parsed as; a tag this registry
/// doesn't recognize is a [`DecodeError::UnknownType`], never a panic.
pub fn decode(body: &[u8]) -> Result<Packet, DecodeError> {
    let (&tag, payload) = body.split_first().ok_or(DecodeError::EmptyMessage)?;
    match PacketType::from_tag(tag)? {
        PacketType::Book => Ok(Packet::Book(serde_json::from_slice::<Book>(payload)?)),
        PacketType::Review => Ok(Packet::Review(serde_json::from_slice::<Review>(payload)?)),
        PacketType::EnrichedReview => Ok(Packet::EnrichedReview(serde_json::from_slice::<
            EnrichedReview,
        >(payload)?)),
        PacketType::Eof => Ok(Packet::Eof(serde_json::from_slice::<Eof>(payload)?)),
    }
}

/// Encodes a packet back to its wire form: one type byte followed by its JSON body.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let (tag, body) = match packet {
        Packet::Book(b) => (PacketType::Book, serde_json::to_vec(b)),
        Packet::Review(r) => (PacketType::Review, serde_json::to_vec(r)),
        Packet::EnrichedReview(e) => (PacketType::EnrichedReview, serde_json::to_vec(e)),
        Packet::Eof(e) => (PacketType::Eof, serde_json::to_vec(e)),
    };
    // Serializing our own well-formed structs to JSON cannot fail.
    let body = body.expect("packet serialization is infallible");
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(tag as u8);
    out.extend_from_slice(&body);
    out
}
