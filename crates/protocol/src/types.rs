use serde::{Deserialize, Serialize};

/// A book record: title and author, scoped to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub client_id: u64,
    pub packet_id: u64,
}

/// A review record awaiting a join against a client's book index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub title: String,
    pub score: f64,
    pub text: String,
    pub client_id: u64,
    pub packet_id: u64,
}

/// A review successfully joined with the author of its book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedReview {
    pub title: String,
    pub score: f64,
    pub text: String,
    pub author: String,
    pub client_id: u64,
    pub packet_id: u64,
}

/// A distributed end-of-stream barrier token. `ack_instances` grows by one shard id
/// each time the token is stamped, in ring order; the barrier is complete once every
/// shard has stamped it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eof {
    pub client_id: u64,
    pub packet_id: u64,
    pub ack_instances: Vec<u32>,
}

impl Eof {
    /// A fresh EOF with no shards having stamped it yet.
    pub fn new(client_id: u64, packet_id: u64) -> Self {
        Eof {
            client_id,
            packet_id,
            ack_instances: Vec::new(),
        }
    }

    /// A terminal EOF carrying just the client and packet id, emitted downstream once the
    /// barrier completes locally. Per-barrier `ack_instances` are a shard-cluster-local
    /// accounting detail and are stripped before forwarding.
    pub fn completed(client_id: u64, packet_id: u64) -> Self {
        Eof::new(client_id, packet_id)
    }

    pub fn has_stamped(&self, instance_id: u32) -> bool {
        self.ack_instances.contains(&instance_id)
    }

    pub fn stamp(&mut self, instance_id: u32) {
        if !self.has_stamped(instance_id) {
            self.ack_instances.push(instance_id);
        }
    }

    pub fn is_complete(&self, cluster_size: u32) -> bool {
        self.ack_instances.len() as u32 == cluster_size
    }
}

/// The decoded, tagged union of every packet type that can arrive on the books or
/// reviews stream. Dispatch on this enum is exhaustive by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Book(Book),
    Review(Review),
    EnrichedReview(EnrichedReview),
    Eof(Eof),
}

impl Packet {
    pub fn client_id(&self) -> u64 {
        match self {
            Packet::Book(b) => b.client_id,
            Packet::Review(r) => r.client_id,
            Packet::EnrichedReview(e) => e.client_id,
            Packet::Eof(e) => e.client_id,
        }
    }
}
