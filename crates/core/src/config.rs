use std::path::PathBuf;
use std::time::Duration;

/// A queue the worker either broadcasts to or shards against, paired with the
/// exchange it's bound to (empty ⇒ direct queue, no exchange).
#[derive(Debug, Clone)]
pub struct QueueRef {
    pub name: String,
    pub exchange: String,
}

/// Everything a shard needs to know about its place in the cluster and the topology
/// around it. Replaces the source's module-level `RABBITMQ_HOST`/`PORT` globals with a
/// value passed explicitly at construction.
#[derive(Debug, Clone)]
pub struct Config {
    pub amqp_uri: String,
    pub book_input_queue: QueueRef,
    pub review_input_queue: QueueRef,
    pub output_queues: Vec<String>,
    pub output_exchanges: Vec<String>,
    pub instance_id: u32,
    pub cluster_size: u32,
    pub cleanup_timeout: Duration,
    pub storage_directory: PathBuf,
}

impl Config {
    /// The queue name this shard actually consumes reviews from:
    /// `<review_input_queue.name>_<instance_id>`.
    pub fn review_queue_name(&self) -> String {
        format!("{}_{}", self.review_input_queue.name, self.instance_id)
    }

    /// How often the cleaner wakes up to scan for idle clients.
    pub fn cleaner_interval(&self) -> Duration {
        self.cleanup_timeout / 10
    }
}
