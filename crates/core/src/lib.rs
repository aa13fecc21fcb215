//! The stateful heart of the review-filter worker: the book/review join, the
//! cross-shard EOF barrier, and crash-safe persistence of both. The three loops in
//! this crate (`books::run`, `reviews::run`, `cleaner::run`) are spawned as
//! independent tasks by the `worker` binary and share one [`state::Shared`] handle.

mod books;
mod cleaner;
mod config;
mod eof;
mod error;
mod reviews;
mod state;

pub use books::run as run_books_ingestor;
pub use cleaner::run as run_cleaner;
pub use config::{Config, QueueRef};
pub use error::CoreError;
pub use reviews::run as run_reviews_joiner;
pub use state::Shared;

/// Receives `true` once, exactly when the worker begins a graceful shutdown. Every
/// loop in this crate races `shutdown.changed()` against its broker `recv()` inside
/// `tokio::select!` so that a shutdown request interrupts a blocked consumer wait.
pub type Shutdown = tokio::sync::watch::Receiver<bool>;
