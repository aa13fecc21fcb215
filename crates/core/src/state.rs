use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use review_filter_broker::Broker;
use review_filter_store::{books_key, parse_client_id, Store, EOFS_KEY, REQUEUE_EOF_KEY};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::CoreError;

/// The book index, EOF-seen set, and requeue-pending set: everything the
/// `persistence_lock` guards, in memory and on disk alike.
#[derive(Default)]
struct PersistedState {
    book_index: HashMap<u64, HashMap<String, String>>,
    eof_seen: HashSet<u64>,
    requeue_pending: HashSet<u64>,
}

/// The owned state of one shard: its persistence handle, its broker connection, and
/// the two leaf locks described in §5 (`persistence_lock`, `state_lock`). Every
/// composite mutation (in-memory update plus its matching persistence write) happens
/// while holding exactly one of these locks.
pub struct Shared {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub broker: Arc<dyn Broker>,
    persistence: Mutex<PersistedState>,
    activity: Mutex<HashMap<u64, Instant>>,
}

impl Shared {
    /// Rebuilds in-memory state from the store: enumerates `BOOKS_<client_id>` keys,
    /// reads `EOFS` and `REQUEUE_EOF`, and seeds `last-activity` with the current time
    /// for every client already past its Books-EOF barrier, per §4.3.
    pub async fn open(
        config: Config,
        store: Arc<dyn Store>,
        broker: Arc<dyn Broker>,
    ) -> Result<Self, CoreError> {
        let mut book_index = HashMap::new();
        for (key, secondary) in store.get_keys(review_filter_store::BOOKS_PREFIX).await? {
            let Some(client_id) = parse_client_id(&secondary) else {
                tracing::warn!(key, "skipping books key with unparseable client id");
                continue;
            };
            let raw = store.get(&key).await?.unwrap_or_default();
            book_index.insert(client_id, decode_book_list(&raw, &key));
        }

        let eof_seen = load_id_set(store.as_ref(), EOFS_KEY).await?;
        let requeue_pending = load_id_set(store.as_ref(), REQUEUE_EOF_KEY).await?;

        let now = Instant::now();
        let activity = eof_seen.iter().map(|&id| (id, now)).collect();

        Ok(Shared {
            config,
            store,
            broker,
            persistence: Mutex::new(PersistedState {
                book_index,
                eof_seen,
                requeue_pending,
            }),
            activity: Mutex::new(activity),
        })
    }

    pub async fn touch_activity(&self, client_id: u64) {
        self.activity.lock().await.insert(client_id, Instant::now());
    }

    /// Clients whose last activity is older than `timeout`.
    pub async fn idle_clients(&self, timeout: Duration) -> Vec<u64> {
        let now = Instant::now();
        self.activity
            .lock()
            .await
            .iter()
            .filter(|(_, last)| now.duration_since(**last) > timeout)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Inserts `(title, author)` into `client_id`'s book index and appends it to the
    /// persistent list. Does not touch `last-activity`; callers update that separately,
    /// matching the source's ordering.
    pub async fn add_book(&self, client_id: u64, title: &str, author: &str) -> Result<(), CoreError> {
        let mut state = self.persistence.lock().await;
        state
            .book_index
            .entry(client_id)
            .or_default()
            .insert(title.to_string(), author.to_string());
        self.store
            .append(&books_key(client_id), &encode_book_pair(title, author))
            .await?;
        Ok(())
    }

    /// Looks up `title` in `client_id`'s book index, returning the author if present.
    pub async fn lookup_book(&self, client_id: u64, title: &str) -> Option<String> {
        self.persistence
            .lock()
            .await
            .book_index
            .get(&client_id)
            .and_then(|books| books.get(title))
            .cloned()
    }

    /// True if `client_id` has any books recorded at all (used by the Reviews-EOF
    /// ordering guard: a non-empty book index means books may still be arriving).
    pub async fn has_books(&self, client_id: u64) -> bool {
        self.persistence
            .lock()
            .await
            .book_index
            .get(&client_id)
            .is_some_and(|books| !books.is_empty())
    }

    pub async fn is_eof_seen(&self, client_id: u64) -> bool {
        self.persistence.lock().await.eof_seen.contains(&client_id)
    }

    /// Adds `client_id` to `EOF-seen` and persists the updated set, per §4.1 step 2.
    pub async fn mark_eof_seen(&self, client_id: u64) -> Result<(), CoreError> {
        let mut state = self.persistence.lock().await;
        state.eof_seen.insert(client_id);
        persist_id_set(self.store.as_ref(), EOFS_KEY, &state.eof_seen).await
    }

    pub async fn is_requeue_pending(&self, client_id: u64) -> bool {
        self.persistence
            .lock()
            .await
            .requeue_pending
            .contains(&client_id)
    }

    pub async fn add_requeue_pending(&self, client_id: u64) -> Result<(), CoreError> {
        let mut state = self.persistence.lock().await;
        if state.requeue_pending.insert(client_id) {
            persist_id_set(self.store.as_ref(), REQUEUE_EOF_KEY, &state.requeue_pending).await?;
        }
        Ok(())
    }

    /// Removes `client_id` from `Requeue-pending`, returning whether it was present.
    pub async fn remove_requeue_pending(&self, client_id: u64) -> Result<bool, CoreError> {
        let mut state = self.persistence.lock().await;
        let was_present = state.requeue_pending.remove(&client_id);
        if was_present {
            persist_id_set(self.store.as_ref(), REQUEUE_EOF_KEY, &state.requeue_pending).await?;
        }
        Ok(was_present)
    }

    /// `reset_filter(client_id)`: drops in-memory state before deleting its persisted
    /// counterpart, so a crash mid-sequence leaves recovery to rebuild (possibly
    /// stale) state that the next idempotent reset cleans up again. See §4.5.
    pub async fn reset_filter(&self, client_id: u64) -> Result<(), CoreError> {
        {
            let mut state = self.persistence.lock().await;
            state.book_index.remove(&client_id);
            self.store.delete_keys(&books_key(client_id)).await?;

            state.eof_seen.remove(&client_id);
            persist_id_set(self.store.as_ref(), EOFS_KEY, &state.eof_seen).await?;

            state.requeue_pending.remove(&client_id);
            persist_id_set(self.store.as_ref(), REQUEUE_EOF_KEY, &state.requeue_pending).await?;
        }
        self.activity.lock().await.remove(&client_id);
        Ok(())
    }
}

fn encode_book_pair(title: &str, author: &str) -> Vec<u8> {
    // serialization of a well-formed two-string tuple is infallible.
    serde_json::to_vec(&(title, author)).expect("book pair serialization is infallible")
}

fn decode_book_list(raw: &[u8], key: &str) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(raw);
    let mut books = HashMap::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<(String, String)>(line) {
            Ok((title, author)) => {
                books.insert(title, author);
            }
            Err(err) => {
                // Tolerates truncation of the very last record after a crash mid-append.
                tracing::warn!(key, error = %err, "dropping unparseable trailing book record");
            }
        }
    }
    books
}

async fn load_id_set(store: &dyn Store, key: &'static str) -> Result<HashSet<u64>, CoreError> {
    match store.get(key).await? {
        None => Ok(HashSet::new()),
        Some(raw) => {
            let ids: Vec<u64> = serde_json::from_slice(&raw)
                .map_err(|source| CoreError::CorruptSnapshot { key, source })?;
            Ok(ids.into_iter().collect())
        }
    }
}

async fn persist_id_set(
    store: &dyn Store,
    key: &'static str,
    ids: &HashSet<u64>,
) -> Result<(), CoreError> {
    let mut sorted: Vec<u64> = ids.iter().copied().collect();
    sorted.sort_unstable();
    let encoded = serde_json::to_vec(&sorted).expect("id set serialization is infallible");
    store.put(key, &encoded).await?;
    Ok(())
}
