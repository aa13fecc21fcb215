//! End-to-end scenarios against the in-memory store and broker doubles, covering the
//! six cluster_size=2/shard-0 scenarios this system is meant to satisfy: a clean join,
//! a late book with redeliver-until-joined, a post-EOF drop, the Reviews-EOF ordering
//! guard, an already-complete barrier arriving pre-stamped, and cleaner eviction.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use review_filter_broker::{Broker, Destination, MemoryBroker};
use review_filter_core::{run_books_ingestor, run_cleaner, run_reviews_joiner, Config, QueueRef, Shared};
use review_filter_protocol::{decode, encode, Book, Eof, Packet, Review};
use review_filter_store::{MemStore, Store, EOFS_KEY};

fn config(output_queues: Vec<&str>) -> Config {
    Config {
        amqp_uri: "memory://unused".to_string(),
        book_input_queue: QueueRef {
            name: "books".to_string(),
            exchange: String::new(),
        },
        review_input_queue: QueueRef {
            name: "reviews".to_string(),
            exchange: String::new(),
        },
        output_queues: output_queues.into_iter().map(str::to_string).collect(),
        output_exchanges: Vec::new(),
        instance_id: 0,
        cluster_size: 2,
        cleanup_timeout: Duration::from_secs(600),
        storage_directory: PathBuf::from("/unused"),
    }
}

async fn publish(broker: &MemoryBroker, queue: &str, packet: &Packet) {
    broker
        .publish(&Destination::Queue(queue.to_string()), encode(packet))
        .await
        .unwrap();
}

async fn recv_packet(
    consumer: &mut Box<dyn review_filter_broker::Consumer>,
    timeout: Duration,
) -> Option<Packet> {
    match tokio::time::timeout(timeout, consumer.recv()).await {
        Ok(Ok(Some(delivery))) => Some(decode(&delivery.body).expect("well-formed test packet")),
        Ok(Ok(None)) => None,
        Ok(Err(err)) => panic!("broker error: {err}"),
        Err(_) => None,
    }
}

/// Scenario 1: Book, Review, then both EOF tokens arriving already stamped by the
/// other shard. Expect the enriched review, then a single downstream completed EOF.
#[tokio::test(flavor = "multi_thread")]
async fn scenario_1_join_then_downstream_eof() {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let broker = MemoryBroker::new();
    let shared = Arc::new(
        Shared::open(config(vec!["enriched"]), store, broker.clone())
            .await
            .unwrap(),
    );
    let mut enriched = broker.consume("enriched", 1).await.unwrap();

    let (_tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(run_books_ingestor(shared.clone(), rx.clone()));
    tokio::spawn(run_reviews_joiner(shared.clone(), rx));

    publish(
        &broker,
        "books",
        &Packet::Book(Book {
            title: "A".to_string(),
            author: "X".to_string(),
            client_id: 1,
            packet_id: 1,
        }),
    )
    .await;
    publish(
        &broker,
        "reviews_0",
        &Packet::Review(Review {
            title: "A".to_string(),
            score: 5.0,
            text: "great".to_string(),
            client_id: 1,
            packet_id: 2,
        }),
    )
    .await;

    match recv_packet(&mut enriched, Duration::from_secs(1)).await {
        Some(Packet::EnrichedReview(r)) => {
            assert_eq!(r.title, "A");
            assert_eq!(r.author, "X");
            assert_eq!(r.client_id, 1);
        }
        other => panic!("expected enriched review, got {other:?}"),
    }

    publish(
        &broker,
        "books",
        &Packet::Eof(Eof {
            client_id: 1,
            packet_id: 3,
            ack_instances: vec![1],
        }),
    )
    .await;
    publish(
        &broker,
        "reviews_0",
        &Packet::Eof(Eof {
            client_id: 1,
            packet_id: 4,
            ack_instances: vec![1],
        }),
    )
    .await;

    match recv_packet(&mut enriched, Duration::from_secs(1)).await {
        Some(Packet::Eof(eof)) => {
            assert_eq!(eof.client_id, 1);
            assert!(
                eof.ack_instances.is_empty(),
                "a terminal EOF strips the cluster-local ack_instances accounting"
            );
        }
        other => panic!("expected terminal EOF, got {other:?}"),
    }
}

/// Scenario 2: a review arrives before its book. It is requeued until the book is
/// stored, then the redelivered copy joins successfully.
#[tokio::test(flavor = "multi_thread")]
async fn scenario_2_late_book_then_redelivered_review_joins() {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let broker = MemoryBroker::new();
    let shared = Arc::new(
        Shared::open(config(vec!["enriched"]), store, broker.clone())
            .await
            .unwrap(),
    );
    let mut enriched = broker.consume("enriched", 1).await.unwrap();

    let (_tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(run_books_ingestor(shared.clone(), rx.clone()));
    tokio::spawn(run_reviews_joiner(shared.clone(), rx));

    publish(
        &broker,
        "reviews_0",
        &Packet::Review(Review {
            title: "B".to_string(),
            score: 3.0,
            text: "ok".to_string(),
            client_id: 2,
            packet_id: 1,
        }),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        shared.is_requeue_pending(2).await,
        "a miss before EOF-seen must mark requeue-pending"
    );

    publish(
        &broker,
        "books",
        &Packet::Book(Book {
            title: "B".to_string(),
            author: "Y".to_string(),
            client_id: 2,
            packet_id: 2,
        }),
    )
    .await;

    match recv_packet(&mut enriched, Duration::from_secs(2)).await {
        Some(Packet::EnrichedReview(r)) => {
            assert_eq!(r.title, "B");
            assert_eq!(r.author, "Y");
            assert_eq!(r.client_id, 2);
        }
        other => panic!("expected enriched review after late book, got {other:?}"),
    }
}

/// Scenario 3: once a client's Books-EOF has completed, a review whose book never
/// arrived is dropped silently rather than requeued forever.
#[tokio::test(flavor = "multi_thread")]
async fn scenario_3_post_eof_miss_is_dropped_silently() {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let broker = MemoryBroker::new();
    let shared = Arc::new(
        Shared::open(config(vec!["enriched"]), store, broker.clone())
            .await
            .unwrap(),
    );
    let mut enriched = broker.consume("enriched", 1).await.unwrap();

    let (_tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(run_books_ingestor(shared.clone(), rx.clone()));
    tokio::spawn(run_reviews_joiner(shared.clone(), rx));

    publish(
        &broker,
        "books",
        &Packet::Eof(Eof {
            client_id: 3,
            packet_id: 10,
            ack_instances: vec![1],
        }),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(shared.is_eof_seen(3).await);

    publish(
        &broker,
        "reviews_0",
        &Packet::Review(Review {
            title: "Z".to_string(),
            score: 1.0,
            text: "never".to_string(),
            client_id: 3,
            packet_id: 11,
        }),
    )
    .await;

    assert_eq!(
        recv_packet(&mut enriched, Duration::from_millis(300)).await,
        None,
        "a miss after EOF-seen must never be emitted downstream"
    );
}

/// Scenario 4: a Reviews-EOF token arrives while books for the client may still be in
/// flight. It must be requeued unchanged until the Books-EOF barrier completes, only
/// then joining its own barrier.
#[tokio::test(flavor = "multi_thread")]
async fn scenario_4_reviews_eof_waits_for_books_eof() {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let broker = MemoryBroker::new();
    let shared = Arc::new(
        Shared::open(config(vec!["enriched"]), store, broker.clone())
            .await
            .unwrap(),
    );
    let mut enriched = broker.consume("enriched", 1).await.unwrap();

    let (_tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(run_books_ingestor(shared.clone(), rx.clone()));
    tokio::spawn(run_reviews_joiner(shared.clone(), rx));

    publish(
        &broker,
        "books",
        &Packet::Book(Book {
            title: "A".to_string(),
            author: "X".to_string(),
            client_id: 4,
            packet_id: 1,
        }),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(shared.has_books(4).await);

    publish(
        &broker,
        "reviews_0",
        &Packet::Eof(Eof {
            client_id: 4,
            packet_id: 2,
            ack_instances: vec![1],
        }),
    )
    .await;

    // Give the ordering guard a few redelivery cycles to prove it keeps requeuing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        !shared.is_eof_seen(4).await,
        "books EOF has not been published yet; the guard must keep requeuing"
    );

    publish(
        &broker,
        "books",
        &Packet::Eof(Eof {
            client_id: 4,
            packet_id: 3,
            ack_instances: vec![1],
        }),
    )
    .await;

    match recv_packet(&mut enriched, Duration::from_secs(2)).await {
        Some(Packet::Eof(eof)) => assert_eq!(eof.client_id, 4),
        other => panic!("expected the reviews EOF to complete once books EOF arrived, got {other:?}"),
    }
}

/// Scenario 5: a Books-EOF token arrives already stamped by the other shard. This
/// shard's own stamp completes the barrier, so EOFS is persisted but nothing is
/// re-emitted onto the books queue.
#[tokio::test(flavor = "multi_thread")]
async fn scenario_5_pre_stamped_books_eof_completes_without_reemission() {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let broker = MemoryBroker::new();
    let shared = Arc::new(
        Shared::open(config(vec!["enriched"]), store.clone(), broker.clone())
            .await
            .unwrap(),
    );

    let (_tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(run_books_ingestor(shared.clone(), rx));

    publish(
        &broker,
        "books",
        &Packet::Eof(Eof {
            client_id: 5,
            packet_id: 1,
            ack_instances: vec![1],
        }),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(shared.is_eof_seen(5).await);

    let raw = store.get(EOFS_KEY).await.unwrap().expect("EOFS snapshot persisted");
    let ids: Vec<u64> = serde_json::from_slice(&raw).unwrap();
    assert!(ids.contains(&5));
}

/// Scenario 6: a client idle past cleanup_timeout is evicted by the cleaner, with no
/// downstream emission.
#[tokio::test(flavor = "multi_thread")]
async fn scenario_6_cleaner_evicts_idle_client() {
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let broker = MemoryBroker::new();
    let mut cfg = config(vec!["enriched"]);
    cfg.cleanup_timeout = Duration::from_millis(30);
    let shared = Arc::new(Shared::open(cfg, store.clone(), broker.clone()).await.unwrap());

    shared.add_book(7, "T", "A").await.unwrap();
    shared.touch_activity(7).await;

    let (_tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(run_cleaner(shared.clone(), rx));

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!shared.has_books(7).await, "cleaner must reset idle client state");
    let keys = store.get_keys(review_filter_store::BOOKS_PREFIX).await.unwrap();
    assert!(
        keys.iter().all(|(_, secondary)| secondary != "7"),
        "cleaner must remove the client's persisted books key"
    );
}
