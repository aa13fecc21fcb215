use std::sync::Arc;

use review_filter_broker::Destination;
use review_filter_protocol::{decode, encode, Eof, EnrichedReview, Packet, Review};

use crate::error::CoreError;
use crate::state::Shared;
use crate::Shutdown;

/// Runs the Reviews Joiner loop until `shutdown` fires or the broker channel closes.
///
/// Subscribes to this shard's partition of the review queue. Each `Review` is joined
/// against the book index (§4.2); each Reviews-EOF token is guarded against the
/// books/reviews ordering race before participating in the barrier (§4.2).
pub async fn run(shared: Arc<Shared>, mut shutdown: Shutdown) -> Result<(), CoreError> {
    let queue_name = shared.config.review_queue_name();
    shared.broker.declare_queue(&queue_name).await?;

    let mut consumer = shared.broker.consume(&queue_name, 1).await?;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("reviews joiner stopping");
                break;
            }
            delivery = consumer.recv() => {
                let Some(delivery) = delivery? else {
                    tracing::info!("reviews queue closed, joiner stopping");
                    break;
                };
                match decode(&delivery.body) {
                    Ok(Packet::Review(review)) => {
                        if filter_review(&shared, &review).await? {
                            delivery.ack().await?;
                        } else {
                            shared
                                .broker
                                .publish(&Destination::Queue(queue_name.clone()), delivery.body.clone())
                                .await?;
                            delivery.ack().await?;
                        }
                    }
                    Ok(Packet::Eof(token)) => {
                        handle_reviews_eof(&shared, token, &delivery.body, &queue_name).await?;
                        delivery.ack().await?;
                    }
                    Ok(other) => {
                        tracing::warn!(
                            client_id = other.client_id(),
                            "unexpected packet on review queue"
                        );
                        delivery.ack().await?;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "malformed review packet, dropping");
                        delivery.ack().await?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Returns `Ok(true)` if the review was handled terminally (published or dropped) and
/// should simply be acked; `Ok(false)` if it must be requeued to the tail of its queue.
async fn filter_review(shared: &Shared, review: &Review) -> Result<bool, CoreError> {
    shared.touch_activity(review.client_id).await;

    if let Some(author) = shared.lookup_book(review.client_id, &review.title).await {
        let enriched = EnrichedReview {
            title: review.title.clone(),
            score: review.score,
            text: review.text.clone(),
            author,
            client_id: review.client_id,
            packet_id: review.packet_id,
        };
        publish_downstream(shared, &Packet::EnrichedReview(enriched)).await?;
        tracing::debug!(client_id = review.client_id, title = %review.title, "joined review");
        return Ok(true);
    }

    if shared.is_eof_seen(review.client_id).await {
        tracing::debug!(
            client_id = review.client_id,
            title = %review.title,
            "dropping review: book will never arrive"
        );
        return Ok(true);
    }

    shared.add_requeue_pending(review.client_id).await?;
    Ok(false)
}

async fn handle_reviews_eof(
    shared: &Shared,
    mut token: Eof,
    raw_body: &[u8],
    queue_name: &str,
) -> Result<(), CoreError> {
    let client_id = token.client_id;
    let has_books = shared.has_books(client_id).await;
    let eof_seen = shared.is_eof_seen(client_id).await;
    let requeue_pending = shared.is_requeue_pending(client_id).await;

    if (has_books && !eof_seen) || requeue_pending {
        if requeue_pending {
            shared.remove_requeue_pending(client_id).await?;
        }
        tracing::warn!(client_id, "requeuing reviews EOF: late books may still arrive");
        shared
            .broker
            .publish(&Destination::Queue(queue_name.to_string()), raw_body.to_vec())
            .await?;
        return Ok(());
    }

    if !token.has_stamped(shared.config.instance_id) {
        token.stamp(shared.config.instance_id);
        shared.reset_filter(client_id).await?;
    }

    if token.is_complete(shared.config.cluster_size) {
        let completed = Eof::completed(client_id, token.packet_id);
        publish_downstream(shared, &Packet::Eof(completed)).await?;
        tracing::debug!(client_id, "reviews EOF barrier complete, forwarded downstream");
    } else {
        shared
            .broker
            .publish(
                &Destination::Queue(queue_name.to_string()),
                encode(&Packet::Eof(token)),
            )
            .await?;
        tracing::debug!(client_id, "propagated reviews EOF");
    }
    Ok(())
}

async fn publish_downstream(shared: &Shared, packet: &Packet) -> Result<(), CoreError> {
    let body = encode(packet);
    for queue in &shared.config.output_queues {
        shared
            .broker
            .publish(&Destination::Queue(queue.clone()), body.clone())
            .await?;
    }
    for exchange in &shared.config.output_exchanges {
        shared
            .broker
            .publish(&Destination::Exchange(exchange.clone()), body.clone())
            .await?;
    }
    Ok(())
}
