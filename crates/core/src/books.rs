use std::sync::Arc;

use review_filter_broker::Destination;
use review_filter_protocol::{decode, Eof, Packet};

use crate::eof;
use crate::error::CoreError;
use crate::state::Shared;
use crate::Shutdown;

/// Runs the Books Ingestor loop until `shutdown` fires or the broker channel closes.
///
/// Subscribes to the broadcast book queue; for each `Book` packet, inserts it into the
/// index and persists it (§4.1). For each Books-EOF token, stamps the local barrier and
/// either completes it silently or re-emits the token to the next shard (§4.1). Per the
/// design notes, EOF tokens on the books stream are auto-acked: there is nothing
/// meaningful to requeue them against.
pub async fn run(shared: Arc<Shared>, mut shutdown: Shutdown) -> Result<(), CoreError> {
    let queue = &shared.config.book_input_queue;
    if queue.exchange.is_empty() {
        shared.broker.declare_queue(&queue.name).await?;
    } else {
        shared
            .broker
            .declare_fanout(&queue.exchange, &queue.name)
            .await?;
    }

    let mut consumer = shared.broker.consume(&queue.name, 1).await?;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("books ingestor stopping");
                break;
            }
            delivery = consumer.recv() => {
                let Some(delivery) = delivery? else {
                    tracing::info!("books queue closed, ingestor stopping");
                    break;
                };
                match decode(&delivery.body) {
                    Ok(packet) => handle_packet(&shared, packet).await?,
                    Err(err) => tracing::warn!(error = %err, "malformed book packet, dropping"),
                }
                delivery.ack().await?;
            }
        }
    }
    Ok(())
}

async fn handle_packet(shared: &Shared, packet: Packet) -> Result<(), CoreError> {
    match packet {
        Packet::Book(book) => {
            shared.add_book(book.client_id, &book.title, &book.author).await?;
            shared.touch_activity(book.client_id).await;
            tracing::debug!(client_id = book.client_id, title = %book.title, "stored book");
        }
        Packet::Eof(eof) => handle_books_eof(shared, eof).await?,
        other => tracing::warn!(client_id = other.client_id(), "unexpected packet on book queue"),
    }
    Ok(())
}

async fn handle_books_eof(shared: &Shared, mut token: Eof) -> Result<(), CoreError> {
    let client_id = token.client_id;
    let (just_stamped, complete) =
        eof::stamp(&mut token, shared.config.instance_id, shared.config.cluster_size);
    if just_stamped {
        shared.touch_activity(client_id).await;
    }

    shared.mark_eof_seen(client_id).await?;

    if complete {
        tracing::debug!(client_id, "books EOF barrier complete");
    } else {
        let queue = shared.config.book_input_queue.name.clone();
        shared
            .broker
            .publish(
                &Destination::Queue(queue),
                review_filter_protocol::encode(&Packet::Eof(token)),
            )
            .await?;
        tracing::debug!(client_id, "propagated books EOF");
    }
    Ok(())
}
