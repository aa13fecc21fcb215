use review_filter_protocol::Eof;

/// Stamps `instance_id` into `eof`'s `ack_instances` if it hasn't already (the
/// idempotency check that absorbs broker redelivery), and reports whether the
/// barrier is now complete across the whole cluster.
///
/// Returns `(just_stamped, complete)`. `just_stamped` is false when this shard had
/// already stamped the token on an earlier delivery.
pub fn stamp(eof: &mut Eof, instance_id: u32, cluster_size: u32) -> (bool, bool) {
    let already_stamped = eof.has_stamped(instance_id);
    eof.stamp(instance_id);
    (!already_stamped, eof.is_complete(cluster_size))
}
