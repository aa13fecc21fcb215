#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] review_filter_store::StoreError),

    #[error(transparent)]
    Broker(#[from] review_filter_broker::BrokerError),

    #[error("corrupt snapshot under key '{key}': {source}")]
    CorruptSnapshot {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
