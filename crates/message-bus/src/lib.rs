//! Pub/sub transport (spec §4.7/§6) between the producer (C1) and the
//! consumer's two subsystems (C2/C3). Grounded on the `redis` usage in
//! `aptos-labs-aptos-core`'s indexer-grpc cache operator, adapted from its
//! `tokio-comp` feature to `async-std-comp` to match this workspace's
//! `async-std` runtime.

pub mod redis_bus;

pub use redis_bus::{RedisPublisher, RedisSubscriber};

use async_trait::async_trait;
use pipeline_types::message::WireMessage;
use pipeline_types::BlockchainMessage;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum MessageBusError {
    #[snafu(display("redis connection error: {}", source))]
    Connection { source: redis::RedisError },
    #[snafu(display("failed to publish message: {}", source))]
    Publish { source: redis::RedisError },
    #[snafu(display("failed to (un)subscribe channel {}: {}", channel, source))]
    Subscription {
        channel: String,
        source: redis::RedisError,
    },
    #[snafu(display("failed to receive message: {}", source))]
    Receive { source: redis::RedisError },
    #[snafu(display("failed to decode message payload: {}", source))]
    Decode { source: serde_json::Error },
}

impl MessageBusError {
    pub fn kind(&self) -> pipeline_types::Kind {
        match self {
            MessageBusError::Decode { .. } => pipeline_types::Kind::Decode,
            _ => pipeline_types::Kind::Transient,
        }
    }
}

/// Producer-side publish operations, per spec §4.7.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn disconnect(&mut self) -> Result<(), MessageBusError>;
    /// Whether the underlying transport still answers, checked by the
    /// indexer's health loop (spec §4.6: `messageBus.connected()`).
    async fn connected(&mut self) -> bool;
    async fn publish(&mut self, channel: &str, message: &BlockchainMessage) -> Result<(), MessageBusError>;
    /// Publishes `messages` in ascending `(blockNumber, logIndex)` order
    /// (spec §4.6's ordered-publish contract), as a single pipelined batch.
    async fn publish_batch(
        &mut self,
        channel: &str,
        messages: &mut Vec<BlockchainMessage>,
    ) -> Result<(), MessageBusError>;
}

/// Consumer-side subscribe operations, per spec §4.7. `pause`/`resume`
/// throttle delivery without tearing down the subscription, so a slow
/// consumer subsystem (e.g. the Merkle engine mid-rebuild) can apply
/// backpressure.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&mut self, channel: &str) -> Result<(), MessageBusError>;
    async fn unsubscribe(&mut self, channel: &str) -> Result<(), MessageBusError>;
    /// Whether the subscription's underlying connection is still alive
    /// (spec §4.6: `messageBus.connected()`).
    fn connected(&self) -> bool;
    fn pause(&self);
    fn resume(&self);
    /// Blocks until the next message arrives (or `None` once no channel is
    /// subscribed), normalizing `Enhanced`/`Legacy` wire shapes as it goes.
    async fn next_message(&mut self) -> Result<Option<BlockchainMessage>, MessageBusError>;
}

pub(crate) fn decode_payload(payload: &str) -> Result<BlockchainMessage, MessageBusError> {
    let wire: WireMessage = serde_json::from_str(payload).context(DecodeSnafu)?;
    Ok(wire.normalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_payload_rejects_malformed_json() {
        let result = decode_payload("not json");
        assert!(matches!(result, Err(MessageBusError::Decode { .. })));
    }

    #[test]
    fn decode_payload_normalizes_enhanced_shape() {
        let message = serde_json::json!({
            "transaction": {
                "hash": format!("{:#x}", ethers::types::H256::repeat_byte(1)),
                "blockNumber": 42,
                "chainId": 1,
                "chainName": "ethereum",
                "from": format!("{:#x}", ethers::types::Address::repeat_byte(2)),
                "to": null,
                "value": "0",
                "gasUsed": null,
                "gasPrice": null,
                "status": 1,
                "logs": [],
                "timestamp": 100,
                "blockHash": format!("{:#x}", ethers::types::H256::zero()),
                "data": null,
                "topics": [],
            },
            "events": [],
            "timestamp": 100,
            "metadata": {
                "chainId": 1,
                "chainName": "ethereum",
                "blockNumber": 42,
                "transactionHash": format!("{:#x}", ethers::types::H256::repeat_byte(1)),
                "timestamp": 100,
            },
        });
        let decoded = decode_payload(&message.to_string()).unwrap();
        assert_eq!(decoded.transaction.block_number, 42);
    }
}
