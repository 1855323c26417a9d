//! Decorator that fills in `BlockchainMessage.events` before handing the
//! message to the real `Publisher`. Grounded on the same wrap-and-delegate
//! shape as `ledger_core::oracle::CachedPriceOracle` — add one piece of
//! behavior around an inner implementation of the same trait.

use async_trait::async_trait;
use message_bus::{MessageBusError, Publisher};
use pipeline_types::BlockchainMessage;

use crate::decode::decode_events;

pub struct DecodingPublisher<P> {
    inner: P,
}

impl<P> DecodingPublisher<P> {
    pub fn new(inner: P) -> Self {
        DecodingPublisher { inner }
    }

    fn decorate(&self, message: &mut BlockchainMessage) {
        message.events = decode_events(&message.transaction.logs);
    }
}

#[async_trait]
impl<P: Publisher + Send + Sync> Publisher for DecodingPublisher<P> {
    async fn disconnect(&mut self) -> Result<(), MessageBusError> {
        self.inner.disconnect().await
    }

    async fn connected(&mut self) -> bool {
        self.inner.connected().await
    }

    async fn publish(&mut self, channel: &str, message: &BlockchainMessage) -> Result<(), MessageBusError> {
        let mut message = message.clone();
        self.decorate(&mut message);
        self.inner.publish(channel, &message).await
    }

    async fn publish_batch(&mut self, channel: &str, messages: &mut Vec<BlockchainMessage>) -> Result<(), MessageBusError> {
        for message in messages.iter_mut() {
            self.decorate(message);
        }
        self.inner.publish_batch(channel, messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::sync::Mutex;
    use ethers::types::Address;
    use pipeline_types::{MatchedLog, MessageMetadata, MessageTransaction};
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Arc<Mutex<Vec<BlockchainMessage>>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn disconnect(&mut self) -> Result<(), MessageBusError> {
            Ok(())
        }

        async fn connected(&mut self) -> bool {
            true
        }

        async fn publish(&mut self, _channel: &str, message: &BlockchainMessage) -> Result<(), MessageBusError> {
            self.published.lock().await.push(message.clone());
            Ok(())
        }

        async fn publish_batch(&mut self, _channel: &str, messages: &mut Vec<BlockchainMessage>) -> Result<(), MessageBusError> {
            self.published.lock().await.extend(messages.drain(..));
            Ok(())
        }
    }

    fn sample_message(nft: Address) -> BlockchainMessage {
        let from = Address::repeat_byte(1);
        let to = Address::repeat_byte(2);
        let token_id = ethers::types::U256::from(9u64);
        let log = MatchedLog {
            address: nft,
            topics: vec![
                crate::decode::topic_filters(Address::zero())[6].hash,
                ethers::types::H256::from(from),
                ethers::types::H256::from(to),
                ethers::types::H256::from_uint(&token_id),
            ],
            data: Default::default(),
            log_index: 0,
        };
        BlockchainMessage {
            transaction: MessageTransaction {
                hash: Default::default(),
                block_number: 1,
                chain_id: 1,
                chain_name: "test".into(),
                from: Default::default(),
                to: None,
                value: Default::default(),
                gas_used: None,
                gas_price: None,
                status: Some(1),
                logs: vec![log],
                timestamp: 0,
                block_hash: Default::default(),
                data: None,
                topics: Vec::new(),
            },
            events: Vec::new(),
            timestamp: 0,
            metadata: MessageMetadata {
                chain_id: 1,
                chain_name: "test".into(),
                block_number: 1,
                transaction_hash: Default::default(),
                timestamp: 0,
            },
        }
    }

    #[async_std::test]
    async fn publish_batch_decorates_events_before_delegating() {
        let nft = Address::repeat_byte(4);
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let inner = RecordingPublisher {
            published: recorded.clone(),
        };
        let mut decorated = DecodingPublisher::new(inner);
        let mut batch = vec![sample_message(nft)];
        decorated.publish_batch("chan", &mut batch).await.unwrap();
        let published = recorded.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].events.len(), 1);
        assert_eq!(published[0].events[0].name, "Transfer");
    }
}
