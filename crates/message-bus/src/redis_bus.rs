//! Redis-backed `Publisher`/`Subscriber`.

use crate::{
    decode_payload, ConnectionSnafu, MessageBusError, Publisher, PublishSnafu, ReceiveSnafu,
    Subscriber, SubscriptionSnafu,
};
use async_std::sync::Mutex;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use snafu::ResultExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct RedisPublisher {
    client: redis::Client,
    conn: redis::aio::Connection,
}

impl RedisPublisher {
    pub async fn connect(url: &str) -> Result<Self, MessageBusError> {
        let client = redis::Client::open(url).context(ConnectionSnafu)?;
        let conn = client
            .get_async_connection()
            .await
            .context(ConnectionSnafu)?;
        Ok(RedisPublisher { client, conn })
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn disconnect(&mut self) -> Result<(), MessageBusError> {
        self.conn = self
            .client
            .get_async_connection()
            .await
            .context(ConnectionSnafu)?;
        Ok(())
    }

    async fn connected(&mut self) -> bool {
        redis::cmd("PING")
            .query_async::<_, String>(&mut self.conn)
            .await
            .is_ok()
    }

    async fn publish(
        &mut self,
        channel: &str,
        message: &pipeline_types::BlockchainMessage,
    ) -> Result<(), MessageBusError> {
        let payload = serde_json::to_string(message).expect("BlockchainMessage always serializes");
        let _: () = self
            .conn
            .publish(channel, payload)
            .await
            .context(PublishSnafu)?;
        Ok(())
    }

    async fn publish_batch(
        &mut self,
        channel: &str,
        messages: &mut Vec<pipeline_types::BlockchainMessage>,
    ) -> Result<(), MessageBusError> {
        messages.sort_by_key(|message| message.ordering_key());
        let mut pipe = redis::pipe();
        for message in messages.iter() {
            let payload = serde_json::to_string(message).expect("BlockchainMessage always serializes");
            pipe.cmd("PUBLISH").arg(channel).arg(payload).ignore();
        }
        let _: () = pipe
            .query_async(&mut self.conn)
            .await
            .context(PublishSnafu)?;
        Ok(())
    }
}

/// Push-based subscription over a Redis `PubSub` connection. `pause`/
/// `resume` gate `next_message` without tearing down the channel
/// subscription, trading socket-buffer growth for simplicity.
pub struct RedisSubscriber {
    client: redis::Client,
    pubsub: redis::aio::PubSub,
    paused: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    channels: Mutex<Vec<String>>,
}

impl RedisSubscriber {
    pub async fn connect(url: &str) -> Result<Self, MessageBusError> {
        let client = redis::Client::open(url).context(ConnectionSnafu)?;
        let pubsub = client
            .get_async_connection()
            .await
            .context(ConnectionSnafu)?
            .into_pubsub();
        Ok(RedisSubscriber {
            client,
            pubsub,
            paused: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(true)),
            channels: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Subscriber for RedisSubscriber {
    async fn subscribe(&mut self, channel: &str) -> Result<(), MessageBusError> {
        let result = self.pubsub.subscribe(channel).await.context(SubscriptionSnafu {
            channel: channel.to_string(),
        });
        self.connected.store(result.is_ok(), Ordering::SeqCst);
        result?;
        self.channels.lock().await.push(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), MessageBusError> {
        let result = self
            .pubsub
            .unsubscribe(channel)
            .await
            .context(SubscriptionSnafu {
                channel: channel.to_string(),
            });
        self.connected.store(result.is_ok(), Ordering::SeqCst);
        result?;
        self.channels.lock().await.retain(|c| c != channel);
        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    async fn next_message(&mut self) -> Result<Option<pipeline_types::BlockchainMessage>, MessageBusError> {
        if self.channels.lock().await.is_empty() {
            return Ok(None);
        }
        while self.paused.load(Ordering::SeqCst) {
            async_std::task::sleep(Duration::from_millis(50)).await;
        }
        let mut stream = self.pubsub.on_message();
        let Some(msg) = stream.next().await else {
            self.connected.store(false, Ordering::SeqCst);
            return Ok(None);
        };
        let payload: Result<String, MessageBusError> = msg.get_payload().context(ReceiveSnafu);
        drop(stream);
        self.connected.store(payload.is_ok(), Ordering::SeqCst);
        decode_payload(&payload?).map(Some)
    }
}
