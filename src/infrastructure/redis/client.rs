use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use redis::Client;
use tracing::info;

use crate::error::SubscribeError;

/// Raw payloads received on a subscribed channel.
pub type EventStream = BoxStream<'static, String>;

/// Opens a subscription to the upload-finished channel.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn subscribe(&self) -> Result<EventStream, SubscribeError>;
}

#[derive(Clone)]
pub struct RedisService {
    client: Client,
    channel: String,
}

impl RedisService {
    pub fn new(connection_string: &str, channel: &str) -> Result<Self, redis::RedisError> {
        let client = Client::open(connection_string)?;
        Ok(Self {
            client,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl EventSubscriber for RedisService {
    async fn subscribe(&self) -> Result<EventStream, SubscribeError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| SubscribeError::Connect(e.to_string()))?;

        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| SubscribeError::Subscribe {
                channel: self.channel.clone(),
                reason: e.to_string(),
            })?;

        info!("✅ Subscribed to Redis channel '{}'", self.channel);

        let stream = pubsub
            .into_on_message()
            .map(|msg| String::from_utf8_lossy(msg.get_payload_bytes()).into_owned());
        Ok(stream.boxed())
    }
}
