use super::credentials::CredentialSource;
use super::{BusConnector, BusMessage, BusSession};
use crate::error::BusError;
use ::redis::aio::{MultiplexedConnection, PubSub};
use ::redis::{AsyncCommands, IntoConnectionInfo};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Redis-backed bus: pub/sub channels plus a list per channel as its log.
pub struct RedisConnector {
    host: String,
    port: u16,
    credentials: Arc<dyn CredentialSource>,
}

impl RedisConnector {
    pub fn new(host: String, port: u16, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            host,
            port,
            credentials,
        }
    }
}

#[async_trait]
impl BusConnector for RedisConnector {
    async fn connect(&self) -> Result<Box<dyn BusSession>, BusError> {
        let password = self.credentials.password().await?;

        let mut info = format!("redis://{}:{}/0", self.host, self.port).into_connection_info()?;
        info.redis.password = Some(password);

        let client = ::redis::Client::open(info)?;
        let commands = client.get_multiplexed_async_connection().await?;
        let pubsub = client.get_async_pubsub().await?;

        let mut session = RedisSession { commands, pubsub };
        session.ping().await?;
        debug!("redis session open at {}:{}", self.host, self.port);
        Ok(Box::new(session))
    }
}

struct RedisSession {
    commands: MultiplexedConnection,
    pubsub: PubSub,
}

#[async_trait]
impl BusSession for RedisSession {
    /// Pings the command connection. A dead pub/sub socket ends the
    /// `on_message` stream instead, which `next_message` reports as `Closed`.
    async fn ping(&mut self) -> Result<(), BusError> {
        let _: String = ::redis::cmd("PING").query_async(&mut self.commands).await?;
        Ok(())
    }

    async fn last_entry(&mut self, channel: &str) -> Result<Option<String>, BusError> {
        let entry: Option<String> = self.commands.lindex(channel, -1).await?;
        Ok(entry)
    }

    async fn subscribe(&mut self, channels: &[String]) -> Result<(), BusError> {
        for channel in channels {
            self.pubsub.subscribe(channel.as_str()).await?;
        }
        Ok(())
    }

    async fn next_message(&mut self, wait: Duration) -> Result<Option<BusMessage>, BusError> {
        let mut stream = self.pubsub.on_message();
        match tokio::time::timeout(wait, stream.next()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(BusError::Closed),
            Ok(Some(msg)) => {
                let payload: String = msg.get_payload()?;
                Ok(Some(BusMessage {
                    channel: msg.get_channel_name().to_string(),
                    payload,
                }))
            }
        }
    }
}
