use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::ws::registry::RoomRegistry;

#[derive(Debug)]
pub enum PublishError {
    Redis(redis::RedisError),
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::Redis(e) => write!(f, "Redis error: {}", e),
        }
    }
}

impl std::error::Error for PublishError {}

impl From<redis::RedisError> for PublishError {
    fn from(e: redis::RedisError) -> Self {
        PublishError::Redis(e)
    }
}

/// Destination of headcount values.
#[async_trait]
pub trait HeadcountSink: Send + Sync {
    async fn publish(&self, count: usize) -> Result<(), PublishError>;
}

/// Publishes the headcount on a redis channel and stores it under the
/// same key so it can be read back with GET.
pub struct RedisHeadcountSink {
    client: redis::Client,
    channel: String,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisHeadcountSink {
    pub fn new(url: &str, channel: impl Into<String>) -> Result<Self, PublishError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            channel: channel.into(),
            conn: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, PublishError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl HeadcountSink for RedisHeadcountSink {
    async fn publish(&self, count: usize) -> Result<(), PublishError> {
        let mut conn = self.connection().await?;
        let value = count.to_string();
        let res: Result<(), redis::RedisError> = async {
            conn.set::<_, _, ()>(&self.channel, &value).await?;
            conn.publish::<_, _, ()>(&self.channel, &value).await?;
            Ok(())
        }
        .await;

        if res.is_err() {
            // Reconnect on the next publish.
            *self.conn.lock().await = None;
        }
        res.map_err(PublishError::from)
    }
}

/// Publishes the total connection count when, and only when, it changes.
pub struct HeadcountPublisher {
    sink: Option<Arc<dyn HeadcountSink>>,
    last: Option<usize>,
    healthy: Arc<AtomicBool>,
}

impl HeadcountPublisher {
    pub fn new(sink: Option<Arc<dyn HeadcountSink>>, healthy: Arc<AtomicBool>) -> Self {
        Self { sink, last: None, healthy }
    }

    /// Handle one sample. Returns whether a publish was attempted.
    ///
    /// A value counts as published once attempted, so a failing sink is
    /// not hammered with the same value every tick.
    pub async fn tick(&mut self, count: usize) -> bool {
        let Some(sink) = self.sink.as_ref() else {
            return false;
        };
        if self.last == Some(count) {
            return false;
        }
        self.last = Some(count);

        match sink.publish(count).await {
            Ok(()) => {
                self.healthy.store(true, Ordering::Relaxed);
                info!("Published headcount {}", count);
            }
            Err(e) => {
                self.healthy.store(false, Ordering::Relaxed);
                error!("Error publishing headcount {}: {}", count, e);
            }
        }
        true
    }

    /// Sample the registry every `interval` until the task is dropped.
    pub async fn run(mut self, registry: Arc<RoomRegistry>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let conns = registry.connection_count().await;
            let rooms = registry.room_count().await;
            debug!("Stats: conns={} rooms={}", conns, rooms);
            self.tick(conns).await;
        }
    }
}
