//! Fire-and-forget notifications to the companion media-forwarding
//! collaborator, published over Redis pub/sub.
//!
//! Grounded on the original project's Redis client, which wrapped the
//! same publish/subscribe primitives this crate needs a slice of. A
//! connection is opened lazily on first publish and failures never
//! propagate past a `warn` log — the signaling and chat paths must keep
//! working even if Redis is down or unconfigured.

use async_trait::async_trait;
use redis::AsyncCommands;

pub const STREAM_CREATED_CHANNEL: &str = "media:stream:created";
pub const STREAM_ENDED_CHANNEL: &str = "media:stream:ended";

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn stream_created(&self, stream_id: &str);
    async fn stream_ended(&self, stream_id: &str);
}

/// Publishes stream lifecycle events to Redis. Connection failures are
/// logged and swallowed.
pub struct RedisNotificationSink {
    client: redis::Client,
}

impl RedisNotificationSink {
    pub fn new(redis_host: &str) -> anyhow::Result<Self> {
        let url = format!("redis://{redis_host}");
        let client = redis::Client::open(url.as_str())
            .map_err(|e| anyhow::anyhow!("invalid REDIS_HOST {redis_host}: {e}"))?;
        Ok(Self { client })
    }

    async fn publish(&self, channel: &str, stream_id: &str) {
        let payload = serde_json::json!({ "streamId": stream_id }).to_string();
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                let result: Result<(), redis::RedisError> = conn.publish(channel, payload).await;
                if let Err(e) = result {
                    log::warn!("notification publish to {channel} failed: {e}");
                }
            }
            Err(e) => {
                log::warn!("notification sink could not reach redis: {e}");
            }
        }
    }
}

#[async_trait]
impl NotificationSink for RedisNotificationSink {
    async fn stream_created(&self, stream_id: &str) {
        self.publish(STREAM_CREATED_CHANNEL, stream_id).await;
    }

    async fn stream_ended(&self, stream_id: &str) {
        self.publish(STREAM_ENDED_CHANNEL, stream_id).await;
    }
}

/// Used when no Redis endpoint is configured or reachable at startup.
#[derive(Default)]
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn stream_created(&self, _stream_id: &str) {}
    async fn stream_ended(&self, _stream_id: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_sink_is_harmless() {
        let sink = NoopNotificationSink;
        sink.stream_created("s1").await;
        sink.stream_ended("s1").await;
    }

    #[test]
    fn redis_sink_rejects_a_malformed_host() {
        let err = RedisNotificationSink::new("not a valid host").unwrap_err();
        assert!(err.to_string().contains("invalid REDIS_HOST"));
    }

    #[test]
    fn redis_sink_accepts_a_well_formed_host() {
        assert!(RedisNotificationSink::new("localhost:6379").is_ok());
    }
}
