use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::model::{AmqpJob, Job};

use super::Executor;

/// Broker connections are reused across jobs sharing a URI; a dropped
/// connection is evicted and re-dialed on the next publish.
#[derive(Clone, Default)]
pub struct ConnectionCache {
    inner: Arc<Mutex<HashMap<String, Connection>>>,
}

impl ConnectionCache {
    async fn channel(&self, uri: &str) -> Result<Channel> {
        let mut cache = self.inner.lock().await;

        if let Some(conn) = cache.get(uri) {
            if conn.status().connected() {
                return conn
                    .create_channel()
                    .await
                    .map_err(|e| Error::Other(anyhow::Error::from(e)));
            }
            cache.remove(uri);
        }

        let conn = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| Error::Other(anyhow::Error::from(e)))?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| Error::Other(anyhow::Error::from(e)))?;

        cache.insert(uri.to_string(), conn);
        Ok(channel)
    }
}

pub struct AmqpExecutor {
    connections: ConnectionCache,
}

impl AmqpExecutor {
    pub fn new(connections: ConnectionCache) -> Self {
        Self { connections }
    }

    async fn publish(&self, amqp: &AmqpJob) -> Result<()> {
        let channel = self.connections.channel(&amqp.connection).await?;

        let mut properties = BasicProperties::default();
        if !amqp.headers.is_empty() {
            let mut headers = FieldTable::default();
            for (name, value) in &amqp.headers {
                headers.insert(
                    ShortString::from(name.clone()),
                    AMQPValue::LongString(LongString::from(value.clone())),
                );
            }
            properties = properties.with_headers(headers);
        }

        let confirm = channel
            .basic_publish(
                &amqp.exchange,
                &amqp.routing_key,
                BasicPublishOptions::default(),
                amqp.body.as_bytes(),
                properties,
            )
            .await
            .map_err(|e| Error::Other(anyhow::Error::from(e)))?;

        confirm
            .await
            .map_err(|e| Error::Other(anyhow::Error::from(e)))?;

        Ok(())
    }
}

#[async_trait]
impl Executor for AmqpExecutor {
    async fn execute(&self, ctx: &CancellationToken, job: &Job) -> Result<()> {
        let amqp = job.amqp_job.as_ref().ok_or(Error::AmqpJobNotDefined)?;

        tokio::select! {
            res = self.publish(amqp) => res,
            _ = ctx.cancelled() => Err(Error::Canceled),
        }
    }
}
