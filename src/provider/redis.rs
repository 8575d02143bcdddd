use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, Client};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    cache::{CacheStore, Pipeline, PipelineOp},
    error::Error,
};

const SCAN_BATCH: usize = 500;

const DELETE_IF_EQUALS: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Redis-backed store. Every command is bounded by `timeout`.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    timeout: Duration,
}

impl RedisStore {
    pub async fn connect(url: &str, timeout: Duration) -> Result<RedisStore, Error> {
        let client = Client::open(url)?;
        let connection = tokio::time::timeout(
            timeout,
            client.get_multiplexed_async_connection(),
        )
        .await??;

        Ok(RedisStore {
            connection,
            timeout,
        })
    }

    async fn bounded<T, F>(&self, command: F) -> Result<T, Error>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.timeout, command).await {
            Ok(result) => Ok(result?),
            Err(e) => Err(Error::CacheUnavailable(format!(
                "redis command timed out: {}",
                e
            ))),
        }
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let pattern = format!("{}*", prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let mut conn = self.connection.clone();
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.connection.clone();
        self.bounded(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await
    }

    async fn get_all(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let keys = self.scan_keys(prefix).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let values: Vec<Option<String>> = self
            .bounded(redis::cmd("MGET").arg(&keys).query_async(&mut conn))
            .await?;

        // keys can expire between SCAN and MGET
        Ok(values.into_iter().flatten().collect())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        self.bounded(
            redis::cmd("SET").arg(key).arg(value).query_async(&mut conn),
        )
        .await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        self.bounded(
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut conn),
        )
        .await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, Error> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = self
            .bounded(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, Error> {
        let mut conn = self.connection.clone();
        let removed: i64 = self
            .bounded(
                redis::cmd("EVAL")
                    .arg(DELETE_IF_EQUALS)
                    .arg(1)
                    .arg(key)
                    .arg(value)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(removed == 1)
    }

    async fn execute(&self, pipeline: Pipeline) -> Result<(), Error> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        for op in pipeline.ops() {
            match op {
                PipelineOp::Set { key, value } => {
                    pipe.cmd("SET").arg(key).arg(value).ignore();
                },
                PipelineOp::SetWithTtl { key, value, ttl } => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("PX")
                        .arg(ttl_millis(*ttl))
                        .ignore();
                },
            }
        }

        let mut conn = self.connection.clone();
        let _: () = self.bounded(pipe.query_async(&mut conn)).await?;
        debug!("Executed redis pipeline with {} commands", pipeline.len());
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.connection.clone();
        match self
            .bounded::<String, _>(redis::cmd("PING").query_async(&mut conn))
            .await
        {
            Ok(reply) => reply == "PONG",
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                false
            },
        }
    }

    async fn clear(&self, prefix: &str) -> Result<usize, Error> {
        let keys = self.scan_keys(prefix).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection.clone();
        let removed: usize = self
            .bounded(redis::cmd("DEL").arg(&keys).query_async(&mut conn))
            .await?;
        Ok(removed)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(90)), 90_000);
        assert_eq!(ttl_millis(Duration::ZERO), 1);
    }
}
