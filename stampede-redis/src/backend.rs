//! Redis backend implementation.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::{Client, Script, aio::ConnectionManager};
use smol_str::SmolStr;
use stampede::backend::{BackendResult, CompletionStream, RemoteBackend};
use stampede::key::KeyScheme;
use tokio::sync::OnceCell;
use tracing::trace;

use crate::error::Error;

/// Value stored under a lock key while a leader is computing.
const LOCK_SENTINEL: &str = "1";

/// Message published on a channel key when a computation completes.
const DONE_MESSAGE: &str = "done";

/// Bounded write path, executed server-side so the payload write and the
/// LRU-index bookkeeping are one atomic step. Separating them would let a
/// crash between the two leave the index unbounded.
///
/// `KEYS = [data_key, index_key, limit_key]`,
/// `ARGV = [payload, ttl_seconds, now_ts, default_limit]`.
///
/// After the SET + ZADD, every index entry past the capacity bound is
/// removed oldest-first, deleting both the ZSET member and the standalone
/// data key it names.
const BOUNDED_WRITE_SCRIPT: &str = r"
local limit = tonumber(redis.call('GET', KEYS[3]))
if not limit or limit <= 0 then
    limit = tonumber(ARGV[4])
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', tonumber(ARGV[2]))
redis.call('ZADD', KEYS[2], tonumber(ARGV[3]), KEYS[1])
local count = redis.call('ZCARD', KEYS[2])
if count > limit then
    local stale = redis.call('ZRANGE', KEYS[2], 0, count - limit - 1)
    for _, key in ipairs(stale) do
        redis.call('DEL', key)
    end
    redis.call('ZREMRANGEBYRANK', KEYS[2], 0, count - limit - 1)
end
return 1
";

/// Redis backend based on the redis-rs crate.
///
/// Implements the full [`RemoteBackend`] surface: value storage with the
/// atomic bounded write path, the `SET NX EX` leader-election lock,
/// pipelined lease renewal, and the pub/sub completion fabric. Uses a
/// [`ConnectionManager`] for asynchronous network interaction, created
/// lazily on first use.
///
/// [`ConnectionManager`]: redis::aio::ConnectionManager
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    scheme: KeyScheme,
    script: Arc<Script>,
    default_limit: i64,
    name: SmolStr,
}

impl RedisBackend {
    /// Creates a new backend builder with default settings.
    #[must_use]
    pub fn builder() -> RedisBackendBuilder {
        RedisBackendBuilder::default()
    }

    /// Create lazy connection to redis via [`ConnectionManager`].
    ///
    /// [`ConnectionManager`]: redis::aio::ConnectionManager
    async fn connection(&self) -> Result<&ConnectionManager, Error> {
        trace!("get connection manager");
        let manager = self
            .connection
            .get_or_try_init(|| {
                trace!("initialize new redis connection manager");
                self.client.get_connection_manager()
            })
            .await?;
        Ok(manager)
    }
}

/// Builder for [`RedisBackend`].
pub struct RedisBackendBuilder {
    connection_info: String,
    scheme: KeyScheme,
    default_limit: i64,
    name: SmolStr,
}

impl Default for RedisBackendBuilder {
    fn default() -> Self {
        Self {
            connection_info: "redis://127.0.0.1/".to_owned(),
            scheme: KeyScheme::default(),
            default_limit: 1024,
            name: SmolStr::new_static("redis"),
        }
    }
}

impl RedisBackendBuilder {
    /// Set connection info (host, port, database, etc.).
    pub fn server(mut self, connection_info: impl Into<String>) -> Self {
        self.connection_info = connection_info.into();
        self
    }

    /// Set the key scheme used to derive all Redis-side names.
    pub fn key_scheme(mut self, scheme: KeyScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Set the capacity bound applied when the cluster-wide limit key is
    /// unset.
    pub fn default_limit(mut self, limit: i64) -> Self {
        self.default_limit = limit;
        self
    }

    /// Set a custom name for this backend, used in logs and breaker
    /// labels.
    pub fn name(mut self, name: impl Into<SmolStr>) -> Self {
        self.name = name.into();
        self
    }

    /// Create a new [`RedisBackend`] with the configured settings.
    pub fn build(self) -> Result<RedisBackend, Error> {
        Ok(RedisBackend {
            client: Client::open(self.connection_info)?,
            connection: OnceCell::new(),
            scheme: self.scheme,
            script: Arc::new(Script::new(BOUNDED_WRITE_SCRIPT)),
            default_limit: self.default_limit,
            name: self.name,
        })
    }
}

#[async_trait]
impl RemoteBackend for RedisBackend {
    async fn read(&self, key: &str) -> BackendResult<Option<Bytes>> {
        let mut con = self.connection().await?.clone();
        let data_key = self.scheme.data_key(key);

        let payload: Option<Vec<u8>> = redis::cmd("GET")
            .arg(data_key.as_str())
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;

        Ok(payload.map(Bytes::from))
    }

    async fn write_bounded(&self, key: &str, payload: Bytes, ttl: Duration) -> BackendResult<()> {
        let mut con = self.connection().await?.clone();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(Error::from)?;

        let _: i64 = self
            .script
            .key(self.scheme.data_key(key).as_str())
            .key(self.scheme.index_key().as_str())
            .key(self.scheme.limit_key().as_str())
            .arg(payload.as_ref())
            .arg(ttl.as_secs().max(1))
            .arg(now.as_nanos() as u64)
            .arg(self.default_limit)
            .invoke_async(&mut con)
            .await
            .map_err(Error::from)?;

        Ok(())
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> BackendResult<bool> {
        let mut con = self.connection().await?.clone();
        let lock_key = self.scheme.lock_key(key);

        // NX makes the SET the cluster-wide election: exactly one caller
        // observes OK, everyone else observes nil.
        let response: Option<String> = redis::cmd("SET")
            .arg(lock_key.as_str())
            .arg(LOCK_SENTINEL)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;

        Ok(response.is_some())
    }

    async fn renew_locks(&self, keys: &[SmolStr], ttl: Duration) -> BackendResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut con = self.connection().await?.clone();

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("EXPIRE")
                .arg(self.scheme.lock_key(key).as_str())
                .arg(ttl.as_secs().max(1))
                .ignore();
        }
        pipe.query_async::<()>(&mut con)
            .await
            .map_err(Error::from)?;

        Ok(())
    }

    async fn publish_done(&self, key: &str) -> BackendResult<()> {
        let mut con = self.connection().await?.clone();
        let channel_key = self.scheme.channel_key(key);

        let _: i64 = redis::cmd("PUBLISH")
            .arg(channel_key.as_str())
            .arg(DONE_MESSAGE)
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;

        Ok(())
    }

    async fn subscribe(&self) -> BackendResult<CompletionStream> {
        // A dedicated pub/sub connection, separate from the managed one;
        // a single PSUBSCRIBE covers every channel key regardless of key
        // cardinality.
        let mut pubsub = self.client.get_async_pubsub().await.map_err(Error::from)?;
        pubsub
            .psubscribe(self.scheme.channel_pattern().as_str())
            .await
            .map_err(Error::from)?;

        let scheme = self.scheme.clone();
        let stream = pubsub
            .into_on_message()
            // Any message on a matching channel counts as completion; the
            // payload itself carries no information.
            .filter_map(move |message| {
                futures::future::ready(scheme.key_from_channel(message.get_channel_name()))
            })
            .boxed();

        Ok(stream)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
