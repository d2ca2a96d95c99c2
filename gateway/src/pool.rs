use crate::OutboundBody;
use crate::metrics_defs::{POOL_SESSION_CLOSED, POOL_SESSION_ESTABLISHED, POOL_SESSION_REUSED};
use hyper::client::conn::http2::{self, SendRequest};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use parking_lot::Mutex;
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use url::Url;

// How long to wait for a keep-alive ping acknowledgement before declaring
// the session dead.
const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to one pooled multiplexed session. Cloning is cheap; all clones
/// share the underlying connection.
pub type Session = SendRequest<OutboundBody>;

#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    #[error("endpoint {0} has no usable authority")]
    InvalidEndpoint(String),

    #[error("timed out establishing session to {0}")]
    EstablishTimeout(String),

    #[error("failed to establish session to {0}: {1}")]
    Establish(String, String),
}

type EstablishResult = Option<Result<Session, String>>;

enum Slot {
    /// A handshake is in flight; every caller awaits the same attempt.
    Establishing(watch::Receiver<EstablishResult>),
    Ready { session: Session, generation: u64 },
}

struct PoolInner {
    sessions: Mutex<HashMap<String, Slot>>,
    connect_timeout: Duration,
    keep_alive_interval: Duration,
    generation: AtomicU64,
}

/// One reusable multiplexed session per distinct shard endpoint, with
/// keep-alive liveness probing and deregistration on any session-level
/// failure so the next acquisition re-establishes from scratch.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(connect_timeout: Duration, keep_alive_interval: Duration) -> Self {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                sessions: Mutex::new(HashMap::new()),
                connect_timeout,
                keep_alive_interval,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Returns an established session for `endpoint`, creating one if none
    /// exists. Concurrent callers for the same endpoint share a single
    /// establishment attempt; a session observed closed right after
    /// acquisition is retried once with a fresh acquisition.
    pub async fn acquire(&self, endpoint: &Url) -> Result<Session, PoolError> {
        let key = endpoint_key(endpoint)?;

        for _attempt in 0..2 {
            let mut rx = {
                let mut sessions = self.inner.sessions.lock();
                match sessions.get(&key) {
                    Some(Slot::Ready { session, .. }) if !session.is_closed() => {
                        counter!(POOL_SESSION_REUSED).increment(1);
                        return Ok(session.clone());
                    }
                    Some(Slot::Establishing(rx)) => rx.clone(),
                    _ => {
                        // Vacant, or a session that died before its driver
                        // got around to deregistering it.
                        let (tx, rx) = watch::channel(None);
                        sessions.insert(key.clone(), Slot::Establishing(rx.clone()));
                        self.spawn_establish(key.clone(), tx);
                        rx
                    }
                }
            };

            let outcome = timeout(self.inner.connect_timeout, rx.wait_for(|r| r.is_some())).await;
            let result = match outcome {
                Err(_) => return Err(PoolError::EstablishTimeout(key)),
                Ok(Err(_)) => {
                    return Err(PoolError::Establish(
                        key,
                        "establishment task aborted".to_string(),
                    ));
                }
                Ok(Ok(guard)) => guard.clone(),
            };

            match result {
                Some(Ok(session)) if !session.is_closed() => return Ok(session),
                Some(Ok(_)) => {
                    // Closed between establishment and now; drop the entry
                    // and run one more acquisition.
                    self.purge(&key);
                }
                Some(Err(message)) => return Err(PoolError::Establish(key, message)),
                None => {}
            }
        }

        Err(PoolError::Establish(
            key,
            "session closed during acquisition".to_string(),
        ))
    }

    /// Drops the pooled session for `endpoint`, if any. Called by gateways
    /// that observe a session-level failure mid-stream.
    pub fn purge_endpoint(&self, endpoint: &Url) {
        if let Ok(key) = endpoint_key(endpoint) {
            self.purge(&key);
        }
    }

    fn purge(&self, key: &str) {
        let mut sessions = self.inner.sessions.lock();
        if matches!(sessions.get(key), Some(Slot::Ready { .. })) {
            sessions.remove(key);
        }
    }

    // Establishment runs detached so a caller that disappears mid-wait
    // cannot strand the slot in the establishing state.
    fn spawn_establish(&self, key: String, tx: watch::Sender<EstablishResult>) {
        let pool = self.clone();
        tokio::spawn(async move {
            let result = pool.establish(&key).await;
            if let Err(message) = &result {
                tracing::error!(endpoint = %key, error = %message, "failed to establish upstream session");
                pool.inner.sessions.lock().remove(&key);
            }
            let _ = tx.send(Some(result));
        });
    }

    async fn establish(&self, key: &str) -> Result<Session, String> {
        let connect = async {
            let stream = TcpStream::connect(key).await.map_err(|e| e.to_string())?;
            let _ = stream.set_nodelay(true);
            let io = TokioIo::new(stream);

            let mut builder = http2::Builder::new(TokioExecutor::new());
            builder
                .timer(TokioTimer::new())
                .keep_alive_interval(self.inner.keep_alive_interval)
                .keep_alive_timeout(KEEP_ALIVE_TIMEOUT)
                .keep_alive_while_idle(true);
            builder
                .handshake::<_, OutboundBody>(io)
                .await
                .map_err(|e| e.to_string())
        };

        let (session, connection) = match timeout(self.inner.connect_timeout, connect).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(format!(
                    "handshake timed out after {:?}",
                    self.inner.connect_timeout
                ));
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

        // The driver owns the connection, including its keep-alive probing.
        // Whenever it ends, the session is deregistered so the next acquire
        // re-establishes; the generation check keeps it from removing a
        // successor session for the same endpoint.
        let pool = self.clone();
        let driver_key = key.to_string();
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                // An established session dropping later is routine idle
                // reclamation by the peer, not an operational error.
                tracing::debug!(endpoint = %driver_key, error = %err, "upstream session ended");
            }
            counter!(POOL_SESSION_CLOSED).increment(1);
            let mut sessions = pool.inner.sessions.lock();
            let ours = matches!(
                sessions.get(&driver_key),
                Some(Slot::Ready { generation: current, .. }) if *current == generation
            );
            if ours {
                sessions.remove(&driver_key);
            }
        });

        self.inner.sessions.lock().insert(
            key.to_string(),
            Slot::Ready {
                session: session.clone(),
                generation,
            },
        );
        counter!(POOL_SESSION_ESTABLISHED).increment(1);
        tracing::info!(endpoint = %key, "established upstream session");
        Ok(session)
    }
}

/// Socket address key for an endpoint URL: `host:port`.
pub fn endpoint_key(endpoint: &Url) -> Result<String, PoolError> {
    let host = endpoint
        .host_str()
        .ok_or_else(|| PoolError::InvalidEndpoint(endpoint.to_string()))?;
    let port = endpoint
        .port_or_known_default()
        .ok_or_else(|| PoolError::InvalidEndpoint(endpoint.to_string()))?;
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::EchoUpstream;

    fn test_pool(connect_timeout: Duration) -> ConnectionPool {
        ConnectionPool::new(connect_timeout, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_concurrent_acquires_share_one_establishment() {
        let upstream = EchoUpstream::spawn().await;
        let pool = test_pool(Duration::from_secs(5));
        let endpoint = upstream.url();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let endpoint = endpoint.clone();
            handles.push(tokio::spawn(async move { pool.acquire(&endpoint).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(upstream.connections(), 1);
    }

    #[tokio::test]
    async fn test_acquire_reuses_live_session() {
        let upstream = EchoUpstream::spawn().await;
        let pool = test_pool(Duration::from_secs(5));

        let first = pool.acquire(&upstream.url()).await.unwrap();
        let second = pool.acquire(&upstream.url()).await.unwrap();
        assert!(!first.is_closed());
        assert!(!second.is_closed());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(upstream.connections(), 1);
    }

    #[tokio::test]
    async fn test_pool_reestablishes_after_peer_close() {
        let upstream = EchoUpstream::spawn().await;
        let pool = test_pool(Duration::from_secs(5));

        let session = pool.acquire(&upstream.url()).await.unwrap();
        upstream.close_connections();

        // wait for the client side to notice the reset
        let mut waited = Duration::ZERO;
        while !session.is_closed() && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        assert!(session.is_closed());

        let fresh = pool.acquire(&upstream.url()).await.unwrap();
        assert!(!fresh.is_closed());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(upstream.connections(), 2);
    }

    #[tokio::test]
    async fn test_establish_timeout_rejects_all_waiters() {
        // 192.0.2.0/24 is reserved for documentation and never routes.
        let endpoint = Url::parse("http://192.0.2.1:9").unwrap();
        let pool = test_pool(Duration::from_millis(200));

        let first = tokio::spawn({
            let pool = pool.clone();
            let endpoint = endpoint.clone();
            async move { pool.acquire(&endpoint).await }
        });
        let second = tokio::spawn({
            let pool = pool.clone();
            let endpoint = endpoint.clone();
            async move { pool.acquire(&endpoint).await }
        });

        for handle in [first, second] {
            let result = handle.await.unwrap();
            assert!(matches!(
                result,
                Err(PoolError::EstablishTimeout(_)) | Err(PoolError::Establish(..))
            ));
        }
    }

    #[test]
    fn test_endpoint_key() {
        assert_eq!(
            endpoint_key(&Url::parse("http://h1:4317").unwrap()).unwrap(),
            "h1:4317"
        );
        // scheme default port applies when none is given
        assert_eq!(
            endpoint_key(&Url::parse("http://h1").unwrap()).unwrap(),
            "h1:80"
        );
    }
}
