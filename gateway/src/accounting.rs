use crate::metrics_defs::{GATEWAY_BYTES_IN, GATEWAY_BYTES_OUT, TRANSFER_DURATION};
use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::{Body, Bytes, Frame, SizeHint};
use parking_lot::Mutex;
use shared::{counter, histogram};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

/// Upper bound on the diagnostic first-bytes sample.
pub const SAMPLE_LIMIT: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Default)]
struct TransferContext {
    team_id: Option<String>,
    shard: Option<String>,
    status: Option<u16>,
}

/// One in-flight request or stream: byte counters, a bounded first-bytes
/// sample, routing context once known, and the final status.
///
/// Several async events can race to complete a transfer (relay finished,
/// client abort, upstream error); `finish` is guarded so the completion
/// accounting runs at most once no matter which event wins.
pub struct Transfer {
    protocol: &'static str,
    started: Instant,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    sample: Mutex<Vec<u8>>,
    ctx: Mutex<TransferContext>,
    finalized: AtomicBool,
}

impl Transfer {
    pub fn new(protocol: &'static str) -> Arc<Self> {
        Arc::new(Transfer {
            protocol,
            started: Instant::now(),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            sample: Mutex::new(Vec::new()),
            ctx: Mutex::new(TransferContext::default()),
            finalized: AtomicBool::new(false),
        })
    }

    fn record(&self, direction: Direction, data: &Bytes) {
        match direction {
            Direction::In => {
                self.bytes_in.fetch_add(data.len() as u64, Ordering::Relaxed);
                let mut sample = self.sample.lock();
                if sample.len() < SAMPLE_LIMIT {
                    let take = (SAMPLE_LIMIT - sample.len()).min(data.len());
                    sample.extend_from_slice(&data[..take]);
                }
            }
            Direction::Out => {
                self.bytes_out.fetch_add(data.len() as u64, Ordering::Relaxed);
            }
        }
    }

    pub fn set_route(&self, team_id: &str, shard: &str) {
        let mut ctx = self.ctx.lock();
        ctx.team_id = Some(team_id.to_string());
        ctx.shard = Some(shard.to_string());
    }

    pub fn set_status(&self, status: StatusCode) {
        self.ctx.lock().status = Some(status.as_u16());
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub fn sample(&self) -> Vec<u8> {
        self.sample.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Emits completion accounting. Idempotent.
    pub fn finish(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        let (team_id, shard, status) = {
            let ctx = self.ctx.lock();
            (ctx.team_id.clone(), ctx.shard.clone(), ctx.status)
        };
        let bytes_in = self.bytes_in();
        let bytes_out = self.bytes_out();
        let elapsed = self.started.elapsed();

        counter!(GATEWAY_BYTES_IN).increment(bytes_in);
        counter!(GATEWAY_BYTES_OUT).increment(bytes_out);
        histogram!(TRANSFER_DURATION).record(elapsed.as_secs_f64());

        if team_id.is_none() {
            // Operators still get a bounded look at what unauthenticated
            // traffic carried.
            let sample = self.sample.lock();
            if !sample.is_empty() {
                tracing::debug!(
                    protocol = self.protocol,
                    sample = %String::from_utf8_lossy(&sample),
                    "unauthenticated payload sample"
                );
            }
        }

        tracing::info!(
            protocol = self.protocol,
            team_id = team_id.as_deref().unwrap_or("-"),
            shard = shard.as_deref().unwrap_or("-"),
            status = status.unwrap_or(0),
            bytes_in,
            bytes_out,
            duration_ms = elapsed.as_millis() as u64,
            "transfer complete"
        );
    }
}

/// Body adapter that counts the frames flowing through it. The outbound
/// (response) wrapper finalizes its transfer on drop, which covers both
/// normal completion and client aborts.
pub struct MeteredBody<B> {
    inner: B,
    transfer: Arc<Transfer>,
    direction: Direction,
}

impl<B> MeteredBody<B> {
    pub fn inbound(inner: B, transfer: Arc<Transfer>) -> Self {
        MeteredBody {
            inner,
            transfer,
            direction: Direction::In,
        }
    }

    pub fn outbound(inner: B, transfer: Arc<Transfer>) -> Self {
        MeteredBody {
            inner,
            transfer,
            direction: Direction::Out,
        }
    }
}

impl<B> MeteredBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    /// Consumes and discards the remaining frames, keeping the counters and
    /// sample accurate for traffic that will not be forwarded.
    pub async fn drain(mut self) {
        while let Some(frame) = self.frame().await {
            if frame.is_err() {
                break;
            }
        }
    }
}

impl<B> Body for MeteredBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(Some(Ok(frame))) = &polled
            && let Some(data) = frame.data_ref()
        {
            this.transfer.record(this.direction, data);
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for MeteredBody<B> {
    fn drop(&mut self) {
        if self.direction == Direction::Out {
            self.transfer.finish();
        }
    }
}
