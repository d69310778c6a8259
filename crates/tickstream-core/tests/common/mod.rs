// Scripted fake transports for driving the sync engine in tests.
//
// Each integration-test binary compiles this module independently and
// uses a different subset of it.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use tickstream_api::Error;
use tickstream_api::frames::{Frame, FrameStream, Transport, TransportKind};

use tickstream_core::{BackoffPolicy, SyncParams};

/// Sender half of one scripted connection's frame stream. Dropping it
/// ends the stream (a clean close from the engine's point of view).
pub type FrameSender = mpsc::UnboundedSender<Result<Frame, Error>>;

enum Scripted {
    Fail,
    Stream(mpsc::UnboundedReceiver<Result<Frame, Error>>),
}

/// A transport whose connection outcomes are scripted up front.
/// Connect attempts past the end of the script fail.
pub struct MockTransport {
    kind: TransportKind,
    connects: AtomicUsize,
    script: Mutex<VecDeque<Scripted>>,
}

impl MockTransport {
    pub fn new(kind: TransportKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            connects: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
        })
    }

    /// A transport whose every connect attempt fails.
    pub fn always_failing(kind: TransportKind) -> Arc<Self> {
        Self::new(kind)
    }

    /// Script one failed connect attempt.
    #[allow(dead_code)]
    pub fn push_failure(&self) {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Scripted::Fail);
    }

    /// Script one successful connect; returns the sender feeding its
    /// frame stream.
    pub fn push_stream(&self) -> FrameSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script
            .lock()
            .expect("script lock")
            .push_back(Scripted::Stream(rx));
        tx
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn connect(&self) -> BoxFuture<'static, Result<FrameStream, Error>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().expect("script lock").pop_front();

        Box::pin(async move {
            match next {
                None | Some(Scripted::Fail) => {
                    Err(Error::WebSocketConnect("scripted connect failure".into()))
                }
                Some(Scripted::Stream(rx)) => {
                    let stream: FrameStream = Box::pin(UnboundedReceiverStream::new(rx));
                    Ok(stream)
                }
            }
        })
    }
}

/// Fast engine parameters so retries and fallback complete in
/// milliseconds of wall-clock time.
pub fn fast_params(max_retries: u32) -> SyncParams {
    SyncParams {
        backoff: BackoffPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(4),
            max_retries,
        },
        heartbeat: Duration::from_secs(30),
        ..SyncParams::default()
    }
}

/// Poll a condition until it holds or the deadline passes.
pub async fn wait_for<F: Fn() -> bool>(what: &str, deadline: Duration, cond: F) {
    let start = tokio::time::Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
