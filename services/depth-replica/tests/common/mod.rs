//! In-memory venue fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use depth_replica::{
    ConnectionState, DepthSnapshot, DiffEvent, DiffSource, DiffSubscription, LevelChange,
    SnapshotSource, SourceError, SupervisorHandle,
};
use tokio::sync::mpsc;
use types::ids::MarketId;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn market() -> MarketId {
    MarketId::new("BTC/USDT")
}

pub fn snapshot(sequence: u64, bids: &[LevelChange], asks: &[LevelChange]) -> DepthSnapshot {
    DepthSnapshot {
        sequence,
        bids: bids.to_vec(),
        asks: asks.to_vec(),
    }
}

pub fn diff(first: u64, last: u64, bids: &[LevelChange], asks: &[LevelChange]) -> DiffEvent {
    DiffEvent {
        first_sequence: first,
        last_sequence: last,
        bid_changes: bids.to_vec(),
        ask_changes: asks.to_vec(),
    }
}

/// Serves scripted responses in order, then keeps repeating the last one.
pub struct ScriptedSnapshots {
    script: Mutex<VecDeque<Result<DepthSnapshot, SourceError>>>,
    last: Mutex<Option<Result<DepthSnapshot, SourceError>>>,
    fetches: AtomicUsize,
}

impl ScriptedSnapshots {
    pub fn new(script: Vec<Result<DepthSnapshot, SourceError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, response: Result<DepthSnapshot, SourceError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSnapshots {
    async fn fetch(&self, _symbol: &MarketId) -> Result<DepthSnapshot, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(response) => {
                *self.last.lock().unwrap() = Some(response.clone());
                response
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(SourceError::Transient("script exhausted".into()))),
        }
    }
}

/// Serves scripted snapshots; a `None` entry, or running off the end of the
/// script, never answers.
pub struct StallingSnapshots {
    script: Mutex<VecDeque<Option<DepthSnapshot>>>,
    fetches: AtomicUsize,
}

impl StallingSnapshots {
    pub fn new(script: Vec<Option<DepthSnapshot>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for StallingSnapshots {
    async fn fetch(&self, _symbol: &MarketId) -> Result<DepthSnapshot, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front().flatten();
        match next {
            Some(snapshot) => Ok(snapshot),
            None => std::future::pending().await,
        }
    }
}

type Senders = (mpsc::Sender<DiffEvent>, mpsc::Sender<SourceError>);

/// Diff feed driven from the test through `push` and `fail`.
#[derive(Default)]
pub struct ChannelDiffs {
    current: Mutex<Option<Senders>>,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl ChannelDiffs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Send an event on the open subscription. Returns `false` if none is open.
    pub fn push(&self, event: DiffEvent) -> bool {
        match self.current.lock().unwrap().as_ref() {
            Some((events, _)) => events.try_send(event).is_ok(),
            None => false,
        }
    }

    pub fn fail(&self, error: SourceError) -> bool {
        match self.current.lock().unwrap().as_ref() {
            Some((_, errors)) => errors.try_send(error).is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiffSource for ChannelDiffs {
    async fn subscribe(&self, _symbol: &MarketId) -> Result<DiffSubscription, SourceError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let (events, errors, subscription) = DiffSubscription::channel(64);
        *self.current.lock().unwrap() = Some((events, errors));
        Ok(subscription)
    }

    async fn unsubscribe(&self) {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.current.lock().unwrap().take();
    }
}

/// Wait until the supervisor reports `state`.
pub async fn wait_for_state(handle: &SupervisorHandle, state: ConnectionState) {
    let mut rx = handle.subscribe_state();
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}", state))
        .unwrap_or_else(|_| panic!("supervisor dropped before reaching {:?}", state));
}

/// Wait until the book has moved to at least `sequence`.
pub async fn wait_for_sequence(handle: &SupervisorHandle, sequence: u64) {
    for _ in 0..1000 {
        if handle.book().last_sequence().await.is_some_and(|s| s >= sequence) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("book never reached sequence {}", sequence);
}

/// Wait until `snapshots` has been asked `count` times.
pub async fn wait_for_fetches(snapshots: &StallingSnapshots, count: usize) {
    for _ in 0..1000 {
        if snapshots.fetches() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("snapshot source never reached {} fetches", count);
}

/// Wait until metric `name` reaches at least `value`.
pub async fn wait_for_metric(handle: &SupervisorHandle, name: &str, value: u64) {
    for _ in 0..1000 {
        if handle.metrics().export().get(name).copied().unwrap_or(0) >= value {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("metric {} never reached {}", name, value);
}
