//! Wake-up sources for the claim loop.
//!
//! Redis events and a fixed-interval poll both push into one bounded
//! channel with room for a single pending wake-up. A wake-up that arrives
//! while one is already queued is dropped: the queued pass will see the
//! same rows.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::status::WorkerStatus;
use crate::error::SubscribeError;
use crate::infrastructure::redis::client::{EventStream, EventSubscriber};
use crate::modules::uploads::events::UploadFinishedEvent;

const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Event,
    Poll,
}

#[derive(Clone, Debug)]
pub struct WakeSender {
    tx: mpsc::Sender<Wake>,
}

pub fn wake_channel() -> (WakeSender, mpsc::Receiver<Wake>) {
    let (tx, rx) = mpsc::channel(1);
    (WakeSender { tx }, rx)
}

impl WakeSender {
    /// Requests a claim pass. Returns false once the claim loop is gone.
    pub fn wake(&self, reason: Wake) -> bool {
        match self.tx.try_send(reason) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(?reason, "claim pass already pending, coalescing wake-up");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Fires a pass immediately and then every `interval`, regardless of events.
pub async fn run_poller(sender: WakeSender, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if !sender.wake(Wake::Poll) {
                    break;
                }
            }
        }
    }
    debug!("poller stopped");
}

pub struct EventListener {
    subscriber: Arc<dyn EventSubscriber>,
    sender: WakeSender,
    status: Arc<WorkerStatus>,
}

impl EventListener {
    pub fn new(subscriber: Arc<dyn EventSubscriber>, sender: WakeSender, status: Arc<WorkerStatus>) -> Self {
        Self {
            subscriber,
            sender,
            status,
        }
    }

    /// Initial subscription. Failing here is fatal for the worker.
    pub async fn connect(&self) -> Result<EventStream, SubscribeError> {
        let stream = self.subscriber.subscribe().await?;
        self.status.set_subscribed(true);
        Ok(stream)
    }

    pub async fn run(self, mut stream: EventStream, mut shutdown: watch::Receiver<bool>) {
        loop {
            let ended = tokio::select! {
                _ = shutdown.changed() => break,
                next = stream.next() => match next {
                    Some(payload) => {
                        self.handle(&payload);
                        false
                    }
                    None => true,
                },
            };
            if !ended {
                continue;
            }

            self.status.set_subscribed(false);
            warn!("event subscription ended, reconnecting");
            match self.reconnect(&mut shutdown).await {
                Some(next) => stream = next,
                None => break,
            }
        }
        debug!("event listener stopped");
    }

    fn handle(&self, payload: &str) {
        match UploadFinishedEvent::parse(payload) {
            Ok(event) => info!(
                upload_id = event.id.as_deref().unwrap_or("-"),
                file_key = event.metadata.file_key.as_deref().unwrap_or("-"),
                "upload finished event"
            ),
            Err(e) => warn!("ignoring malformed event payload: {}", e),
        }
        self.sender.wake(Wake::Event);
    }

    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> Option<EventStream> {
        let mut delay = RECONNECT_BASE_DELAY;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            match self.subscriber.subscribe().await {
                Ok(stream) => {
                    self.status.set_subscribed(true);
                    // Anything published while disconnected is picked up here.
                    self.sender.wake(Wake::Event);
                    return Some(stream);
                }
                Err(e) => {
                    error!("resubscribe failed: {}", e);
                    delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                }
            }
        }
    }
}
