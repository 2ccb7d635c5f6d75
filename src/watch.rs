//! Background polling for on-chain FundReleased events.
//!
//! A poller thread hits the events endpoint on a fixed interval and
//! forwards only events it has not seen before (keyed by transaction hash)
//! over an mpsc channel. The session itself stays on the main thread; the
//! poller carries a token snapshot plus the instant the token stops being
//! usable, and goes quiet the moment the server rejects it.

use crate::models::ChainEvent;
use crate::session::GRACE_PERIOD_SECS;
use crate::transport::HttpTransport;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Messages the poller thread sends to the REPL.
#[derive(Debug)]
pub enum WatchMessage {
    /// Newly observed events, oldest first.
    Events(Vec<ChainEvent>),
    /// The token snapshot aged past its grace window; no request was sent.
    Expired,
    /// The server answered 401; the main thread must clear the session.
    Rejected,
    /// Network-level failure for this tick. Polling continues.
    PollFailed(String),
}

#[derive(Deserialize)]
struct EventsBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    events: Vec<ChainEvent>,
}

/// One poll cycle's worth of state, factored out of the thread loop so the
/// request/dedupe path is testable without timing.
pub struct Poller {
    transport: Box<dyn HttpTransport + Send>,
    url: String,
    token: String,
    /// Epoch second after which the token must not be sent.
    usable_until: i64,
    seen: HashSet<String>,
}

impl Poller {
    pub fn new(
        transport: Box<dyn HttpTransport + Send>,
        url: &str,
        token: &str,
        expires_at: i64,
    ) -> Self {
        Self {
            transport,
            url: url.to_string(),
            token: token.to_string(),
            usable_until: expires_at + GRACE_PERIOD_SECS,
            seen: HashSet::new(),
        }
    }

    /// Poll the endpoint once. Returns None when there is nothing new to
    /// report (empty delta).
    pub fn poll_once(&mut self, now: i64) -> Option<WatchMessage> {
        if now > self.usable_until {
            return Some(WatchMessage::Expired);
        }

        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), format!("Bearer {}", self.token)),
        ];
        let resp = match self.transport.send("GET", &self.url, &headers, None) {
            Ok(resp) => resp,
            Err(e) => return Some(WatchMessage::PollFailed(e.to_string())),
        };

        if resp.status == 401 {
            return Some(WatchMessage::Rejected);
        }

        let body: EventsBody = match serde_json::from_str(&resp.body) {
            Ok(body) => body,
            Err(e) => return Some(WatchMessage::PollFailed(e.to_string())),
        };
        if !body.success {
            return Some(WatchMessage::PollFailed(format!(
                "events endpoint reported failure (status {})",
                resp.status
            )));
        }

        let fresh: Vec<ChainEvent> = body
            .events
            .into_iter()
            .filter(|event| self.seen.insert(event.transaction_hash.clone()))
            .collect();

        if fresh.is_empty() {
            None
        } else {
            Some(WatchMessage::Events(fresh))
        }
    }
}

/// Handle to a running watcher. Dropping it (or calling `stop`) makes the
/// thread exit at its next tick.
pub struct Watcher {
    pub rx: Receiver<WatchMessage>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Spawn the poller thread. The first poll happens immediately; later
    /// polls wait `interval` between ticks.
    pub fn spawn(mut poller: Poller, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let (tx, rx): (Sender<WatchMessage>, Receiver<WatchMessage>) = mpsc::channel();

        let handle = std::thread::spawn(move || loop {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }

            let now = chrono::Utc::now().timestamp();
            let outcome = poller.poll_once(now);
            let terminal = matches!(
                &outcome,
                Some(WatchMessage::Expired) | Some(WatchMessage::Rejected)
            );
            if let Some(message) = outcome {
                if tx.send(message).is_err() {
                    // Receiver dropped, exit loop.
                    break;
                }
            }
            if terminal {
                break;
            }

            // Sleep in short slices so stop requests take effect promptly.
            let mut remaining = interval;
            let slice = Duration::from_millis(200);
            while remaining > Duration::ZERO {
                if stop_flag.load(Ordering::Relaxed) {
                    return;
                }
                let nap = remaining.min(slice);
                std::thread::sleep(nap);
                remaining = remaining.saturating_sub(nap);
            }
        });

        Self {
            rx,
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
