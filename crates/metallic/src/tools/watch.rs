//! Filesystem watch subscriptions.
//!
//! A [`WatchHandle`] owns one driver task reading the agent's watch stream.
//! The stream ends on [`WatchHandle::stop`], on the optional timeout, or when
//! the agent closes it. Whichever comes first, `on_close` runs exactly once.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metallic_proto::filesystem as proto;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;

/// Mask value meaning "every event type".
pub const ALL_EVENTS: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
}

impl WatchEventKind {
    pub const ALL: [Self; 3] = [Self::Created, Self::Modified, Self::Deleted];

    pub const fn bit(self) -> u32 {
        match self {
            Self::Created => 0x1,
            Self::Modified => 0x2,
            Self::Deleted => 0x4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
        }
    }

    const fn from_wire(kind: proto::WatchEventType) -> Self {
        match kind {
            proto::WatchEventType::Created => Self::Created,
            proto::WatchEventType::Modified => Self::Modified,
            proto::WatchEventType::Deleted => Self::Deleted,
        }
    }
}

impl fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bitmask for a set of event kinds. An empty set selects everything.
pub fn events_mask(events: &[WatchEventKind]) -> u32 {
    let mask = events.iter().fold(0, |acc, kind| acc | kind.bit());
    if mask == 0 { ALL_EVENTS } else { mask }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchEventKind,
    /// Previous path for renames.
    pub old_path: Option<String>,
    pub is_directory: bool,
}

/// Observer for a watch subscription.
pub trait WatchListener: Send + Sync + 'static {
    fn on_event(&self, event: &WatchEvent);

    /// Per-event and transport errors. The watch keeps running.
    fn on_error(&self, error: &Error) {
        warn!(error = %error, "Watch error");
    }

    fn on_close(&self) {}
}

/// Any `Fn(&WatchEvent)` closure is a listener with default error handling.
impl<F> WatchListener for F
where
    F: Fn(&WatchEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &WatchEvent) {
        self(event);
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub recursive: bool,
    /// Event kinds to deliver. Empty means all.
    pub events: Vec<WatchEventKind>,
    /// Close the watch automatically after this long. Zero means never.
    pub timeout: Option<Duration>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            events: WatchEventKind::ALL.to_vec(),
            timeout: None,
        }
    }
}

impl WatchOptions {
    #[must_use]
    pub const fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    #[must_use]
    pub fn events(mut self, events: impl Into<Vec<WatchEventKind>>) -> Self {
        self.events = events.into();
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Close-once latch shared by the handle and its driver.
struct Closer {
    closed: AtomicBool,
    listener: Arc<dyn WatchListener>,
}

impl Closer {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.listener.on_close();
        }
    }
}

/// Handle to a running watch. Dropping it stops the watch.
pub struct WatchHandle {
    cancel: CancellationToken,
    closer: Arc<Closer>,
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl WatchHandle {
    /// Start driving `stream`. Must be called from within a tokio runtime.
    pub(crate) fn spawn<S>(
        stream: S,
        mask: u32,
        timeout: Option<Duration>,
        listener: Arc<dyn WatchListener>,
    ) -> Self
    where
        S: Stream<Item = Result<proto::WatchEvent, tonic::Status>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let closer = Arc::new(Closer {
            closed: AtomicBool::new(false),
            listener,
        });
        tokio::spawn(drive(
            stream,
            mask,
            timeout.filter(|t| !t.is_zero()),
            cancel.clone(),
            Arc::clone(&closer),
        ));
        Self { cancel, closer }
    }

    /// Stop watching. Safe to call any number of times.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.closer.close();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Resolves once the watch has closed for any reason.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drive<S>(
    stream: S,
    mask: u32,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    closer: Arc<Closer>,
) where
    S: Stream<Item = Result<proto::WatchEvent, tonic::Status>> + Send + 'static,
{
    tokio::pin!(stream);
    let sleep = tokio::time::sleep(timeout.unwrap_or_default());
    tokio::pin!(sleep);
    let listener = &closer.listener;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            () = &mut sleep, if timeout.is_some() => {
                debug!("Watch timed out");
                break;
            }

            item = stream.next() => match item {
                Some(Ok(event)) => {
                    if !event.error.is_empty() {
                        listener.on_error(&Error::Remote(event.error));
                        continue;
                    }
                    let Ok(kind) = proto::WatchEventType::try_from(event.r#type) else {
                        debug!(event_type = event.r#type, "Ignoring unknown watch event");
                        continue;
                    };
                    let kind = WatchEventKind::from_wire(kind);
                    if mask & kind.bit() == 0 {
                        continue;
                    }
                    listener.on_event(&WatchEvent {
                        path: event.path,
                        kind,
                        old_path: Some(event.old_path).filter(|p| !p.is_empty()),
                        is_directory: event.is_directory,
                    });
                }
                Some(Err(status)) => listener.on_error(&Error::from(status)),
                None => {
                    debug!("Watch stream ended");
                    break;
                }
            },
        }
    }

    closer.close();
    cancel.cancel();
}
