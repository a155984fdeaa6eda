// ── Reactive entry streams ──
//
// Subscription types for consuming cache transitions from a CacheStore.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::store::EntryChange;

/// A subscription to one cache store's transitions.
///
/// Provides both point-in-time access and reactive change notification
/// via the `changed()` method or by converting to a `Stream`.
pub struct EntryStream {
    current: EntryChange,
    receiver: watch::Receiver<EntryChange>,
}

impl EntryStream {
    pub(crate) fn new(receiver: watch::Receiver<EntryChange>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The change captured at creation time (or at the last `changed()`).
    pub fn current(&self) -> &EntryChange {
        &self.current
    }

    /// The latest change (may be newer than `current`).
    pub fn latest(&self) -> EntryChange {
        self.receiver.borrow().clone()
    }

    /// Wait for the next transition.
    /// Returns `None` if the cache store has been dropped.
    pub async fn changed(&mut self) -> Option<EntryChange> {
        self.receiver.changed().await.ok()?;
        let change = self.receiver.borrow_and_update().clone();
        self.current = change.clone();
        Some(change)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> EntryWatchStream {
        EntryWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
///
/// Yields the current change first, then each newer one.
pub struct EntryWatchStream {
    inner: WatchStream<EntryChange>,
}

impl Stream for EntryWatchStream {
    type Item = EntryChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
