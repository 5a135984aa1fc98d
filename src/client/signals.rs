//! Caller-held cancellation for in-flight dispatches.

use tokio::sync::watch;

/// Create a linked cancellation pair.
///
/// The [`CancelHandle`] stays with the caller; the [`CancelSignal`] is
/// attached to an [`Operation`](crate::Operation) and travels with it through
/// the pipeline. The transport races the HTTP exchange against the signal, so
/// firing the handle aborts the network call with
/// [`Error::Aborted`](crate::Error::Aborted) rather than a failing response.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Caller-held side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Abort the dispatch this handle is linked to. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Operation-carried side of a cancellation pair.
///
/// Dropping the [`CancelHandle`] without firing it leaves the signal inert:
/// the dispatch runs to completion.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Whether the handle has already fired.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the handle fires. Pends forever if the handle is dropped
    /// unfired.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling; nothing can fire now.
                futures::future::pending::<()>().await;
            }
        }
    }
}
