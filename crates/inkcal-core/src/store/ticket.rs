use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::StoreError;

/// Completion handle for a deferred write.
///
/// Await it to learn whether the physical write succeeded. Dropping it
/// does not cancel the write; the outcome is simply discarded.
#[must_use = "dropping a ticket discards the write outcome"]
#[derive(Debug)]
pub struct WriteTicket<T> {
    rx: oneshot::Receiver<Result<T, StoreError>>,
}

impl<T> WriteTicket<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T, StoreError>>) -> Self {
        Self { rx }
    }

    /// Non-blocking check. Returns `None` while the write is still pending.
    pub fn try_outcome(&mut self) -> Option<Result<T, StoreError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(StoreError::Cancelled)),
        }
    }
}

impl<T> Future for WriteTicket<T> {
    type Output = Result<T, StoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(StoreError::Cancelled)))
    }
}
