// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A generic handle for operations that complete asynchronously.
//!
//! An upload session is one such operation: it makes progress over many
//! calls, reports intermediate state on request, and eventually reaches a
//! terminal result. The [Poller] trait captures that shape so callers can
//! poll, cancel, or just wait for any such operation through one interface.

use crate::backoff::ExponentialBackoff;
use crate::{Error, Result};
use std::future::Future;

/// The result of polling an asynchronous operation.
///
/// # Parameters
/// * `R` - the response type, returned when the operation completes.
/// * `M` - the metadata type, returned while the operation is in progress.
#[derive(Debug)]
pub enum PollingResult<R, M> {
    /// The operation is still in progress.
    InProgress(Option<M>),
    /// The operation reached its terminal state.
    Completed(Result<R>),
    /// An error trying to poll the operation.
    ///
    /// This does not indicate that the operation failed. Transient errors,
    /// [Error::Transport] in particular, may disappear in the next polling
    /// attempt.
    PollingError(Error),
}

/// One observation of an operation's state, as reported by a query.
#[derive(Debug)]
pub enum OperationState<R, M> {
    InProgress(Option<M>),
    Done(R),
}

/// The trait implemented by asynchronous operation handles.
///
/// # Parameters
/// * `R` - the response type, returned when the operation completes.
/// * `M` - the metadata type, returned while the operation is in progress.
pub trait Poller<R, M>: Send {
    /// Query the current status of the operation.
    ///
    /// Returns `None` once a [PollingResult::Completed] has been delivered.
    fn poll(&mut self) -> impl Future<Output = Option<PollingResult<R, M>>> + Send;

    /// Request cancellation of the operation.
    ///
    /// Cancellation is best effort. A successful return means the service
    /// accepted the request, not that the operation stopped before
    /// completing.
    fn cancel(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Poll the operation until it completes, backing off between attempts.
    fn until_done(self) -> impl Future<Output = Result<R>> + Send;
}

/// Creates an `impl Poller<R, M>` from a query closure and a cancel closure.
///
/// The closures capture the operation's identity and whatever stub they talk
/// to; the poller only sequences them.
pub fn new_poller<R, M, Q, QF, C, CF>(query: Q, cancel: C) -> impl Poller<R, M>
where
    R: Send,
    M: Send,
    Q: Fn() -> QF + Send + Sync,
    QF: Future<Output = Result<OperationState<R, M>>> + Send,
    C: Fn() -> CF + Send + Sync,
    CF: Future<Output = Result<()>> + Send,
{
    PollerImpl::new(query, cancel, ExponentialBackoff::default())
}

struct PollerImpl<Q, C> {
    query: Q,
    cancel: C,
    backoff: ExponentialBackoff,
    done: bool,
}

impl<Q, C> PollerImpl<Q, C> {
    fn new(query: Q, cancel: C, backoff: ExponentialBackoff) -> Self {
        Self {
            query,
            cancel,
            backoff,
            done: false,
        }
    }
}

impl<R, M, Q, QF, C, CF> Poller<R, M> for PollerImpl<Q, C>
where
    R: Send,
    M: Send,
    Q: Fn() -> QF + Send + Sync,
    QF: Future<Output = Result<OperationState<R, M>>> + Send,
    C: Fn() -> CF + Send + Sync,
    CF: Future<Output = Result<()>> + Send,
{
    async fn poll(&mut self) -> Option<PollingResult<R, M>> {
        if self.done {
            return None;
        }
        match (self.query)().await {
            Ok(OperationState::InProgress(m)) => Some(PollingResult::InProgress(m)),
            Ok(OperationState::Done(r)) => {
                self.done = true;
                Some(PollingResult::Completed(Ok(r)))
            }
            Err(e) if e.is_recoverable() => Some(PollingResult::PollingError(e)),
            Err(e) => {
                self.done = true;
                Some(PollingResult::Completed(Err(e)))
            }
        }
    }

    async fn cancel(&mut self) -> Result<()> {
        (self.cancel)().await
    }

    async fn until_done(mut self) -> Result<R> {
        let mut attempt = 0_u32;
        loop {
            match self.poll().await {
                None => return Err(Error::NotFound),
                Some(PollingResult::Completed(r)) => return r,
                Some(PollingResult::InProgress(_)) | Some(PollingResult::PollingError(_)) => {
                    attempt += 1;
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_query(
        counter: Arc<AtomicUsize>,
        done_after: usize,
    ) -> impl Fn() -> std::pin::Pin<
        Box<dyn Future<Output = Result<OperationState<u64, u64>>> + Send>,
    > + Send
    + Sync {
        move || {
            let counter = counter.clone();
            Box::pin(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= done_after {
                    Ok(OperationState::Done(n as u64))
                } else {
                    Ok(OperationState::InProgress(Some(n as u64)))
                }
            })
        }
    }

    fn no_cancel() -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<()>> + Send>>
    + Send
    + Sync {
        || Box::pin(async { Ok(()) })
    }

    #[tokio::test]
    async fn poll_reports_progress_then_completion() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut poller = new_poller(counting_query(counter, 3), no_cancel());

        let r = poller.poll().await;
        assert!(matches!(r, Some(PollingResult::InProgress(Some(1)))), "{r:?}");
        let r = poller.poll().await;
        assert!(matches!(r, Some(PollingResult::InProgress(Some(2)))), "{r:?}");
        let r = poller.poll().await;
        assert!(matches!(r, Some(PollingResult::Completed(Ok(3)))), "{r:?}");
        // Terminal: nothing more to report.
        assert!(poller.poll().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn until_done_waits_out_progress() {
        let counter = Arc::new(AtomicUsize::new(0));
        let poller = new_poller(counting_query(counter.clone(), 4), no_cancel());
        let got = poller.until_done().await.unwrap();
        assert_eq!(got, 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn until_done_retries_transient_polling_errors() {
        let counter = Arc::new(AtomicUsize::new(0));
        let query = {
            let counter = counter.clone();
            move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    match n {
                        1 => Err(Error::transport("connection reset")),
                        _ => Ok(OperationState::<u64, u64>::Done(n as u64)),
                    }
                }
            }
        };
        let poller = new_poller(query, no_cancel());
        let got = poller.until_done().await.unwrap();
        assert_eq!(got, 2);
    }

    #[tokio::test]
    async fn terminal_errors_complete_the_operation() {
        let query = || async { Err::<OperationState<u64, u64>, _>(Error::NotFound) };
        let mut poller = new_poller(query, no_cancel());
        let r = poller.poll().await;
        assert!(
            matches!(r, Some(PollingResult::Completed(Err(Error::NotFound)))),
            "{r:?}"
        );
        assert!(poller.poll().await.is_none());
    }

    #[tokio::test]
    async fn cancel_invokes_the_closure() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let cancel = {
            let cancelled = cancelled.clone();
            move || {
                let cancelled = cancelled.clone();
                async move {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        };
        let query = || async { Ok(OperationState::<u64, u64>::InProgress(None)) };
        let mut poller = new_poller(query, cancel);
        poller.cancel().await.unwrap();
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }
}
