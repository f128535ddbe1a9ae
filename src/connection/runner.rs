use crate::driver::{Answer, TransactionHandle};
use crate::state::{Message, NotificationManager, StopSignal};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Runs once when a query has finished, however it finished.
pub type Completion = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + Sync>;

/// Output forwarded to the query output pane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Answer(Answer),
    Stopped,
    Failed(String),
    Done { answers: usize, elapsed: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Completed { answers: usize },
    Stopped { answers: usize },
    Failed { answers: usize, reason: String },
}

impl QueryOutcome {
    pub fn answers(&self) -> usize {
        match self {
            Self::Completed { answers } | Self::Stopped { answers } => *answers,
            Self::Failed { answers, .. } => *answers,
        }
    }
}

/// A single admitted query bound to the open transaction.
///
/// Created by [`TransactionState::query_runner`](super::TransactionState::query_runner).
/// The completion callback runs exactly once: at the end of [`run`](Self::run),
/// or from `Drop` if the runner is discarded without running.
pub struct QueryRunner {
    transaction: Arc<dyn TransactionHandle>,
    content: String,
    stop_signal: StopSignal,
    notifier: NotificationManager,
    on_complete: Option<Completion>,
}

impl QueryRunner {
    pub(crate) fn new(
        transaction: Arc<dyn TransactionHandle>,
        content: String,
        stop_signal: StopSignal,
        notifier: NotificationManager,
        on_complete: Completion,
    ) -> Self {
        Self {
            transaction,
            content,
            stop_signal,
            notifier,
            on_complete: Some(on_complete),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop_signal
    }

    /// Execute the query, streaming answers into `responses`.
    ///
    /// The stop signal is checked before each answer. A closed receiver is
    /// not an error; answers are still counted.
    pub async fn run(mut self, responses: &mpsc::UnboundedSender<Response>) -> QueryOutcome {
        let started = Instant::now();
        let outcome = self.execute(responses).await;

        let last = match &outcome {
            QueryOutcome::Completed { answers } => Response::Done {
                answers: *answers,
                elapsed: started.elapsed(),
            },
            QueryOutcome::Stopped { .. } => Response::Stopped,
            QueryOutcome::Failed { reason, .. } => {
                self.notifier.user_error(Message::FailedToRunQuery {
                    reason: reason.clone(),
                });
                Response::Failed(reason.clone())
            }
        };
        let _ = responses.send(last);
        tracing::debug!(outcome = ?outcome, elapsed = ?started.elapsed(), "query finished");

        if let Some(on_complete) = self.on_complete.take() {
            on_complete().await;
        }
        outcome
    }

    async fn execute(&self, responses: &mpsc::UnboundedSender<Response>) -> QueryOutcome {
        let mut stream = match self.transaction.query(&self.content).await {
            Ok(stream) => stream,
            Err(err) => {
                return QueryOutcome::Failed {
                    answers: 0,
                    reason: err.to_string(),
                };
            }
        };

        let mut answers = 0;
        loop {
            if self.stop_signal.is_set() {
                return QueryOutcome::Stopped { answers };
            }
            match stream.next().await {
                Some(Ok(answer)) => {
                    answers += 1;
                    let _ = responses.send(Response::Answer(answer));
                }
                Some(Err(err)) => {
                    return QueryOutcome::Failed {
                        answers,
                        reason: err.to_string(),
                    };
                }
                None => return QueryOutcome::Completed { answers },
            }
        }
    }
}

impl Drop for QueryRunner {
    fn drop(&mut self) {
        let Some(on_complete) = self.on_complete.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(on_complete());
            }
            Err(_) => {
                tracing::warn!("query runner dropped outside a runtime, completion skipped");
            }
        }
    }
}
