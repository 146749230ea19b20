//! Answer dispatch by command code and application id.
//!
//! Handlers are registered once at startup; the table is immutable
//! afterwards and shared by every connection reader task.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::completion::{CompletionTracker, RunCompletion};
use crate::diameter::{Command, Message, APP_BASE_ACCOUNTING, APP_CREDIT_CONTROL};

/// Routing key for an incoming answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Discriminator {
    pub command_code: u32,
    pub application_id: u32,
}

impl Discriminator {
    pub const fn new(command_code: u32, application_id: u32) -> Self {
        Self {
            command_code,
            application_id,
        }
    }

    /// Credit-Control-Answer: the single-exchange response.
    pub fn cca() -> Self {
        Self::new(Command::CreditControl.code(), APP_CREDIT_CONTROL)
    }

    /// Accounting-Answer: the bulk-exchange response.
    pub fn aca() -> Self {
        Self::new(Command::Accounting.code(), APP_BASE_ACCOUNTING)
    }

    pub fn of(message: &Message) -> Self {
        Self::new(message.command_code, message.application_id)
    }
}

/// Callback invoked for a routed answer.
///
/// Handlers run on connection reader tasks, concurrently with each
/// other, and must not block.
pub trait AnswerHandler: Send + Sync {
    fn handle(&self, remote: &str, answer: &Message);
}

/// Push one completion signal per answer.
pub struct CountCompletions(pub CompletionTracker);

impl AnswerHandler for CountCompletions {
    fn handle(&self, remote: &str, _answer: &Message) {
        if let Err(e) = self.0.signal() {
            debug!(peer = %remote, error = %e, "Completion not recorded");
        }
    }
}

/// Fire the one-shot run completion.
pub struct CompleteRun(pub RunCompletion);

impl AnswerHandler for CompleteRun {
    fn handle(&self, remote: &str, answer: &Message) {
        if self.0.fire() {
            info!(peer = %remote, "Received {}", answer);
        } else {
            debug!(peer = %remote, "Ignoring repeated {}", answer);
        }
    }
}

/// Log anything nobody registered for.
pub struct LogUnhandled;

impl AnswerHandler for LogUnhandled {
    fn handle(&self, remote: &str, answer: &Message) {
        info!(peer = %remote, "Unhandled answer {}", answer);
    }
}

/// The handler table.
pub struct Mux {
    handlers: HashMap<Discriminator, Arc<dyn AnswerHandler>>,
    fallback: Arc<dyn AnswerHandler>,
}

impl Mux {
    pub fn builder() -> MuxBuilder {
        MuxBuilder {
            handlers: HashMap::new(),
            fallback: Arc::new(LogUnhandled),
        }
    }

    /// The standard table: CCA fires `done`, ACA feeds `tracker`.
    pub fn standard(tracker: CompletionTracker, done: RunCompletion) -> Self {
        Self::builder()
            .handle(Discriminator::cca(), CompleteRun(done))
            .handle(Discriminator::aca(), CountCompletions(tracker))
            .build()
    }

    /// Route one answer to exactly one handler.
    pub fn dispatch(&self, remote: &str, answer: &Message) {
        self.handlers
            .get(&Discriminator::of(answer))
            .unwrap_or(&self.fallback)
            .handle(remote, answer);
    }
}

pub struct MuxBuilder {
    handlers: HashMap<Discriminator, Arc<dyn AnswerHandler>>,
    fallback: Arc<dyn AnswerHandler>,
}

impl MuxBuilder {
    pub fn handle(mut self, key: Discriminator, handler: impl AnswerHandler + 'static) -> Self {
        self.handlers.insert(key, Arc::new(handler));
        self
    }

    #[cfg(test)]
    pub fn fallback(mut self, handler: impl AnswerHandler + 'static) -> Self {
        self.fallback = Arc::new(handler);
        self
    }

    pub fn build(self) -> Mux {
        Mux {
            handlers: self.handlers,
            fallback: self.fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{completion_queue, run_completion, WaitError};
    use crate::diameter::avp::{code, Avp};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn answer(command: Command, application_id: u32) -> Message {
        let request = Message::request(
            command,
            application_id,
            vec![Avp::utf8(code::SESSION_ID, "client;1")],
        );
        Message::answer_to(&request, vec![Avp::unsigned32(code::RESULT_CODE, 2001)])
    }

    struct Counter(Arc<AtomicUsize>);

    impl AnswerHandler for Counter {
        fn handle(&self, _remote: &str, _answer: &Message) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_aca_signals_tracker() {
        let (tracker, mut completions) = completion_queue(4);
        let (done, completed) = run_completion();
        let mux = Mux::standard(tracker, done);

        mux.dispatch("peer", &answer(Command::Accounting, APP_BASE_ACCOUNTING));
        mux.dispatch("peer", &answer(Command::Accounting, APP_BASE_ACCOUNTING));

        assert!(completions.next(Duration::from_millis(50)).await.is_ok());
        assert!(completions.next(Duration::from_millis(50)).await.is_ok());

        // ACAs never touch the one-shot flag
        assert_eq!(
            completed.wait(Duration::from_millis(20)).await,
            Err(WaitError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_cca_fires_run_completion() {
        let (tracker, mut completions) = completion_queue(4);
        let (done, completed) = run_completion();
        let mux = Mux::standard(tracker, done);

        mux.dispatch("peer", &answer(Command::CreditControl, APP_CREDIT_CONTROL));
        assert!(completed.wait(Duration::from_millis(50)).await.is_ok());

        // CCAs never count as bulk completions
        assert_eq!(
            completions.next(Duration::from_millis(20)).await,
            Err(WaitError::Timeout)
        );
    }

    #[test]
    fn test_unmatched_goes_to_fallback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let fallback_hits = Arc::new(AtomicUsize::new(0));
        let mux = Mux::builder()
            .handle(Discriminator::aca(), Counter(Arc::clone(&hits)))
            .fallback(Counter(Arc::clone(&fallback_hits)))
            .build();

        // Same command, different application
        mux.dispatch("peer", &answer(Command::Accounting, 0));
        mux.dispatch("peer", &answer(Command::DeviceWatchdog, 0));
        mux.dispatch("peer", &answer(Command::Accounting, APP_BASE_ACCOUNTING));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_hits.load(Ordering::SeqCst), 2);
    }
}
