//! Single-exchange flow: one CCR, one CCA, one overall deadline.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::completion::{RunCompleted, WaitError};
use crate::error::HarnessError;
use crate::factory::MessageFactory;
use crate::identity::Identity;
use crate::transport::{Connection, ConnectionProvider};

/// Send one CCR on a fresh connection and wait up to `deadline` for the
/// CCA handler to fire `completed`. The connection is closed on return.
pub async fn run_single_exchange<P>(
    provider: &P,
    identity: Arc<Identity>,
    completed: RunCompleted,
    deadline: Duration,
) -> Result<(), HarnessError>
where
    P: ConnectionProvider,
{
    let conn = provider
        .acquire()
        .await
        .map_err(|source| HarnessError::ConnectionAcquisition {
            acquired: 0,
            requested: 1,
            source,
        })?;

    let outcome = exchange(conn.as_ref(), identity, completed, deadline).await;
    conn.close().await;
    outcome
}

async fn exchange<C>(
    conn: &C,
    identity: Arc<Identity>,
    completed: RunCompleted,
    deadline: Duration,
) -> Result<(), HarnessError>
where
    C: Connection + ?Sized,
{
    let factory = MessageFactory::for_connection(identity, conn, 0)?;
    let ccr = factory.credit_control_request();

    info!(peer = %conn.remote_addr(), "Sending {}", ccr);
    conn.send(ccr)
        .await
        .map_err(|source| HarnessError::Send {
            remote: conn.remote_addr(),
            source,
        })?;

    match completed.wait(deadline).await {
        Ok(()) => Ok(()),
        Err(WaitError::Timeout) => Err(HarnessError::AnswerTimeout(deadline)),
        Err(WaitError::Closed) => Err(HarnessError::TrackerClosed),
        Err(WaitError::Overflow(count)) => Err(HarnessError::TrackerOverflow(count)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{completion_queue, run_completion};
    use crate::identity::test_identity;
    use crate::mux::Mux;
    use crate::transport::mock::MockProvider;

    fn setup() -> (MockProvider, RunCompleted) {
        let (tracker, _completions) = completion_queue(1);
        let (done, completed) = run_completion();
        let provider = MockProvider::new(Arc::new(Mux::standard(tracker, done)));
        (provider, completed)
    }

    #[tokio::test]
    async fn test_answer_received() {
        let (provider, completed) = setup();
        let counters = provider.counters();

        run_single_exchange(
            &provider,
            Arc::new(test_identity()),
            completed,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(counters.sent(), 1);
        assert_eq!(counters.closed(), 1);
    }

    #[tokio::test]
    async fn test_deadline_is_distinct_error() {
        let (mut provider, completed) = setup();
        provider.answer = false;
        let counters = provider.counters();

        let err = run_single_exchange(
            &provider,
            Arc::new(test_identity()),
            completed,
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HarnessError::AnswerTimeout(_)), "{:?}", err);
        assert_eq!(counters.closed(), 1);
    }

    #[tokio::test]
    async fn test_handshake_must_precede_request() {
        let (mut provider, completed) = setup();
        provider.without_metadata = true;
        let counters = provider.counters();

        let err = run_single_exchange(
            &provider,
            Arc::new(test_identity()),
            completed,
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HarnessError::PeerMetadataUnavailable { .. }));
        assert_eq!(counters.sent(), 0);
        assert_eq!(counters.closed(), 1);
    }

    #[tokio::test]
    async fn test_acquisition_failure() {
        let (mut provider, completed) = setup();
        provider.fail_acquire_at = Some(0);

        let err = run_single_exchange(
            &provider,
            Arc::new(test_identity()),
            completed,
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HarnessError::ConnectionAcquisition { .. }));
    }
}
