//! Benchmark orchestrator.
//!
//! Opens every connection up front, starts one sender per connection and
//! counts ACAs through the completion queue until `connections * messages`
//! have arrived. Each wait for the next completion has its own timeout, so
//! a stalled peer is detected within one timeout period instead of at the
//! end of the run.
//!
//! Completions are counted globally, not matched to requests: a stray or
//! duplicated ACA counts like any other.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::completion::{Completions, WaitError};
use crate::error::HarnessError;
use crate::factory::MessageFactory;
use crate::identity::Identity;
use crate::transport::{Connection, ConnectionProvider};

/// Shape of a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchOptions {
    pub connections: usize,
    pub messages: usize,
    pub signal_timeout: Duration,
}

impl BenchOptions {
    /// Number of completions the run waits for.
    pub fn expected_completions(&self) -> usize {
        self.connections.saturating_mul(self.messages)
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchReport {
    pub connections: usize,
    pub messages_per_connection: usize,
    pub completions: usize,
    /// Requests plus answers.
    pub total_messages: usize,
    pub elapsed: Duration,
}

impl BenchReport {
    /// Messages per second.
    pub fn rate(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if self.total_messages == 0 || secs <= 0.0 {
            return 0;
        }
        (self.total_messages as f64 / secs) as u64
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} messages in {:?}: {}/s",
            self.total_messages,
            self.elapsed,
            self.rate()
        )
    }
}

/// Run a benchmark against connections from `provider`.
///
/// Every acquired connection is closed before this returns, whatever
/// the outcome.
pub async fn run_benchmark<P>(
    provider: &P,
    identity: Arc<Identity>,
    options: BenchOptions,
    completions: &mut Completions,
) -> Result<BenchReport, HarnessError>
where
    P: ConnectionProvider,
{
    info!(clients = options.connections, "Connecting clients...");
    let conns = acquire_all(provider, options.connections).await?;

    info!(
        clients = conns.len(),
        messages = options.messages,
        "Done. Sending messages..."
    );
    let outcome = drive(&conns, identity, options, completions).await;
    release(&conns).await;

    let (completed, elapsed) = outcome?;
    Ok(BenchReport {
        connections: options.connections,
        messages_per_connection: options.messages,
        completions: completed,
        total_messages: completed * 2,
        elapsed,
    })
}

/// Acquire `count` connections in order. On failure the ones already
/// acquired are closed; partial sets are never used.
async fn acquire_all<P>(provider: &P, count: usize) -> Result<Vec<Arc<P::Conn>>, HarnessError>
where
    P: ConnectionProvider,
{
    let mut conns = Vec::with_capacity(count);
    for _ in 0..count {
        match provider.acquire().await {
            Ok(conn) => {
                debug!(peer = %conn.remote_addr(), "Connection ready");
                conns.push(conn);
            }
            Err(source) => {
                let acquired = conns.len();
                release(&conns).await;
                return Err(HarnessError::ConnectionAcquisition {
                    acquired,
                    requested: count,
                    source,
                });
            }
        }
    }
    Ok(conns)
}

async fn release<C: Connection + ?Sized>(conns: &[Arc<C>]) {
    for conn in conns {
        conn.close().await;
    }
}

/// Send everything and wait for the completions.
///
/// Returns the number of completions and the time from the first send
/// to the last completion. Sender tasks are aborted when this returns.
async fn drive<C>(
    conns: &[Arc<C>],
    identity: Arc<Identity>,
    options: BenchOptions,
    completions: &mut Completions,
) -> Result<(usize, Duration), HarnessError>
where
    C: Connection + 'static,
{
    let expected = options.expected_completions();

    // Resolve every factory first so a missing handshake fails before any send.
    let factories = conns
        .iter()
        .enumerate()
        .map(|(stream, conn)| {
            MessageFactory::for_connection(Arc::clone(&identity), conn.as_ref(), stream)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let start = Instant::now();
    if expected == 0 {
        return Ok((0, start.elapsed()));
    }

    let (failures_tx, mut failures) = mpsc::channel(conns.len());
    let mut senders = JoinSet::new();
    for (conn, factory) in conns.iter().zip(factories) {
        senders.spawn(send_stream(
            Arc::clone(conn),
            factory,
            options.messages,
            failures_tx.clone(),
        ));
    }
    drop(failures_tx);

    let mut received = 0;
    while received < expected {
        tokio::select! {
            biased;

            Some(failure) = failures.recv() => return Err(failure),

            next = completions.next(options.signal_timeout) => match next {
                Ok(_) => received += 1,
                Err(WaitError::Timeout) => {
                    return Err(HarnessError::CompletionTimeout {
                        timeout: options.signal_timeout,
                        received,
                        expected,
                    })
                }
                Err(WaitError::Overflow(count)) => {
                    return Err(HarnessError::TrackerOverflow(count))
                }
                Err(WaitError::Closed) => return Err(HarnessError::TrackerClosed),
            },
        }
    }

    Ok((received, start.elapsed()))
}

/// Send `messages` ACRs back to back on one connection.
async fn send_stream<C>(
    conn: Arc<C>,
    factory: MessageFactory,
    messages: usize,
    failures: mpsc::Sender<HarnessError>,
) where
    C: Connection + ?Sized,
{
    for index in 0..messages {
        let acr = factory.accounting_request(index as u32);
        if let Err(source) = conn.send(acr).await {
            let _ = failures.try_send(HarnessError::Send {
                remote: conn.remote_addr(),
                source,
            });
            return;
        }
    }
    debug!(peer = %conn.remote_addr(), messages, "Sender finished");
}
