use super::*;
use crate::{
    Acceptor, BlockReason, Error, Item, Limits, RateLimitedAcceptor, Result, sequential_batch,
};
use core::{num::NonZeroUsize, time::Duration};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

const GRACE: Duration = Duration::from_secs(600);

#[derive(Clone, Debug)]
struct Call {
    at: Instant,
    ids: Vec<u64>,
    accepted: bool,
}

/// Shared record of every call an acceptor received.
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    fn record(&self, batch: &[Item], accepted: bool) {
        self.0.lock().unwrap().push(Call {
            at: Instant::now(),
            ids: batch.iter().map(|item| item.id).collect(),
            accepted,
        });
    }

    fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    fn accepted(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.accepted).collect()
    }

    fn accepted_sizes(&self) -> Vec<usize> {
        self.accepted().iter().map(|c| c.ids.len()).collect()
    }

    fn accepted_ids(&self) -> Vec<u64> {
        self.accepted().into_iter().flat_map(|c| c.ids).collect()
    }
}

fn limits(max_items: usize, min_period: Duration) -> Limits {
    Limits::new(NonZeroUsize::new(max_items).unwrap(), min_period)
}

fn recording_acceptor(
    max_items: usize,
    min_period: Duration,
    journal: &Journal,
) -> RateLimitedAcceptor {
    let journal = journal.clone();
    RateLimitedAcceptor::builder()
        .max_items(max_items)
        .min_period(min_period)
        .consumer(move |batch| journal.record(batch, true))
        .build()
        .unwrap()
}

fn spawn<A: Acceptor>(acceptor: A) -> Dispatcher {
    Dispatcher::spawn(acceptor, CancellationToken::new(), DispatcherConfig::default())
}

fn ids(range: core::ops::Range<u64>) -> Vec<Item> {
    range.map(Item::new).collect()
}

/// Acceptor whose limits follow a schedule and which refuses or fails chosen
/// calls.
struct ScriptedAcceptor {
    schedule: Vec<Limits>,
    reads: Arc<Mutex<Vec<Instant>>>,
    refuse: Vec<usize>,
    fail: Vec<usize>,
    calls: usize,
    journal: Journal,
}

impl ScriptedAcceptor {
    fn new(schedule: Vec<Limits>, refuse: Vec<usize>, journal: &Journal) -> Self {
        Self {
            schedule,
            reads: Arc::default(),
            refuse,
            fail: Vec::new(),
            calls: 0,
            journal: journal.clone(),
        }
    }

    fn failing(mut self, fail: Vec<usize>) -> Self {
        self.fail = fail;
        self
    }
}

impl Acceptor for ScriptedAcceptor {
    fn limits(&self) -> Limits {
        let mut reads = self.reads.lock().unwrap();
        let read = reads.len();
        reads.push(Instant::now());
        self.schedule[read.min(self.schedule.len() - 1)]
    }

    fn process(&mut self, batch: &[Item]) -> Result<()> {
        let call = self.calls;
        self.calls += 1;

        if self.fail.contains(&call) {
            self.journal.record(batch, false);
            return Err(Error::InvalidConfig {
                reason: "downstream rejected the payload".to_string(),
            });
        }

        let refused = self.refuse.contains(&call);
        self.journal.record(batch, !refused);
        if refused {
            return Err(Error::Blocked(BlockReason::TooLarge {
                len: batch.len(),
                max_items: 0,
            }));
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn splits_batch_into_paced_chunks() {
    let journal = Journal::default();
    let acceptor = recording_acceptor(17, Duration::from_millis(100), &journal);
    let dispatcher = spawn(acceptor);

    dispatcher
        .send(CancellationToken::new(), sequential_batch(100))
        .await
        .unwrap();
    dispatcher.shutdown(GRACE).await.unwrap();

    assert_eq!(journal.accepted_sizes(), vec![17, 17, 17, 17, 17, 15]);
    assert_eq!(journal.accepted_ids(), (0..100).collect::<Vec<_>>());

    let calls = journal.calls();
    for pair in calls.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(100));
    }

    let stats = dispatcher.stats().snapshot();
    assert_eq!(stats.items_accepted, 100);
    assert_eq!(stats.chunks_accepted, 6);
    assert_eq!(stats.chunks_blocked, 0);
    assert_eq!(stats.submissions_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn small_batch_is_a_single_call() {
    let journal = Journal::default();
    let acceptor = recording_acceptor(2, Duration::from_millis(100), &journal);
    let dispatcher = spawn(acceptor);

    dispatcher
        .send(CancellationToken::new(), vec![Item::new(1)])
        .await
        .unwrap();
    dispatcher.shutdown(GRACE).await.unwrap();

    assert_eq!(journal.accepted_sizes(), vec![1]);
    assert_eq!(journal.accepted_ids(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn exact_multiple_has_no_trailing_chunk() {
    let journal = Journal::default();
    let acceptor = recording_acceptor(5, Duration::from_millis(10), &journal);
    let dispatcher = spawn(acceptor);

    dispatcher
        .send(CancellationToken::new(), sequential_batch(15))
        .await
        .unwrap();
    dispatcher.shutdown(GRACE).await.unwrap();

    assert_eq!(journal.accepted_sizes(), vec![5, 5, 5]);
}

#[tokio::test(start_paused = true)]
async fn empty_submission_makes_no_calls() {
    let journal = Journal::default();
    let acceptor = recording_acceptor(2, Duration::from_millis(100), &journal);
    let dispatcher = spawn(acceptor);

    let start = Instant::now();
    dispatcher.send(CancellationToken::new(), Vec::new()).await.unwrap();
    dispatcher.shutdown(GRACE).await.unwrap();

    assert!(journal.calls().is_empty());
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(dispatcher.stats().snapshot().submissions_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn submissions_drain_in_arrival_order() {
    let journal = Journal::default();
    let acceptor = recording_acceptor(2, Duration::from_millis(100), &journal);
    let dispatcher = spawn(acceptor);

    dispatcher.send(CancellationToken::new(), ids(0..5)).await.unwrap();
    dispatcher.send(CancellationToken::new(), ids(100..105)).await.unwrap();
    dispatcher.shutdown(GRACE).await.unwrap();

    assert_eq!(journal.accepted_sizes(), vec![2, 2, 1, 2, 2, 1]);
    assert_eq!(
        journal.accepted_ids(),
        vec![0, 1, 2, 3, 4, 100, 101, 102, 103, 104]
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_senders_deliver_everything() {
    let journal = Journal::default();
    let acceptor = recording_acceptor(500, Duration::from_millis(50), &journal);
    let dispatcher = spawn(acceptor);

    let senders: Vec<_> = (0..5)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .send(CancellationToken::new(), sequential_batch(10_000))
                    .await
            })
        })
        .collect();
    for sender in senders {
        sender.await.unwrap().unwrap();
    }
    dispatcher.shutdown(GRACE).await.unwrap();

    let stats = dispatcher.stats().snapshot();
    assert_eq!(stats.items_accepted, 50_000);
    assert_eq!(stats.chunks_accepted, 100);
    assert_eq!(stats.chunks_blocked, 0);
    assert!(journal.accepted_sizes().iter().all(|&len| len == 500));
}

#[tokio::test(start_paused = true)]
async fn blocked_chunk_is_skipped_and_limits_refreshed() {
    let journal = Journal::default();
    let acceptor = ScriptedAcceptor::new(
        vec![
            limits(4, Duration::from_millis(10)),
            limits(2, Duration::from_millis(10)),
        ],
        vec![0],
        &journal,
    );
    let reads = Arc::clone(&acceptor.reads);
    let config = DispatcherConfig {
        backoff: Duration::from_secs(5),
        on_blocked: BlockedPolicy::Skip,
    };
    let dispatcher = Dispatcher::spawn(acceptor, CancellationToken::new(), config);

    dispatcher.send(CancellationToken::new(), ids(0..10)).await.unwrap();
    dispatcher.shutdown(GRACE).await.unwrap();

    let calls = journal.calls();
    assert_eq!(calls[0].ids, vec![0, 1, 2, 3]);
    assert!(!calls[0].accepted);
    assert!(calls[1].at - calls[0].at >= Duration::from_millis(10) + Duration::from_secs(5));

    // Limits are read at spawn and once more after the pacing delay and the
    // full backoff have both elapsed.
    let reads = reads.lock().unwrap().clone();
    assert_eq!(reads.len(), 2);
    assert!(reads[1] >= calls[0].at + Duration::from_millis(10) + Duration::from_secs(5));
    assert!(reads[1] <= calls[1].at);

    // The refused chunk is gone; the rest is sized by the refreshed limits.
    assert_eq!(journal.accepted_sizes(), vec![2, 2, 2]);
    assert_eq!(journal.accepted_ids(), vec![4, 5, 6, 7, 8, 9]);

    let stats = dispatcher.stats().snapshot();
    assert_eq!(stats.chunks_blocked, 1);
    assert_eq!(stats.items_dropped, 4);
    assert_eq!(stats.limit_refreshes, 1);
    assert_eq!(stats.items_accepted, 6);
}

#[tokio::test(start_paused = true)]
async fn blocked_chunk_is_retried_with_retry_policy() {
    let journal = Journal::default();
    let acceptor = ScriptedAcceptor::new(
        vec![
            limits(4, Duration::from_millis(10)),
            limits(2, Duration::from_millis(10)),
        ],
        vec![0],
        &journal,
    );
    let config = DispatcherConfig {
        backoff: Duration::from_secs(5),
        on_blocked: BlockedPolicy::Retry,
    };
    let dispatcher = Dispatcher::spawn(acceptor, CancellationToken::new(), config);

    dispatcher.send(CancellationToken::new(), ids(0..10)).await.unwrap();
    dispatcher.shutdown(GRACE).await.unwrap();

    assert_eq!(journal.accepted_sizes(), vec![2, 2, 2, 2, 2]);
    assert_eq!(journal.accepted_ids(), (0..10).collect::<Vec<_>>());
    assert_eq!(dispatcher.stats().snapshot().items_dropped, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_chunk_is_dropped_without_backoff() {
    let journal = Journal::default();
    let acceptor =
        ScriptedAcceptor::new(vec![limits(2, Duration::from_millis(10))], Vec::new(), &journal)
            .failing(vec![0]);
    let reads = Arc::clone(&acceptor.reads);
    let dispatcher = spawn(acceptor);

    dispatcher.send(CancellationToken::new(), ids(0..6)).await.unwrap();
    dispatcher.shutdown(GRACE).await.unwrap();

    let calls = journal.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].ids, vec![0, 1]);
    assert!(!calls[0].accepted);
    // Only the pacing delay separates the failed call from the next one.
    assert_eq!(calls[1].at - calls[0].at, Duration::from_millis(10));
    assert_eq!(journal.accepted_ids(), vec![2, 3, 4, 5]);
    assert_eq!(reads.lock().unwrap().len(), 1);

    let stats = dispatcher.stats().snapshot();
    assert_eq!(stats.items_dropped, 2);
    assert_eq!(stats.items_accepted, 4);
    assert_eq!(stats.chunks_blocked, 0);
    assert_eq!(stats.limit_refreshes, 0);
    assert_eq!(stats.submissions_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn submission_is_counted_at_handoff() {
    let dispatcher = spawn(RateLimitedAcceptor::builder().build().unwrap());

    // The loop has not been polled yet; the batch only sits in the slot.
    dispatcher.send(CancellationToken::new(), sequential_batch(3)).await.unwrap();
    let stats = dispatcher.stats().snapshot();
    assert_eq!(stats.submissions_received, 1);
    assert_eq!(stats.items_accepted, 0);

    dispatcher.shutdown(GRACE).await.unwrap();
    assert_eq!(dispatcher.stats().snapshot().submissions_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_submission_stops_between_chunks() {
    let journal = Journal::default();
    let acceptor = recording_acceptor(17, Duration::from_secs(1), &journal);
    let dispatcher = spawn(acceptor);

    let request = CancellationToken::new();
    dispatcher.send(request.clone(), sequential_batch(70)).await.unwrap();

    sleep(Duration::from_millis(1500)).await;
    request.cancel();
    dispatcher.shutdown(GRACE).await.unwrap();

    // Chunks at t=0s and t=1s went out; the one due at t=2s did not.
    assert_eq!(journal.accepted_sizes(), vec![17, 17]);
    let stats = dispatcher.stats().snapshot();
    assert_eq!(stats.submissions_abandoned, 1);
    assert_eq!(stats.submissions_completed, 0);
}

#[tokio::test(start_paused = true)]
async fn send_returns_cancelled_while_waiting_for_slot() {
    let journal = Journal::default();
    let acceptor = recording_acceptor(1, Duration::from_secs(1), &journal);
    let dispatcher = spawn(acceptor);

    // One submission being chunked, one occupying the slot.
    dispatcher.send(CancellationToken::new(), ids(0..3)).await.unwrap();
    dispatcher.send(CancellationToken::new(), ids(3..6)).await.unwrap();

    let request = CancellationToken::new();
    let canceller = request.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    assert_eq!(
        dispatcher.send(request, ids(6..9)).await,
        Err(Error::Cancelled)
    );

    dispatcher.shutdown(GRACE).await.unwrap();
    assert_eq!(journal.accepted_ids(), (0..6).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_send_is_refused() {
    let dispatcher = spawn(RateLimitedAcceptor::builder().build().unwrap());

    let request = CancellationToken::new();
    request.cancel();
    assert_eq!(
        dispatcher.send(request, sequential_batch(3)).await,
        Err(Error::Cancelled)
    );
    assert_eq!(dispatcher.stats().snapshot().submissions_received, 0);
}

#[tokio::test(start_paused = true)]
async fn termination_refuses_new_work_and_drains_queue() {
    let journal = Journal::default();
    let acceptor = recording_acceptor(2, Duration::from_millis(100), &journal);
    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::spawn(acceptor, shutdown.clone(), DispatcherConfig::default());

    dispatcher.send(CancellationToken::new(), ids(0..5)).await.unwrap();
    dispatcher.send(CancellationToken::new(), ids(5..10)).await.unwrap();

    // Cancelling the caller-owned scope is the same as `terminate`.
    shutdown.cancel();
    assert_eq!(
        dispatcher.send(CancellationToken::new(), ids(10..15)).await,
        Err(Error::Terminated)
    );
    assert_eq!(dispatcher.lifecycle(), Lifecycle::Terminated);

    dispatcher.closed().await;
    assert_eq!(journal.accepted_ids(), (0..10).collect::<Vec<_>>());
    assert_eq!(
        dispatcher.send(CancellationToken::new(), ids(10..15)).await,
        Err(Error::Terminated)
    );
}

#[tokio::test(start_paused = true)]
async fn waiting_sender_is_released_on_termination() {
    let journal = Journal::default();
    let acceptor = recording_acceptor(1, Duration::from_secs(1), &journal);
    let dispatcher = spawn(acceptor);

    dispatcher.send(CancellationToken::new(), ids(0..3)).await.unwrap();
    dispatcher.send(CancellationToken::new(), ids(3..6)).await.unwrap();

    let waiting = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.send(CancellationToken::new(), ids(6..9)).await }
    });

    sleep(Duration::from_millis(100)).await;
    dispatcher.terminate();

    assert_eq!(waiting.await.unwrap(), Err(Error::Terminated));
    dispatcher.closed().await;
    assert_eq!(journal.accepted_ids(), (0..6).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn lifecycle_moves_forward() {
    let dispatcher = spawn(RateLimitedAcceptor::builder().build().unwrap());
    assert_eq!(dispatcher.lifecycle(), Lifecycle::Created);

    tokio::task::yield_now().await;
    assert_eq!(dispatcher.lifecycle(), Lifecycle::Running);
    assert!(!dispatcher.is_terminated());

    dispatcher.terminate();
    dispatcher.terminate();
    assert_eq!(dispatcher.lifecycle(), Lifecycle::Terminated);
    dispatcher.closed().await;
    assert!(dispatcher.is_terminated());
}

#[tokio::test(start_paused = true)]
async fn shutdown_reports_slow_drain() {
    let journal = Journal::default();
    let acceptor = recording_acceptor(1, Duration::from_secs(10), &journal);
    let dispatcher = spawn(acceptor);

    dispatcher.send(CancellationToken::new(), ids(0..3)).await.unwrap();

    let grace = Duration::from_secs(1);
    assert_eq!(
        dispatcher.shutdown(grace).await,
        Err(Error::ShutdownTimeout(grace))
    );

    // The loop keeps draining after the grace period.
    dispatcher.closed().await;
    assert_eq!(journal.accepted_ids(), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn cell_spawns_exactly_once() {
    let cell = Arc::new(DispatcherCell::new());
    let spawned = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let cell = Arc::clone(&cell);
            let spawned = Arc::clone(&spawned);
            tokio::spawn(async move {
                cell.get_or_spawn(|| {
                    spawned.fetch_add(1, Ordering::SeqCst);
                    Dispatcher::spawn(
                        RateLimitedAcceptor::builder().build().unwrap(),
                        CancellationToken::new(),
                        DispatcherConfig::default(),
                    )
                })
            })
        })
        .collect();

    let mut handles = Vec::with_capacity(tasks.len());
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert_eq!(spawned.load(Ordering::SeqCst), 1);
    let first = cell.get().unwrap();
    assert!(handles.iter().all(|handle| handle.ptr_eq(&first)));

    first.shutdown(Duration::from_secs(5)).await.unwrap();
}
