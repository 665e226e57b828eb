//! Debounced batch engine for receiver-side display updates.
//!
//! Bursts of incoming items coalesce into one processing call. Two knobs
//! govern the coalescing: a debounce delay restarted on every enqueue, and
//! a max-wait cap measured from the first enqueue of the burst so a steady
//! trickle cannot postpone processing forever.
//!
//! Concurrency model: one mutex guards the pending state and the flush
//! deadline; a single worker thread owns the timer, so at most one timer is
//! ever live and rescheduling is a plain deadline overwrite. The processing
//! callback always runs outside the lock, which keeps `enqueue` wait-free
//! with respect to a processing call already in flight. Panics inside the
//! callback are caught and logged; the engine stays healthy.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};

type ProcessFn<T, C> = Arc<dyn Fn(Vec<T>, C) + Send + Sync + 'static>;

struct EngineState<T, C> {
    pending_items: Vec<T>,
    /// Last-write-wins across the batched window.
    pending_context: Option<C>,
    first_enqueue: Option<Instant>,
    deadline: Option<Instant>,
    shutdown: bool,
}

struct EngineShared<T, C> {
    state: Mutex<EngineState<T, C>>,
    wake: Condvar,
    process_fn: ProcessFn<T, C>,
    debounce_delay: Duration,
    max_wait: Duration,
}

/// Thread-safe debounce + max-wait batch processor.
pub struct DebouncedBatchEngine<T, C>
where
    T: Send + 'static,
    C: Send + 'static,
{
    shared: Arc<EngineShared<T, C>>,
    worker: Option<JoinHandle<()>>,
}

impl<T, C> DebouncedBatchEngine<T, C>
where
    T: Send + 'static,
    C: Send + 'static,
{
    pub fn new(
        process_fn: impl Fn(Vec<T>, C) + Send + Sync + 'static,
        debounce_delay_ms: u64,
        max_debounce_wait_ms: u64,
    ) -> Self {
        let shared = Arc::new(EngineShared {
            state: Mutex::new(EngineState {
                pending_items: Vec::new(),
                pending_context: None,
                first_enqueue: None,
                deadline: None,
                shutdown: false,
            }),
            wake: Condvar::new(),
            process_fn: Arc::new(process_fn),
            debounce_delay: Duration::from_millis(debounce_delay_ms),
            max_wait: Duration::from_millis(max_debounce_wait_ms),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("batch_engine".into())
            .spawn(move || run_worker(worker_shared))
            .ok();

        DebouncedBatchEngine { shared, worker }
    }

    /// Append items and (re)arm the timer. Never blocks on processing: when
    /// the max wait is already exceeded the flush is delegated to the worker
    /// rather than run on this thread.
    pub fn enqueue(&self, items: Vec<T>, context: C) {
        let now = Instant::now();
        let mut state = self.shared.state.lock().unwrap();

        state.pending_items.extend(items);
        state.pending_context = Some(context);

        let first = *state.first_enqueue.get_or_insert(now);
        let elapsed = now.duration_since(first);
        state.deadline = if elapsed >= self.shared.max_wait {
            Some(now)
        } else {
            let remaining = (self.shared.max_wait - elapsed).min(self.shared.debounce_delay);
            Some(now + remaining)
        };

        drop(state);
        self.shared.wake.notify_one();
    }

    /// Drain pending state and process it on the calling thread.
    pub fn flush(&self) {
        if let Some((items, context)) = drain(&self.shared) {
            dispatch(&self.shared, items, context);
        }
    }

    /// Cancel the timer and discard pending items without dispatching them.
    pub fn cleanup(&self) {
        let mut state = self.shared.state.lock().unwrap();
        let discarded = state.pending_items.len();
        state.pending_items.clear();
        state.pending_context = None;
        state.first_enqueue = None;
        state.deadline = None;
        drop(state);
        if discarded > 0 {
            debug!("discarded {discarded} pending items on cleanup");
        }
    }
}

impl<T, C> Drop for DebouncedBatchEngine<T, C>
where
    T: Send + 'static,
    C: Send + 'static,
{
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            state.pending_items.clear();
            state.pending_context = None;
            state.deadline = None;
        }
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker<T, C>(shared: Arc<EngineShared<T, C>>)
where
    T: Send + 'static,
    C: Send + 'static,
{
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.shutdown {
            break;
        }
        match state.deadline {
            None => {
                state = shared.wake.wait(state).unwrap();
            }
            Some(deadline) => {
                let now = Instant::now();
                if now < deadline {
                    let (guard, _) = shared.wake.wait_timeout(state, deadline - now).unwrap();
                    state = guard;
                    continue;
                }
                let drained = drain_locked(&mut state);
                drop(state);
                if let Some((items, context)) = drained {
                    dispatch(&shared, items, context);
                }
                state = shared.state.lock().unwrap();
            }
        }
    }
}

fn drain<T, C>(shared: &EngineShared<T, C>) -> Option<(Vec<T>, C)> {
    let mut state = shared.state.lock().unwrap();
    drain_locked(&mut state)
}

fn drain_locked<T, C>(state: &mut EngineState<T, C>) -> Option<(Vec<T>, C)> {
    state.deadline = None;
    state.first_enqueue = None;
    if state.pending_items.is_empty() {
        state.pending_context = None;
        return None;
    }
    let items = std::mem::take(&mut state.pending_items);
    let context = state.pending_context.take()?;
    Some((items, context))
}

fn dispatch<T, C>(shared: &EngineShared<T, C>, items: Vec<T>, context: C) {
    let process_fn = Arc::clone(&shared.process_fn);
    if panic::catch_unwind(AssertUnwindSafe(|| process_fn(items, context))).is_err() {
        error!("batch processing panicked; engine remains active");
    }
}
