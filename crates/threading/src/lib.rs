//! Work-queue thread pool with iteration slicing.
//!
//! Kernels are data-parallel iteration ranges: a pushed [`Work`] item with
//! `count = C` is claimed index-by-index by whichever threads pop it, so a
//! slow worker never strands the tail of a range. The pushing thread joins in
//! through [`Pool::run_until_empty`] and blocks on the item's done-gate,
//! which is released by the last finished iteration, not the last claimed
//! one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::debug;

enum Kind {
  Iter {
    func: Box<dyn Fn(usize) + Send + Sync>,
    count: usize,
  },
  Once {
    func: Mutex<Option<Box<dyn FnOnce() + Send>>>,
  },
}

/// One unit of pool work: either a parallel iteration range or a single-shot
/// task.
pub struct Work {
  kind: Kind,
  /// Next unclaimed iteration index.
  next: AtomicUsize,
  /// Iterations claimed but not yet finished, plus unclaimed ones.
  remaining: AtomicUsize,
  done: DoneGate,
}

struct DoneGate {
  finished: Mutex<bool>,
  cv: Condvar,
}

impl DoneGate {
  fn new(finished: bool) -> Self {
    Self { finished: Mutex::new(finished), cv: Condvar::new() }
  }

  fn signal(&self) {
    let mut finished = self.finished.lock().unwrap();
    *finished = true;
    self.cv.notify_all();
  }

  fn wait(&self) {
    let mut finished = self.finished.lock().unwrap();
    while !*finished {
      finished = self.cv.wait(finished).unwrap();
    }
  }
}

impl Work {
  /// A parallel iteration item: `func(i)` runs exactly once for each
  /// `i in [0, count)`, on whichever threads claim the indices.
  pub fn iter<F>(count: usize, func: F) -> Arc<Work>
  where
    F: Fn(usize) + Send + Sync + 'static,
  {
    Self::build(count, Box::new(func))
  }

  /// Like [`Work::iter`] but accepts a non-`'static` kernel.
  ///
  /// # Safety
  /// The caller must guarantee every borrow captured by `func` stays valid
  /// until [`Work::wait`] has returned for this item.
  pub unsafe fn iter_unchecked<'env>(
    count: usize,
    func: Box<dyn Fn(usize) + Send + Sync + 'env>,
  ) -> Arc<Work> {
    let func: Box<dyn Fn(usize) + Send + Sync + 'static> = unsafe { std::mem::transmute(func) };
    Self::build(count, func)
  }

  fn build(count: usize, func: Box<dyn Fn(usize) + Send + Sync + 'static>) -> Arc<Work> {
    Arc::new(Work {
      kind: Kind::Iter { func, count },
      next: AtomicUsize::new(0),
      remaining: AtomicUsize::new(count),
      done: DoneGate::new(count == 0),
    })
  }

  /// A single-shot task.
  pub fn once<F>(func: F) -> Arc<Work>
  where
    F: FnOnce() + Send + 'static,
  {
    Arc::new(Work {
      kind: Kind::Once { func: Mutex::new(Some(Box::new(func))) },
      next: AtomicUsize::new(0),
      remaining: AtomicUsize::new(1),
      done: DoneGate::new(false),
    })
  }

  fn total(&self) -> usize {
    match &self.kind {
      Kind::Iter { count, .. } => *count,
      Kind::Once { .. } => 1,
    }
  }

  fn execute(&self, index: usize) {
    match &self.kind {
      Kind::Iter { func, .. } => func(index),
      Kind::Once { func } => {
        if let Some(func) = func.lock().unwrap().take() {
          func();
        }
      }
    }
    if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
      self.done.signal();
    }
  }

  /// Blocks until every iteration of this item has finished.
  pub fn wait(&self) {
    self.done.wait();
  }
}

struct QueueState {
  items: VecDeque<Arc<Work>>,
  shutdown: bool,
}

struct Shared {
  queue: Mutex<QueueState>,
  available: Condvar,
  barrier: Barrier,
  num_threads: usize,
}

impl Shared {
  /// Claims one iteration from the front item. `block` selects between the
  /// worker loop (sleep until work or shutdown) and the caller-drain loop
  /// (return on empty queue).
  fn claim(&self, block: bool) -> Option<(Arc<Work>, usize)> {
    let mut state = self.queue.lock().unwrap();
    loop {
      while let Some(front) = state.items.front() {
        let total = front.total();
        let index = front.next.fetch_add(1, Ordering::Relaxed);
        if index < total {
          let work = Arc::clone(front);
          if index + 1 == total {
            state.items.pop_front();
          }
          return Some((work, index));
        }
        // Fully claimed (or empty) item: drop it and look again.
        state.items.pop_front();
      }
      if state.shutdown || !block {
        return None;
      }
      state = self.available.wait(state).unwrap();
    }
  }
}

/// Fixed-size worker pool over a FIFO queue of [`Work`] items.
pub struct Pool {
  shared: Arc<Shared>,
  workers: Vec<JoinHandle<()>>,
}

impl Pool {
  /// Spawns `num_threads` workers. A pool with zero workers is legal; all
  /// work then runs on threads calling [`Pool::run_until_empty`].
  pub fn new(num_threads: usize) -> Self {
    let shared = Arc::new(Shared {
      queue: Mutex::new(QueueState { items: VecDeque::new(), shutdown: false }),
      available: Condvar::new(),
      barrier: Barrier::new(num_threads.max(1)),
      num_threads,
    });

    let workers = (0..num_threads)
      .map(|id| {
        let shared = Arc::clone(&shared);
        thread::Builder::new()
          .name(format!("distsort-worker-{id}"))
          .spawn(move || {
            debug!(worker = id, "worker running");
            while let Some((work, index)) = shared.claim(true) {
              work.execute(index);
            }
            debug!(worker = id, "worker exiting");
          })
          .expect("failed to spawn worker thread")
      })
      .collect();

    Self { shared, workers }
  }

  /// Number of worker threads bound to this pool.
  pub fn num_threads(&self) -> usize {
    self.shared.num_threads
  }

  /// Enqueues `work`. O(1), thread-safe.
  pub fn push(&self, work: Arc<Work>) {
    {
      let mut state = self.shared.queue.lock().unwrap();
      state.items.push_back(work);
    }
    self.shared.available.notify_all();
  }

  /// The calling thread joins the pool as a temporary worker, executing
  /// iterations until the queue is observed empty.
  pub fn run_until_empty(&self) {
    while let Some((work, index)) = self.shared.claim(false) {
      work.execute(index);
    }
  }

  /// All workers meet at the pool barrier; the last arrival releases the
  /// rest. Requires exactly `num_threads` concurrent callers.
  pub fn rendezvous(&self) -> bool {
    self.shared.barrier.wait().is_leader()
  }

  /// Pushes an iteration kernel, drains the queue on the calling thread and
  /// waits for every iteration to finish before returning. This is the
  /// borrowing entry point: `func` may capture references to the caller's
  /// frame.
  pub fn run_iter<F>(&self, count: usize, func: F)
  where
    F: Fn(usize) + Send + Sync,
  {
    // SAFETY: `work.wait()` below returns only after the last iteration has
    // finished, so no worker touches `func` (or its borrows) after this
    // frame resumes.
    let work = unsafe { Work::iter_unchecked(count, Box::new(func)) };
    self.push(Arc::clone(&work));
    self.run_until_empty();
    work.wait();
  }
}

impl Drop for Pool {
  fn drop(&mut self) {
    {
      let mut state = self.shared.queue.lock().unwrap();
      state.shutdown = true;
    }
    self.shared.available.notify_all();
    for worker in self.workers.drain(..) {
      let _ = worker.join();
    }
  }
}
