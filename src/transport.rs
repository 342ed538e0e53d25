//! The collective transport seam and its in-process realisation.
//!
//! The core only ever talks to [`Communicator`]: rank/size queries, a
//! barrier, blocking typed send/recv, all-reduce over times and counters,
//! and a gather onto a root. [`LocalComm`] realises the contract for SPMD
//! workers running as threads of one process; a worker that never arrives
//! at a collective surfaces as a `Transport` error after a bounded wait
//! instead of hanging the job.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::{SimError, SimResult};
use crate::geometry::{Rank, Time};

/// Message tag namespace.
pub type Tag = u32;

/// Tags used by the exchange layer.
pub mod tags {
    use super::Tag;

    pub const MIGRATE: Tag = 1;
    pub const GHOST: Tag = 2;
    pub const GATHER: Tag = 3;
    pub const DOMAINS: Tag = 4;
    pub const SCATTER: Tag = 5;
}

/// Reduction operator of an all-reduce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Max,
    Min,
    Sum,
}

/// How long a collective waits for stragglers before declaring the job dead.
const COLLECTIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Collective transport used by every worker of one run.
pub trait Communicator {
    fn rank(&self) -> Rank;
    fn size(&self) -> usize;

    /// Block until every worker has arrived.
    fn barrier(&self) -> SimResult<()>;

    /// Post a typed buffer to `dest`. Buffered; never blocks on the peer.
    fn send<T: Send + 'static>(&self, dest: Rank, tag: Tag, data: Vec<T>) -> SimResult<()>;

    /// Blocking receive of the next buffer from `src` carrying `tag`.
    fn recv<T: Send + 'static>(&self, src: Rank, tag: Tag) -> SimResult<Vec<T>>;

    /// All-reduce a wall-time measurement.
    fn all_reduce_time(&self, value: Time, op: ReduceOp) -> SimResult<Time>;

    /// All-reduce a 64-bit counter.
    fn all_reduce_count(&self, value: i64, op: ReduceOp) -> SimResult<i64>;

    /// Gather buffers onto `root` in rank order. Non-roots get `None`.
    fn gather<T: Send + 'static>(&self, data: Vec<T>, root: Rank) -> SimResult<Option<Vec<T>>>;
}

struct Envelope {
    src: Rank,
    tag: Tag,
    payload: Box<dyn Any + Send>,
}

/// One all-reduce rendezvous; rounds are sequenced by a generation counter.
struct CombineCell<T> {
    state: Mutex<CellState<T>>,
    cv: Condvar,
}

struct CellState<T> {
    generation: u64,
    arrived: usize,
    acc: Option<T>,
    result: Option<T>,
}

impl<T: Copy> CombineCell<T> {
    fn new() -> Self {
        CombineCell {
            state: Mutex::new(CellState { generation: 0, arrived: 0, acc: None, result: None }),
            cv: Condvar::new(),
        }
    }

    fn combine(&self, size: usize, value: T, op: impl Fn(T, T) -> T) -> SimResult<T> {
        let mut s = self.state.lock();
        let my_generation = s.generation;
        s.acc = Some(match s.acc.take() {
            Some(acc) => op(acc, value),
            None => value,
        });
        s.arrived += 1;
        if s.arrived == size {
            s.result = s.acc.take();
            s.arrived = 0;
            s.generation += 1;
            self.cv.notify_all();
        } else {
            while s.generation == my_generation {
                if self.cv.wait_for(&mut s, COLLECTIVE_TIMEOUT).timed_out() {
                    return Err(SimError::transport(
                        "peer never arrived at all-reduce",
                    ));
                }
            }
        }
        s.result.ok_or_else(|| SimError::transport("all-reduce finished without a result"))
    }
}

struct Hub {
    senders: Vec<Sender<Envelope>>,
    time_cell: CombineCell<Time>,
    count_cell: CombineCell<i64>,
}

/// One worker's endpoint of the in-process transport.
pub struct LocalComm {
    rank: Rank,
    size: usize,
    hub: Arc<Hub>,
    rx: Receiver<Envelope>,
    // out-of-order arrivals parked until somebody asks for them
    stash: RefCell<VecDeque<Envelope>>,
}

impl LocalComm {
    /// Create the endpoints of a `size`-worker group.
    #[must_use]
    pub fn create_group(size: usize) -> Vec<LocalComm> {
        assert!(size > 0, "communicator group must not be empty");
        let mut senders = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = unbounded();
            senders.push(tx);
            receivers.push(rx);
        }
        let hub = Arc::new(Hub {
            senders,
            time_cell: CombineCell::new(),
            count_cell: CombineCell::new(),
        });
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| LocalComm {
                rank,
                size,
                hub: Arc::clone(&hub),
                rx,
                stash: RefCell::new(VecDeque::new()),
            })
            .collect()
    }

    fn next_envelope(&self, src: Rank, tag: Tag) -> SimResult<Envelope> {
        let mut stash = self.stash.borrow_mut();
        if let Some(pos) = stash.iter().position(|e| e.src == src && e.tag == tag) {
            return Ok(stash.remove(pos).ok_or_else(|| {
                SimError::transport("stash slot vanished under its owner")
            })?);
        }
        loop {
            let envelope = self.rx.recv_timeout(COLLECTIVE_TIMEOUT).map_err(|_| {
                SimError::transport(format!(
                    "worker {} timed out waiting for rank {src} tag {tag}",
                    self.rank
                ))
            })?;
            if envelope.src == src && envelope.tag == tag {
                return Ok(envelope);
            }
            stash.push_back(envelope);
        }
    }
}

fn reduce_time(op: ReduceOp) -> impl Fn(Time, Time) -> Time {
    move |a, b| match op {
        ReduceOp::Max => a.max(b),
        ReduceOp::Min => a.min(b),
        ReduceOp::Sum => a + b,
    }
}

fn reduce_count(op: ReduceOp) -> impl Fn(i64, i64) -> i64 {
    move |a, b| match op {
        ReduceOp::Max => a.max(b),
        ReduceOp::Min => a.min(b),
        ReduceOp::Sum => a + b,
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> SimResult<()> {
        self.all_reduce_count(0, ReduceOp::Sum).map(|_| ())
    }

    fn send<T: Send + 'static>(&self, dest: Rank, tag: Tag, data: Vec<T>) -> SimResult<()> {
        let envelope = Envelope { src: self.rank, tag, payload: Box::new(data) };
        self.hub.senders[dest]
            .send(envelope)
            .map_err(|_| SimError::transport(format!("rank {dest} is gone")))
    }

    fn recv<T: Send + 'static>(&self, src: Rank, tag: Tag) -> SimResult<Vec<T>> {
        let envelope = self.next_envelope(src, tag)?;
        envelope
            .payload
            .downcast::<Vec<T>>()
            .map(|b| *b)
            .map_err(|_| {
                SimError::transport(format!(
                    "type mismatch receiving from rank {src} tag {tag}"
                ))
            })
    }

    fn all_reduce_time(&self, value: Time, op: ReduceOp) -> SimResult<Time> {
        self.hub.time_cell.combine(self.size, value, reduce_time(op))
    }

    fn all_reduce_count(&self, value: i64, op: ReduceOp) -> SimResult<i64> {
        self.hub.count_cell.combine(self.size, value, reduce_count(op))
    }

    fn gather<T: Send + 'static>(&self, data: Vec<T>, root: Rank) -> SimResult<Option<Vec<T>>> {
        if self.rank != root {
            self.send(root, tags::GATHER, data)?;
            return Ok(None);
        }
        let mut all = Vec::new();
        let mut own = Some(data);
        for src in 0..self.size {
            if src == root {
                all.extend(own.take().into_iter().flatten());
            } else {
                all.extend(self.recv::<T>(src, tags::GATHER)?);
            }
        }
        Ok(Some(all))
    }
}

/// Run `body` as an SPMD group of `size` workers, one thread per rank.
///
/// Results come back in rank order; the first worker error aborts the whole
/// group's result.
pub fn run_spmd<R, F>(size: usize, body: F) -> SimResult<Vec<R>>
where
    R: Send,
    F: Fn(LocalComm) -> SimResult<R> + Sync,
{
    let comms = LocalComm::create_group(size);
    let results = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(size);
        for comm in comms {
            let body = &body;
            handles.push(scope.spawn(move || body(comm)));
        }
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .map_err(|_| SimError::transport("worker thread panicked"))?
            })
            .collect::<SimResult<Vec<R>>>()
    })?;
    Ok(results)
}
