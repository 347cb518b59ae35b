//! Process groups and the blocking collectives used by the distributed kernels.
//!
//! Every collective must be entered by all members of a group in the same order.
//! Nothing here can detect a member that skips a collective; such a group
//! deadlocks. A member of a [`ThreadComm`] group that panics takes the rest of
//! the group down with it.

use std::any::Any;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Shared handle to the process group a matrix or vector lives on.
pub type Comm = Arc<dyn Communicator>;

/// A fixed group of cooperating processes.
///
/// Implementors only provide the two gather primitives. The reductions are
/// derived from them and combine contributions in rank order, so every member
/// obtains a bit-identical result.
pub trait Communicator: Send + Sync {
    /// Rank of this process within the group.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Gather a variable-length slice from every member, indexed by rank.
    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>>;

    /// Gather a variable-length index slice from every member, indexed by rank.
    fn all_gather_usize(&self, local: &[usize]) -> Vec<Vec<usize>>;

    fn barrier(&self) {
        self.all_gather_usize(&[]);
    }

    /// Replace `buf` on every member by the element-wise sum over all members.
    fn all_reduce_sum(&self, buf: &mut [f64]) {
        if self.size() == 1 {
            return;
        }
        let contributions = self.all_gather_f64(buf);
        buf.iter_mut().for_each(|item| *item = 0.0);
        for contribution in contributions.iter() {
            assert_eq!(
                contribution.len(),
                buf.len(),
                "`all_reduce_sum` called with buffers of different lengths."
            );
            for (item, &other) in buf.iter_mut().zip(contribution.iter()) {
                *item += other;
            }
        }
    }

    fn all_reduce_max(&self, value: f64) -> f64 {
        if self.size() == 1 {
            return value;
        }
        self.all_gather_f64(&[value])
            .iter()
            .map(|contribution| contribution[0])
            .fold(f64::NEG_INFINITY, f64::max)
    }

    fn all_reduce_min_usize(&self, value: usize) -> usize {
        if self.size() == 1 {
            return value;
        }
        self.all_gather_usize(&[value])
            .iter()
            .map(|contribution| contribution[0])
            .min()
            .unwrap_or(value)
    }

    fn all_reduce_max_usize(&self, value: usize) -> usize {
        if self.size() == 1 {
            return value;
        }
        self.all_gather_usize(&[value])
            .iter()
            .map(|contribution| contribution[0])
            .max()
            .unwrap_or(value)
    }

    /// Overwrite `buf` on every member with the contents of `buf` on `root`.
    fn broadcast(&self, buf: &mut [f64], root: usize) {
        assert!(root < self.size(), "Broadcast root {} outside of the group.", root);
        if self.size() == 1 {
            return;
        }
        let payload: &[f64] = if self.rank() == root { &*buf } else { &[] };
        let gathered = self.all_gather_f64(payload);
        buf.copy_from_slice(&gathered[root]);
    }
}

/// The trivial group consisting of the calling process only.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelfComm;

impl SelfComm {
    pub fn handle() -> Comm {
        Arc::new(SelfComm)
    }
}

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>> {
        vec![local.to_vec()]
    }

    fn all_gather_usize(&self, local: &[usize]) -> Vec<Vec<usize>> {
        vec![local.to_vec()]
    }
}

struct Gate {
    arrived: usize,
    generation: u64,
    poisoned: bool,
}

struct Exchange {
    slots: Mutex<Vec<Option<Box<dyn Any + Send>>>>,
    gate: Mutex<Gate>,
    turn: Condvar,
    size: usize,
}

impl Exchange {
    fn slots(&self) -> MutexGuard<'_, Vec<Option<Box<dyn Any + Send>>>> {
        // A poisoned table still holds valid payloads; the panicking member
        // is reported through its own thread.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until every member has arrived.
    ///
    /// Panics once any member of the group has panicked.
    fn wait(&self) {
        let mut gate = self.gate();
        let generation = gate.generation;
        if !gate.poisoned {
            gate.arrived += 1;
            if gate.arrived == self.size {
                gate.arrived = 0;
                gate.generation += 1;
                self.turn.notify_all();
                return;
            }
            while gate.generation == generation && !gate.poisoned {
                gate = self
                    .turn
                    .wait(gate)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        }

        let released = gate.generation != generation;
        drop(gate);
        if !released {
            panic!("Another member of the process group panicked.");
        }
    }

    fn poison(&self) {
        self.gate().poisoned = true;
        self.turn.notify_all();
    }
}

/// A group whose members are threads of the current process.
///
/// Each member publishes its contribution into a shared slot table, waits for
/// the whole group, copies out every slot and waits again before the table
/// can be reused by the next collective.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    exchange: Arc<Exchange>,
}

impl ThreadComm {
    /// Create the members of a new group of `size` processes.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "A process group needs at least one member.");
        let exchange = Arc::new(Exchange {
            slots: Mutex::new((0..size).map(|_| None).collect()),
            gate: Mutex::new(Gate {
                arrived: 0,
                generation: 0,
                poisoned: false,
            }),
            turn: Condvar::new(),
            size,
        });

        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                exchange: Arc::clone(&exchange),
            })
            .collect()
    }

    /// Run `f` once per member of a new group of `size` processes, each on its
    /// own thread, and return the results in rank order.
    ///
    /// If a member panics, the members waiting in or entering a collective
    /// panic as well and the first panic in rank order is resumed here.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(Comm) -> R + Sync,
        R: Send,
    {
        let members = Self::group(size);
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = members
                .into_iter()
                .map(|member| scope.spawn(move || f(Arc::new(member) as Comm)))
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }

    fn exchange<T: Any + Send + Clone>(&self, value: T) -> Vec<T> {
        self.exchange.slots()[self.rank] = Some(Box::new(value));
        self.exchange.wait();

        let gathered = self
            .exchange
            .slots()
            .iter()
            .map(|slot| {
                slot.as_ref()
                    .and_then(|payload| (**payload).downcast_ref::<T>())
                    .cloned()
                    .expect("Members of a process group entered different collectives.")
            })
            .collect();

        self.exchange.wait();
        gathered
    }
}

impl Drop for ThreadComm {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.exchange.poison();
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>> {
        self.exchange(local.to_vec())
    }

    fn all_gather_usize(&self, local: &[usize]) -> Vec<Vec<usize>> {
        self.exchange(local.to_vec())
    }
}
