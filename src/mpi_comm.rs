//! Process groups spanning the processes of an MPI job.
//!
//! Only built with the `mpi-support` feature. Collectives are entered from one
//! thread per process.

use crate::comm::{Comm, Communicator};
use mpi::datatype::PartitionMut;
use mpi::environment::Universe;
use mpi::topology::SystemCommunicator;
use mpi::traits::{Communicator as _, CommunicatorCollectives as _, Equivalence, Root as _};
use mpi::Count;
use std::sync::Arc;

/// The world group of an MPI job.
///
/// The handle does not keep MPI alive. The [`Universe`] returned by
/// `mpi::initialize` must outlive every matrix using the handle.
pub struct MpiComm {
    rank: usize,
    size: usize,
}

impl MpiComm {
    pub fn world(universe: &Universe) -> Comm {
        let world = universe.world();
        Arc::new(MpiComm {
            rank: world.rank() as usize,
            size: world.size() as usize,
        })
    }

    fn gather_varcount<T: Equivalence + Copy + Default>(&self, local: &[T]) -> Vec<Vec<T>> {
        let world = SystemCommunicator::world();

        let mut counts = vec![0 as Count; self.size];
        world.all_gather_into(&(local.len() as Count), &mut counts[..]);
        let displs: Vec<Count> = counts
            .iter()
            .scan(0, |offset, &count| {
                let start = *offset;
                *offset += count;
                Some(start)
            })
            .collect();

        let total: usize = counts.iter().map(|&count| count as usize).sum();
        let mut buf = vec![T::default(); total];
        {
            let mut partition = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
            world.all_gather_varcount_into(local, &mut partition);
        }

        counts
            .iter()
            .zip(displs.iter())
            .map(|(&count, &start)| buf[start as usize..(start + count) as usize].to_vec())
            .collect()
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather_f64(&self, local: &[f64]) -> Vec<Vec<f64>> {
        self.gather_varcount(local)
    }

    fn all_gather_usize(&self, local: &[usize]) -> Vec<Vec<usize>> {
        let local: Vec<u64> = local.iter().map(|&value| value as u64).collect();
        self.gather_varcount(&local)
            .into_iter()
            .map(|values| values.into_iter().map(|value| value as usize).collect())
            .collect()
    }

    fn barrier(&self) {
        SystemCommunicator::world().barrier();
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) {
        assert!(root < self.size, "Broadcast root {} outside of the group.", root);
        SystemCommunicator::world()
            .process_at_rank(root as Count)
            .broadcast_into(buf);
    }
}
