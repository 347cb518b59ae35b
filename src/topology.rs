//! Row topologies: how the rows of a matrix are laid out over a process group.
//!
//! A topology maps local row indices to global ones, finds the rank owning a
//! global row, and provides the collectives the pivot selection needs. The three
//! layouts are
//!
//! * [`ReplicatedRows`]: every process holds all rows (undistributed matrices);
//! * [`BalancedRows`]: every process holds the same number of consecutive rows;
//! * [`UnbalancedRows`]: every process holds an arbitrary number of consecutive rows.

use crate::comm::Comm;
use crate::matrix::Matrix;
use log::debug;

pub trait RowTopology {
    /// Number of rows held by the calling process.
    fn local_rows(&self) -> usize;

    /// Number of distinct rows over the whole group.
    fn global_rows(&self) -> usize;

    fn global_index(&self, local: usize) -> usize;

    /// Rank owning the global row `global`.
    fn owner(&self, global: usize) -> usize;

    /// Local index of the global row `global` if the calling process holds it.
    fn local_index(&self, global: usize) -> Option<usize>;

    /// The process group the rows are spread over. `None` if no communication is needed.
    fn group(&self) -> Option<&Comm>;

    fn reduce_max(&self, value: f64) -> f64 {
        match self.group() {
            Some(comm) => comm.all_reduce_max(value),
            None => value,
        }
    }

    fn reduce_min(&self, value: usize) -> usize {
        match self.group() {
            Some(comm) => comm.all_reduce_min_usize(value),
            None => value,
        }
    }

    /// Make the global row `global` available everywhere.
    ///
    /// On entry `row` holds the values of the row on its owner; on exit it holds
    /// them on every process.
    fn share_row(&self, global: usize, row: &mut [f64]) {
        if let Some(comm) = self.group() {
            comm.broadcast(row, self.owner(global));
        }
    }
}

/// All rows live on every process.
pub struct ReplicatedRows {
    rank: usize,
    rows: usize,
}

impl ReplicatedRows {
    pub fn new(rank: usize, rows: usize) -> Self {
        ReplicatedRows { rank, rows }
    }
}

impl RowTopology for ReplicatedRows {
    fn local_rows(&self) -> usize {
        self.rows
    }

    fn global_rows(&self) -> usize {
        self.rows
    }

    fn global_index(&self, local: usize) -> usize {
        local
    }

    // Every process holds a copy, the caller is reported as the owner.
    fn owner(&self, _global: usize) -> usize {
        self.rank
    }

    fn local_index(&self, global: usize) -> Option<usize> {
        if global < self.rows {
            Some(global)
        } else {
            None
        }
    }

    fn group(&self) -> Option<&Comm> {
        None
    }
}

/// Every process holds `rows_per_rank` consecutive rows, in rank order.
pub struct BalancedRows {
    comm: Comm,
    rows_per_rank: usize,
}

impl BalancedRows {
    pub fn new(comm: &Comm, rows_per_rank: usize) -> Self {
        BalancedRows {
            comm: comm.clone(),
            rows_per_rank,
        }
    }
}

impl RowTopology for BalancedRows {
    fn local_rows(&self) -> usize {
        self.rows_per_rank
    }

    fn global_rows(&self) -> usize {
        self.rows_per_rank * self.comm.size()
    }

    fn global_index(&self, local: usize) -> usize {
        self.comm.rank() * self.rows_per_rank + local
    }

    fn owner(&self, global: usize) -> usize {
        debug_assert!(global < self.global_rows(), "Global row {} out of range.", global);
        global / self.rows_per_rank
    }

    fn local_index(&self, global: usize) -> Option<usize> {
        let start = self.comm.rank() * self.rows_per_rank;
        if (start..start + self.rows_per_rank).contains(&global) {
            Some(global - start)
        } else {
            None
        }
    }

    fn group(&self) -> Option<&Comm> {
        Some(&self.comm)
    }
}

/// Every process holds an arbitrary number of consecutive rows, in rank order.
pub struct UnbalancedRows {
    comm: Comm,
    /// `offsets[r]` is the global index of the first row on rank `r`;
    /// `offsets[size]` is the global row count.
    offsets: Vec<usize>,
}

impl UnbalancedRows {
    /// Collect the row counts of the whole group.
    ///
    /// Collective. Panics on every process if the column counts disagree.
    pub fn new(comm: &Comm, local_rows: usize, num_cols: usize) -> Self {
        let shapes = comm.all_gather_usize(&[local_rows, num_cols]);
        assert!(
            shapes.iter().all(|shape| shape[1] == num_cols),
            "Distributed matrix has differing column counts across processes."
        );

        let mut offsets = Vec::with_capacity(shapes.len() + 1);
        offsets.push(0);
        for shape in shapes.iter() {
            let last = offsets[offsets.len() - 1];
            offsets.push(last + shape[0]);
        }

        UnbalancedRows {
            comm: comm.clone(),
            offsets,
        }
    }

    /// Number of rows held by each rank.
    pub fn counts(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }
}

impl RowTopology for UnbalancedRows {
    fn local_rows(&self) -> usize {
        let rank = self.comm.rank();
        self.offsets[rank + 1] - self.offsets[rank]
    }

    fn global_rows(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    fn global_index(&self, local: usize) -> usize {
        self.offsets[self.comm.rank()] + local
    }

    fn owner(&self, global: usize) -> usize {
        debug_assert!(global < self.global_rows(), "Global row {} out of range.", global);
        // Ranks without rows share their offset with the next rank; the last
        // offset not exceeding `global` belongs to the rank actually holding it.
        self.offsets.partition_point(|&offset| offset <= global) - 1
    }

    fn local_index(&self, global: usize) -> Option<usize> {
        let rank = self.comm.rank();
        if (self.offsets[rank]..self.offsets[rank + 1]).contains(&global) {
            Some(global - self.offsets[rank])
        } else {
            None
        }
    }

    fn group(&self) -> Option<&Comm> {
        Some(&self.comm)
    }
}

/// Choose the topology describing the rows of `matrix`.
///
/// Collective if the matrix is distributed.
pub fn row_topology(matrix: &Matrix) -> Box<dyn RowTopology> {
    if !matrix.distributed() {
        debug!("Rows of {} x {} matrix are replicated.", matrix.num_rows(), matrix.num_columns());
        return Box::new(ReplicatedRows::new(matrix.comm().rank(), matrix.num_rows()));
    }

    if matrix.balanced() {
        debug!(
            "Rows are balanced: {} rows on each of {} processes.",
            matrix.num_rows(),
            matrix.num_procs()
        );
        Box::new(BalancedRows::new(matrix.comm(), matrix.num_rows()))
    } else {
        let topology = UnbalancedRows::new(matrix.comm(), matrix.num_rows(), matrix.num_columns());
        debug!("Rows are unbalanced with counts {:?}.", topology.counts());
        Box::new(topology)
    }
}
