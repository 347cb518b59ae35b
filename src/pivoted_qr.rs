//! Interpolation point selection by QR with column pivoting (QRCP).
//!
//! The pivots of a column pivoted QR decomposition $A^T P = QR$ of the transpose
//! of a matrix $A$ rank the rows of $A$ by how much each of them adds to the span
//! of the rows chosen before it. The leading pivots are used as interpolation
//! or sampling points by reduced order models.
//!
//! The rows of $A$ may be spread over a process group. The selection runs one
//! Householder QRCP kernel over a [`RowTopology`]: every step agrees on the
//! globally largest remaining row norm, broadcasts the winning row from its
//! owner, and lets every process reflect its own rows. All row updates are local
//! to the row, so the chosen pivots do not depend on how the rows are
//! partitioned.
//!
//! Rows whose remaining squared norms lie within a relative window
//! `tie_tolerance` of the current maximum are considered equal and the lowest
//! global row index among them wins. Remaining norms at the rounding level of the
//! largest initial row count as zero, so the rows left once the numerical rank
//! is exhausted are taken in index order.

use crate::matrix::Matrix;
use crate::topology::{row_topology, RowTopology};
use log::{debug, trace};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayViewMut1};

/// Pivots selected by [`Matrix::qrcp_pivots_transpose`], most significant first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PivotResult {
    /// Global row index of every pivot.
    pub row_pivot: Vec<usize>,
    /// Rank owning the corresponding row of `row_pivot`.
    pub row_pivot_owner: Vec<usize>,
}

impl PivotResult {
    pub fn len(&self) -> usize {
        self.row_pivot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_pivot.is_empty()
    }

    /// Iterate over `(row, owner)` pairs in pivot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.row_pivot
            .iter()
            .copied()
            .zip(self.row_pivot_owner.iter().copied())
    }

    /// Global indices of the pivots owned by `rank`, in pivot order.
    pub fn owned_by(&self, rank: usize) -> Vec<usize> {
        self.iter()
            .filter(|&(_, owner)| owner == rank)
            .map(|(row, _)| row)
            .collect()
    }
}

/// Implementation used to factorise the transpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotBackend {
    /// Distributed Householder QRCP with one reduction and one broadcast per pivot.
    Householder,
    /// Gather all rows onto every process and call LAPACK `dgeqp3`.
    ///
    /// Ties are broken as LAPACK does, by the first maximal column, without a
    /// tolerance window.
    Lapack,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QrcpConfig {
    pub backend: PivotBackend,
    /// Relative window in which squared row norms count as equal.
    pub tie_tolerance: f64,
}

impl Default for QrcpConfig {
    fn default() -> Self {
        QrcpConfig {
            backend: PivotBackend::Householder,
            tie_tolerance: 1E-13,
        }
    }
}

impl QrcpConfig {
    pub fn with_backend(mut self, backend: PivotBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_tie_tolerance(mut self, tie_tolerance: f64) -> Self {
        assert!(
            (0.0..1.0).contains(&tie_tolerance),
            "Require 0 <= tie_tolerance < 1.0"
        );
        self.tie_tolerance = tie_tolerance;
        self
    }
}

impl<'a> Matrix<'a> {
    /// Leading `pivots_requested` column pivots of a QRCP of the transpose of `self`.
    ///
    /// Returns the global index of every selected row together with the rank
    /// owning it. For undistributed matrices every process holds every row and
    /// reports itself as the owner.
    ///
    /// Collective if the matrix is distributed. Panics if `pivots_requested`
    /// exceeds the global number of rows, or, for a nonzero request, if some
    /// process holds no rows.
    ///
    /// # Arguments
    ///
    /// * `pivots_requested`: Number of rows to select, at most the global number of rows.
    ///
    /// # Example
    ///
    /// ```
    /// use ndarray::array;
    /// use rusty_reduction::{Matrix, SelfComm};
    ///
    /// let comm = SelfComm::handle();
    /// let mat = Matrix::from_array(array![[1.0, 0.0], [0.0, 2.0], [3.0, 0.0]].view(), false, &comm);
    /// let pivots = mat.qrcp_pivots_transpose(2);
    /// assert_eq!(pivots.row_pivot, vec![2, 1]);
    /// ```
    pub fn qrcp_pivots_transpose(&self, pivots_requested: usize) -> PivotResult {
        self.qrcp_pivots_transpose_with(pivots_requested, &QrcpConfig::default())
    }

    /// Like [`qrcp_pivots_transpose`](Matrix::qrcp_pivots_transpose) with an explicit configuration.
    ///
    /// # Arguments
    ///
    /// * `pivots_requested`: Number of rows to select, at most the global number of rows.
    /// * `config`: Backend and tie tolerance of the selection.
    pub fn qrcp_pivots_transpose_with(
        &self,
        pivots_requested: usize,
        config: &QrcpConfig,
    ) -> PivotResult {
        let topology = row_topology(self);
        let global_rows = topology.global_rows();

        assert!(
            pivots_requested <= global_rows,
            "Requested {} pivots from a matrix with {} rows.",
            pivots_requested,
            global_rows
        );
        if pivots_requested == 0 {
            return PivotResult::default();
        }
        assert!(
            topology.reduce_min(self.num_rows()) > 0,
            "QRCP requires at least one row on every process."
        );

        debug!(
            "Selecting {} of {} rows with the {:?} backend.",
            pivots_requested, global_rows, config.backend
        );

        let row_pivot = match config.backend {
            PivotBackend::Householder => householder_pivots(
                self.to_array(),
                topology.as_ref(),
                pivots_requested,
                config.tie_tolerance,
            ),
            PivotBackend::Lapack => lapack_pivots(self, topology.as_ref(), pivots_requested),
        };
        let row_pivot_owner = row_pivot.iter().map(|&row| topology.owner(row)).collect();

        PivotResult {
            row_pivot,
            row_pivot_owner,
        }
    }
}

/// An elementary reflector `H = I - tau * v * v^T` with `v[0] == 1`.
struct Reflector {
    v: Array1<f64>,
    tau: f64,
}

impl Reflector {
    /// Reflector mapping `x` onto a multiple of the first unit vector.
    ///
    /// Returns `None` if `x` already is such a multiple.
    fn annihilating(x: ArrayView1<f64>) -> Option<Self> {
        let alpha = x[0];
        let tail = x.slice(s![1..]);
        let tail_norm = tail.dot(&tail).sqrt();
        if tail_norm == 0.0 {
            return None;
        }

        let beta = -alpha.signum() * alpha.hypot(tail_norm);
        let scale = 1.0 / (alpha - beta);

        let mut v = x.to_owned();
        v[0] = 1.0;
        v.slice_mut(s![1..]).mapv_inplace(|item| item * scale);

        Some(Reflector {
            v,
            tau: (beta - alpha) / beta,
        })
    }

    fn apply(&self, mut y: ArrayViewMut1<f64>) {
        let projection = self.tau * self.v.dot(&y);
        y.scaled_add(-projection, &self.v);
    }
}

fn squared_norm(row: ArrayView1<f64>) -> f64 {
    row.dot(&row)
}

/// Largest norm among the rows not selected yet, or -inf if there are none.
fn local_max(norms: &Array1<f64>, selected: &[bool]) -> f64 {
    norms
        .iter()
        .zip(selected.iter())
        .filter(|&(_, &taken)| !taken)
        .map(|(&norm, _)| norm)
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Householder QRCP of the transpose of the rows in `work`.
///
/// `work` holds the local rows described by `topology` and is overwritten.
fn householder_pivots(
    mut work: Array2<f64>,
    topology: &dyn RowTopology,
    pivots_requested: usize,
    tie_tolerance: f64,
) -> Vec<usize> {
    let local_rows = work.nrows();
    let num_cols = work.ncols();

    let mut norms: Array1<f64> = work.rows().into_iter().map(squared_norm).collect();
    let mut selected = vec![false; local_rows];
    let mut pivot_row = Array1::<f64>::zeros(num_cols);
    let mut pivots = Vec::with_capacity(pivots_requested);

    // Remaining squared norms at rounding level of the largest initial row
    // are zero. Once only those are left, rows are taken in index order.
    let initial_max = topology.reduce_max(local_max(&norms, &selected));
    let noise_floor = (num_cols as f64 * f64::EPSILON).powi(2) * initial_max;

    for step in 0..pivots_requested {
        let current_max = topology.reduce_max(local_max(&norms, &selected));
        let threshold = if current_max <= noise_floor {
            f64::NEG_INFINITY
        } else {
            current_max * (1.0 - tie_tolerance)
        };

        let candidate = (0..local_rows)
            .filter(|&local| !selected[local] && norms[local] >= threshold)
            .map(|local| topology.global_index(local))
            .min()
            .unwrap_or(usize::MAX);
        let pivot = topology.reduce_min(candidate);
        assert!(pivot != usize::MAX, "No row left to select as pivot {}.", step);

        match topology.local_index(pivot) {
            Some(local) => {
                selected[local] = true;
                pivot_row.assign(&work.row(local));
            }
            None => pivot_row.fill(0.0),
        }
        topology.share_row(
            pivot,
            pivot_row
                .as_slice_mut()
                .expect("Pivot row is contiguous."),
        );

        trace!(
            "Pivot {}: row {} on rank {} with squared norm {:e}.",
            step,
            pivot,
            topology.owner(pivot),
            current_max
        );
        pivots.push(pivot);

        if step >= num_cols {
            // All trailing norms are zero, the rest follows by index.
            continue;
        }

        if let Some(reflector) = Reflector::annihilating(pivot_row.slice(s![step..])) {
            for local in (0..local_rows).filter(|&local| !selected[local]) {
                reflector.apply(work.slice_mut(s![local, step..]));
            }
        }

        for local in (0..local_rows).filter(|&local| !selected[local]) {
            norms[local] = squared_norm(work.slice(s![local, step + 1..]));
        }
    }

    pivots
}

/// QRCP of the transpose through LAPACK on the gathered rows.
fn lapack_pivots(matrix: &Matrix, topology: &dyn RowTopology, pivots_requested: usize) -> Vec<usize> {
    let num_cols = matrix.num_columns();
    if num_cols == 0 {
        return (0..pivots_requested).collect();
    }

    // Ranks hold consecutive row blocks in rank order, so concatenating the
    // blocks yields the rows in global order.
    let mut rows = match topology.group() {
        Some(comm) => comm.all_gather_f64(matrix.as_slice()).concat(),
        None => matrix.as_slice().to_vec(),
    };

    // The row-major `m x n` buffer is the column-major `n x m` transpose.
    let (_, jpvt) = imp::pivoted_qr_decomp(&mut rows, num_cols, topology.global_rows())
        .unwrap_or_else(|err| panic!("{}", err));

    jpvt.iter().take(pivots_requested).copied().collect()
}

mod imp {
    use crate::types::{Result, RustyReductionError};
    use ndarray::Array1;
    use num::traits::ToPrimitive;

    /// Pivoted QR of the column-major `m x n` matrix stored in `mat`.
    ///
    /// Returns the scalar factors of the reflectors and the zero-based column
    /// permutation.
    pub fn pivoted_qr_decomp(
        mat: &mut [f64],
        m: usize,
        n: usize,
    ) -> Result<(Array1<f64>, Array1<usize>)> {
        let k = m.min(n);
        let lda = m.max(1) as i32;
        let mut tau = Array1::<f64>::zeros(k);

        let mut info = 0;
        let mut work_size = [0.0];
        let mut jpvt = Array1::<i32>::zeros(n);

        unsafe {
            lapack::dgeqp3(
                m as i32,
                n as i32,
                mat,
                lda,
                jpvt.as_slice_memory_order_mut().unwrap(),
                tau.as_slice_memory_order_mut().unwrap(),
                &mut work_size,
                -1,
                &mut info,
            );
        }

        if info != 0 {
            return Err(RustyReductionError::LapackError {
                routine: "dgeqp3",
                info,
            });
        }

        let lwork = work_size[0].to_usize().unwrap_or(3 * n + 1).max(1);
        let mut work = Array1::<f64>::zeros(lwork);
        unsafe {
            lapack::dgeqp3(
                m as i32,
                n as i32,
                mat,
                lda,
                jpvt.as_slice_memory_order_mut().unwrap(),
                tau.as_slice_memory_order_mut().unwrap(),
                work.as_slice_memory_order_mut().unwrap(),
                lwork as i32,
                &mut info,
            );
        }

        match info {
            // JPVT for zero-based counting before we return
            0 => Ok((tau, jpvt.map(|&item| (item - 1) as usize))),
            _ => Err(RustyReductionError::LapackError {
                routine: "dgeqp3",
                info,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Comm, SelfComm, ThreadComm};
    use crate::random_matrix::RandomMatrix;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn serial_pivots(full: &Array2<f64>, pivots_requested: usize, config: &QrcpConfig) -> PivotResult {
        let comm = SelfComm::handle();
        Matrix::from_array(full.view(), false, &comm).qrcp_pivots_transpose_with(pivots_requested, config)
    }

    fn local_block(full: &Array2<f64>, counts: &[usize], comm: &Comm) -> Matrix<'static> {
        let start: usize = counts[..comm.rank()].iter().sum();
        let rows = start..start + counts[comm.rank()];
        Matrix::from_array(full.slice(s![rows, ..]), true, comm)
    }

    fn owner_of(counts: &[usize], row: usize) -> usize {
        let mut end = 0;
        for (rank, &count) in counts.iter().enumerate() {
            end += count;
            if row < end {
                return rank;
            }
        }
        unreachable!("Row {} outside of the matrix.", row)
    }

    #[test]
    fn test_fixed_example() {
        let full = array![[1.0, 0.0], [0.0, 2.0], [3.0, 0.0]];
        let pivots = serial_pivots(&full, 3, &QrcpConfig::default());

        assert_eq!(pivots.row_pivot, vec![2, 1, 0]);
        assert_eq!(pivots.row_pivot_owner, vec![0, 0, 0]);
    }

    #[test]
    fn test_reflected_rows_lose_their_pivot_component() {
        // Row 1 is nearly parallel to row 0, so after selecting row 0 the
        // smaller but independent row 2 is more significant.
        let full = array![[3.0, 0.0, 0.0], [2.9, 0.1, 0.0], [0.0, 0.0, 1.0]];
        let pivots = serial_pivots(&full, 3, &QrcpConfig::default());

        assert_eq!(pivots.row_pivot, vec![0, 2, 1]);
    }

    #[test]
    fn test_zero_pivots_requested() {
        let full = array![[1.0, 2.0], [3.0, 4.0]];
        let pivots = serial_pivots(&full, 0, &QrcpConfig::default());

        assert!(pivots.is_empty());
        assert!(pivots.row_pivot_owner.is_empty());
    }

    #[test]
    fn test_ties_prefer_lowest_row() {
        let eye = Array2::<f64>::eye(4);
        assert_eq!(serial_pivots(&eye, 4, &QrcpConfig::default()).row_pivot, vec![0, 1, 2, 3]);

        let repeated = array![[0.0, 0.0], [1.0, 1.0], [1.0, 1.0], [0.0, 0.0]];
        assert_eq!(
            serial_pivots(&repeated, 4, &QrcpConfig::default()).row_pivot,
            vec![1, 0, 2, 3]
        );
    }

    #[test]
    fn test_graded_rows_follow_norms() {
        let full = array![[1.0, 0.0, 0.0], [0.0, 0.0, 1E-8], [0.0, 1E-7, 0.0]];
        assert_eq!(serial_pivots(&full, 3, &QrcpConfig::default()).row_pivot, vec![0, 2, 1]);

        let graded = Array2::from_diag(&array![1.0, 1E-9, 1E-8, 1E-7]);
        assert_eq!(serial_pivots(&graded, 4, &QrcpConfig::default()).row_pivot, vec![0, 3, 2, 1]);

        let lapack = QrcpConfig::default().with_backend(PivotBackend::Lapack);
        assert_eq!(serial_pivots(&graded, 4, &lapack).row_pivot, vec![0, 3, 2, 1]);
    }

    #[test]
    fn test_graded_rows_distributed() {
        let counts = [2, 3];
        let scales = array![1E-10, 1.0, 1E-6, 1E-3, 1E-8];
        let mut rng = StdRng::seed_from_u64(23);
        let mut full = f64::random_gaussian((5, 5), &mut rng);
        for (mut row, &scale) in full.rows_mut().into_iter().zip(scales.iter()) {
            row *= scale;
        }

        let expected = serial_pivots(&full, 5, &QrcpConfig::default());
        let lapack = serial_pivots(&full, 5, &QrcpConfig::default().with_backend(PivotBackend::Lapack));
        assert_eq!(expected.row_pivot[..2], [1, 3]);
        assert_eq!(expected.row_pivot, lapack.row_pivot);

        let results = ThreadComm::run(counts.len(), |comm| {
            local_block(&full, &counts, &comm).qrcp_pivots_transpose(5)
        });
        for pivots in results {
            assert_eq!(pivots.row_pivot, expected.row_pivot);
        }
    }

    #[test]
    fn test_all_rows_of_tall_matrix() {
        let mut rng = StdRng::seed_from_u64(3);
        let full = f64::random_gaussian((9, 3), &mut rng);
        let pivots = serial_pivots(&full, 9, &QrcpConfig::default());

        let mut sorted = pivots.row_pivot.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..9).collect::<Vec<_>>());

        // Beyond the column count only zero norms remain.
        let rest = &pivots.row_pivot[3..];
        assert!(rest.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_householder_agrees_with_lapack() {
        let mut rng = StdRng::seed_from_u64(7);
        let full = f64::random_gaussian((30, 10), &mut rng);

        let householder = serial_pivots(&full, 10, &QrcpConfig::default());
        let lapack = serial_pivots(&full, 10, &QrcpConfig::default().with_backend(PivotBackend::Lapack));

        assert_eq!(householder, lapack);
    }

    #[test]
    fn test_replicated_rows_report_own_rank() {
        let mut rng = StdRng::seed_from_u64(5);
        let full = f64::random_gaussian((8, 4), &mut rng);
        let expected = serial_pivots(&full, 4, &QrcpConfig::default()).row_pivot;

        let results = ThreadComm::run(3, |comm| {
            let matrix = Matrix::from_array(full.view(), false, &comm);
            (comm.rank(), matrix.qrcp_pivots_transpose(4))
        });

        for (rank, pivots) in results {
            assert_eq!(pivots.row_pivot, expected);
            assert_eq!(pivots.row_pivot_owner, vec![rank; 4]);
        }
    }

    #[test]
    #[should_panic(expected = "Requested 4 pivots from a matrix with 3 rows.")]
    fn test_too_many_pivots() {
        let full = Array2::<f64>::eye(3);
        serial_pivots(&full, 4, &QrcpConfig::default());
    }

    #[test]
    #[should_panic(expected = "at least one row on every process")]
    fn test_empty_process_is_rejected() {
        let counts = [2, 0, 2];
        let full = Array2::<f64>::eye(4);
        ThreadComm::run(counts.len(), |comm| {
            local_block(&full, &counts, &comm).qrcp_pivots_transpose(2)
        });
    }

    macro_rules! distributed_pivot_tests {
        ($($name:ident: $counts:expr, $cols:expr, $pivots:expr, $backend:expr,)*) => {
            $(
        #[test]
        fn $name() {
            let counts: &[usize] = &$counts;
            let total: usize = counts.iter().sum();
            let mut rng = StdRng::seed_from_u64(total as u64 * 31 + $cols as u64);
            let full = f64::random_gaussian((total, $cols), &mut rng);
            let config = QrcpConfig::default().with_backend($backend);

            let expected = serial_pivots(&full, $pivots, &config);

            let results = ThreadComm::run(counts.len(), |comm| {
                local_block(&full, counts, &comm).qrcp_pivots_transpose_with($pivots, &config)
            });

            for pivots in results {
                assert_eq!(pivots.row_pivot, expected.row_pivot);
                let owners: Vec<usize> = pivots.row_pivot.iter().map(|&row| owner_of(counts, row)).collect();
                assert_eq!(pivots.row_pivot_owner, owners);
            }
        }
            )*
        };
    }

    distributed_pivot_tests! {
        test_balanced_two_processes: [6, 6], 4, 4, PivotBackend::Householder,
        test_balanced_four_processes_all_rows: [3, 3, 3, 3], 5, 12, PivotBackend::Householder,
        test_unbalanced_three_processes: [2, 7, 3], 6, 6, PivotBackend::Householder,
        test_unbalanced_all_rows: [5, 1], 3, 6, PivotBackend::Householder,
        test_unbalanced_wide_matrix: [1, 2, 2], 8, 5, PivotBackend::Householder,
        test_balanced_lapack: [4, 4], 5, 5, PivotBackend::Lapack,
        test_unbalanced_lapack: [4, 2, 6], 5, 5, PivotBackend::Lapack,
    }

    #[test]
    fn test_rank_deficient_matrix_is_partition_independent() {
        let counts = [4, 9, 7];
        let mut rng = StdRng::seed_from_u64(17);
        let left = f64::random_gaussian((20, 3), &mut rng);
        let right = f64::random_gaussian((3, 6), &mut rng);
        let full = left.dot(&right);

        let expected = serial_pivots(&full, 20, &QrcpConfig::default());

        let results = ThreadComm::run(counts.len(), |comm| {
            local_block(&full, &counts, &comm).qrcp_pivots_transpose(20)
        });

        for pivots in results {
            assert_eq!(pivots.row_pivot, expected.row_pivot);
            assert_eq!(pivots.owned_by(1).len(), 9);
        }
    }

    #[test]
    fn test_pivot_result_helpers() {
        let pivots = PivotResult {
            row_pivot: vec![4, 0, 7],
            row_pivot_owner: vec![1, 0, 1],
        };

        assert_eq!(pivots.len(), 3);
        assert_eq!(pivots.iter().collect::<Vec<_>>(), vec![(4, 1), (0, 0), (7, 1)]);
        assert_eq!(pivots.owned_by(1), vec![4, 7]);
        assert!(pivots.owned_by(2).is_empty());
    }
}
