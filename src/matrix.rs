//! Row-distributed dense matrices.
//!
//! A [`Matrix`] is stored in row-major order. If the matrix is distributed, each
//! process of its group holds a contiguous block of rows and `num_rows()` is the
//! size of the local block; the number of columns is the same everywhere. An
//! undistributed matrix is replicated identically on every process.
//!
//! Storage is either owned or borrowed from the caller, see [`Matrix::wrap`].

use crate::comm::Comm;
use crate::storage::Storage;
use ndarray::{Array2, ArrayView2, ArrayViewMut2};
use std::fmt;
use std::ops::{AddAssign, Index, IndexMut, SubAssign};

pub struct Matrix<'a> {
    storage: Storage<'a>,
    num_rows: usize,
    num_cols: usize,
    distributed: bool,
    comm: Comm,
}

impl Matrix<'static> {
    pub(crate) fn from_storage(
        storage: Storage<'static>,
        num_rows: usize,
        num_cols: usize,
        distributed: bool,
        comm: &Comm,
    ) -> Self {
        debug_assert!(storage.capacity() >= num_rows * num_cols);
        Matrix {
            storage,
            num_rows,
            num_cols,
            distributed,
            comm: comm.clone(),
        }
    }

    /// An undistributed matrix without rows or columns.
    pub fn empty(comm: &Comm) -> Self {
        Self::new(0, 0, false, comm)
    }

    /// Create a zero-initialised matrix.
    ///
    /// # Arguments
    ///
    /// * `num_rows`: The number of local rows if `distributed`, otherwise the total number of rows.
    /// * `num_cols`: The total number of columns.
    /// * `distributed`: Whether the rows are spread over the processes of `comm`.
    /// * `comm`: The process group the matrix lives on.
    pub fn new(num_rows: usize, num_cols: usize, distributed: bool, comm: &Comm) -> Self {
        Matrix {
            storage: Storage::allocate(num_rows * num_cols),
            num_rows,
            num_cols,
            distributed,
            comm: comm.clone(),
        }
    }

    /// Create a matrix owning a copy of the first `num_rows * num_cols` values of `data`.
    ///
    /// # Arguments
    ///
    /// * `data`: Row-major values of the local block. Extra trailing values are ignored.
    /// * `num_rows`: The number of local rows if `distributed`, otherwise the total number of rows.
    /// * `num_cols`: The total number of columns.
    /// * `distributed`: Whether the rows are spread over the processes of `comm`.
    /// * `comm`: The process group the matrix lives on.
    pub fn from_slice(
        data: &[f64],
        num_rows: usize,
        num_cols: usize,
        distributed: bool,
        comm: &Comm,
    ) -> Self {
        let size = num_rows * num_cols;
        assert!(
            data.len() >= size,
            "Buffer of length {} too small for a {} x {} matrix.",
            data.len(),
            num_rows,
            num_cols
        );
        Matrix {
            storage: Storage::Owned(data[..size].to_vec()),
            num_rows,
            num_cols,
            distributed,
            comm: comm.clone(),
        }
    }

    /// Create a matrix owning a copy of a two-dimensional array.
    pub fn from_array(arr: ArrayView2<f64>, distributed: bool, comm: &Comm) -> Self {
        let data: Vec<f64> = arr.iter().copied().collect();
        Matrix {
            storage: Storage::Owned(data),
            num_rows: arr.nrows(),
            num_cols: arr.ncols(),
            distributed,
            comm: comm.clone(),
        }
    }
}

impl<'a> Matrix<'a> {
    /// Use `data` as the storage of the matrix without copying.
    ///
    /// The matrix never reallocates or releases a borrowed buffer. Resizing it
    /// beyond `data.len()` elements panics.
    ///
    /// # Arguments
    ///
    /// * `data`: Caller-managed row-major buffer of at least `num_rows * num_cols` values.
    /// * `num_rows`: The number of local rows if `distributed`, otherwise the total number of rows.
    /// * `num_cols`: The total number of columns.
    /// * `distributed`: Whether the rows are spread over the processes of `comm`.
    /// * `comm`: The process group the matrix lives on.
    pub fn wrap(
        data: &'a mut [f64],
        num_rows: usize,
        num_cols: usize,
        distributed: bool,
        comm: &Comm,
    ) -> Self {
        assert!(
            data.len() >= num_rows * num_cols,
            "Buffer of length {} too small for a {} x {} matrix.",
            data.len(),
            num_rows,
            num_cols
        );
        Matrix {
            storage: Storage::Borrowed(data),
            num_rows,
            num_cols,
            distributed,
            comm: comm.clone(),
        }
    }

    /// Copy into a matrix owning its storage.
    pub fn to_owned_matrix(&self) -> Matrix<'static> {
        Matrix {
            storage: self.storage.to_owned_prefix(self.len()),
            num_rows: self.num_rows,
            num_cols: self.num_cols,
            distributed: self.distributed,
            comm: self.comm.clone(),
        }
    }

    /// Change the logical shape of the matrix.
    ///
    /// The storage is only reallocated if it is too small for the new shape, in
    /// which case its contents are lost. Otherwise the buffer is reinterpreted
    /// in place. Growing a matrix that does not own its storage panics.
    pub fn resize(&mut self, num_rows: usize, num_cols: usize) {
        self.storage.ensure_capacity(num_rows * num_cols);
        self.num_rows = num_rows;
        self.num_cols = num_cols;
    }

    /// Number of rows on this process.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of columns. Identical on every process.
    pub fn num_columns(&self) -> usize {
        self.num_cols
    }

    /// Total number of rows over all processes.
    ///
    /// Collective if the matrix is distributed.
    pub fn num_distributed_rows(&self) -> usize {
        if !self.distributed {
            return self.num_rows;
        }
        let counts = self.comm.all_gather_usize(&[self.num_rows]);
        counts.iter().map(|count| count[0]).sum()
    }

    pub fn distributed(&self) -> bool {
        self.distributed
    }

    /// Whether every process holds the same number of rows.
    ///
    /// Collective if the matrix is distributed. Undistributed matrices are balanced.
    pub fn balanced(&self) -> bool {
        if !self.distributed {
            return true;
        }
        let min_rows = self.comm.all_reduce_min_usize(self.num_rows);
        let max_rows = self.comm.all_reduce_max_usize(self.num_rows);
        min_rows == max_rows
    }

    pub(crate) fn set_distributed(&mut self, distributed: bool) {
        self.distributed = distributed;
    }

    pub fn num_procs(&self) -> usize {
        self.comm.size()
    }

    pub fn comm(&self) -> &Comm {
        &self.comm
    }

    pub fn owns_data(&self) -> bool {
        self.storage.owns_data()
    }

    /// Number of elements the storage holds without reallocation.
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Number of local elements, `num_rows() * num_columns()`.
    pub fn len(&self) -> usize {
        self.num_rows * self.num_cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn item(&self, row: usize, col: usize) -> &f64 {
        debug_assert!(row < self.num_rows, "Row {} out of range.", row);
        debug_assert!(col < self.num_cols, "Column {} out of range.", col);
        &self.storage.as_slice()[row * self.num_cols + col]
    }

    pub fn item_mut(&mut self, row: usize, col: usize) -> &mut f64 {
        debug_assert!(row < self.num_rows, "Row {} out of range.", row);
        debug_assert!(col < self.num_cols, "Column {} out of range.", col);
        let num_cols = self.num_cols;
        &mut self.storage.as_mut_slice()[row * num_cols + col]
    }

    /// The local values in row-major order.
    pub fn as_slice(&self) -> &[f64] {
        &self.storage.as_slice()[..self.len()]
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        let len = self.len();
        &mut self.storage.as_mut_slice()[..len]
    }

    /// View the local block as a two-dimensional array.
    pub fn view(&self) -> ArrayView2<f64> {
        ArrayView2::from_shape((self.num_rows, self.num_cols), self.as_slice())
            .expect("Storage holds exactly `num_rows * num_cols` elements.")
    }

    pub fn view_mut(&mut self) -> ArrayViewMut2<f64> {
        let shape = (self.num_rows, self.num_cols);
        ArrayViewMut2::from_shape(shape, self.as_mut_slice())
            .expect("Storage holds exactly `num_rows * num_cols` elements.")
    }

    /// Copy the local block into an owned array.
    pub fn to_array(&self) -> Array2<f64> {
        self.view().to_owned()
    }

    /// Make `self` a copy of `other`, including its distribution.
    pub fn assign(&mut self, other: &Matrix) {
        self.resize(other.num_rows, other.num_cols);
        self.distributed = other.distributed;
        self.as_mut_slice().copy_from_slice(other.as_slice());
    }

    /// Set every local element to `value`.
    pub fn fill(&mut self, value: f64) {
        self.as_mut_slice().iter_mut().for_each(|item| *item = value);
    }

    fn assert_compatible(&self, other: &Matrix, op: &str) {
        assert!(
            self.distributed == other.distributed,
            "`{}` requires operands with the same distribution.",
            op
        );
        assert!(
            self.num_rows == other.num_rows && self.num_cols == other.num_cols,
            "`{}` requires operands of the same shape, got {} x {} and {} x {}.",
            op,
            self.num_rows,
            self.num_cols,
            other.num_rows,
            other.num_cols
        );
    }
}

impl Clone for Matrix<'_> {
    fn clone(&self) -> Self {
        Matrix {
            storage: self.storage.to_owned_prefix(self.len()),
            num_rows: self.num_rows,
            num_cols: self.num_cols,
            distributed: self.distributed,
            comm: self.comm.clone(),
        }
    }
}

impl fmt::Debug for Matrix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("num_rows", &self.num_rows)
            .field("num_cols", &self.num_cols)
            .field("distributed", &self.distributed)
            .field("rank", &self.comm.rank())
            .field("num_procs", &self.comm.size())
            .field("storage", &self.storage)
            .finish()
    }
}

impl Index<(usize, usize)> for Matrix<'_> {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        self.item(row, col)
    }
}

impl IndexMut<(usize, usize)> for Matrix<'_> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        self.item_mut(row, col)
    }
}

impl AddAssign<&Matrix<'_>> for Matrix<'_> {
    fn add_assign(&mut self, rhs: &Matrix<'_>) {
        self.assert_compatible(rhs, "+=");
        for (item, &other) in self.as_mut_slice().iter_mut().zip(rhs.as_slice()) {
            *item += other;
        }
    }
}

impl SubAssign<&Matrix<'_>> for Matrix<'_> {
    fn sub_assign(&mut self, rhs: &Matrix<'_>) {
        self.assert_compatible(rhs, "-=");
        for (item, &other) in self.as_mut_slice().iter_mut().zip(rhs.as_slice()) {
            *item -= other;
        }
    }
}
