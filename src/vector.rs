//! Row-distributed dense vectors, the one-dimensional counterpart of [`Matrix`](crate::Matrix).

use crate::comm::Comm;
use crate::storage::Storage;
use ndarray::{ArrayView1, ArrayViewMut1};
use std::fmt;
use std::ops::{AddAssign, Index, IndexMut, SubAssign};

pub struct Vector<'a> {
    storage: Storage<'a>,
    dim: usize,
    distributed: bool,
    comm: Comm,
}

impl Vector<'static> {
    /// Create a zero-initialised vector.
    ///
    /// # Arguments
    ///
    /// * `dim`: The number of local entries if `distributed`, otherwise the total number of entries.
    /// * `distributed`: Whether the entries are spread over the processes of `comm`.
    /// * `comm`: The process group the vector lives on.
    pub fn new(dim: usize, distributed: bool, comm: &Comm) -> Self {
        Vector {
            storage: Storage::allocate(dim),
            dim,
            distributed,
            comm: comm.clone(),
        }
    }

    /// Create a vector owning a copy of `data`.
    pub fn from_slice(data: &[f64], distributed: bool, comm: &Comm) -> Self {
        Vector {
            storage: Storage::Owned(data.to_vec()),
            dim: data.len(),
            distributed,
            comm: comm.clone(),
        }
    }
}

impl<'a> Vector<'a> {
    /// Use `data` as the storage of the vector without copying.
    pub fn wrap(data: &'a mut [f64], distributed: bool, comm: &Comm) -> Self {
        let dim = data.len();
        Vector {
            storage: Storage::Borrowed(data),
            dim,
            distributed,
            comm: comm.clone(),
        }
    }

    /// Change the local dimension. Reallocates only when growing beyond the capacity.
    pub fn resize(&mut self, dim: usize) {
        self.storage.ensure_capacity(dim);
        self.dim = dim;
    }

    /// Local dimension of the vector.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn distributed(&self) -> bool {
        self.distributed
    }

    pub(crate) fn set_distributed(&mut self, distributed: bool) {
        self.distributed = distributed;
    }

    pub fn comm(&self) -> &Comm {
        &self.comm
    }

    pub fn owns_data(&self) -> bool {
        self.storage.owns_data()
    }

    pub fn item(&self, index: usize) -> &f64 {
        debug_assert!(index < self.dim, "Index {} out of range.", index);
        &self.storage.as_slice()[index]
    }

    pub fn item_mut(&mut self, index: usize) -> &mut f64 {
        debug_assert!(index < self.dim, "Index {} out of range.", index);
        &mut self.storage.as_mut_slice()[index]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.storage.as_slice()[..self.dim]
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        let dim = self.dim;
        &mut self.storage.as_mut_slice()[..dim]
    }

    pub fn view(&self) -> ArrayView1<f64> {
        ArrayView1::from(self.as_slice())
    }

    pub fn view_mut(&mut self) -> ArrayViewMut1<f64> {
        ArrayViewMut1::from(self.as_mut_slice())
    }

    pub fn fill(&mut self, value: f64) {
        self.as_mut_slice().iter_mut().for_each(|item| *item = value);
    }

    /// Inner product with `other`. Collective if the vectors are distributed.
    pub fn inner_product(&self, other: &Vector) -> f64 {
        assert!(
            self.distributed == other.distributed,
            "`inner_product` requires vectors with the same distribution."
        );
        assert_eq!(self.dim, other.dim, "`inner_product` requires vectors of equal dimension.");

        let mut sum = [self.view().dot(&other.view())];
        if self.distributed {
            self.comm.all_reduce_sum(&mut sum);
        }
        sum[0]
    }

    /// Euclidean norm. Collective if the vector is distributed.
    pub fn norm(&self) -> f64 {
        self.inner_product(self).sqrt()
    }

    fn assert_compatible(&self, other: &Vector, op: &str) {
        assert!(
            self.distributed == other.distributed && self.dim == other.dim,
            "`{}` requires vectors of the same dimension and distribution.",
            op
        );
    }
}

impl Clone for Vector<'_> {
    fn clone(&self) -> Self {
        Vector {
            storage: self.storage.to_owned_prefix(self.dim),
            dim: self.dim,
            distributed: self.distributed,
            comm: self.comm.clone(),
        }
    }
}

impl fmt::Debug for Vector<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vector")
            .field("dim", &self.dim)
            .field("distributed", &self.distributed)
            .field("rank", &self.comm.rank())
            .field("storage", &self.storage)
            .finish()
    }
}

impl Index<usize> for Vector<'_> {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        self.item(index)
    }
}

impl IndexMut<usize> for Vector<'_> {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        self.item_mut(index)
    }
}

impl AddAssign<&Vector<'_>> for Vector<'_> {
    fn add_assign(&mut self, rhs: &Vector<'_>) {
        self.assert_compatible(rhs, "+=");
        for (item, &other) in self.as_mut_slice().iter_mut().zip(rhs.as_slice()) {
            *item += other;
        }
    }
}

impl SubAssign<&Vector<'_>> for Vector<'_> {
    fn sub_assign(&mut self, rhs: &Vector<'_>) {
        self.assert_compatible(rhs, "-=");
        for (item, &other) in self.as_mut_slice().iter_mut().zip(rhs.as_slice()) {
            *item -= other;
        }
    }
}
