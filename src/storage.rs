//! Dense storage blocks backing matrices and vectors.
//!
//! A block is either an owned allocation or a borrowed view into a buffer
//! managed by the caller. The capacity of a block is tracked separately from
//! the logical shape of the object using it.

use std::fmt;

pub enum Storage<'a> {
    /// Storage allocated and released by the block itself.
    Owned(Vec<f64>),
    /// A caller-managed buffer. Never reallocated or released.
    Borrowed(&'a mut [f64]),
}

impl Storage<'static> {
    /// Allocate `size` zero-initialised elements.
    pub fn allocate(size: usize) -> Self {
        Storage::Owned(vec![0.0; size])
    }
}

impl<'a> Storage<'a> {
    /// Number of elements available without reallocation.
    pub fn capacity(&self) -> usize {
        match self {
            Storage::Owned(data) => data.len(),
            Storage::Borrowed(data) => data.len(),
        }
    }

    pub fn owns_data(&self) -> bool {
        matches!(self, Storage::Owned(_))
    }

    pub fn as_slice(&self) -> &[f64] {
        match self {
            Storage::Owned(data) => data.as_slice(),
            Storage::Borrowed(data) => data,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        match self {
            Storage::Owned(data) => data.as_mut_slice(),
            Storage::Borrowed(data) => data,
        }
    }

    /// Guarantee room for `size` elements.
    ///
    /// Owned storage that is too small is replaced by a fresh zeroed allocation,
    /// so the previous contents do not survive growth. Borrowed storage can not
    /// grow: requesting more than its capacity panics.
    pub fn ensure_capacity(&mut self, size: usize) {
        if size <= self.capacity() {
            return;
        }
        match self {
            Storage::Owned(data) => *data = vec![0.0; size],
            Storage::Borrowed(_) => panic!("Can not reallocate externally owned storage."),
        }
    }

    /// Copy the first `size` elements into a new owned block.
    pub fn to_owned_prefix(&self, size: usize) -> Storage<'static> {
        Storage::Owned(self.as_slice()[..size].to_vec())
    }
}

impl fmt::Debug for Storage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.owns_data() { "Owned" } else { "Borrowed" };
        f.debug_struct("Storage")
            .field("kind", &kind)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_storage_grows() {
        let mut storage = Storage::allocate(4);
        storage.as_mut_slice().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);

        storage.ensure_capacity(3);
        assert_eq!(storage.capacity(), 4);
        assert_eq!(storage.as_slice(), &[1.0, 2.0, 3.0, 4.0]);

        storage.ensure_capacity(6);
        assert_eq!(storage.capacity(), 6);
        assert!(storage.owns_data());
    }

    #[test]
    fn test_borrowed_storage_writes_through() {
        let mut buffer = [0.0; 3];
        {
            let mut storage = Storage::Borrowed(&mut buffer);
            assert!(!storage.owns_data());
            storage.ensure_capacity(2);
            storage.as_mut_slice()[1] = 5.0;
        }
        assert_eq!(buffer, [0.0, 5.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "Can not reallocate externally owned storage.")]
    fn test_borrowed_storage_can_not_grow() {
        let mut buffer = [0.0; 3];
        let mut storage = Storage::Borrowed(&mut buffer);
        storage.ensure_capacity(4);
    }
}
