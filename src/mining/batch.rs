//! Fixed-size partitioning of the target list.

use crate::core::errors::{MinerError, Result};

/// Lazy iterator over consecutive fixed-size slices of a list.
///
/// Every batch has `size` items except possibly the last. The iterator is
/// `Clone`, so a run can be restarted from the same input.
#[derive(Debug, Clone)]
pub struct Batches<'a, T> {
    rest: &'a [T],
    size: usize,
    index: usize,
}

/// Partition `items` into batches of `size`. A zero size is rejected.
pub fn batches<T>(items: &[T], size: usize) -> Result<Batches<'_, T>> {
    if size == 0 {
        return Err(MinerError::InvalidBatchSize { size });
    }
    Ok(Batches {
        rest: items,
        size,
        index: 0,
    })
}

/// One partition plus its position in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a, T> {
    /// Zero-based batch number.
    pub index: usize,
    /// Items in this batch.
    pub items: &'a [T],
}

impl<'a, T> Iterator for Batches<'a, T> {
    type Item = Batch<'a, T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let take = self.size.min(self.rest.len());
        let (head, tail) = self.rest.split_at(take);
        self.rest = tail;
        let index = self.index;
        self.index += 1;
        Some(Batch { index, items: head })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.rest.len().div_ceil(self.size);
        (n, Some(n))
    }
}

impl<T> ExactSizeIterator for Batches<'_, T> {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn partitions_with_short_tail() {
        let items = [1, 2, 3, 4, 5];
        let parts: Vec<&[i32]> = batches(&items, 2).unwrap().map(|b| b.items).collect();
        assert_eq!(parts, vec![&[1, 2][..], &[3, 4][..], &[5][..]]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let items: [u8; 0] = [];
        assert_eq!(batches(&items, 3).unwrap().count(), 0);
    }

    #[test]
    fn zero_size_is_an_error() {
        let err = batches(&[1], 0).unwrap_err();
        assert_eq!(err.code(), "RMN-1101");
    }

    #[test]
    fn clone_restarts_from_the_same_position() {
        let items = ["a", "b", "c"];
        let run = batches(&items, 1).unwrap();
        let first: Vec<_> = run.clone().map(|b| b.index).collect();
        let second: Vec<_> = run.map(|b| b.index).collect();
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn concatenation_reproduces_input(items in prop::collection::vec(any::<u16>(), 0..300), size in 1usize..64) {
            let run = batches(&items, size).unwrap();
            prop_assert_eq!(run.len(), items.len().div_ceil(size));

            let parts: Vec<Batch<'_, u16>> = run.collect();
            let joined: Vec<u16> = parts.iter().flat_map(|b| b.items.iter().copied()).collect();
            prop_assert_eq!(&joined, &items);

            for (i, part) in parts.iter().enumerate() {
                prop_assert_eq!(part.index, i);
                if i + 1 < parts.len() {
                    prop_assert_eq!(part.items.len(), size);
                } else {
                    prop_assert!(!part.items.is_empty() && part.items.len() <= size);
                }
            }
        }
    }
}
