//! Selection vectors: positions of qualifying rows inside one scan window.

use arrow::array::UInt32Array;

/// Ordered list of row positions (relative to the start of a vector-sized
/// window) that survived visibility checks and filters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionVector {
    positions: Vec<u32>,
}

impl SelectionVector {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: Vec::with_capacity(capacity),
        }
    }

    /// Selection of `0..count`.
    pub fn incremental(count: usize) -> Self {
        Self {
            positions: (0..count as u32).collect(),
        }
    }

    pub fn from_positions(positions: Vec<u32>) -> Self {
        Self { positions }
    }

    #[inline]
    pub fn push(&mut self, position: u32) {
        self.positions.push(position);
    }

    #[inline]
    pub fn get(&self, idx: usize) -> usize {
        self.positions[idx] as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.positions
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }

    /// Keep only the positions for which `keep` returns true, preserving order.
    pub fn retain<F: FnMut(usize) -> bool>(&mut self, mut keep: F) {
        self.positions.retain(|&p| keep(p as usize));
    }

    /// `true` when the selection is exactly `0..count`.
    pub fn is_incremental(&self, count: usize) -> bool {
        self.positions.len() == count
            && self
                .positions
                .iter()
                .enumerate()
                .all(|(i, &p)| p as usize == i)
    }

    /// Arrow index array, suitable for `arrow::compute::take`.
    pub fn to_indices(&self) -> UInt32Array {
        UInt32Array::from(self.positions.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.positions.iter().map(|&p| p as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retain_preserves_order() {
        let mut sel = SelectionVector::incremental(6);
        sel.retain(|p| p % 2 == 1);
        assert_eq!(sel.as_slice(), &[1, 3, 5]);
        assert!(!sel.is_incremental(3));
        assert!(SelectionVector::incremental(4).is_incremental(4));
    }
}
