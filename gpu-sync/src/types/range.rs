//! Subresource ranges.

use std::ops::Range;

/// A (array-layer range, mip-level range) pair identifying part of an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    /// Array layers covered, half-open.
    pub layers: Range<u32>,
    /// Mip levels covered, half-open.
    pub mips: Range<u32>,
}

impl SubresourceRange {
    /// Create a range from explicit layer and mip ranges.
    pub fn new(layers: Range<u32>, mips: Range<u32>) -> Self {
        Self { layers, mips }
    }

    /// The whole subresource space of an image.
    pub fn full(layer_count: u32, mip_count: u32) -> Self {
        Self::new(0..layer_count, 0..mip_count)
    }

    /// A single subresource.
    pub fn single(layer: u32, mip: u32) -> Self {
        Self::new(layer..layer + 1, mip..mip + 1)
    }

    /// All mip levels of one layer.
    pub fn layer(layer: u32, mip_count: u32) -> Self {
        Self::new(layer..layer + 1, 0..mip_count)
    }

    /// One mip level across a range of layers.
    pub fn mip(mip: u32, layers: Range<u32>) -> Self {
        Self::new(layers, mip..mip + 1)
    }

    /// Returns true if the range covers no subresource.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() || self.mips.is_empty()
    }

    /// Number of subresources covered.
    pub fn subresource_count(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.layers.len() as u32 * self.mips.len() as u32
        }
    }

    /// Returns true if this range lies inside an image of the given dimensions.
    pub fn fits(&self, layer_count: u32, mip_count: u32) -> bool {
        self.layers.end <= layer_count && self.mips.end <= mip_count
    }

    /// Returns true if `other` lies entirely within this range.
    pub fn contains(&self, other: &SubresourceRange) -> bool {
        other.is_empty()
            || (other.layers.start >= self.layers.start
                && other.layers.end <= self.layers.end
                && other.mips.start >= self.mips.start
                && other.mips.end <= self.mips.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_range() {
        let range = SubresourceRange::full(6, 4);
        assert_eq!(range.subresource_count(), 24);
        assert!(range.fits(6, 4));
        assert!(!range.fits(5, 4));
    }

    #[test]
    fn test_empty_range() {
        let range = SubresourceRange::new(2..2, 0..4);
        assert!(range.is_empty());
        assert_eq!(range.subresource_count(), 0);
    }

    #[test]
    fn test_contains() {
        let full = SubresourceRange::full(4, 3);
        assert!(full.contains(&SubresourceRange::single(3, 2)));
        assert!(!SubresourceRange::layer(0, 3).contains(&SubresourceRange::single(1, 0)));
    }
}
