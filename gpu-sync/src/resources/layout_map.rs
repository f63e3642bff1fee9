//! Interval map of image subresource layouts.
//!
//! Subresources are linearized layer-major: `index = layer * mip_count + mip`.
//! A range covering every mip of consecutive layers is one contiguous run in
//! this space, so whole-image and whole-layer operations stay a single
//! interval regardless of the layer count.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::types::ImageLayout;

/// Sparse map from linear subresource index to layout.
///
/// Always covers `0..len` with no gaps and no overlaps. Neighbouring intervals
/// never share a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutMap {
    len: u32,
    /// start -> (end, layout)
    intervals: BTreeMap<u32, (u32, ImageLayout)>,
}

impl LayoutMap {
    /// A map of `len` subresources, all in `initial`.
    pub fn new(len: u32, initial: ImageLayout) -> Self {
        let mut intervals = BTreeMap::new();
        if len > 0 {
            intervals.insert(0, (len, initial));
        }
        Self { len, intervals }
    }

    /// Number of subresources covered.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of intervals.
    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    /// All intervals in index order.
    pub fn intervals(&self) -> impl Iterator<Item = (Range<u32>, ImageLayout)> + '_ {
        self.intervals
            .iter()
            .map(|(&start, &(end, layout))| (start..end, layout))
    }

    /// The intervals overlapping `range`, clipped to it, in index order.
    pub fn query(&self, range: Range<u32>) -> Vec<(Range<u32>, ImageLayout)> {
        let range = range.start..range.end.min(self.len);
        if range.is_empty() {
            return Vec::new();
        }

        let first = self
            .intervals
            .range(..=range.start)
            .next_back()
            .map_or(range.start, |(&start, _)| start);

        self.intervals
            .range(first..range.end)
            .filter_map(|(&start, &(end, layout))| {
                let clipped = start.max(range.start)..end.min(range.end);
                (!clipped.is_empty()).then_some((clipped, layout))
            })
            .collect()
    }

    /// The layout at a single index.
    pub fn get(&self, index: u32) -> Option<ImageLayout> {
        self.intervals
            .range(..=index)
            .next_back()
            .filter(|(_, (end, _))| index < *end)
            .map(|(_, &(_, layout))| layout)
    }

    /// Set every index in `range` to `layout`, merging with equal neighbours.
    pub fn assign(&mut self, range: Range<u32>, layout: ImageLayout) {
        let range = range.start..range.end.min(self.len);
        if range.is_empty() {
            return;
        }

        self.split_at(range.start);
        self.split_at(range.end);

        let covered: Vec<u32> = self.intervals.range(range.clone()).map(|(&s, _)| s).collect();
        for start in covered {
            self.intervals.remove(&start);
        }

        let mut start = range.start;
        let mut end = range.end;

        let previous = self
            .intervals
            .range(..start)
            .next_back()
            .map(|(&s, &(e, l))| (s, e, l));
        if let Some((prev_start, prev_end, prev_layout)) = previous {
            if prev_end == start && prev_layout == layout {
                self.intervals.remove(&prev_start);
                start = prev_start;
            }
        }

        if let Some(&(next_end, next_layout)) = self.intervals.get(&end) {
            if next_layout == layout {
                self.intervals.remove(&end);
                end = next_end;
            }
        }

        self.intervals.insert(start, (end, layout));
    }

    /// Split the interval containing `index` so that one starts exactly there.
    fn split_at(&mut self, index: u32) {
        let containing = self
            .intervals
            .range(..index)
            .next_back()
            .map(|(&s, &(e, l))| (s, e, l));
        if let Some((start, end, layout)) = containing {
            if index < end {
                self.intervals.insert(start, (index, layout));
                self.intervals.insert(index, (end, layout));
            }
        }
    }

    /// Verify full coverage, no overlap and maximal intervals.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut expected_start = 0;
        let mut previous_layout = None;
        for (&start, &(end, layout)) in &self.intervals {
            if start != expected_start {
                return Err(format!("interval starts at {start}, expected {expected_start}"));
            }
            if end <= start {
                return Err(format!("empty interval {start}..{end}"));
            }
            if previous_layout == Some(layout) {
                return Err(format!("interval at {start} repeats {layout:?}"));
            }
            expected_start = end;
            previous_layout = Some(layout);
        }
        if expected_start != self.len {
            return Err(format!("map covers 0..{expected_start} of 0..{}", self.len));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_map_is_single_interval() {
        let map = LayoutMap::new(24, ImageLayout::Undefined);
        assert_eq!(map.interval_count(), 1);
        assert_eq!(map.query(3..7), vec![(3..7, ImageLayout::Undefined)]);
        map.check_invariants().unwrap();
    }

    #[test]
    fn test_assign_splits() {
        let mut map = LayoutMap::new(10, ImageLayout::Undefined);
        map.assign(3..6, ImageLayout::TransferDst);

        let intervals: Vec<_> = map.intervals().collect();
        assert_eq!(
            intervals,
            vec![
                (0..3, ImageLayout::Undefined),
                (3..6, ImageLayout::TransferDst),
                (6..10, ImageLayout::Undefined),
            ]
        );
        map.check_invariants().unwrap();
    }

    #[test]
    fn test_assign_merges_neighbours() {
        let mut map = LayoutMap::new(10, ImageLayout::Undefined);
        map.assign(0..3, ImageLayout::ShaderReadOnly);
        map.assign(6..10, ImageLayout::ShaderReadOnly);
        map.assign(3..6, ImageLayout::ShaderReadOnly);
        assert_eq!(map.interval_count(), 1);
        assert_eq!(map.get(9), Some(ImageLayout::ShaderReadOnly));
        map.check_invariants().unwrap();
    }

    #[test]
    fn test_query_clips_to_range() {
        let mut map = LayoutMap::new(8, ImageLayout::Undefined);
        map.assign(2..5, ImageLayout::General);
        assert_eq!(
            map.query(4..7),
            vec![(4..5, ImageLayout::General), (5..7, ImageLayout::Undefined)]
        );
        assert!(map.query(8..12).is_empty());
    }

    #[test]
    fn test_assign_over_many_intervals() {
        let mut map = LayoutMap::new(12, ImageLayout::Undefined);
        for i in (0..12).step_by(2) {
            map.assign(i..i + 1, ImageLayout::TransferSrc);
        }
        assert_eq!(map.interval_count(), 12);

        map.assign(1..11, ImageLayout::ColorAttachment);
        let intervals: Vec<_> = map.intervals().collect();
        assert_eq!(
            intervals,
            vec![
                (0..1, ImageLayout::TransferSrc),
                (1..11, ImageLayout::ColorAttachment),
                (11..12, ImageLayout::Undefined),
            ]
        );
        map.check_invariants().unwrap();
    }

    #[test]
    fn test_get_out_of_range() {
        let map = LayoutMap::new(4, ImageLayout::Undefined);
        assert_eq!(map.get(4), None);
    }
}
