//! Position, relative-offset and temporal-offset feature encoding.
//!
//! Each configured [`Tier`] divides the screen into cells of
//! `block_height x block_width` pixels. For every tier three kinds of features are
//! produced from a set of [`Blobs`]:
//!
//! - *basic*: a `(cell, color)` pair is occupied by at least one blob,
//! - *relative*: two blobs of the frame are separated by a given cell offset,
//!   keyed by their (unordered) color pair,
//! - *temporal*: a blob of the previous frame and a blob of the current frame are
//!   separated by a given cell offset, keyed by their (ordered) color pair.
//!
//! Identifier ranges are laid out as all tiers' basic ranges, then all tiers'
//! relative ranges, then all tiers' temporal ranges, followed by one bias id that
//! every frame activates.

use serde::{Deserialize, Serialize};

use crate::{Blobs, FeatureId, Position};

/// Cell size of one spatial resolution, serialized as `[block_height, block_width]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[usize; 2]", into = "[usize; 2]")]
pub struct Tier {
    pub block_height: usize,
    pub block_width: usize,
}

impl Tier {
    #[must_use]
    pub const fn new(block_height: usize, block_width: usize) -> Self {
        Self {
            block_height,
            block_width,
        }
    }
}

impl From<[usize; 2]> for Tier {
    fn from([block_height, block_width]: [usize; 2]) -> Self {
        Self::new(block_height, block_width)
    }
}

impl From<Tier> for [usize; 2] {
    fn from(tier: Tier) -> Self {
        [tier.block_height, tier.block_width]
    }
}

/// Existence table that is reset by replaying the indices set since the last reset.
#[derive(Debug, Clone)]
struct Dedup {
    seen: Vec<bool>,
    touched: Vec<usize>,
}

impl Dedup {
    fn new(len: usize) -> Self {
        Self {
            seen: vec![false; len],
            touched: Vec::new(),
        }
    }

    fn insert(&mut self, index: usize) -> bool {
        if self.seen[index] {
            return false;
        }
        self.seen[index] = true;
        self.touched.push(index);
        true
    }

    fn reset(&mut self) {
        for index in self.touched.drain(..) {
            self.seen[index] = false;
        }
    }
}

#[derive(Debug, Clone)]
struct TierLayout {
    tier: Tier,
    num_rows: usize,
    num_columns: usize,
    row_offsets: usize,
    column_offsets: usize,
    base_basic: FeatureId,
    base_relative: FeatureId,
    base_temporal: FeatureId,
    basic_seen: Dedup,
    offset_seen: Dedup,
}

impl TierLayout {
    fn cell(&self, position: Position) -> (usize, usize) {
        (
            position.row / self.tier.block_height,
            position.column / self.tier.block_width,
        )
    }

    fn offset_area(&self) -> usize {
        self.row_offsets * self.column_offsets
    }

    /// Bucket of the cell offset `to - from`, shifted to be non-negative.
    fn offset_bucket(&self, from: (usize, usize), to: (usize, usize)) -> usize {
        let row = to.0 + self.num_rows - 1 - from.0;
        let column = to.1 + self.num_columns - 1 - from.1;
        row * self.column_offsets + column
    }

    fn emit_offset(&mut self, base: FeatureId, from: (usize, usize), to: (usize, usize), out: &mut Vec<FeatureId>) {
        let bucket = self.offset_bucket(from, to);
        if self.offset_seen.insert(bucket) {
            out.push(base + bucket as FeatureId);
        }
    }
}

/// Multi-resolution encoder from blob positions to sparse feature ids.
///
/// The encoder remembers the blobs of the last encoded frame to produce temporal
/// features. Call [`OffsetEncoder::clear_temporal_cache`] at episode boundaries.
#[derive(Debug, Clone)]
pub struct OffsetEncoder {
    num_colors: usize,
    tiers: Vec<TierLayout>,
    bias: FeatureId,
    previous: Blobs,
    has_previous: bool,
    active: Vec<u8>,
    previous_active: Vec<u8>,
}

impl OffsetEncoder {
    /// # Panics
    ///
    /// Panics if `tiers` is empty or any tier has a zero-sized cell.
    #[must_use]
    pub fn new(num_colors: usize, tiers: &[Tier], height: usize, width: usize) -> Self {
        assert!(!tiers.is_empty(), "at least one resolution tier is required");
        assert!(num_colors > 0, "at least one color is required");

        let mut layouts = tiers
            .iter()
            .map(|&tier| {
                assert!(
                    tier.block_height > 0 && tier.block_width > 0,
                    "tier cells must be non-empty, got {}x{}",
                    tier.block_height,
                    tier.block_width,
                );
                let num_rows = height.div_ceil(tier.block_height).max(1);
                let num_columns = width.div_ceil(tier.block_width).max(1);
                let row_offsets = 2 * num_rows - 1;
                let column_offsets = 2 * num_columns - 1;
                TierLayout {
                    tier,
                    num_rows,
                    num_columns,
                    row_offsets,
                    column_offsets,
                    base_basic: 0,
                    base_relative: 0,
                    base_temporal: 0,
                    basic_seen: Dedup::new(num_colors * num_rows * num_columns),
                    offset_seen: Dedup::new(row_offsets * column_offsets),
                }
            })
            .collect::<Vec<_>>();

        let num_pairs = num_colors * (num_colors + 1) / 2;
        let mut base: FeatureId = 0;
        for layout in &mut layouts {
            layout.base_basic = base;
            base += (num_colors * layout.num_rows * layout.num_columns) as FeatureId;
        }
        for layout in &mut layouts {
            layout.base_relative = base;
            base += (num_pairs * layout.offset_area()) as FeatureId;
        }
        for layout in &mut layouts {
            layout.base_temporal = base;
            base += (num_colors * num_colors * layout.offset_area()) as FeatureId;
        }

        Self {
            num_colors,
            tiers: layouts,
            bias: base,
            previous: Blobs::with_num_colors(num_colors),
            has_previous: false,
            active: Vec::with_capacity(num_colors),
            previous_active: Vec::with_capacity(num_colors),
        }
    }

    /// Size of the feature space; every emitted id is below this value.
    #[must_use]
    pub fn num_features(&self) -> u64 {
        self.bias + 1
    }

    #[must_use]
    pub fn bias_feature(&self) -> FeatureId {
        self.bias
    }

    #[must_use]
    pub fn num_colors(&self) -> usize {
        self.num_colors
    }

    pub fn clear_temporal_cache(&mut self) {
        self.previous.clear();
        self.has_previous = false;
    }

    /// Appends the ids active for `blobs` to `out` and caches `blobs` as the previous frame.
    ///
    /// # Panics
    ///
    /// Panics if `blobs` was built for a different number of colors.
    pub fn encode(&mut self, blobs: &Blobs, out: &mut Vec<FeatureId>) {
        assert_eq!(
            blobs.num_colors(),
            self.num_colors,
            "blob colors do not match the encoder"
        );
        self.active.clear();
        self.active.extend(blobs.active_colors());
        self.previous_active.clear();
        if self.has_previous {
            self.previous_active.extend(self.previous.active_colors());
        }

        for layout in &mut self.tiers {
            encode_basic(layout, self.num_colors, &self.active, blobs, out);
            encode_relative(layout, self.num_colors, &self.active, blobs, out);
            if self.has_previous {
                encode_temporal(
                    layout,
                    self.num_colors,
                    &self.previous_active,
                    &self.previous,
                    &self.active,
                    blobs,
                    out,
                );
            }
        }
        out.push(self.bias);

        self.previous.copy_from(blobs);
        self.has_previous = true;
    }
}

fn encode_basic(layout: &mut TierLayout, num_colors: usize, active: &[u8], blobs: &Blobs, out: &mut Vec<FeatureId>) {
    debug_assert!(active.iter().all(|&c| usize::from(c) < num_colors));
    for &color in active {
        for &position in blobs.of_color(color) {
            let (row, column) = layout.cell(position);
            let index = (usize::from(color) * layout.num_rows + row) * layout.num_columns + column;
            if layout.basic_seen.insert(index) {
                out.push(layout.base_basic + index as FeatureId);
            }
        }
    }
    layout.basic_seen.reset();
}

fn color_pair_index(num_colors: usize, first: usize, second: usize) -> usize {
    debug_assert!(first <= second);
    first * (2 * num_colors - first + 1) / 2 + (second - first)
}

fn encode_relative(layout: &mut TierLayout, num_colors: usize, active: &[u8], blobs: &Blobs, out: &mut Vec<FeatureId>) {
    let area = layout.offset_area() as FeatureId;
    for (i, &first) in active.iter().enumerate() {
        let first_positions = blobs.of_color(first);

        let base = layout.base_relative
            + color_pair_index(num_colors, first.into(), first.into()) as FeatureId * area;
        for &a in first_positions {
            let from = layout.cell(a);
            for &b in first_positions {
                let to = layout.cell(b);
                // keep only one direction of each symmetric pair
                if to.0 > from.0 || (to.0 == from.0 && to.1 >= from.1) {
                    layout.emit_offset(base, from, to, out);
                }
            }
        }
        layout.offset_seen.reset();

        for &second in &active[i + 1..] {
            let base = layout.base_relative
                + color_pair_index(num_colors, first.into(), second.into()) as FeatureId * area;
            for &a in first_positions {
                let from = layout.cell(a);
                for &b in blobs.of_color(second) {
                    let to = layout.cell(b);
                    layout.emit_offset(base, from, to, out);
                }
            }
            layout.offset_seen.reset();
        }
    }
}

fn encode_temporal(
    layout: &mut TierLayout,
    num_colors: usize,
    previous_active: &[u8],
    previous: &Blobs,
    active: &[u8],
    blobs: &Blobs,
    out: &mut Vec<FeatureId>,
) {
    let area = layout.offset_area() as FeatureId;
    for &before in previous_active {
        for &now in active {
            let pair = usize::from(before) * num_colors + usize::from(now);
            let base = layout.base_temporal + pair as FeatureId * area;
            for &current in blobs.of_color(now) {
                let from = layout.cell(current);
                for &past in previous.of_color(before) {
                    let to = layout.cell(past);
                    layout.emit_offset(base, from, to, out);
                }
            }
            layout.offset_seen.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs_of(num_colors: usize, entries: &[(u8, usize, usize)]) -> Blobs {
        let mut blobs = Blobs::with_num_colors(num_colors);
        for &(color, row, column) in entries {
            blobs.push(color, Position::new(row, column));
        }
        blobs
    }

    fn encode_sorted(encoder: &mut OffsetEncoder, blobs: &Blobs) -> Vec<FeatureId> {
        let mut out = Vec::new();
        encoder.encode(blobs, &mut out);
        out.sort_unstable();
        out
    }

    #[test]
    fn test_two_pixel_scenario() {
        // 4x4 screen, 2x2 cells, 2 colors: a 2x2 cell grid with 3x3 offset buckets
        let mut encoder = OffsetEncoder::new(2, &[Tier::new(2, 2)], 4, 4);
        // basic 2*2*2 = 8, relative 3 pairs * 9 = 27, temporal 4 * 9 = 36
        assert_eq!(encoder.num_features(), 8 + 27 + 36 + 1);
        assert_eq!(encoder.bias_feature(), 71);

        let blobs = blobs_of(2, &[(1, 0, 0), (1, 3, 3)]);
        let features = encode_sorted(&mut encoder, &blobs);

        let basic_cell_00 = (2 + 0) * 2;
        let basic_cell_11 = (2 + 1) * 2 + 1;
        let self_pair_base = 8 + 2 * 9;
        let bucket_22 = 2 * 3 + 2;
        let bucket_11 = 3 + 1;
        assert_eq!(
            features,
            vec![
                basic_cell_00,
                basic_cell_11,
                self_pair_base + bucket_11,
                self_pair_base + bucket_22,
                71
            ]
        );
    }

    #[test]
    fn test_temporal_features_after_first_frame() {
        let mut encoder = OffsetEncoder::new(2, &[Tier::new(2, 2)], 4, 4);
        let blobs = blobs_of(2, &[(1, 0, 0), (1, 3, 3)]);
        let first = encode_sorted(&mut encoder, &blobs);
        let second = encode_sorted(&mut encoder, &blobs);

        let temporal = second
            .iter()
            .copied()
            .filter(|id| !first.contains(id))
            .collect::<Vec<_>>();
        // color pair (1, 1) in the temporal range starting at 35
        let base = 35 + 3 * 9;
        assert_eq!(temporal, vec![base, base + 4, base + 8]);

        encoder.clear_temporal_cache();
        assert_eq!(encode_sorted(&mut encoder, &blobs), first);
    }

    #[test]
    fn test_offsets_deduplicated_per_bucket() {
        let mut encoder = OffsetEncoder::new(4, &[Tier::new(8, 8)], 32, 32);
        // many blobs in one cell, all pairs share the zero offset bucket
        let blobs = blobs_of(
            4,
            &[(3, 0, 0), (3, 1, 1), (3, 2, 2), (3, 3, 3), (3, 7, 7), (3, 0, 7)],
        );
        let features = encode_sorted(&mut encoder, &blobs);
        // one basic, one relative, bias
        assert_eq!(features.len(), 3);
    }

    #[test]
    fn test_cross_color_offsets_are_directional() {
        let mut encoder = OffsetEncoder::new(2, &[Tier::new(1, 1)], 3, 3);
        let down_right = blobs_of(2, &[(0, 0, 0), (1, 1, 1)]);
        let up_left = blobs_of(2, &[(0, 1, 1), (1, 0, 0)]);
        let a = encode_sorted(&mut encoder, &down_right);
        encoder.clear_temporal_cache();
        let b = encode_sorted(&mut encoder, &up_left);
        assert_ne!(a, b);
    }

    #[test]
    fn test_tier_ranges_are_disjoint() {
        let tiers = [Tier::new(2, 2), Tier::new(4, 4)];
        let mut encoder = OffsetEncoder::new(2, &tiers, 8, 8);
        let blobs = blobs_of(2, &[(0, 1, 1), (1, 6, 6), (1, 5, 2)]);
        let mut out = Vec::new();
        encoder.encode(&blobs, &mut out);
        encoder.encode(&blobs, &mut out);
        let first_len = out.iter().position(|&id| id == encoder.bias_feature()).unwrap() + 1;
        let mut first = out[..first_len].to_vec();
        first.sort_unstable();
        first.dedup();
        assert_eq!(first.len(), first_len);
        assert!(out.iter().all(|&id| id < encoder.num_features()));
    }

    #[test]
    fn test_partial_cells_are_addressable() {
        // 5 rows with 2-row cells need 3 cell rows
        let mut encoder = OffsetEncoder::new(1, &[Tier::new(2, 2)], 5, 5);
        let blobs = blobs_of(1, &[(0, 4, 4), (0, 0, 0)]);
        let features = encode_sorted(&mut encoder, &blobs);
        assert!(features.iter().all(|&id| id < encoder.num_features()));
    }

    #[test]
    fn test_tier_serde_as_pair() {
        let tier: Tier = serde_json::from_str("[4, 2]").unwrap();
        assert_eq!(tier, Tier::new(4, 2));
        assert_eq!(serde_json::to_string(&tier).unwrap(), "[4,2]");
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn test_zero_sized_tier_is_fatal() {
        let _ = OffsetEncoder::new(2, &[Tier::new(0, 2)], 4, 4);
    }
}
