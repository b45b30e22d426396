//! Single-pass connected-component labeling over a color-quantized screen.
//!
//! The detector visits pixels in raster order. Each pixel is compared against a
//! precomputed causal neighborhood: every already-visited pixel within
//! `neighbor_radius` rows above it and, on its own row, within `neighbor_radius`
//! columns to the left. Same-colored neighbors are joined through an index-based
//! disjoint-set forest whose roots carry the bounding box and pixel count of their
//! region.
//!
//! When the pixel immediately to the left has the same quantized color, the current
//! pixel is guaranteed to end up in the left pixel's region, and every neighbor the
//! two pixels share has already been joined with it. In that case only the pixels
//! that are new to the neighborhood are inspected: the left pixel itself and the
//! rightmost column of each row above.
//!
//! After the scan every surviving root becomes one [`Position`] at the center of its
//! bounding box.

use crate::{Background, ColorQuantizer, PixelGrid};

/// Row/column coordinate of a blob representative, in pixels or cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Position {
    #[must_use]
    pub const fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

/// Blob positions grouped by quantized color.
///
/// Several blobs of one color may coexist. Colors with at least one blob are the
/// *active colors* of the frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blobs {
    by_color: Vec<Vec<Position>>,
}

impl Blobs {
    #[must_use]
    pub fn with_num_colors(num_colors: usize) -> Self {
        Self {
            by_color: vec![Vec::new(); num_colors],
        }
    }

    #[must_use]
    pub fn num_colors(&self) -> usize {
        self.by_color.len()
    }

    pub fn clear(&mut self) {
        for positions in &mut self.by_color {
            positions.clear();
        }
    }

    pub fn push(&mut self, color: u8, position: Position) {
        self.by_color[usize::from(color)].push(position);
    }

    #[must_use]
    pub fn of_color(&self, color: u8) -> &[Position] {
        &self.by_color[usize::from(color)]
    }

    /// Colors with at least one blob, in ascending order.
    pub fn active_colors(&self) -> impl Iterator<Item = u8> + '_ {
        self.by_color
            .iter()
            .enumerate()
            .filter(|(_, positions)| !positions.is_empty())
            .map(|(color, _)| u8::try_from(color).expect("at most 256 colors"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_color.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_color.iter().all(Vec::is_empty)
    }

    /// Copies `other` into `self`, reusing allocations.
    pub fn copy_from(&mut self, other: &Blobs) {
        self.by_color.resize_with(other.by_color.len(), Vec::new);
        for (dst, src) in self.by_color.iter_mut().zip(&other.by_color) {
            dst.clone_from(src);
        }
    }
}

/// Causal neighbor lists for every pixel, stored in compressed-row form.
#[derive(Debug, Clone)]
struct NeighborTable {
    starts: Vec<usize>,
    indices: Vec<usize>,
}

impl NeighborTable {
    fn build(height: usize, width: usize, offsets: &[(isize, isize)]) -> Self {
        let mut starts = Vec::with_capacity(height * width + 1);
        let mut indices = Vec::new();
        starts.push(0);
        for row in 0..height {
            for column in 0..width {
                for &(row_delta, column_delta) in offsets {
                    let Some(r) = row.checked_add_signed(row_delta) else {
                        continue;
                    };
                    let Some(c) = column.checked_add_signed(column_delta) else {
                        continue;
                    };
                    if r < height && c < width {
                        indices.push(r * width + c);
                    }
                }
                starts.push(indices.len());
            }
        }
        Self { starts, indices }
    }

    fn neighbors(&self, pixel: usize) -> &[usize] {
        &self.indices[self.starts[pixel]..self.starts[pixel + 1]]
    }
}

#[derive(Debug, Clone, Copy)]
struct DisjointSetElement {
    parent: usize,
    color: u8,
    row_up: usize,
    row_down: usize,
    column_left: usize,
    column_right: usize,
    size: usize,
}

impl DisjointSetElement {
    fn singleton(index: usize, color: u8, row: usize, column: usize) -> Self {
        Self {
            parent: index,
            color,
            row_up: row,
            row_down: row,
            column_left: column,
            column_right: column,
            size: 1,
        }
    }

    fn center(&self) -> Position {
        Position::new(
            (self.row_up + self.row_down) / 2,
            (self.column_left + self.column_right) / 2,
        )
    }
}

/// Connected-component blob detector for one fixed screen size.
///
/// Scratch buffers are owned by the detector and reused across frames.
#[derive(Debug, Clone)]
pub struct BlobDetector {
    height: usize,
    width: usize,
    quantizer: ColorQuantizer,
    full_neighbors: NeighborTable,
    adjacent_neighbors: NeighborTable,
    labels: Vec<Option<usize>>,
    elements: Vec<DisjointSetElement>,
    route: Vec<usize>,
}

impl BlobDetector {
    /// # Panics
    ///
    /// Panics if `neighbor_radius` is zero.
    #[must_use]
    pub fn new(height: usize, width: usize, quantizer: ColorQuantizer, neighbor_radius: usize) -> Self {
        assert!(neighbor_radius > 0, "neighbor radius must be positive");
        let radius = isize::try_from(neighbor_radius).expect("neighbor radius fits in isize");

        let mut full = Vec::new();
        for row_delta in -radius..0 {
            for column_delta in -radius..=radius {
                full.push((row_delta, column_delta));
            }
        }
        for column_delta in -radius..0 {
            full.push((0, column_delta));
        }

        let mut adjacent = vec![(0, -1)];
        for row_delta in -radius..0 {
            adjacent.push((row_delta, radius));
        }

        Self {
            height,
            width,
            quantizer,
            full_neighbors: NeighborTable::build(height, width, &full),
            adjacent_neighbors: NeighborTable::build(height, width, &adjacent),
            labels: vec![None; height * width],
            elements: Vec::new(),
            route: Vec::new(),
        }
    }

    #[must_use]
    pub fn quantizer(&self) -> ColorQuantizer {
        self.quantizer
    }

    /// Labels `screen` and writes one position per connected region into `blobs`.
    ///
    /// Pixels equal to the `background` pixel at the same location join no region.
    ///
    /// # Panics
    ///
    /// Panics if the screen (or background) does not have the detector's dimensions.
    pub fn detect(&mut self, screen: &PixelGrid, background: Option<&Background>, blobs: &mut Blobs) {
        assert!(
            screen.height() == self.height && screen.width() == self.width,
            "screen is {}x{} but detector expects {}x{}",
            screen.height(),
            screen.width(),
            self.height,
            self.width,
        );
        if let Some(background) = background {
            background.assert_matches(screen);
        }

        self.elements.clear();
        self.labels.fill(None);
        let pixels = screen.pixels();

        for row in 0..self.height {
            for column in 0..self.width {
                let index = row * self.width + column;
                let raw = pixels[index];
                if background.is_some_and(|bg| bg.hides(index, raw)) {
                    continue;
                }
                let color = self.quantizer.quantize(raw);
                let left_joins = column > 0
                    && self.labels[index - 1].is_some()
                    && self.quantizer.quantize(pixels[index - 1]) == color;
                let region = self.join_neighbors(index, row, column, color, left_joins);
                self.labels[index] = Some(region.unwrap_or_else(|| {
                    let element = self.elements.len();
                    self.elements
                        .push(DisjointSetElement::singleton(element, color, row, column));
                    element
                }));
            }
        }

        blobs.clear();
        for (index, element) in self.elements.iter().enumerate() {
            if element.parent == index {
                blobs.push(element.color, element.center());
            }
        }
    }

    fn join_neighbors(
        &mut self,
        index: usize,
        row: usize,
        column: usize,
        color: u8,
        left_joins: bool,
    ) -> Option<usize> {
        let table = if left_joins {
            &self.adjacent_neighbors
        } else {
            &self.full_neighbors
        };
        let mut current: Option<usize> = None;
        for &neighbor in table.neighbors(index) {
            let Some(label) = self.labels[neighbor] else {
                continue;
            };
            if self.elements[label].color != color {
                continue;
            }
            let neighbor_root = find_root(&mut self.elements, &mut self.route, label);
            match current {
                None => {
                    let root = &mut self.elements[neighbor_root];
                    root.row_down = row;
                    root.column_left = usize::min(root.column_left, column);
                    root.column_right = usize::max(root.column_right, column);
                    root.size += 1;
                    current = Some(neighbor_root);
                }
                Some(current_root) if current_root != neighbor_root => {
                    current = Some(union(&mut self.elements, current_root, neighbor_root, row));
                }
                Some(_) => {}
            }
        }
        current
    }
}

/// Follows parent links to the root and points every visited element at it.
fn find_root(elements: &mut [DisjointSetElement], route: &mut Vec<usize>, mut index: usize) -> usize {
    route.clear();
    while elements[index].parent != index {
        route.push(index);
        index = elements[index].parent;
    }
    for &visited in route.iter() {
        elements[visited].parent = index;
    }
    index
}

/// Merges two regions found while visiting a pixel on `row`; returns the surviving root.
///
/// The smaller region is re-parented under the larger one. On equal sizes the
/// neighbor region is re-parented under the current one.
fn union(elements: &mut [DisjointSetElement], current: usize, neighbor: usize, row: usize) -> usize {
    let (root, other) = if elements[neighbor].size > elements[current].size {
        (neighbor, current)
    } else {
        (current, neighbor)
    };
    let absorbed = elements[other];
    elements[other].parent = root;
    let root_element = &mut elements[root];
    root_element.row_up = usize::min(root_element.row_up, absorbed.row_up);
    root_element.row_down = row;
    root_element.column_left = usize::min(root_element.column_left, absorbed.column_left);
    root_element.column_right = usize::max(root_element.column_right, absorbed.column_right);
    root_element.size += absorbed.size;
    root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(screen: &PixelGrid, num_colors: usize, radius: usize) -> Blobs {
        let mut detector = BlobDetector::new(
            screen.height(),
            screen.width(),
            ColorQuantizer::new(num_colors),
            radius,
        );
        let mut blobs = Blobs::with_num_colors(num_colors);
        detector.detect(screen, None, &mut blobs);
        blobs
    }

    fn grid_from_rows(rows: &[&[u8]]) -> PixelGrid {
        let height = rows.len();
        let width = rows[0].len();
        PixelGrid::new(height, width, rows.concat())
    }

    #[test]
    fn test_uniform_screen_is_one_blob() {
        let screen = PixelGrid::filled(6, 9, 3);
        let blobs = detect(&screen, 256, 1);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs.active_colors().collect::<Vec<_>>(), vec![3]);
        // bounding box (0..=5, 0..=8) -> center (2, 4)
        assert_eq!(blobs.of_color(3), &[Position::new(2, 4)]);
    }

    #[test]
    fn test_one_blob_per_color_region() {
        let screen = grid_from_rows(&[
            &[1, 1, 1, 2, 2],
            &[1, 1, 1, 2, 2],
            &[1, 1, 1, 2, 2],
            &[1, 1, 1, 2, 2],
        ]);
        let blobs = detect(&screen, 256, 1);
        assert_eq!(blobs.of_color(1), &[Position::new(1, 1)]);
        assert_eq!(blobs.of_color(2), &[Position::new(1, 3)]);
    }

    #[test]
    fn test_separate_regions_of_same_color() {
        let screen = grid_from_rows(&[
            &[5, 0, 0, 0, 5],
            &[0, 0, 0, 0, 0],
            &[0, 0, 0, 0, 0],
            &[5, 0, 0, 0, 5],
        ]);
        let blobs = detect(&screen, 256, 1);
        assert_eq!(
            blobs.of_color(5),
            &[
                Position::new(0, 0),
                Position::new(0, 4),
                Position::new(3, 0),
                Position::new(3, 4)
            ]
        );
        assert_eq!(blobs.of_color(0).len(), 1);
    }

    #[test]
    fn test_radius_bridges_gaps() {
        let screen = grid_from_rows(&[&[7, 0, 7], &[0, 0, 0], &[7, 0, 7]]);
        // radius 1: four isolated corners
        assert_eq!(detect(&screen, 256, 1).of_color(7).len(), 4);
        // radius 2: all corners are within reach of each other
        assert_eq!(detect(&screen, 256, 2).of_color(7), &[Position::new(1, 1)]);
    }

    #[test]
    fn test_u_shape_merges_two_arms() {
        // the two arms are discovered as separate regions and merged on the bottom row
        let screen = grid_from_rows(&[
            &[9, 0, 0, 0, 9],
            &[9, 0, 0, 0, 9],
            &[9, 0, 0, 0, 9],
            &[9, 9, 9, 9, 9],
        ]);
        let blobs = detect(&screen, 256, 1);
        assert_eq!(blobs.of_color(9), &[Position::new(1, 2)]);
        assert_eq!(blobs.of_color(0), &[Position::new(1, 2)]);
    }

    #[test]
    fn test_diagonal_connectivity() {
        let screen = grid_from_rows(&[&[4, 0, 0], &[0, 4, 0], &[0, 0, 4]]);
        let blobs = detect(&screen, 256, 1);
        assert_eq!(blobs.of_color(4), &[Position::new(1, 1)]);
        // background pixels touch diagonally too
        assert_eq!(blobs.of_color(0).len(), 1);
    }

    #[test]
    fn test_anti_diagonal_connectivity() {
        let screen = grid_from_rows(&[&[0, 0, 4], &[0, 4, 0], &[4, 0, 0]]);
        let blobs = detect(&screen, 256, 1);
        assert_eq!(blobs.of_color(4), &[Position::new(1, 1)]);
    }

    #[test]
    fn test_quantization_merges_nearby_values() {
        // 0x40 and 0x5f quantize to the same color with 8 colors
        let screen = grid_from_rows(&[&[0x40, 0x5f], &[0x5f, 0x40]]);
        let blobs = detect(&screen, 8, 1);
        assert_eq!(blobs.active_colors().collect::<Vec<_>>(), vec![2]);
        assert_eq!(blobs.len(), 1);
    }

    #[test]
    fn test_background_pixels_join_no_blob() {
        let screen = grid_from_rows(&[&[3, 3, 1], &[3, 1, 1]]);
        let background = Background::from_grid(grid_from_rows(&[&[3, 3, 0], &[3, 0, 0]]));
        let mut detector = BlobDetector::new(2, 3, ColorQuantizer::new(256), 1);
        let mut blobs = Blobs::with_num_colors(256);
        detector.detect(&screen, Some(&background), &mut blobs);
        assert_eq!(blobs.active_colors().collect::<Vec<_>>(), vec![1]);
        assert_eq!(blobs.of_color(1), &[Position::new(0, 1)]);
    }

    #[test]
    fn test_detector_reuse_across_frames() {
        let mut detector = BlobDetector::new(2, 2, ColorQuantizer::new(256), 1);
        let mut blobs = Blobs::with_num_colors(256);
        detector.detect(&PixelGrid::filled(2, 2, 1), None, &mut blobs);
        detector.detect(&PixelGrid::new(2, 2, vec![2, 0, 0, 0]), None, &mut blobs);
        assert!(blobs.of_color(1).is_empty());
        assert_eq!(blobs.of_color(2), &[Position::new(0, 0)]);
        // color 0 spans rows 0..=1 and columns 0..=1
        assert_eq!(blobs.of_color(0), &[Position::new(0, 0)]);
    }

    #[test]
    #[should_panic(expected = "detector expects")]
    fn test_wrong_screen_size_is_fatal() {
        let mut detector = BlobDetector::new(2, 2, ColorQuantizer::new(256), 1);
        let mut blobs = Blobs::with_num_colors(256);
        detector.detect(&PixelGrid::filled(3, 2, 0), None, &mut blobs);
    }
}
