/// A fixed-size grid of raw color-indexed pixels, stored row-major.
///
/// Dimensions are fixed for a whole run. Every consumer in this crate treats a
/// mismatch between the grid length and `height * width` as a precondition
/// violation, so the constructor panics instead of returning an error.
///
/// # Example
///
/// ```
/// use pixelsarsa_vision::PixelGrid;
///
/// let mut grid = PixelGrid::filled(4, 4, 0);
/// grid.set(3, 3, 0x80);
/// assert_eq!(grid.get(3, 3), 0x80);
/// assert_eq!(grid.pixels().len(), 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    height: usize,
    width: usize,
    pixels: Vec<u8>,
}

impl PixelGrid {
    /// Wraps a row-major pixel buffer.
    ///
    /// # Panics
    ///
    /// Panics if `pixels.len() != height * width`.
    #[must_use]
    pub fn new(height: usize, width: usize, pixels: Vec<u8>) -> Self {
        assert_eq!(
            pixels.len(),
            height * width,
            "pixel buffer of length {} does not match a {height}x{width} grid",
            pixels.len(),
        );
        Self {
            height,
            width,
            pixels,
        }
    }

    #[must_use]
    pub fn filled(height: usize, width: usize, value: u8) -> Self {
        Self::new(height, width, vec![value; height * width])
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn get(&self, row: usize, column: usize) -> u8 {
        self.pixels[row * self.width + column]
    }

    pub fn set(&mut self, row: usize, column: usize, value: u8) {
        self.pixels[row * self.width + column] = value;
    }

    /// Sets every pixel of the rectangle `[row, row + height) x [column, column + width)`,
    /// clipped to the grid.
    pub fn fill_rect(&mut self, row: usize, column: usize, height: usize, width: usize, value: u8) {
        let row_end = usize::min(row + height, self.height);
        let column_end = usize::min(column + width, self.width);
        for r in row..row_end {
            let start = r * self.width;
            self.pixels[start + column..start + column_end].fill(value);
        }
    }

    pub fn fill(&mut self, value: u8) {
        self.pixels.fill(value);
    }

    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[must_use]
    pub fn same_dimensions(&self, other: &PixelGrid) -> bool {
        self.height == other.height && self.width == other.width
    }
}

/// Maps raw 8-bit pixel values onto `num_colors` quantized colors by a right shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorQuantizer {
    shift: u32,
    num_colors: usize,
}

impl ColorQuantizer {
    /// # Panics
    ///
    /// Panics unless `num_colors` is a power of two in `1..=256`.
    #[must_use]
    pub fn new(num_colors: usize) -> Self {
        assert!(
            num_colors.is_power_of_two() && num_colors <= 256,
            "number of colors must be a power of two not above 256, got {num_colors}",
        );
        Self {
            shift: (256 / num_colors).trailing_zeros(),
            num_colors,
        }
    }

    #[must_use]
    pub fn num_colors(&self) -> usize {
        self.num_colors
    }

    #[must_use]
    pub fn shift(&self) -> u32 {
        self.shift
    }

    #[must_use]
    pub fn quantize(&self, pixel: u8) -> u8 {
        // shift is 8 only when num_colors == 1
        pixel.checked_shr(self.shift).unwrap_or(0)
    }
}
