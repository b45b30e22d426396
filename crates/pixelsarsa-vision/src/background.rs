use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    num::ParseIntError,
    path::Path,
};

use crate::PixelGrid;

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum BackgroundError {
    #[display("failed to read background: {_0}")]
    #[from]
    Io(io::Error),
    #[display("background header must be `width,height`")]
    MissingHeader,
    #[display("invalid pixel value on line {line}: {source}")]
    InvalidValue { line: usize, source: ParseIntError },
    #[display("background row {row} has {found} pixels, expected {expected}")]
    RowLength {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[display("background has {found} rows, expected {expected}")]
    RowCount { found: usize, expected: usize },
}

/// A static reference screen whose pixels are excluded from feature extraction.
///
/// The on-disk format is CSV: a `width,height` header line followed by one
/// line of comma-separated pixel values per screen row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Background {
    grid: PixelGrid,
}

impl Background {
    #[must_use]
    pub fn from_grid(grid: PixelGrid) -> Self {
        Self { grid }
    }

    pub fn load<P>(path: P) -> Result<Self, BackgroundError>
    where
        P: AsRef<Path>,
    {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }

    pub fn parse<R>(reader: R) -> Result<Self, BackgroundError>
    where
        R: BufRead,
    {
        let mut lines = reader.lines().enumerate();
        let (_, header) = lines.next().ok_or(BackgroundError::MissingHeader)?;
        let header = header?;
        let (width, height) = header
            .split_once(',')
            .ok_or(BackgroundError::MissingHeader)?;
        let parse_dim = |s: &str| {
            s.trim()
                .parse::<usize>()
                .map_err(|source| BackgroundError::InvalidValue { line: 1, source })
        };
        let width = parse_dim(width)?;
        let height = parse_dim(height)?;

        let mut pixels = Vec::with_capacity(width * height);
        let mut rows = 0;
        for (index, line) in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let before = pixels.len();
            for value in line.split(',') {
                let value = value
                    .trim()
                    .parse::<u8>()
                    .map_err(|source| BackgroundError::InvalidValue {
                        line: index + 1,
                        source,
                    })?;
                pixels.push(value);
            }
            let found = pixels.len() - before;
            if found != width {
                return Err(BackgroundError::RowLength {
                    row: rows,
                    found,
                    expected: width,
                });
            }
            rows += 1;
        }
        if rows != height {
            return Err(BackgroundError::RowCount {
                found: rows,
                expected: height,
            });
        }
        Ok(Self {
            grid: PixelGrid::new(height, width, pixels),
        })
    }

    #[must_use]
    pub fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    #[must_use]
    pub fn get(&self, row: usize, column: usize) -> u8 {
        self.grid.get(row, column)
    }

    /// # Panics
    ///
    /// Panics if the background and the screen differ in size.
    pub fn assert_matches(&self, screen: &PixelGrid) {
        assert!(
            self.grid.same_dimensions(screen),
            "background is {}x{} but screen is {}x{}",
            self.grid.height(),
            self.grid.width(),
            screen.height(),
            screen.width(),
        );
    }

    /// Returns `true` if the pixel at `index` equals the background pixel.
    #[must_use]
    pub(crate) fn hides(&self, index: usize, pixel: u8) -> bool {
        self.grid.pixels()[index] == pixel
    }
}
