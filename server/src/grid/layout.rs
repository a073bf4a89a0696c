//! Acquisition grid layout and site traversal orders

use serde::{Deserialize, Serialize};

use super::types::GridError;

/// Order in which the microscope visited the sites of a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOrder {
    /// Every row left to right
    #[default]
    RowMajor,
    /// Even rows left to right, odd rows right to left
    Snake,
}

impl ScanOrder {
    /// Grid position (row, column) of the zero-based site index
    pub fn position(self, site: usize, width: usize) -> (usize, usize) {
        let row = site / width;
        let offset = site % width;
        let column = match self {
            ScanOrder::RowMajor => offset,
            ScanOrder::Snake if row % 2 == 1 => width - 1 - offset,
            ScanOrder::Snake => offset,
        };
        (row, column)
    }

    /// Zero-based site index of a grid position
    pub fn site_index(self, row: usize, column: usize, width: usize) -> usize {
        let offset = match self {
            ScanOrder::RowMajor => column,
            ScanOrder::Snake if row % 2 == 1 => width - 1 - column,
            ScanOrder::Snake => column,
        };
        row * width + offset
    }

    /// All grid positions of a `height x width` grid in acquisition order
    pub fn traverse(self, height: usize, width: usize) -> impl Iterator<Item = (usize, usize)> {
        (0..height * width).map(move |site| self.position(site, width))
    }
}

/// A `height x width` array of cells addressed by zero-based (row, column)
///
/// Cells may be missing while the grid is being filled; consumers that need a
/// fully populated grid check for holes themselves and report the first one.
#[derive(Debug, Clone)]
pub struct Grid<T> {
    height: usize,
    width: usize,
    cells: Vec<Option<T>>,
}

impl<T> Grid<T> {
    /// Create an empty grid
    pub fn new(height: usize, width: usize) -> Self {
        let mut cells = Vec::with_capacity(height * width);
        cells.resize_with(height * width, || None);
        Self {
            height,
            width,
            cells,
        }
    }

    /// Build a fully populated grid from row vectors
    ///
    /// Rows shorter than the longest row leave holes at their end.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Self {
        let height = rows.len();
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut grid = Self::new(height, width);
        for (row, cells) in rows.into_iter().enumerate() {
            for (column, value) in cells.into_iter().enumerate() {
                grid.cells[row * width + column] = Some(value);
            }
        }
        grid
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }

    /// Place a value, failing if the cell is outside the grid or already taken
    pub fn insert(&mut self, row: usize, column: usize, value: T) -> Result<(), GridError>
    where
        T: std::fmt::Display,
    {
        let index = self.index(row, column)?;
        if let Some(existing) = &self.cells[index] {
            return Err(GridError::DuplicatePosition {
                row,
                column,
                existing: existing.to_string(),
                duplicate: value.to_string(),
            });
        }
        self.cells[index] = Some(value);
        Ok(())
    }

    pub fn get(&self, row: usize, column: usize) -> Option<&T> {
        if row >= self.height || column >= self.width {
            return None;
        }
        self.cells[row * self.width + column].as_ref()
    }

    pub fn get_mut(&mut self, row: usize, column: usize) -> Option<&mut T> {
        if row >= self.height || column >= self.width {
            return None;
        }
        self.cells[row * self.width + column].as_mut()
    }

    /// First empty cell in row-major order
    pub fn first_missing(&self) -> Option<(usize, usize)> {
        self.cells
            .iter()
            .position(Option::is_none)
            .map(|index| (index / self.width, index % self.width))
    }

    /// Cells of one row, left to right
    pub fn row(&self, row: usize) -> impl Iterator<Item = Option<&T>> {
        let start = row * self.width;
        self.cells[start..start + self.width].iter().map(Option::as_ref)
    }

    fn index(&self, row: usize, column: usize) -> Result<usize, GridError> {
        if row >= self.height || column >= self.width {
            return Err(GridError::OutOfRange {
                row,
                column,
                height: self.height,
                width: self.width,
            });
        }
        Ok(row * self.width + column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_positions() {
        let order = ScanOrder::RowMajor;
        assert_eq!(order.position(0, 3), (0, 0));
        assert_eq!(order.position(4, 3), (1, 1));
        assert_eq!(order.site_index(1, 1, 3), 4);
    }

    #[test]
    fn test_snake_reverses_odd_rows() {
        let order = ScanOrder::Snake;
        let visited: Vec<_> = order.traverse(2, 3).collect();
        assert_eq!(
            visited,
            vec![(0, 0), (0, 1), (0, 2), (1, 2), (1, 1), (1, 0)]
        );

        for site in 0..6 {
            let (row, column) = order.position(site, 3);
            assert_eq!(order.site_index(row, column, 3), site);
        }
    }

    #[test]
    fn test_grid_insert_rejects_duplicates() {
        let mut grid: Grid<String> = Grid::new(2, 2);
        grid.insert(0, 1, "a.png".to_string()).unwrap();
        let err = grid.insert(0, 1, "b.png".to_string()).unwrap_err();
        assert!(err.to_string().contains("a.png"));
        assert!(err.to_string().contains("b.png"));
    }

    #[test]
    fn test_grid_insert_out_of_range() {
        let mut grid: Grid<String> = Grid::new(2, 2);
        let err = grid.insert(2, 0, "x".to_string()).unwrap_err();
        assert!(matches!(err, GridError::OutOfRange { row: 2, .. }));
    }

    #[test]
    fn test_first_missing() {
        let mut grid: Grid<String> = Grid::new(2, 2);
        assert_eq!(grid.first_missing(), Some((0, 0)));
        for (row, column) in [(0, 0), (0, 1), (1, 1)] {
            grid.insert(row, column, format!("{row}-{column}")).unwrap();
        }
        assert_eq!(grid.first_missing(), Some((1, 0)));
        grid.insert(1, 0, "last".to_string()).unwrap();
        assert_eq!(grid.first_missing(), None);
    }
}
