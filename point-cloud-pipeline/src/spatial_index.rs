/// Uniform 2D grid index over point positions for fixed-radius neighbour queries
use crate::bounds::PointCloudBounds;

pub struct GridIndex {
    min_x: f64,
    min_y: f64,
    cell_size: f64,
    cols: usize,
    rows: usize,
    /// Start offset of every cell inside `entries`, plus a final sentinel.
    offsets: Vec<usize>,
    /// Point indices grouped by cell.
    entries: Vec<usize>,
}

impl GridIndex {
    /// Build an index over `(x, y)` positions with square cells of `cell_size`.
    pub fn build(positions: &[(f64, f64)], cell_size: f64) -> Self {
        let mut bounds = PointCloudBounds::new();
        for &(x, y) in positions {
            bounds.update(x, y, 0.0);
        }
        if bounds.is_empty() {
            bounds.update(0.0, 0.0, 0.0);
        }

        let cell_size = if cell_size > 0.0 { cell_size } else { 1.0 };
        let (width, height, _) = bounds.dimensions();
        let cols = (width / cell_size).floor() as usize + 1;
        let rows = (height / cell_size).floor() as usize + 1;

        let mut index = Self {
            min_x: bounds.min_x,
            min_y: bounds.min_y,
            cell_size,
            cols,
            rows,
            offsets: vec![0; cols * rows + 1],
            entries: vec![0; positions.len()],
        };

        // Counting sort of points into cells.
        let cells: Vec<usize> = positions
            .iter()
            .map(|&(x, y)| index.cell_of(x, y))
            .collect();
        for &cell in &cells {
            index.offsets[cell + 1] += 1;
        }
        for i in 1..index.offsets.len() {
            index.offsets[i] += index.offsets[i - 1];
        }
        let mut cursor = index.offsets.clone();
        for (point_idx, &cell) in cells.iter().enumerate() {
            index.entries[cursor[cell]] = point_idx;
            cursor[cell] += 1;
        }

        index
    }

    fn clamp_col(&self, x: f64) -> usize {
        (((x - self.min_x) / self.cell_size).floor().max(0.0) as usize).min(self.cols - 1)
    }

    fn clamp_row(&self, y: f64) -> usize {
        (((y - self.min_y) / self.cell_size).floor().max(0.0) as usize).min(self.rows - 1)
    }

    fn cell_of(&self, x: f64, y: f64) -> usize {
        self.clamp_row(y) * self.cols + self.clamp_col(x)
    }

    /// Calls `visit` with the index of every point within `radius` of `(x, y)`.
    pub fn for_each_within<F>(
        &self,
        positions: &[(f64, f64)],
        x: f64,
        y: f64,
        radius: f64,
        mut visit: F,
    ) where
        F: FnMut(usize),
    {
        if x + radius < self.min_x || y + radius < self.min_y {
            return;
        }
        let radius_sq = radius * radius;
        let col_min = self.clamp_col(x - radius);
        let col_max = self.clamp_col(x + radius);
        let row_min = self.clamp_row(y - radius);
        let row_max = self.clamp_row(y + radius);

        for row in row_min..=row_max {
            for col in col_min..=col_max {
                let cell = row * self.cols + col;
                for &point_idx in &self.entries[self.offsets[cell]..self.offsets[cell + 1]] {
                    let (px, py) = positions[point_idx];
                    let dx = px - x;
                    let dy = py - y;
                    if dx * dx + dy * dy <= radius_sq {
                        visit(point_idx);
                    }
                }
            }
        }
    }
}
