// src/geometry.rs - Pixel-grid geometry shared by the curvature and section pipelines

use std::f64::consts::SQRT_2;

/// Pixel coordinate as (x, y), origin top-left, y increasing downward
pub type Pixel = (u32, u32);

/// Neighborhood used for adjacency and morphological operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Orthogonal neighbors only (plus shape)
    Four,
    /// Orthogonal and diagonal neighbors (full 3x3 square)
    Eight,
}

/// Orthogonal offsets first, then diagonals
const ORTHOGONAL_OFFSETS: [(i32, i32); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];
const DIAGONAL_OFFSETS: [(i32, i32); 4] = [(1, 1), (-1, 1), (-1, -1), (1, -1)];

/// A 3x3 structuring element expressed as neighbor offsets around the origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    pub connectivity: Connectivity,
    offsets: Vec<(i32, i32)>,
}

impl StructuringElement {
    /// Offsets of the neighbors (origin excluded)
    pub fn offsets(&self) -> &[(i32, i32)] {
        &self.offsets
    }

    /// In-bounds neighbors of `p` on a `width` x `height` grid
    pub fn neighbors(&self, p: Pixel, width: u32, height: u32) -> impl Iterator<Item = Pixel> + '_ {
        self.offsets.iter().filter_map(move |&(dx, dy)| {
            let nx = p.0 as i64 + dx as i64;
            let ny = p.1 as i64 + dy as i64;
            if nx >= 0 && ny >= 0 && nx < width as i64 && ny < height as i64 {
                Some((nx as u32, ny as u32))
            } else {
                None
            }
        })
    }

    /// Whether `a` and `b` are distinct neighbors under this element
    pub fn are_adjacent(&self, a: Pixel, b: Pixel) -> bool {
        let dx = b.0 as i64 - a.0 as i64;
        let dy = b.1 as i64 - a.1 as i64;
        self.offsets.iter().any(|&(ox, oy)| ox as i64 == dx && oy as i64 == dy)
    }

    /// Render as a 3x3 boolean matrix, row-major, origin at the center
    pub fn as_matrix(&self) -> [[bool; 3]; 3] {
        let mut matrix = [[false; 3]; 3];
        matrix[1][1] = true;
        for &(dx, dy) in &self.offsets {
            matrix[(dy + 1) as usize][(dx + 1) as usize] = true;
        }
        matrix
    }
}

/// Define the structuring element used for thinning, labelling and adjacency
pub fn define_structure(connectivity: Connectivity) -> StructuringElement {
    let mut offsets = ORTHOGONAL_OFFSETS.to_vec();
    if connectivity == Connectivity::Eight {
        offsets.extend_from_slice(&DIAGONAL_OFFSETS);
    }

    StructuringElement { connectivity, offsets }
}

/// Check if a point is inside the image bounds
#[inline]
pub fn in_bounds(x: i64, y: i64, width: u32, height: u32) -> bool {
    x >= 0 && y >= 0 && x < width as i64 && y < height as i64
}

/// True when two pixels differ by one step in both axes
#[inline]
pub fn is_diagonal_step(a: Pixel, b: Pixel) -> bool {
    a.0.abs_diff(b.0) == 1 && a.1.abs_diff(b.1) == 1
}

/// Euclidean length of a single step: 1 orthogonal, √2 diagonal
#[inline]
pub fn step_length(a: Pixel, b: Pixel) -> f64 {
    let dx = a.0.abs_diff(b.0);
    let dy = a.1.abs_diff(b.1);
    match (dx, dy) {
        (0, 0) => 0.0,
        (1, 0) | (0, 1) => 1.0,
        (1, 1) => SQRT_2,
        _ => ((dx as f64).powi(2) + (dy as f64).powi(2)).sqrt(),
    }
}

/// True Euclidean arc length of an ordered pixel path
pub fn path_length(path: &[Pixel]) -> f64 {
    path.windows(2).map(|w| step_length(w[0], w[1])).sum()
}

/// Ratio of true arc length to raw step count.
///
/// Multiply a step count by this ratio to obtain its Euclidean length, or
/// divide a Euclidean length by it to obtain the equivalent step count.
/// Paths with fewer than two pixels have no steps and return 1.0.
pub fn pixel_length_correction(path: &[Pixel]) -> f64 {
    let steps = path.len().saturating_sub(1);
    if steps == 0 {
        return 1.0;
    }

    path_length(path) / steps as f64
}

/// Counts of (orthogonal, diagonal) steps along a path
pub fn step_counts(path: &[Pixel]) -> (usize, usize) {
    path.windows(2).fold((0, 0), |(orth, diag), w| {
        if is_diagonal_step(w[0], w[1]) {
            (orth, diag + 1)
        } else {
            (orth + 1, diag)
        }
    })
}
