// src/curvature.rs - Taubin circle fit and per-element curvature statistics

use nalgebra::DMatrix;
use std::fmt;

/// Relative eigenvalue ratio of the point scatter below which a window is straight
const COLLINEAR_TOLERANCE: f64 = 1e-9;

/// Radii beyond this multiple of the point extent are reported as straight
const MAX_RADIUS_TO_EXTENT: f64 = 1e6;

/// Outcome class of a circle fit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    /// A finite circle was fitted
    Fitted,
    /// Points are (near-)collinear: curvature reported as 0
    Straight,
    /// Too few distinct points or a non-finite solution
    Degenerate,
}

impl FitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FitStatus::Fitted => "fitted",
            FitStatus::Straight => "straight",
            FitStatus::Degenerate => "degenerate",
        }
    }
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of fitting a circle to one window of path points
#[derive(Debug, Clone, PartialEq)]
pub struct CircleFit {
    pub center: Option<(f64, f64)>,
    pub radius: Option<f64>,
    /// Unsigned curvature 1/radius in 1/px; 0 for straight or degenerate windows
    pub curvature: f64,
    pub point_count: usize,
    pub status: FitStatus,
}

impl CircleFit {
    fn without_circle(point_count: usize, status: FitStatus) -> Self {
        Self {
            center: None,
            radius: None,
            curvature: 0.0,
            point_count,
            status,
        }
    }

    /// Straight and fitted windows count as valid measurements
    pub fn valid(&self) -> bool {
        self.status != FitStatus::Degenerate
    }
}

/// Fit a circle with the Taubin algebraic method.
///
/// Points are centered on their centroid, the squared norms are normalised
/// by their mean, and the circle parameters are taken from the right
/// singular vector of the smallest singular value of `[z, x, y]`.
/// Near-collinear input is detected from the scatter eigenvalues before
/// solving and returned as `Straight` with zero curvature.
pub fn fit_circle(points: &[(f64, f64)]) -> CircleFit {
    let n = points.len();
    if n < 3 {
        return CircleFit::without_circle(n, FitStatus::Degenerate);
    }

    let inv_n = 1.0 / n as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() * inv_n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() * inv_n;

    let centered: Vec<(f64, f64)> = points
        .iter()
        .map(|&(x, y)| (x - mean_x, y - mean_y))
        .collect();

    // Scatter matrix eigenvalues
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for &(x, y) in &centered {
        sxx += x * x;
        syy += y * y;
        sxy += x * y;
    }
    sxx *= inv_n;
    syy *= inv_n;
    sxy *= inv_n;

    let half_trace = 0.5 * (sxx + syy);
    let root = (0.25 * (sxx - syy).powi(2) + sxy * sxy).sqrt();
    let lambda_max = half_trace + root;
    let lambda_min = (half_trace - root).max(0.0);

    if !(lambda_max > f64::EPSILON) {
        return CircleFit::without_circle(n, FitStatus::Degenerate);
    }
    if lambda_min <= COLLINEAR_TOLERANCE * lambda_max {
        return CircleFit::without_circle(n, FitStatus::Straight);
    }

    let z: Vec<f64> = centered.iter().map(|&(x, y)| x * x + y * y).collect();
    let z_mean = z.iter().sum::<f64>() * inv_n;
    let z_scale = 2.0 * z_mean.sqrt();

    let design = DMatrix::from_fn(n, 3, |i, j| match j {
        0 => (z[i] - z_mean) / z_scale,
        1 => centered[i].0,
        _ => centered[i].1,
    });

    let svd = design.svd(false, true);
    let v_t = match svd.v_t {
        Some(v_t) => v_t,
        None => return CircleFit::without_circle(n, FitStatus::Degenerate),
    };
    let s = svd.singular_values;
    let mut min_i = 0usize;
    for i in 1..s.len() {
        if s[i] < s[min_i] {
            min_i = i;
        }
    }
    let row = v_t.row(min_i);

    let a0 = row[0] / z_scale;
    let (a1, a2) = (row[1], row[2]);
    let a3 = -z_mean * a0;

    if a0.abs() <= f64::EPSILON {
        return CircleFit::without_circle(n, FitStatus::Straight);
    }

    let radius = (a1 * a1 + a2 * a2 - 4.0 * a0 * a3).sqrt() / (2.0 * a0.abs());
    if !radius.is_finite() || radius <= 0.0 {
        return CircleFit::without_circle(n, FitStatus::Degenerate);
    }

    let extent = lambda_max.sqrt();
    if radius > MAX_RADIUS_TO_EXTENT * extent {
        return CircleFit::without_circle(n, FitStatus::Straight);
    }

    let center = (-a1 / (2.0 * a0) + mean_x, -a2 / (2.0 * a0) + mean_y);

    CircleFit {
        center: Some(center),
        radius: Some(radius),
        curvature: 1.0 / radius,
        point_count: n,
        status: FitStatus::Fitted,
    }
}

/// Linear-interpolated quantile of an ascending slice
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile(&sorted, 0.5)
}

/// Keep values within the 1st-99th percentile (inclusive).
/// Fewer than three values are returned unchanged.
pub fn trim_outliers(values: &[f64]) -> Vec<f64> {
    if values.len() < 3 {
        return values.to_vec();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let (lo, hi) = match (quantile(&sorted, 0.01), quantile(&sorted, 0.99)) {
        (Some(lo), Some(hi)) => (lo, hi),
        _ => return sorted,
    };

    sorted.into_iter().filter(|v| *v >= lo && *v <= hi).collect()
}

/// Mean and median curvature of one element after outlier trimming
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvatureStats {
    pub mean: f64,
    pub median: f64,
    /// Windows contributing after trimming
    pub count: usize,
}

pub fn curvature_stats(curvatures: &[f64]) -> Option<CurvatureStats> {
    let trimmed = trim_outliers(curvatures);
    Some(CurvatureStats {
        mean: mean(&trimmed)?,
        median: median(&trimmed)?,
        count: trimmed.len(),
    })
}

/// Convert a curvature in 1/px to 1/mm
#[inline]
pub fn curvature_per_mm(curvature_px: f64, resolution_mm: f64) -> f64 {
    curvature_px * resolution_mm
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::PI;

    /// Digitized arc of a circle, as consecutive distinct pixel coordinates
    fn pixel_arc(cx: f64, cy: f64, r: f64, start: f64, end: f64) -> Vec<(f64, f64)> {
        let steps = 4000;
        let mut points: Vec<(f64, f64)> = Vec::new();
        for i in 0..=steps {
            let t = start + (end - start) * i as f64 / steps as f64;
            let p = ((cx + r * t.cos()).round(), (cy + r * t.sin()).round());
            if points.last() != Some(&p) {
                points.push(p);
            }
        }
        points
    }

    #[test]
    fn recovers_radius_of_exact_circle() {
        let points: Vec<(f64, f64)> = (0..36)
            .map(|i| {
                let t = i as f64 * PI / 18.0;
                (10.0 + 25.0 * t.cos(), -4.0 + 25.0 * t.sin())
            })
            .collect();
        let fit = fit_circle(&points);

        assert_eq!(fit.status, FitStatus::Fitted);
        assert_approx_eq!(fit.radius.unwrap(), 25.0, 1e-6);
        let (cx, cy) = fit.center.unwrap();
        assert_approx_eq!(cx, 10.0, 1e-6);
        assert_approx_eq!(cy, -4.0, 1e-6);
    }

    #[test]
    fn full_pixel_circle_curvature() {
        let points = pixel_arc(100.0, 100.0, 40.0, 0.0, 2.0 * PI);
        let fit = fit_circle(&points);
        assert!(fit.valid());
        assert!((fit.curvature - 1.0 / 40.0).abs() / (1.0 / 40.0) < 0.02);
    }

    #[test]
    fn half_circle_of_radius_fifty() {
        let points = pixel_arc(120.0, 120.0, 50.0, 0.0, PI);
        let fit = fit_circle(&points);

        assert_eq!(fit.status, FitStatus::Fitted);
        assert!(fit.valid());
        assert!((fit.curvature - 0.02).abs() < 0.0005, "curvature {}", fit.curvature);
    }

    #[test]
    fn straight_line_is_valid_with_zero_curvature() {
        let points: Vec<(f64, f64)> = (0..30).map(|x| (x as f64, 7.0)).collect();
        let fit = fit_circle(&points);
        assert_eq!(fit.status, FitStatus::Straight);
        assert!(fit.valid());
        assert_eq!(fit.curvature, 0.0);
        assert!(fit.radius.is_none());

        let diagonal: Vec<(f64, f64)> = (0..30).map(|i| (i as f64, i as f64)).collect();
        assert_eq!(fit_circle(&diagonal).status, FitStatus::Straight);
    }

    #[test]
    fn pixelated_line_has_negligible_curvature() {
        let points: Vec<(f64, f64)> = (0..60).map(|x| (x as f64, (x as f64 / 3.0).round())).collect();
        let fit = fit_circle(&points);
        assert!(fit.valid());
        assert!(fit.curvature < 1e-3, "curvature {}", fit.curvature);
    }

    #[test]
    fn degenerate_inputs() {
        assert_eq!(fit_circle(&[(0.0, 0.0), (1.0, 1.0)]).status, FitStatus::Degenerate);
        let same = [(3.0, 3.0); 5];
        let fit = fit_circle(&same);
        assert_eq!(fit.status, FitStatus::Degenerate);
        assert!(!fit.valid());
        assert_eq!(fit.curvature, 0.0);
    }

    #[test]
    fn quantiles_interpolate_linearly() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_approx_eq!(quantile(&sorted, 0.5).unwrap(), 3.0);
        assert_approx_eq!(quantile(&sorted, 0.25).unwrap(), 2.0);
        assert_approx_eq!(quantile(&sorted, 0.1).unwrap(), 1.4);
        assert!(quantile(&[], 0.5).is_none());
    }

    #[test]
    fn trimming_drops_extremes() {
        let mut values: Vec<f64> = (0..200).map(|i| 0.01 + i as f64 * 1e-5).collect();
        values.push(5.0);
        let stats = curvature_stats(&values).unwrap();
        assert!(stats.count < values.len());
        assert!(stats.mean < 0.02);

        assert_eq!(trim_outliers(&[1.0, 9.0]), vec![1.0, 9.0]);
        assert!(curvature_stats(&[]).is_none());
    }
}
