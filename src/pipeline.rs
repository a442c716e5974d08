// src/pipeline.rs - Curvature pipeline for a single image

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::GrayImage;

use crate::binary::{binarize, clear_border, dilate, remove_particles, BinaryMask};
use crate::config::{Config, WindowUnit};
use crate::curvature::{curvature_per_mm, curvature_stats, fit_circle, mean, median, FitStatus};
use crate::errors::Result;
use crate::filters::{ridge_enhance, RidgeConfig};
use crate::geometry::Pixel;
use crate::image_io::{save_gray_image, RawImage};
use crate::morphology::{prune, skeletonize, Element, ExclusionReason, PruneConfig};
use crate::windows::{make_windows, WindowSpec};

/// Fit result of one window along an element
#[derive(Debug, Clone, PartialEq)]
pub struct CurvatureMeasurement {
    pub window_index: usize,
    pub center: Option<(f64, f64)>,
    pub radius: Option<f64>,
    /// Unsigned curvature in 1/px
    pub curvature: f64,
    pub point_count: usize,
    /// Corrected window length in pixels
    pub length: f64,
    pub status: FitStatus,
}

impl CurvatureMeasurement {
    pub fn valid(&self) -> bool {
        self.status != FitStatus::Degenerate
    }
}

/// Aggregated curvature of one fiber
#[derive(Debug, Clone)]
pub struct ElementSummary {
    pub label: usize,
    /// Trimmed mean curvature of the valid windows, 1/px
    pub curvature_mean: f64,
    /// Trimmed median curvature of the valid windows, 1/px
    pub curvature_median: f64,
    /// Corrected length of the whole element, px
    pub length: f64,
    pub pixel_count: usize,
    pub pruned_pixels: usize,
    pub valid_windows: usize,
    pub invalid_windows: usize,
    /// Length of the trailing window remainder that was not measured, px
    pub dropped_length: f64,
    pub measurements: Vec<CurvatureMeasurement>,
}

/// Why a skeleton component produced no element summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementExclusion {
    Pruning(ExclusionReason),
    NoValidWindows,
}

impl fmt::Display for ElementExclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementExclusion::Pruning(reason) => write!(f, "{}", reason),
            ElementExclusion::NoValidWindows => write!(f, "no valid curvature windows"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExcludedElement {
    pub label: usize,
    pub pixel_count: usize,
    pub reason: ElementExclusion,
}

/// Curvature results of one image at one window size
#[derive(Debug, Clone)]
pub struct CurvatureImageResult {
    pub path: PathBuf,
    pub filename: String,
    /// Pixels per mm the measurements were taken at
    pub resolution_mm: f64,
    /// Window size in `window_unit`, `None` for whole-element windows
    pub window_size: Option<f64>,
    pub window_unit: WindowUnit,
    pub elements: Vec<ElementSummary>,
    pub excluded: Vec<ExcludedElement>,
}

impl CurvatureImageResult {
    /// Row identifier, `{image}_WindowSize-{size}{unit}` when a size was set
    pub fn image_id(&self) -> String {
        match self.window_size {
            Some(size) => format!("{}_WindowSize-{}{}", self.filename, size, self.window_unit.as_str()),
            None => self.filename.clone(),
        }
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }

    pub fn valid_windows(&self) -> usize {
        self.elements.iter().map(|e| e.valid_windows).sum()
    }

    pub fn invalid_windows(&self) -> usize {
        self.elements.iter().map(|e| e.invalid_windows).sum()
    }

    fn per_mm(&self, values: impl Iterator<Item = f64>) -> Vec<f64> {
        values.map(|c| curvature_per_mm(c, self.resolution_mm)).collect()
    }

    /// (mean, median) over elements of the element mean curvature, 1/mm
    pub fn mean_curvature_stats(&self) -> (Option<f64>, Option<f64>) {
        let values = self.per_mm(self.elements.iter().map(|e| e.curvature_mean));
        (mean(&values), median(&values))
    }

    /// (mean, median) over elements of the element median curvature, 1/mm
    pub fn median_curvature_stats(&self) -> (Option<f64>, Option<f64>) {
        let values = self.per_mm(self.elements.iter().map(|e| e.curvature_median));
        (mean(&values), median(&values))
    }

    /// (mean, median) element length, mm
    pub fn length_stats(&self) -> (Option<f64>, Option<f64>) {
        let values: Vec<f64> = self
            .elements
            .iter()
            .map(|e| e.length / self.resolution_mm)
            .collect();
        (mean(&values), median(&values))
    }
}

fn save_debug(debug_dir: Option<&Path>, step: &str, filename: &str, image: &GrayImage) -> Result<()> {
    if let Some(dir) = debug_dir {
        save_gray_image(image, dir.join(step).join(format!("{}.png", filename)))?;
    }
    Ok(())
}

/// Measure one element: window it, fit every window and summarise
pub fn measure_element(element: &Element, spec: &WindowSpec) -> std::result::Result<ElementSummary, ElementExclusion> {
    let plan = make_windows(&element.path, spec);

    let measurements: Vec<CurvatureMeasurement> = plan
        .windows
        .iter()
        .map(|window| {
            let points: Vec<(f64, f64)> = window
                .points(&element.path)
                .iter()
                .map(|&(x, y): &Pixel| (x as f64, y as f64))
                .collect();
            let fit = fit_circle(&points);

            CurvatureMeasurement {
                window_index: window.index,
                center: fit.center,
                radius: fit.radius,
                curvature: fit.curvature,
                point_count: fit.point_count,
                length: window.length,
                status: fit.status,
            }
        })
        .collect();

    let valid: Vec<f64> = measurements
        .iter()
        .filter(|m| m.valid())
        .map(|m| m.curvature)
        .collect();

    let stats = curvature_stats(&valid).ok_or(ElementExclusion::NoValidWindows)?;

    Ok(ElementSummary {
        label: element.label,
        curvature_mean: stats.mean,
        curvature_median: stats.median,
        length: plan.total_length,
        pixel_count: element.pixel_count(),
        pruned_pixels: element.pruned_pixels,
        valid_windows: valid.len(),
        invalid_windows: measurements.len() - valid.len(),
        dropped_length: plan.dropped_length(),
        measurements,
    })
}

/// Run the curvature pipeline on one image.
///
/// Steps: optional ridge filter, binarize, border clearing, dilation,
/// particle removal, skeletonize, prune, then window and fit each element.
/// The skeleton is built once and measured at every configured window size,
/// giving one result per size (a single whole-element result when none is set).
/// Debug images of every step are written under `debug_dir` when given.
pub fn process_curvature(
    image: RawImage,
    config: &Config,
    debug_dir: Option<&Path>,
) -> Result<Vec<CurvatureImageResult>> {
    let RawImage {
        pixels,
        path,
        filename,
        resolution,
    } = image;
    let start = Instant::now();
    let (width, height) = pixels.dimensions();

    // Step 1: Ridge enhancement
    let source = if config.ridge_filter {
        let step = Instant::now();
        let filtered = ridge_enhance(&pixels, &RidgeConfig::from_config(config));
        log::debug!("{}: ridge filter in {:.2?}", filename, step.elapsed());
        save_debug(debug_dir, "filtered", &filename, &filtered)?;
        filtered
    } else {
        pixels
    };

    // Step 2: Threshold
    let step = Instant::now();
    let mask = binarize(&source, config.threshold_method, config.threshold_value)?;
    drop(source);
    log::debug!("{}: binarized in {:.2?}, {} foreground px", filename, step.elapsed(), mask.count());
    save_debug(debug_dir, "binarized", &filename, &mask.to_display_image())?;

    // Step 3: Clean the mask
    let step = Instant::now();
    let mask = clear_border(&mask, config.border_buffer);
    let mask = dilate(&mask, config.dilation_radius);
    let mask: BinaryMask = remove_particles(&mask, config.effective_min_particle_area());
    log::debug!("{}: cleaned mask in {:.2?}", filename, step.elapsed());
    save_debug(debug_dir, "clean", &filename, &mask.to_display_image())?;

    // Step 4: Skeleton
    let step = Instant::now();
    let skeleton = skeletonize(&mask);
    drop(mask);
    log::debug!(
        "{}: skeleton of {} px, {} components in {:.2?}",
        filename,
        skeleton.pixel_count(),
        skeleton.component_count(),
        step.elapsed()
    );
    save_debug(debug_dir, "skeletonized", &filename, &skeleton.to_mask().to_display_image())?;

    // Step 5: Prune to simple paths
    let step = Instant::now();
    let pruned = prune(&skeleton, &PruneConfig::from_config(config));
    log::debug!(
        "{}: pruned to {} elements ({} excluded) in {:.2?}",
        filename,
        pruned.elements.len(),
        pruned.excluded.len(),
        step.elapsed()
    );
    save_debug(
        debug_dir,
        "pruned",
        &filename,
        &pruned.to_skeleton(width, height).to_mask().to_display_image(),
    )?;

    let pruning_excluded: Vec<ExcludedElement> = pruned
        .excluded
        .iter()
        .map(|e| ExcludedElement {
            label: e.label,
            pixel_count: e.pixel_count,
            reason: ElementExclusion::Pruning(e.reason),
        })
        .collect();
    for e in &pruning_excluded {
        log::warn!("{}: element {} ({} px) excluded: {}", filename, e.label, e.pixel_count, e.reason);
    }

    // Step 6: Windows and circle fits, once per window size
    let sizes: Vec<Option<f64>> = if config.window_size.is_empty() {
        vec![None]
    } else {
        config.window_size.iter().copied().map(Some).collect()
    };

    let mut results = Vec::with_capacity(sizes.len());
    for size in sizes {
        let spec = WindowSpec {
            resolution_mm: resolution,
            ..WindowSpec::from_config(config, size)
        };

        let mut elements = Vec::with_capacity(pruned.elements.len());
        let mut excluded = pruning_excluded.clone();
        for element in &pruned.elements {
            match measure_element(element, &spec) {
                Ok(summary) => elements.push(summary),
                Err(reason) => {
                    log::warn!(
                        "{}: element {} ({} px) excluded at window size {:?}: {}",
                        filename,
                        element.label,
                        element.pixel_count(),
                        size,
                        reason
                    );
                    excluded.push(ExcludedElement {
                        label: element.label,
                        pixel_count: element.pixel_count(),
                        reason,
                    });
                }
            }
        }
        excluded.sort_by_key(|e| e.label);

        results.push(CurvatureImageResult {
            path: path.clone(),
            filename: filename.clone(),
            resolution_mm: resolution,
            window_size: size,
            window_unit: config.window_unit,
            elements,
            excluded,
        });
    }

    log::info!(
        "{}: {} elements measured at {} window sizes, {} excluded by pruning in {:.2?}",
        filename,
        pruned.elements.len(),
        results.len(),
        pruning_excluded.len(),
        start.elapsed()
    );

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::f64::consts::PI;

    fn raw(pixels: GrayImage) -> RawImage {
        RawImage {
            pixels,
            path: PathBuf::from("synthetic.png"),
            filename: "synthetic".to_string(),
            resolution: 132.0,
        }
    }

    /// Light background with dark thick strokes
    fn draw_disc(img: &mut GrayImage, cx: f64, cy: f64, r: f64) {
        let (w, h) = img.dimensions();
        for y in 0..h {
            for x in 0..w {
                if (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2) <= r * r {
                    img.put_pixel(x, y, Luma([25]));
                }
            }
        }
    }

    fn arc_image() -> GrayImage {
        let mut img = GrayImage::from_pixel(260, 200, Luma([235]));
        for i in 0..=400 {
            let t = PI * i as f64 / 400.0;
            draw_disc(&mut img, 130.0 + 80.0 * t.cos(), 40.0 + 80.0 * t.sin(), 2.0);
        }
        img
    }

    #[test]
    fn half_circle_element_has_single_window() {
        let path: Vec<Pixel> = {
            let mut points: Vec<Pixel> = Vec::new();
            for i in 0..=4000 {
                let t = PI * i as f64 / 4000.0;
                let p = ((100.0 + 50.0 * t.cos()).round() as u32, (60.0 + 50.0 * t.sin()).round() as u32);
                if points.last() != Some(&p) {
                    points.push(p);
                }
            }
            points
        };
        let element = Element {
            label: 1,
            path,
            pruned_pixels: 0,
        };

        let summary = measure_element(&element, &WindowSpec::whole_element()).unwrap();
        assert_eq!(summary.measurements.len(), 1);
        assert!(summary.measurements[0].valid());
        assert!((summary.curvature_mean - 0.02).abs() < 0.0005);
        assert_eq!(summary.valid_windows, 1);
    }

    #[test]
    fn measures_drawn_arc() {
        let config = Config {
            min_particle_area: Some(50),
            ..Config::default()
        };
        let results = process_curvature(raw(arc_image()), &config, None).unwrap();
        assert_eq!(results.len(), 1);

        let result = &results[0];
        assert_eq!(result.image_id(), "synthetic");
        assert_eq!(result.element_count(), 1);
        let element = &result.elements[0];
        let curvature = element.curvature_mean;
        assert!((curvature - 1.0 / 80.0).abs() < 0.1 / 80.0, "curvature {}", curvature);
        assert!(element.length > 200.0);
    }

    #[test]
    fn windowed_straight_fiber_is_flat() {
        let mut img = GrayImage::from_pixel(200, 60, Luma([240]));
        for x in 20..180 {
            for y in 28..33 {
                img.put_pixel(x, y, Luma([20]));
            }
        }
        let config = Config {
            window_size: vec![30.0],
            min_particle_area: Some(50),
            ..Config::default()
        };
        let results = process_curvature(raw(img), &config, None).unwrap();
        let result = &results[0];

        assert_eq!(result.element_count(), 1);
        let element = &result.elements[0];
        assert!(element.valid_windows >= 4);
        assert!(element.curvature_mean < 1e-3);
    }

    #[test]
    fn blank_image_yields_no_elements() {
        let img = GrayImage::from_pixel(64, 64, Luma([200]));
        let results = process_curvature(raw(img), &Config::default(), None).unwrap();
        let result = &results[0];
        assert_eq!(result.element_count(), 0);
        assert_eq!(result.excluded_count(), 0);
        assert_eq!(result.mean_curvature_stats(), (None, None));
    }

    #[test]
    fn each_window_size_is_a_separate_result() {
        let config = Config {
            window_size: vec![40.0, 100.0],
            min_particle_area: Some(50),
            ..Config::default()
        };
        let results = process_curvature(raw(arc_image()), &config, None).unwrap();

        let ids: Vec<String> = results.iter().map(|r| r.image_id()).collect();
        assert_eq!(ids, vec!["synthetic_WindowSize-40px", "synthetic_WindowSize-100px"]);

        let small = &results[0].elements[0];
        let large = &results[1].elements[0];
        assert_eq!(small.label, large.label);
        assert!(small.measurements.len() > large.measurements.len());
        assert!((small.length - large.length).abs() < 1e-9);
        assert!(small.curvature_median > 0.0);
        assert!((large.curvature_median - 1.0 / 80.0).abs() < 0.1 / 80.0);
    }

    #[test]
    fn writes_debug_images() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            ridge_filter: true,
            min_particle_area: Some(50),
            ..Config::default()
        };
        process_curvature(raw(arc_image()), &config, Some(dir.path())).unwrap();

        for step in ["filtered", "binarized", "clean", "skeletonized", "pruned"] {
            assert!(dir.path().join(step).join("synthetic.png").exists(), "{}", step);
        }
    }
}
