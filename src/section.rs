// src/section.rs - Cross-section pipeline: region properties of hair sections

use std::path::{Path, PathBuf};
use std::time::Instant;

use image::imageops;

use crate::binary::{binarize, clear_border, fill_holes, label_components, BinaryMask};
use crate::config::Config;
use crate::errors::Result;
use crate::geometry::{Connectivity, Pixel};
use crate::image_io::{save_gray_image, RawImage};

/// Inclusive pixel bounding box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl BoundingBox {
    fn of(pixels: &[Pixel]) -> Option<Self> {
        let first = pixels.first()?;
        let mut bbox = BoundingBox {
            min_x: first.0,
            min_y: first.1,
            max_x: first.0,
            max_y: first.1,
        };
        for &(x, y) in pixels {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    /// Grow by `padding` on every side, clipped to the image
    pub fn padded(&self, padding: u32, width: u32, height: u32) -> Self {
        BoundingBox {
            min_x: self.min_x.saturating_sub(padding),
            min_y: self.min_y.saturating_sub(padding),
            max_x: (self.max_x.saturating_add(padding)).min(width.saturating_sub(1)),
            max_y: (self.max_y.saturating_add(padding)).min(height.saturating_sub(1)),
        }
    }
}

/// Shape of one region measured in pixels
#[derive(Debug, Clone, PartialEq)]
pub struct RegionShape {
    /// Area after filling interior holes
    pub filled_area: usize,
    pub centroid: (f64, f64),
    /// Major and minor axis of the moment-equivalent ellipse
    pub major_axis: f64,
    pub minor_axis: f64,
    pub eccentricity: f64,
    pub bbox: BoundingBox,
}

/// Measure the moment-equivalent ellipse of a set of pixels
pub fn region_shape(pixels: &[Pixel]) -> Option<RegionShape> {
    let bbox = BoundingBox::of(pixels)?;
    let n = pixels.len() as f64;

    let cx = pixels.iter().map(|p| p.0 as f64).sum::<f64>() / n;
    let cy = pixels.iter().map(|p| p.1 as f64).sum::<f64>() / n;

    let (mut mu20, mut mu02, mut mu11) = (0.0, 0.0, 0.0);
    for &(x, y) in pixels {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        mu20 += dx * dx;
        mu02 += dy * dy;
        mu11 += dx * dy;
    }
    mu20 /= n;
    mu02 /= n;
    mu11 /= n;

    let half_trace = 0.5 * (mu20 + mu02);
    let root = (0.25 * (mu20 - mu02).powi(2) + mu11 * mu11).sqrt();
    let lambda_max = half_trace + root;
    let lambda_min = (half_trace - root).max(0.0);

    let eccentricity = if lambda_max > 0.0 {
        (1.0 - lambda_min / lambda_max).max(0.0).sqrt()
    } else {
        0.0
    };

    Some(RegionShape {
        filled_area: pixels.len(),
        centroid: (cx, cy),
        major_axis: 4.0 * lambda_max.sqrt(),
        minor_axis: 4.0 * lambda_min.sqrt(),
        eccentricity,
        bbox,
    })
}

/// One hair cross-section, lengths in microns
#[derive(Debug, Clone, PartialEq)]
pub struct SectionRegion {
    pub label: usize,
    pub area: f64,
    pub min_diameter: f64,
    pub max_diameter: f64,
    pub eccentricity: f64,
    pub centroid: (f64, f64),
    /// Bounding box in microns: (min_x, min_y, max_x, max_y)
    pub bbox: (f64, f64, f64, f64),
    /// Pixel bounding box, used for crops
    pub bbox_px: BoundingBox,
    /// Region whose centroid is nearest the image center
    pub primary: bool,
}

/// Section results of one image
#[derive(Debug, Clone)]
pub struct SectionImageResult {
    pub path: PathBuf,
    pub filename: String,
    pub resolution_mu: f64,
    pub regions: Vec<SectionRegion>,
    /// Regions rejected by the diameter bounds
    pub rejected: usize,
}

impl SectionImageResult {
    pub fn primary(&self) -> Option<&SectionRegion> {
        self.regions.iter().find(|r| r.primary)
    }
}

fn to_region(label: usize, shape: &RegionShape, resolution_mu: f64) -> SectionRegion {
    let um = |px: f64| px / resolution_mu;
    let b = shape.bbox;
    SectionRegion {
        label,
        area: shape.filled_area as f64 / (resolution_mu * resolution_mu),
        min_diameter: um(shape.minor_axis),
        max_diameter: um(shape.major_axis),
        eccentricity: shape.eccentricity,
        centroid: (um(shape.centroid.0), um(shape.centroid.1)),
        bbox: (
            um(b.min_x as f64),
            um(b.min_y as f64),
            um(b.max_x as f64 + 1.0),
            um(b.max_y as f64 + 1.0),
        ),
        bbox_px: b,
        primary: false,
    }
}

/// Run the section pipeline on one image.
///
/// Regions are 8-connected foreground components with holes filled. Regions
/// within `section_border_buffer` pixels of the edge are cut off by the frame
/// and dropped before measuring. A region is kept when its minor axis reaches
/// `minsize` and its major axis stays within `maxsize` (both microns,
/// converted with the image resolution).
pub fn process_section(image: RawImage, config: &Config, debug_dir: Option<&Path>) -> Result<SectionImageResult> {
    let RawImage {
        pixels,
        path,
        filename,
        resolution,
    } = image;
    let start = Instant::now();
    let (width, height) = pixels.dimensions();

    let mask = binarize(&pixels, config.threshold_method, config.threshold_value)?;
    let mask = fill_holes(&clear_border(&mask, config.section_border_buffer));
    let (min_px, max_px) = config.section_bounds_px(resolution);

    let mut regions = Vec::new();
    let mut centers = Vec::new();
    let mut rejected = 0usize;

    for (i, component) in label_components(&mask, Connectivity::Eight).iter().enumerate() {
        let shape = match region_shape(component) {
            Some(shape) => shape,
            None => continue,
        };

        if shape.minor_axis < min_px || shape.major_axis > max_px {
            rejected += 1;
            continue;
        }

        centers.push(shape.centroid);
        regions.push(to_region(i + 1, &shape, resolution));
    }

    // Primary region: centroid closest to the image center
    let center = (width as f64 / 2.0, height as f64 / 2.0);
    let distance = |c: &(f64, f64)| (c.0 - center.0).hypot(c.1 - center.1);
    if let Some((primary, _)) = centers
        .iter()
        .enumerate()
        .min_by(|a, b| distance(a.1).total_cmp(&distance(b.1)))
    {
        regions[primary].primary = true;
    }

    log::debug!(
        "{}: {} regions kept, {} outside [{:.1}, {:.1}] px",
        filename,
        regions.len(),
        rejected,
        min_px,
        max_px
    );

    if let Some(dir) = debug_dir {
        save_region_crops(&pixels, &mask, &regions, &filename, config.section_crop_padding, dir)?;
    }

    log::info!("{}: {} section regions in {:.2?}", filename, regions.len(), start.elapsed());

    Ok(SectionImageResult {
        path,
        filename,
        resolution_mu: resolution,
        regions,
        rejected,
    })
}

fn save_region_crops(
    pixels: &image::GrayImage,
    mask: &BinaryMask,
    regions: &[SectionRegion],
    filename: &str,
    padding: u32,
    dir: &Path,
) -> Result<()> {
    let (width, height) = pixels.dimensions();
    let display = mask.to_display_image();

    for region in regions {
        let b = region.bbox_px.padded(padding, width, height);
        let name = format!("{}_region-{}.png", filename, region.label);

        let crop = imageops::crop_imm(pixels, b.min_x, b.min_y, b.width(), b.height()).to_image();
        save_gray_image(&crop, dir.join("crop").join(&name))?;

        let binary = imageops::crop_imm(&display, b.min_x, b.min_y, b.width(), b.height()).to_image();
        save_gray_image(&binary, dir.join("binary").join(&name))?;
    }

    Ok(())
}
