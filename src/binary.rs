// src/binary.rs - Thresholding, orientation and connected-component filtering

use std::collections::{HashMap, VecDeque};

use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{connected_components, Connectivity as LabelConnectivity};

use crate::config::ThresholdMethod;
use crate::errors::{FiberMorphError, Result};
use crate::geometry::{define_structure, in_bounds, Connectivity, Pixel};

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// 2D boolean matrix backed by a gray image (255 = foreground)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    image: GrayImage,
}

impl BinaryMask {
    /// Empty mask of the given dimensions
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::new(width, height),
        }
    }

    /// Non-zero pixels become foreground
    pub fn from_gray(image: &GrayImage) -> Self {
        let mut mask = image.clone();
        for p in mask.pixels_mut() {
            p.0[0] = if p.0[0] > 0 { FOREGROUND } else { BACKGROUND };
        }
        Self { image: mask }
    }

    /// Build a mask from a set of foreground pixels
    pub fn from_pixels(width: u32, height: u32, pixels: &[Pixel]) -> Self {
        let mut mask = Self::new(width, height);
        for &(x, y) in pixels {
            if x < width && y < height {
                mask.set(x, y, true);
            }
        }
        mask
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y).0[0] != BACKGROUND
    }

    /// Out-of-bounds coordinates read as background
    #[inline]
    pub fn get_signed(&self, x: i64, y: i64) -> bool {
        in_bounds(x, y, self.width(), self.height()) && self.get(x as u32, y as u32)
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let v = if value { FOREGROUND } else { BACKGROUND };
        self.image.put_pixel(x, y, Luma([v]));
    }

    /// Number of foreground pixels
    pub fn count(&self) -> usize {
        self.image.pixels().filter(|p| p.0[0] != BACKGROUND).count()
    }

    pub fn is_empty(&self) -> bool {
        self.image.pixels().all(|p| p.0[0] == BACKGROUND)
    }

    /// Foreground pixels in raster order
    pub fn foreground(&self) -> Vec<Pixel> {
        self.image
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] != BACKGROUND)
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    pub fn invert(&self) -> Self {
        let mut image = self.image.clone();
        for p in image.pixels_mut() {
            p.0[0] = FOREGROUND - p.0[0];
        }
        Self { image }
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    /// Foreground drawn black on white, the way fibers appear in the source images
    pub fn to_display_image(&self) -> GrayImage {
        self.invert().image
    }
}

/// Threshold a grayscale image into a foreground mask.
///
/// Pixels brighter than the level become foreground, then the mask is
/// oriented so that the foreground is the minority class. A uniform image
/// yields an empty mask.
pub fn binarize(
    image: &GrayImage,
    method: ThresholdMethod,
    threshold: Option<u8>,
) -> Result<BinaryMask> {
    let level = match method {
        ThresholdMethod::Otsu => otsu_level(image),
        ThresholdMethod::Fixed => threshold.ok_or_else(|| {
            FiberMorphError::Config("fixed thresholding requires a threshold value".to_string())
        })?,
    };

    let mut mask = image.clone();
    for p in mask.pixels_mut() {
        p.0[0] = if p.0[0] > level { FOREGROUND } else { BACKGROUND };
    }

    log::debug!("Binarized with {:?} at level {}", method, level);

    Ok(orient_foreground(BinaryMask { image: mask }))
}

/// Invert the mask when the foreground outnumbers the background
pub fn orient_foreground(mask: BinaryMask) -> BinaryMask {
    let (width, height) = mask.dimensions();
    let total = width as usize * height as usize;
    let foreground = mask.count();

    if foreground == total {
        // A single value present: nothing to separate
        return BinaryMask::new(width, height);
    }

    if foreground * 2 > total {
        log::debug!("Image orientation corrected ({} of {} pixels were foreground)", foreground, total);
        mask.invert()
    } else {
        mask
    }
}

/// Connected components as pixel lists, ordered by their first pixel in raster order
pub fn label_components(mask: &BinaryMask, connectivity: Connectivity) -> Vec<Vec<Pixel>> {
    let conn = match connectivity {
        Connectivity::Four => LabelConnectivity::Four,
        Connectivity::Eight => LabelConnectivity::Eight,
    };
    let labels = connected_components(mask.as_image(), conn, Luma([BACKGROUND]));

    let mut order: HashMap<u32, usize> = HashMap::new();
    let mut components: Vec<Vec<Pixel>> = Vec::new();

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0];
        if label == 0 {
            continue;
        }
        let idx = *order.entry(label).or_insert_with(|| {
            components.push(Vec::new());
            components.len() - 1
        });
        components[idx].push((x, y));
    }

    components
}

/// Drop 8-connected components smaller than `min_area` pixels
pub fn remove_particles(mask: &BinaryMask, min_area: usize) -> BinaryMask {
    let (width, height) = mask.dimensions();
    let mut clean = BinaryMask::new(width, height);
    let mut removed = 0usize;

    for component in label_components(mask, Connectivity::Eight) {
        if component.len() < min_area {
            removed += 1;
            continue;
        }
        for (x, y) in component {
            clean.set(x, y, true);
        }
    }

    if removed > 0 {
        log::debug!("Removed {} particles below {} pixels", removed, min_area);
    }

    clean
}

/// Remove components touching a band of `buffer` pixels along the image border.
/// A zero buffer leaves the mask unchanged.
pub fn clear_border(mask: &BinaryMask, buffer: u32) -> BinaryMask {
    if buffer == 0 {
        return mask.clone();
    }

    let (width, height) = mask.dimensions();
    let in_band = |(x, y): Pixel| {
        x < buffer || y < buffer || x + buffer >= width || y + buffer >= height
    };

    let mut cleared = BinaryMask::new(width, height);
    for component in label_components(mask, Connectivity::Eight) {
        if component.iter().any(|&p| in_band(p)) {
            continue;
        }
        for (x, y) in component {
            cleared.set(x, y, true);
        }
    }

    cleared
}

/// Square dilation with the given radius (chessboard norm)
pub fn dilate(mask: &BinaryMask, radius: u8) -> BinaryMask {
    if radius == 0 {
        return mask.clone();
    }

    BinaryMask {
        image: imageproc::morphology::dilate(mask.as_image(), Norm::LInf, radius),
    }
}

/// Fill background regions that are not 4-connected to the image border
pub fn fill_holes(mask: &BinaryMask) -> BinaryMask {
    let (width, height) = mask.dimensions();
    let se = define_structure(Connectivity::Four);
    let mut outside = vec![false; width as usize * height as usize];
    let mut queue = VecDeque::new();
    let idx = |(x, y): Pixel| y as usize * width as usize + x as usize;

    for x in 0..width {
        for y in [0, height.saturating_sub(1)] {
            if !mask.get(x, y) && !outside[idx((x, y))] {
                outside[idx((x, y))] = true;
                queue.push_back((x, y));
            }
        }
    }
    for y in 0..height {
        for x in [0, width.saturating_sub(1)] {
            if !mask.get(x, y) && !outside[idx((x, y))] {
                outside[idx((x, y))] = true;
                queue.push_back((x, y));
            }
        }
    }

    while let Some(p) = queue.pop_front() {
        for n in se.neighbors(p, width, height) {
            if !mask.get(n.0, n.1) && !outside[idx(n)] {
                outside[idx(n)] = true;
                queue.push_back(n);
            }
        }
    }

    let mut filled = mask.clone();
    for y in 0..height {
        for x in 0..width {
            if !outside[idx((x, y))] {
                filled.set(x, y, true);
            }
        }
    }

    filled
}
