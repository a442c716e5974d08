// src/filters.rs - Ridge enhancement applied before thresholding

use image::{GrayImage, ImageBuffer, Luma};

use crate::config::Config;

type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Parameters of the multi-scale Hessian ridge filter
#[derive(Debug, Clone)]
pub struct RidgeConfig {
    /// Gaussian scales (pixels) at which ridges are measured
    pub sigmas: Vec<f32>,
    /// Sensitivity to blob-like versus line-like structures
    pub beta: f32,
    /// Sensitivity to background structure; `None` uses half the maximum Hessian norm
    pub gamma: Option<f32>,
    /// Dark fibers on a bright background
    pub black_ridges: bool,
}

impl Default for RidgeConfig {
    fn default() -> Self {
        Self {
            sigmas: vec![1.0, 2.0, 3.0],
            beta: 0.5,
            gamma: None,
            black_ridges: true,
        }
    }
}

impl RidgeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sigmas: config.ridge_sigmas.clone(),
            ..Self::default()
        }
    }
}

/// Enhance thin line structures; the output is bright on ridges and dark elsewhere
pub fn ridge_enhance(image: &GrayImage, config: &RidgeConfig) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut response = vec![0.0f32; width as usize * height as usize];

    for &sigma in &config.sigmas {
        let blurred = imageproc::filter::gaussian_blur_f32(image, sigma);
        let smoothed: FloatImage = ImageBuffer::from_fn(width, height, |x, y| {
            Luma([blurred.get_pixel(x, y).0[0] as f32 / 255.0])
        });
        let scale_response = vesselness(&smoothed, sigma, config);
        for (best, v) in response.iter_mut().zip(scale_response) {
            *best = best.max(v);
        }
    }

    let max = response.iter().cloned().fold(0.0f32, f32::max);
    let mut output = GrayImage::new(width, height);
    if max <= f32::EPSILON {
        return output;
    }

    for (i, p) in output.pixels_mut().enumerate() {
        p.0[0] = ((response[i] / max) * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    output
}

/// Frangi-style vesselness of one smoothed scale, row-major
fn vesselness(smoothed: &FloatImage, sigma: f32, config: &RidgeConfig) -> Vec<f32> {
    let (width, height) = smoothed.dimensions();
    let at = |x: i64, y: i64| -> f32 {
        let cx = x.clamp(0, width as i64 - 1) as u32;
        let cy = y.clamp(0, height as i64 - 1) as u32;
        smoothed.get_pixel(cx, cy).0[0]
    };

    let scale = sigma * sigma;
    let mut eigen = Vec::with_capacity(width as usize * height as usize);
    let mut max_norm = 0.0f32;

    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let c = at(x, y);
            let hxx = (at(x + 1, y) - 2.0 * c + at(x - 1, y)) * scale;
            let hyy = (at(x, y + 1) - 2.0 * c + at(x, y - 1)) * scale;
            let hxy = (at(x + 1, y + 1) - at(x + 1, y - 1) - at(x - 1, y + 1) + at(x - 1, y - 1))
                * 0.25
                * scale;

            let root = ((hxx - hyy).powi(2) + 4.0 * hxy * hxy).sqrt();
            let mu1 = 0.5 * (hxx + hyy + root);
            let mu2 = 0.5 * (hxx + hyy - root);
            // |small| <= |large|
            let (small, large) = if mu1.abs() <= mu2.abs() { (mu1, mu2) } else { (mu2, mu1) };

            max_norm = max_norm.max((small * small + large * large).sqrt());
            eigen.push((small, large));
        }
    }

    let gamma = config.gamma.unwrap_or(0.5 * max_norm);
    if gamma <= f32::EPSILON {
        return vec![0.0; eigen.len()];
    }

    let two_beta_sq = 2.0 * config.beta * config.beta;
    let two_gamma_sq = 2.0 * gamma * gamma;

    eigen
        .into_iter()
        .map(|(small, large)| {
            if large == 0.0 {
                return 0.0;
            }
            // Dark ridges curve upward across the fiber; bright ones downward
            if (config.black_ridges && large < 0.0) || (!config.black_ridges && large > 0.0) {
                return 0.0;
            }
            let rb = small / large;
            let s_sq = small * small + large * large;
            (-(rb * rb) / two_beta_sq).exp() * (1.0 - (-s_sq / two_gamma_sq).exp())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dark_line_image() -> GrayImage {
        let mut img = GrayImage::from_pixel(60, 40, Luma([230]));
        for x in 0..60 {
            for y in 19..22 {
                img.put_pixel(x, y, Luma([30]));
            }
        }
        img
    }

    #[test]
    fn dark_line_is_enhanced() {
        let filtered = ridge_enhance(&dark_line_image(), &RidgeConfig::default());

        let on_ridge = filtered.get_pixel(30, 20).0[0];
        let background = filtered.get_pixel(30, 5).0[0];
        assert!(on_ridge > 200, "ridge response {}", on_ridge);
        assert!(background < 20, "background response {}", background);
    }

    #[test]
    fn bright_ridges_ignored_when_looking_for_dark() {
        let inverted = {
            let mut img = dark_line_image();
            image::imageops::invert(&mut img);
            img
        };
        let filtered = ridge_enhance(&inverted, &RidgeConfig::default());
        assert!(filtered.get_pixel(30, 20).0[0] < 20);

        let config = RidgeConfig {
            black_ridges: false,
            ..RidgeConfig::default()
        };
        let filtered = ridge_enhance(&inverted, &config);
        assert!(filtered.get_pixel(30, 20).0[0] > 200);
    }

    #[test]
    fn flat_image_has_no_response() {
        let img = GrayImage::from_pixel(20, 20, Luma([128]));
        let filtered = ridge_enhance(&img, &RidgeConfig::default());
        assert!(filtered.pixels().all(|p| p.0[0] == 0));
    }
}
