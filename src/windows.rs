// src/windows.rs - Partition an element path into measurement windows

use crate::config::{Config, WindowUnit};
use crate::geometry::{path_length, pixel_length_correction, Pixel};

/// How an element is cut into windows
#[derive(Debug, Clone, Copy)]
pub struct WindowSpec {
    /// Target window length; `None` measures the whole element as one window
    pub size: Option<f64>,
    pub unit: WindowUnit,
    /// Pixels per mm, used when `unit` is mm
    pub resolution_mm: f64,
    /// A trailing partial window is kept when at least this fraction of the target
    pub min_fraction: f64,
    /// Target windows below this many steps fall back to the whole element
    pub min_window_px: usize,
}

impl WindowSpec {
    /// Spec for one of the configured sizes; `None` measures whole elements
    pub fn from_config(config: &Config, size: Option<f64>) -> Self {
        Self {
            size,
            unit: config.window_unit,
            resolution_mm: config.resolution_mm,
            min_fraction: config.min_window_fraction,
            min_window_px: config.min_window_px,
        }
    }

    /// Whole-element windows, no size configured
    pub fn whole_element() -> Self {
        Self {
            size: None,
            unit: WindowUnit::Px,
            resolution_mm: 1.0,
            min_fraction: 0.0,
            min_window_px: 0,
        }
    }
}

/// A contiguous run of path pixels, `start..=end` (indices into the path)
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    /// Corrected Euclidean length in pixels
    pub length: f64,
}

impl Window {
    fn new(index: usize, start: usize, end: usize, path: &[Pixel]) -> Self {
        Self {
            index,
            start,
            end,
            length: path_length(&path[start..=end]),
        }
    }

    pub fn steps(&self) -> usize {
        self.end - self.start
    }

    pub fn points<'a>(&self, path: &'a [Pixel]) -> &'a [Pixel] {
        &path[self.start..=self.end]
    }
}

/// Ordered windows of one element plus the dropped trailing remainder
#[derive(Debug, Clone, PartialEq)]
pub struct WindowPlan {
    pub windows: Vec<Window>,
    pub dropped: Option<Window>,
    /// Steps per window, `None` for a whole-element window
    pub target_steps: Option<usize>,
    /// Corrected length of the whole element in pixels
    pub total_length: f64,
    /// Ratio of corrected length to step count for this element
    pub correction: f64,
}

impl WindowPlan {
    pub fn kept_length(&self) -> f64 {
        self.windows.iter().map(|w| w.length).sum()
    }

    pub fn dropped_length(&self) -> f64 {
        self.dropped.as_ref().map_or(0.0, |w| w.length)
    }
}

/// Cut a path into consecutive non-overlapping windows.
///
/// Windows partition the steps of the path: neighbouring windows share one
/// boundary pixel, so the kept lengths plus the dropped remainder add up to
/// the corrected length of the whole path.
pub fn make_windows(path: &[Pixel], spec: &WindowSpec) -> WindowPlan {
    let correction = pixel_length_correction(path);
    let total_length = path_length(path);

    let mut plan = WindowPlan {
        windows: Vec::new(),
        dropped: None,
        target_steps: None,
        total_length,
        correction,
    };

    if path.is_empty() {
        return plan;
    }
    let total_steps = path.len() - 1;

    let size = match spec.size {
        Some(size) => size,
        None => {
            plan.windows.push(Window::new(0, 0, total_steps, path));
            return plan;
        }
    };

    let target_px = match spec.unit {
        WindowUnit::Px => size,
        WindowUnit::Mm => size * spec.resolution_mm,
    };
    let target_steps = ((target_px / correction).round() as usize).max(1);

    if target_steps < spec.min_window_px {
        log::debug!(
            "Window of {} steps is below {} px, measuring whole element",
            target_steps,
            spec.min_window_px
        );
        plan.windows.push(Window::new(0, 0, total_steps, path));
        return plan;
    }

    plan.target_steps = Some(target_steps);

    let mut start = 0;
    while start + target_steps <= total_steps {
        let index = plan.windows.len();
        plan.windows.push(Window::new(index, start, start + target_steps, path));
        start += target_steps;
    }

    let remainder = total_steps - start;
    if remainder > 0 {
        let index = plan.windows.len();
        let tail = Window::new(index, start, total_steps, path);
        if remainder as f64 >= spec.min_fraction * target_steps as f64 {
            plan.windows.push(tail);
        } else {
            plan.dropped = Some(tail);
        }
    }

    plan
}
