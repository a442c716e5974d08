// src/lib.rs - Library interface for fibermorph

pub mod binary;
pub mod config;
pub mod curvature;
pub mod errors;
pub mod filters;
pub mod geometry;
pub mod image_io;
pub mod morphology;
pub mod output;
pub mod pipeline;
pub mod runner;
pub mod section;
pub mod windows;

// Re-export commonly used types and functions
pub use config::{AnalysisMode, Config, ThresholdMethod, WindowUnit};
pub use errors::{FiberMorphError, Result};
pub use image_io::{image_ids, list_images, save_gray_image, ImageReader, RawImage, ReaderRegistry};
pub use pipeline::{process_curvature, CurvatureImageResult, CurvatureMeasurement, ElementSummary};
pub use section::{process_section, SectionImageResult, SectionRegion};
pub use runner::{
    format_duration, run_analysis, run_batch, run_curvature, run_section, BatchReport, CancelToken,
    RunSummary,
};

// Re-export the measurement building blocks
pub use binary::{binarize, remove_particles, BinaryMask};
pub use curvature::{fit_circle, CircleFit, FitStatus};
pub use filters::{ridge_enhance, RidgeConfig};
pub use geometry::{define_structure, path_length, pixel_length_correction, Connectivity, Pixel};
pub use morphology::{prune, skeletonize, Element, ExclusionReason, PruneConfig, PruneOutcome, Skeleton};
pub use windows::{make_windows, Window, WindowPlan, WindowSpec};
