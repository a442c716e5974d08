use std::fs;
use std::path::{Path, PathBuf};
use csv::Writer;

use crate::curvature::curvature_per_mm;
use crate::errors::Result;
use crate::pipeline::CurvatureImageResult;
use crate::section::SectionImageResult;

pub const CURVATURE_SUMMARY_FILE: &str = "curvature_summary_data.csv";
pub const CURVATURE_ELEMENT_FILE: &str = "curvature_element_data.csv";
pub const CURVATURE_EXCLUDED_FILE: &str = "curvature_excluded_elements.csv";
pub const SECTION_SUMMARY_FILE: &str = "summary_section_data.csv";
pub const WITHIN_ELEMENT_DIR: &str = "WithinElement";

fn create_writer(path: &Path) -> Result<Writer<fs::File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    Ok(Writer::from_path(path)?)
}

fn opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.6}", v)).unwrap_or_default()
}

/// Write one row per image with curvature aggregates over its elements (1/mm, mm)
pub fn write_curvature_summary<P: AsRef<Path>>(results: &[CurvatureImageResult], path: P) -> Result<()> {
    let mut writer = create_writer(path.as_ref())?;

    writer.write_record(&[
        "ImageID",
        "Elements",
        "ExcludedElements",
        "ValidWindows",
        "InvalidWindows",
        "CurvMean_Mean",
        "CurvMean_Median",
        "CurvMedian_Mean",
        "CurvMedian_Median",
        "Length_Mean",
        "Length_Median",
    ])?;

    for result in results {
        let (mean_mean, mean_median) = result.mean_curvature_stats();
        let (median_mean, median_median) = result.median_curvature_stats();
        let (length_mean, length_median) = result.length_stats();

        writer.write_record(&[
            result.image_id(),
            result.element_count().to_string(),
            result.excluded_count().to_string(),
            result.valid_windows().to_string(),
            result.invalid_windows().to_string(),
            opt(mean_mean),
            opt(mean_median),
            opt(median_mean),
            opt(median_median),
            opt(length_mean),
            opt(length_median),
        ])?;
    }

    writer.flush()?;

    Ok(())
}

/// Write one row per measured element across the batch
pub fn write_element_table<P: AsRef<Path>>(
    results: &[CurvatureImageResult],
    path: P,
    parameters: &str,
) -> Result<()> {
    let mut writer = create_writer(path.as_ref())?;

    writer.write_record(&[
        "ImageID",
        "ElementID",
        "CurvMean",
        "CurvMedian",
        "Length",
        "PixelCount",
        "PrunedPixels",
        "ValidWindows",
        "InvalidWindows",
        "DroppedLength",
        "Parameters",
    ])?;

    for result in results {
        let res = result.resolution_mm;
        for element in &result.elements {
            writer.write_record(&[
                result.image_id(),
                element.label.to_string(),
                format!("{:.6}", curvature_per_mm(element.curvature_mean, res)),
                format!("{:.6}", curvature_per_mm(element.curvature_median, res)),
                format!("{:.6}", element.length / res),
                element.pixel_count.to_string(),
                element.pruned_pixels.to_string(),
                element.valid_windows.to_string(),
                element.invalid_windows.to_string(),
                format!("{:.6}", element.dropped_length / res),
                parameters.to_string(),
            ])?;
        }
    }

    writer.flush()?;

    Ok(())
}

/// Write the skeleton components that were excluded, with their reason
pub fn write_excluded_elements<P: AsRef<Path>>(results: &[CurvatureImageResult], path: P) -> Result<()> {
    let mut writer = create_writer(path.as_ref())?;

    writer.write_record(&["ImageID", "ElementID", "PixelCount", "Reason"])?;

    for result in results {
        for excluded in &result.excluded {
            writer.write_record(&[
                result.image_id(),
                excluded.label.to_string(),
                excluded.pixel_count.to_string(),
                excluded.reason.to_string(),
            ])?;
        }
    }

    writer.flush()?;

    Ok(())
}

/// Write one raw window table per element of an image.
///
/// Files are named `WithinElement_{image id}_Label-{n}.csv` under `output_dir`,
/// so every window size of an image gets its own set.
pub fn write_within_element_tables<P: AsRef<Path>>(
    result: &CurvatureImageResult,
    output_dir: P,
) -> Result<Vec<PathBuf>> {
    let output_dir = output_dir.as_ref();
    let mut written = Vec::with_capacity(result.elements.len());

    for element in &result.elements {
        let path = output_dir.join(format!(
            "WithinElement_{}_Label-{}.csv",
            result.image_id(),
            element.label
        ));
        let mut writer = create_writer(&path)?;

        writer.write_record(&[
            "WindowIndex",
            "PointCount",
            "Length_px",
            "CenterX",
            "CenterY",
            "Radius_px",
            "Curvature_px",
            "Curvature_mm",
            "Status",
        ])?;

        for m in &element.measurements {
            writer.write_record(&[
                m.window_index.to_string(),
                m.point_count.to_string(),
                format!("{:.6}", m.length),
                opt(m.center.map(|c| c.0)),
                opt(m.center.map(|c| c.1)),
                opt(m.radius),
                format!("{:.6}", m.curvature),
                format!("{:.6}", curvature_per_mm(m.curvature, result.resolution_mm)),
                m.status.to_string(),
            ])?;
        }

        writer.flush()?;
        written.push(path);
    }

    Ok(written)
}

/// Write one row per section region across the batch (microns)
pub fn write_section_table<P: AsRef<Path>>(
    results: &[SectionImageResult],
    path: P,
    parameters: &str,
) -> Result<()> {
    let mut writer = create_writer(path.as_ref())?;

    writer.write_record(&[
        "ImageID",
        "RegionID",
        "Primary",
        "Area",
        "MinDiameter",
        "MaxDiameter",
        "Eccentricity",
        "CentroidX",
        "CentroidY",
        "BBoxMinX",
        "BBoxMinY",
        "BBoxMaxX",
        "BBoxMaxY",
        "Parameters",
    ])?;

    for result in results {
        for region in &result.regions {
            writer.write_record(&[
                result.filename.clone(),
                region.label.to_string(),
                region.primary.to_string(),
                format!("{:.6}", region.area),
                format!("{:.6}", region.min_diameter),
                format!("{:.6}", region.max_diameter),
                format!("{:.6}", region.eccentricity),
                format!("{:.6}", region.centroid.0),
                format!("{:.6}", region.centroid.1),
                format!("{:.6}", region.bbox.0),
                format!("{:.6}", region.bbox.1),
                format!("{:.6}", region.bbox.2),
                format!("{:.6}", region.bbox.3),
                parameters.to_string(),
            ])?;
        }
    }

    writer.flush()?;

    Ok(())
}
