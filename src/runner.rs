// src/runner.rs - Batch orchestration over many images

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::config::{AnalysisMode, Config};
use crate::errors::{FiberMorphError, Result};
use crate::image_io::{image_ids, list_images, ReaderRegistry};
use crate::output::{
    write_curvature_summary, write_element_table, write_excluded_elements, write_section_table,
    write_within_element_tables, CURVATURE_ELEMENT_FILE, CURVATURE_EXCLUDED_FILE,
    CURVATURE_SUMMARY_FILE, SECTION_SUMMARY_FILE, WITHIN_ELEMENT_DIR,
};
use crate::pipeline::{process_curvature, CurvatureImageResult};
use crate::section::{process_section, SectionImageResult};

/// Shared flag that stops new images from being dispatched
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An image that did not produce a result
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Ordered results of a batch plus everything that was skipped
#[derive(Debug)]
pub struct BatchReport<T> {
    /// Results sorted by source path
    pub results: Vec<T>,
    pub failures: Vec<BatchFailure>,
    /// Images never started because the batch was cancelled
    pub cancelled: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl<T> BatchReport<T> {
    pub fn skipped(&self) -> usize {
        self.failures.len() + self.cancelled.len()
    }
}

enum Outcome<T> {
    Done(T),
    Failed(String),
    Cancelled,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `job` over `paths` on a pool of `jobs` workers.
///
/// Failures and panics of one image are logged with the filename and
/// reported in the batch; they never abort the other images. Once `cancel`
/// is set no further image starts, images already running finish.
pub fn run_batch<T, F>(paths: &[PathBuf], jobs: usize, cancel: &CancelToken, job: F) -> Result<BatchReport<T>>
where
    T: Send,
    F: Fn(&Path) -> Result<T> + Sync,
{
    let start = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .map_err(|e| FiberMorphError::Other(format!("Failed to configure thread pool: {}", e)))?;

    log::info!("Processing {} images with {} workers", paths.len(), jobs.max(1));

    let outcomes: Vec<Outcome<T>> = pool.install(|| {
        paths
            .par_iter()
            .map(|path| {
                if cancel.is_cancelled() {
                    return Outcome::Cancelled;
                }
                log::info!("Processing: {}", path.display());

                match panic::catch_unwind(AssertUnwindSafe(|| job(path))) {
                    Ok(Ok(result)) => Outcome::Done(result),
                    Ok(Err(e)) => {
                        log::warn!("Skipping {}: {}", path.display(), e);
                        Outcome::Failed(e.to_string())
                    }
                    Err(payload) => {
                        let e = FiberMorphError::PipelinePanic {
                            path: path.clone(),
                            message: panic_message(payload),
                        };
                        log::warn!("Skipping {}: {}", path.display(), e);
                        Outcome::Failed(e.to_string())
                    }
                }
            })
            .collect()
    });

    let mut ordered: Vec<(&PathBuf, Outcome<T>)> = paths.iter().zip(outcomes).collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    let mut report = BatchReport {
        results: Vec::new(),
        failures: Vec::new(),
        cancelled: Vec::new(),
        elapsed: Duration::ZERO,
    };
    for (path, outcome) in ordered {
        match outcome {
            Outcome::Done(result) => report.results.push(result),
            Outcome::Failed(message) => report.failures.push(BatchFailure {
                path: path.clone(),
                message,
            }),
            Outcome::Cancelled => report.cancelled.push(path.clone()),
        }
    }
    report.elapsed = start.elapsed();

    Ok(report)
}

/// Format a duration as `{h}h: {mm}m: {ss}s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}h: {:02}m: {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Where a run writes its tables
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_dir: PathBuf,
    pub tables: Vec<PathBuf>,
}

/// Create `{output_base_dir}/fibermorph_{analysis}` and record the effective config
fn prepare_run_dir(config: &Config) -> Result<PathBuf> {
    let run_dir = PathBuf::from(&config.output_base_dir).join(format!("fibermorph_{}", config.analysis.as_str()));
    fs::create_dir_all(&run_dir)?;
    config.save_to_file(run_dir.join("config_used.toml"))?;
    Ok(run_dir)
}

fn log_batch_summary<T>(report: &BatchReport<T>) {
    for failure in &report.failures {
        log::warn!("Skipped {}: {}", failure.path.display(), failure.message);
    }
    if !report.cancelled.is_empty() {
        log::warn!("{} images not started (cancelled)", report.cancelled.len());
    }
    log::info!(
        "Batch finished: {} processed, {} skipped in {}",
        report.results.len(),
        report.skipped(),
        format_duration(report.elapsed)
    );
}

/// Measure curvature over a batch of images and write the curvature tables.
///
/// Each image yields one result per configured window size. Images are named
/// by `image_ids`, so files sharing a stem never overwrite each other's output.
///
/// Configuration problems fail before any image is read; per-image failures
/// only reduce the number of rows.
pub fn run_curvature(
    paths: &[PathBuf],
    config: &Config,
    cancel: &CancelToken,
) -> Result<(BatchReport<Vec<CurvatureImageResult>>, RunOutput)> {
    config.validate()?;
    let readers = ReaderRegistry::default().resolve(&config.image_extensions)?;
    let parameters = config.parameters_json()?;
    let run_dir = prepare_run_dir(config)?;

    let ids = image_ids(paths, &config.input_path);
    let debug_dir = config.save_image.then(|| run_dir.clone());
    let within_dir = run_dir.join(WITHIN_ELEMENT_DIR);

    let report = run_batch(paths, config.effective_jobs(), cancel, |path| {
        let mut image = readers.load(path, config.resolution_mm)?;
        if let Some(id) = ids.get(path) {
            image.filename = id.clone();
        }
        let results = process_curvature(image, config, debug_dir.as_deref())?;
        if config.within_element {
            for result in &results {
                write_within_element_tables(result, &within_dir)?;
            }
        }
        Ok(results)
    })?;

    // One row block per image and window size, in image order
    let rows: Vec<CurvatureImageResult> = report.results.iter().flatten().cloned().collect();

    let summary = run_dir.join(CURVATURE_SUMMARY_FILE);
    let elements = run_dir.join(CURVATURE_ELEMENT_FILE);
    let excluded = run_dir.join(CURVATURE_EXCLUDED_FILE);
    write_curvature_summary(&rows, &summary)?;
    write_element_table(&rows, &elements, &parameters)?;
    write_excluded_elements(&rows, &excluded)?;

    log_batch_summary(&report);

    Ok((
        report,
        RunOutput {
            run_dir,
            tables: vec![summary, elements, excluded],
        },
    ))
}

/// Measure cross-sections over a batch of images and write the section table
pub fn run_section(
    paths: &[PathBuf],
    config: &Config,
    cancel: &CancelToken,
) -> Result<(BatchReport<SectionImageResult>, RunOutput)> {
    config.validate()?;
    let readers = ReaderRegistry::default().resolve(&config.image_extensions)?;
    let parameters = config.parameters_json()?;
    let run_dir = prepare_run_dir(config)?;

    let ids = image_ids(paths, &config.input_path);
    let debug_dir = config.save_image.then(|| run_dir.clone());

    let report = run_batch(paths, config.effective_jobs(), cancel, |path| {
        let mut image = readers.load(path, config.resolution_mu)?;
        if let Some(id) = ids.get(path) {
            image.filename = id.clone();
        }
        process_section(image, config, debug_dir.as_deref())
    })?;

    let summary = run_dir.join(SECTION_SUMMARY_FILE);
    write_section_table(&report.results, &summary, &parameters)?;

    log_batch_summary(&report);

    Ok((
        report,
        RunOutput {
            run_dir,
            tables: vec![summary],
        },
    ))
}

/// Counts of a finished run, independent of the analysis mode
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub analysis: AnalysisMode,
    pub processed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub output: RunOutput,
    pub elapsed: Duration,
}

/// List the configured input and dispatch to the selected analysis
pub fn run_analysis(config: &Config, cancel: &CancelToken) -> Result<RunSummary> {
    config.validate()?;
    let paths = list_images(&config.input_path, &config.image_extensions)?;
    log::info!("Found {} images in {}", paths.len(), config.input_path);

    let summary = match config.analysis {
        AnalysisMode::Curvature => {
            let (report, output) = run_curvature(&paths, config, cancel)?;
            RunSummary {
                analysis: config.analysis,
                processed: report.results.len(),
                failed: report.failures.len(),
                cancelled: report.cancelled.len(),
                output,
                elapsed: report.elapsed,
            }
        }
        AnalysisMode::Section => {
            let (report, output) = run_section(&paths, config, cancel)?;
            RunSummary {
                analysis: config.analysis,
                processed: report.results.len(),
                failed: report.failures.len(),
                cancelled: report.cancelled.len(),
                output,
                elapsed: report.elapsed,
            }
        }
    };

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn results_are_sorted_by_path() {
        let input = paths(&["c.png", "a.png", "b.png"]);
        let report = run_batch(&input, 3, &CancelToken::new(), |p| {
            Ok(p.to_string_lossy().to_string())
        })
        .unwrap();
        assert_eq!(report.results, vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn failures_and_panics_are_isolated() {
        let input = paths(&["ok1.png", "bad.png", "boom.png", "ok2.png"]);
        let report = run_batch(&input, 2, &CancelToken::new(), |p| {
            let name = p.to_string_lossy().to_string();
            match name.as_str() {
                "bad.png" => Err(FiberMorphError::InputRead {
                    path: p.to_path_buf(),
                    message: "corrupt".to_string(),
                }),
                "boom.png" => panic!("pipeline exploded"),
                _ => Ok(name),
            }
        })
        .unwrap();

        assert_eq!(report.results, vec!["ok1.png", "ok2.png"]);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].path, PathBuf::from("bad.png"));
        assert!(report.failures[1].message.contains("pipeline exploded"));
    }

    #[test]
    fn cancelled_batch_starts_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let input = paths(&["a.png", "b.png"]);
        let report = run_batch(&input, 1, &cancel, |_| Ok(())).unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.cancelled, input);
        assert_eq!(report.skipped(), 2);
    }

    #[test]
    fn cancel_mid_batch_lets_running_image_finish() {
        let cancel = CancelToken::new();
        let input = paths(&["a.png", "b.png", "c.png"]);
        let report = run_batch(&input, 1, &cancel, |p| {
            cancel.cancel();
            Ok(p.to_path_buf())
        })
        .unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.cancelled.len(), 2);
    }

    #[test]
    fn duration_format() {
        assert_eq!(format_duration(Duration::from_secs(5)), "0h: 00m: 05s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h: 02m: 05s");
    }

    #[test]
    fn invalid_config_fails_before_any_image() {
        let config = Config {
            minsize: -1.0,
            ..Config::default()
        };
        let err = run_section(&paths(&["x.png"]), &config, &CancelToken::new()).unwrap_err();
        assert!(err.is_fatal());
    }
}
