use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use image::{GrayImage, Luma};
use tempfile::tempdir;

use fibermorph_lib::config::{AnalysisMode, Config};
use fibermorph_lib::runner::{run_analysis, run_curvature, CancelToken};
use fibermorph_lib::{list_images, save_gray_image};

fn draw_disc(img: &mut GrayImage, cx: f64, cy: f64, r: f64) {
    let (w, h) = img.dimensions();
    let x0 = (cx - r).floor().max(0.0) as u32;
    let y0 = (cy - r).floor().max(0.0) as u32;
    let x1 = ((cx + r).ceil() as u32).min(w - 1);
    let y1 = ((cy + r).ceil() as u32).min(h - 1);
    for y in y0..=y1 {
        for x in x0..=x1 {
            if (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2) <= r * r {
                img.put_pixel(x, y, Luma([25]));
            }
        }
    }
}

/// Dark arc of the given radius on a light background
fn arc_image(radius: f64) -> GrayImage {
    let mut img = GrayImage::from_pixel(300, 220, Luma([235]));
    for i in 0..=600 {
        let t = PI * i as f64 / 600.0;
        draw_disc(&mut img, 150.0 + radius * t.cos(), 40.0 + radius * t.sin(), 2.0);
    }
    img
}

fn section_image() -> GrayImage {
    let mut img = GrayImage::from_pixel(400, 400, Luma([230]));
    draw_disc(&mut img, 200.0, 200.0, 70.0);
    img
}

fn config_for(input: &Path, output: &Path) -> Config {
    Config {
        input_path: input.to_string_lossy().to_string(),
        output_base_dir: output.to_string_lossy().to_string(),
        min_particle_area: Some(50),
        jobs: Some(2),
        ..Config::default()
    }
}

fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.records().map(|r| r.unwrap()).collect()
}

#[test]
fn corrupt_image_is_skipped_and_batch_succeeds() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();

    save_gray_image(&arc_image(60.0), input.path().join("fiber_a.png")).unwrap();
    save_gray_image(&arc_image(80.0), input.path().join("fiber_b.png")).unwrap();
    save_gray_image(&arc_image(100.0), input.path().join("fiber_d.png")).unwrap();
    fs::write(input.path().join("fiber_c.png"), b"\x89PNG truncated").unwrap();

    let config = config_for(input.path(), output.path());
    let summary = run_analysis(&config, &CancelToken::new()).unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 1);

    let run_dir = output.path().join("fibermorph_curvature");
    assert_eq!(summary.output.run_dir, run_dir);

    let rows = read_rows(&run_dir.join("curvature_summary_data.csv"));
    let names: Vec<&str> = rows.iter().map(|r| &r[0]).collect();
    assert_eq!(names, vec!["fiber_a", "fiber_b", "fiber_d"]);

    // mean curvature in 1/mm follows 1/radius
    let curv: Vec<f64> = rows.iter().map(|r| r[5].parse().unwrap()).collect();
    for (c, radius) in curv.iter().zip([60.0, 80.0, 100.0]) {
        let expected = 132.0 / radius;
        assert!((c - expected).abs() / expected < 0.1, "{} vs {}", c, expected);
    }
}

#[test]
fn results_do_not_depend_on_worker_count() {
    let input = tempdir().unwrap();
    for (i, r) in [50.0, 70.0, 90.0, 110.0].iter().enumerate() {
        save_gray_image(&arc_image(*r), input.path().join(format!("img_{}.png", i))).unwrap();
    }
    let paths = list_images(input.path(), &["png".to_string()]).unwrap();

    let mut tables = Vec::new();
    for jobs in [1, 4] {
        let output = tempdir().unwrap();
        let config = Config {
            jobs: Some(jobs),
            window_size: vec![40.0],
            ..config_for(input.path(), output.path())
        };
        let (report, out) = run_curvature(&paths, &config, &CancelToken::new()).unwrap();
        assert_eq!(report.results.len(), 4);
        tables.push(fs::read_to_string(&out.tables[1]).unwrap());
    }

    assert_eq!(tables[0], tables[1]);
}

#[test]
fn within_element_tables_and_config_are_written() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    save_gray_image(&arc_image(80.0), input.path().join("curl.png")).unwrap();

    let config = Config {
        within_element: true,
        window_size: vec![0.25],
        window_unit: fibermorph_lib::WindowUnit::Mm,
        ..config_for(input.path(), output.path())
    };
    run_analysis(&config, &CancelToken::new()).unwrap();

    let run_dir = output.path().join("fibermorph_curvature");
    let table = run_dir
        .join("WithinElement")
        .join("WithinElement_curl_WindowSize-0.25mm_Label-1.csv");
    let rows = read_rows(&table);
    assert!(rows.len() >= 5);
    assert!(rows.iter().all(|r| &r[8] == "fitted" || &r[8] == "straight"));

    let saved = Config::from_file(run_dir.join("config_used.toml")).unwrap();
    assert_eq!(saved.window_size, vec![0.25]);
    assert!(saved.within_element);
}

#[test]
fn images_sharing_a_name_keep_separate_outputs() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    save_gray_image(&arc_image(60.0), input.path().join("a").join("fiber.png")).unwrap();
    save_gray_image(&arc_image(100.0), input.path().join("b").join("fiber.png")).unwrap();

    let config = Config {
        within_element: true,
        save_image: true,
        ..config_for(input.path(), output.path())
    };
    let summary = run_analysis(&config, &CancelToken::new()).unwrap();
    assert_eq!(summary.processed, 2);

    let run_dir = output.path().join("fibermorph_curvature");
    let rows = read_rows(&run_dir.join("curvature_summary_data.csv"));
    let names: Vec<&str> = rows.iter().map(|r| &r[0]).collect();
    assert_eq!(names, vec!["a__fiber_png", "b__fiber_png"]);

    // each image keeps its own curvature
    let curv: Vec<f64> = rows.iter().map(|r| r[5].parse().unwrap()).collect();
    assert!(curv[0] > curv[1] * 1.3);

    for name in ["a__fiber_png", "b__fiber_png"] {
        let within = run_dir
            .join("WithinElement")
            .join(format!("WithinElement_{}_Label-1.csv", name));
        assert!(within.exists(), "{}", within.display());
        assert!(run_dir.join("pruned").join(format!("{}.png", name)).exists());
    }
}

#[test]
fn several_window_sizes_give_one_row_each() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    save_gray_image(&arc_image(80.0), input.path().join("curl.png")).unwrap();

    let config = Config {
        window_size: vec![40.0, 100.0],
        ..config_for(input.path(), output.path())
    };
    run_analysis(&config, &CancelToken::new()).unwrap();

    let rows = read_rows(&output.path().join("fibermorph_curvature").join("curvature_summary_data.csv"));
    let names: Vec<&str> = rows.iter().map(|r| &r[0]).collect();
    assert_eq!(names, vec!["curl_WindowSize-40px", "curl_WindowSize-100px"]);

    let valid_windows: Vec<usize> = rows.iter().map(|r| r[3].parse().unwrap()).collect();
    assert!(valid_windows[0] > valid_windows[1]);
}

#[test]
fn cancelled_run_still_writes_tables() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    save_gray_image(&arc_image(60.0), input.path().join("one.png")).unwrap();
    save_gray_image(&arc_image(80.0), input.path().join("two.png")).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let summary = run_analysis(&config_for(input.path(), output.path()), &cancel).unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.cancelled, 2);
    let table = output.path().join("fibermorph_curvature").join("curvature_summary_data.csv");
    assert!(read_rows(&table).is_empty());
}

#[test]
fn section_run_writes_regions_and_crops() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    save_gray_image(&section_image(), input.path().join("cross.png")).unwrap();
    fs::write(input.path().join("empty.tif"), b"").unwrap();

    let config = Config {
        analysis: AnalysisMode::Section,
        save_image: true,
        section_crop_padding: 10,
        ..config_for(input.path(), output.path())
    };
    let summary = run_analysis(&config, &CancelToken::new()).unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);

    let run_dir = output.path().join("fibermorph_section");
    let rows = read_rows(&run_dir.join("summary_section_data.csv"));
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][0], "cross");
    assert_eq!(&rows[0][2], "true");

    let max_diameter: f64 = rows[0][5].parse().unwrap();
    assert!((max_diameter - 140.0 / 4.25).abs() < 0.5);

    let label = &rows[0][1];
    assert!(run_dir.join("crop").join(format!("cross_region-{}.png", label)).exists());
    assert!(run_dir.join("binary").join(format!("cross_region-{}.png", label)).exists());
}

#[test]
fn empty_input_still_emits_summary_table() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();

    let config = config_for(input.path(), output.path());
    let summary = run_analysis(&config, &CancelToken::new()).unwrap();
    assert_eq!(summary.processed, 0);

    let table = output.path().join("fibermorph_curvature").join("curvature_summary_data.csv");
    assert!(table.exists());
    assert!(read_rows(&table).is_empty());
}
