use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use image::{GrayImage, ImageFormat};

use crate::errors::{FiberMorphError, Result};

/// A grayscale input image with its metadata
pub struct RawImage {
    pub pixels: GrayImage,
    pub path: PathBuf,
    pub filename: String,
    /// Pixels per physical unit (mm for curvature, micron for section)
    pub resolution: f64,
}

/// Decodes one family of image files into grayscale pixels
pub trait ImageReader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower-case extensions this reader accepts
    fn extensions(&self) -> &[&'static str];

    fn read(&self, path: &Path) -> Result<GrayImage>;
}

/// Raster formats handled by the `image` crate, converted to 8-bit luma
pub struct RasterReader;

impl ImageReader for RasterReader {
    fn name(&self) -> &'static str {
        "raster"
    }

    fn extensions(&self) -> &[&'static str] {
        &["png", "tif", "tiff", "jpg", "jpeg", "bmp"]
    }

    fn read(&self, path: &Path) -> Result<GrayImage> {
        let img = image::open(path).map_err(|e| FiberMorphError::InputRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(img.to_luma8())
    }
}

/// Readers keyed by lower-case file extension
#[derive(Clone)]
pub struct ReaderRegistry {
    readers: BTreeMap<String, Arc<dyn ImageReader>>,
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(RasterReader));
        registry
    }
}

impl ReaderRegistry {
    pub fn empty() -> Self {
        Self {
            readers: BTreeMap::new(),
        }
    }

    /// Register a reader for every extension it declares, replacing earlier ones
    pub fn register(&mut self, reader: Arc<dyn ImageReader>) {
        for ext in reader.extensions() {
            self.readers.insert(ext.to_string(), Arc::clone(&reader));
        }
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.readers.contains_key(&extension.to_ascii_lowercase())
    }

    /// Narrow the registry to the configured extensions.
    ///
    /// Done once per batch; an extension without a reader is a configuration error.
    pub fn resolve(&self, extensions: &[String]) -> Result<ReaderRegistry> {
        let mut resolved = ReaderRegistry::empty();

        for ext in extensions {
            let key = ext.trim_start_matches('.').to_ascii_lowercase();
            let reader = self.readers.get(&key).ok_or_else(|| {
                FiberMorphError::Config(format!("no image reader available for .{} files", key))
            })?;
            resolved.readers.insert(key, Arc::clone(reader));
        }

        Ok(resolved)
    }

    /// Read an image with the reader registered for its extension
    pub fn load(&self, path: &Path, resolution: f64) -> Result<RawImage> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| FiberMorphError::UnsupportedFormat(path.to_path_buf()))?;

        let reader = self
            .readers
            .get(&ext)
            .ok_or_else(|| FiberMorphError::UnsupportedFormat(path.to_path_buf()))?;

        let filename = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| FiberMorphError::InvalidPath(path.to_path_buf()))?
            .to_string();

        let pixels = reader.read(path)?;
        log::debug!(
            "Read {} ({}x{}) with {} reader",
            path.display(),
            pixels.width(),
            pixels.height(),
            reader.name()
        );

        Ok(RawImage {
            pixels,
            path: path.to_path_buf(),
            filename,
            resolution,
        })
    }
}

/// List image files under `input` with one of the given extensions.
///
/// Directories are searched recursively; macOS resource forks (`._*`) and
/// `__MACOSX` folders are skipped. The result is sorted.
pub fn list_images<P: AsRef<Path>>(input: P, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let input = input.as_ref();

    if !input.exists() {
        return Err(FiberMorphError::InvalidPath(input.to_path_buf()));
    }

    let wanted: Vec<String> = extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    if input.is_file() {
        return if has_extension(input, &wanted) {
            Ok(vec![input.to_path_buf()])
        } else {
            Err(FiberMorphError::UnsupportedFormat(input.to_path_buf()))
        };
    }

    let mut files = Vec::new();
    find_images_recursive(input, &wanted, &mut files)?;
    files.sort();

    Ok(files)
}

fn find_images_recursive(dir_path: &Path, wanted: &[String], result: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir_path)? {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

        if path.is_dir() {
            if name != "__MACOSX" {
                find_images_recursive(&path, wanted, result)?;
            }
        } else if path.is_file() && !name.starts_with("._") && has_extension(&path, wanted) {
            result.push(path);
        }
    }

    Ok(())
}

fn has_extension(path: &Path, wanted: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| wanted.iter().any(|w| w.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `a/b/fiber.png` relative to `root` becomes `a__b__fiber_png`
fn flattened_name(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut parts: Vec<String> = relative
        .parent()
        .map(|dir| {
            dir.components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let stem = stem_of(path);
    parts.push(match path.extension() {
        Some(ext) => format!("{}_{}", stem, ext.to_string_lossy()),
        None => stem,
    });

    parts.join("__")
}

/// Give every image of a batch a distinct identifier.
///
/// The file stem is used when no other image in the batch shares it. Images
/// with a shared stem are named by their path relative to `root` instead,
/// see `flattened_name`. Any remaining clash gets a `-2`, `-3`, ... suffix
/// in path order. Identifiers name table rows and every per-image file.
pub fn image_ids<P: AsRef<Path>>(paths: &[PathBuf], root: P) -> HashMap<PathBuf, String> {
    let root = root.as_ref();

    let mut stem_counts: HashMap<String, usize> = HashMap::new();
    for path in paths {
        *stem_counts.entry(stem_of(path)).or_default() += 1;
    }

    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();

    let mut taken = HashSet::with_capacity(paths.len());
    let mut ids = HashMap::with_capacity(paths.len());
    for path in sorted {
        let stem = stem_of(path);
        let base = if stem_counts[&stem] > 1 {
            flattened_name(path, root)
        } else {
            stem
        };

        let mut id = base.clone();
        let mut n = 2;
        while taken.contains(&id) {
            id = format!("{}-{}", base, n);
            n += 1;
        }
        taken.insert(id.clone());
        ids.insert(path.clone(), id);
    }

    ids
}

/// Save a grayscale image as PNG, creating parent directories
pub fn save_gray_image<P: AsRef<Path>>(image: &GrayImage, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    image.save_with_format(path, ImageFormat::Png)?;

    Ok(())
}
