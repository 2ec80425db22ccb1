use anyhow::Result;
use console::style;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

use crate::options::GalleryOptions;

/// JPEG quality for resized copies (0–100).
const JPEG_QUALITY: u8 = 97;

/// Extensions that the `image` crate can decode with our feature set.
const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "tiff", "tif"];

#[derive(Debug, thiserror::Error)]
pub enum ResizeError {
    #[error("paramètre org manquant")]
    MissingOrigin,
    #[error("chemin invalide : {0}")]
    InvalidPath(String),
    #[error("image illisible : {}", .path.display())]
    Unprocessable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("échec de l'encodage : {}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl ResizeError {
    /// HTTP status reported for this error.
    pub fn status(&self) -> u16 {
        match self {
            ResizeError::MissingOrigin | ResizeError::InvalidPath(_) => 400,
            ResizeError::Unprocessable { .. } | ResizeError::Encode { .. } => 500,
        }
    }
}

/// Encoding of a resized copy, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Gif,
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "gif" => OutputFormat::Gif,
            "png" => OutputFormat::Png,
            _ => OutputFormat::Jpeg,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            OutputFormat::Gif => "image/gif",
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

/// Bounds and naming of resized copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeSettings {
    pub max_width: u32,
    pub max_height: u32,
    /// `%s` is replaced by the original file stem.
    pub name_template: String,
}

impl ResizeSettings {
    pub fn from_options(options: &GalleryOptions) -> Self {
        Self {
            max_width: options.thumbnail_max_width,
            max_height: options.thumbnail_max_height,
            name_template: options.thumbnail_name.clone(),
        }
    }

    /// Where the resized copy of `source` is stored: same directory,
    /// templated stem, lower-cased original extension.
    pub fn destination(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy();
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "jpg".to_string());
        let name = format!("{}.{ext}", self.name_template.replacen("%s", &stem, 1));
        source.with_file_name(name)
    }

    /// `true` if `path` looks like a copy produced with this template.
    pub fn is_generated(&self, path: &Path) -> bool {
        let stem = path.file_stem().unwrap_or_default().to_string_lossy();
        let (prefix, suffix) = self
            .name_template
            .split_once("%s")
            .unwrap_or((self.name_template.as_str(), ""));
        stem.len() > prefix.len() + suffix.len()
            && stem.starts_with(prefix)
            && stem.ends_with(suffix)
    }
}

/// Size that fits `width`×`height` inside the bounds, keeping the aspect
/// ratio. Width is reduced first, then height from the updated values.
/// Never upscales.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let (max_w, max_h) = (f64::from(max_width.max(1)), f64::from(max_height.max(1)));
    let (mut w, mut h) = (f64::from(width), f64::from(height));
    if w > max_w {
        h *= max_w / w;
        w = max_w;
    }
    if h > max_h {
        w *= max_h / h;
        h = max_h;
    }
    ((w as u32).max(1), (h as u32).max(1))
}

fn shrink(img: DynamicImage, settings: &ResizeSettings) -> DynamicImage {
    let (w, h) = fit_within(img.width(), img.height(), settings.max_width, settings.max_height);
    if (w, h) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(w, h, FilterType::Triangle)
    }
}

fn encode(img: &DynamicImage, format: OutputFormat) -> image::ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            let encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
        }
        OutputFormat::Png => img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?,
        OutputFormat::Gif => DynamicImage::ImageRgba8(img.to_rgba8())
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Gif)?,
    }
    Ok(buf)
}

/// A resized image ready to be sent.
#[derive(Debug)]
pub struct Resized {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    /// Where the copy was stored, `None` when it could not be written.
    pub cached: Option<PathBuf>,
}

/// Shrink `source` to the configured bounds and store the result beside it.
/// If the destination cannot be written the bytes are only returned.
pub fn resize_original(source: &Path, settings: &ResizeSettings) -> Result<Resized, ResizeError> {
    let img = image::open(source).map_err(|e| ResizeError::Unprocessable {
        path: source.to_path_buf(),
        source: e,
    })?;
    let small = shrink(img, settings);

    let dest = settings.destination(source);
    let format = OutputFormat::from_extension(
        &dest.extension().unwrap_or_default().to_string_lossy(),
    );
    let bytes = encode(&small, format).map_err(|e| ResizeError::Encode {
        path: dest.clone(),
        source: e,
    })?;

    let cached = std::fs::write(&dest, &bytes).ok().map(|()| dest);
    Ok(Resized {
        bytes,
        format,
        cached,
    })
}

/// Return `true` if the resized copy is still fresh (newer than the source).
pub fn copy_is_fresh(source: &Path, copy: &Path) -> bool {
    let Ok(src_meta) = source.metadata() else {
        return false;
    };
    let Ok(copy_meta) = copy.metadata() else {
        return false;
    };
    let Ok(src_mtime) = src_meta.modified() else {
        return false;
    };
    let Ok(copy_mtime) = copy_meta.modified() else {
        return false;
    };
    copy_mtime >= src_mtime
}

/// Return `true` if we can decode this file extension.
pub fn can_resize(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Originals under `root` whose resized copy is missing or stale.
pub fn pending_originals(root: &Path, settings: &ResizeSettings) -> Vec<PathBuf> {
    let mut pending: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.') || e.depth() == 0)
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| can_resize(p) && !settings.is_generated(p))
        .filter(|p| !copy_is_fresh(p, &settings.destination(p)))
        .collect();
    pending.sort();
    pending
}

/// Resize `originals` on a scoped worker pool. Stops picking new files once
/// `interrupted` is set. Returns the number of failures.
fn resize_all(
    originals: &[PathBuf],
    settings: &ResizeSettings,
    pb: &ProgressBar,
    interrupted: &AtomicBool,
) -> usize {
    let n_workers = std::thread::available_parallelism()
        .map(|n| n.get().min(8))
        .unwrap_or(4);
    let chunk_size = originals.len().div_ceil(n_workers).max(1);

    std::thread::scope(|s| {
        let handles: Vec<_> = originals
            .chunks(chunk_size)
            .map(|chunk| {
                s.spawn(move || {
                    let mut failed = 0usize;
                    for original in chunk {
                        if interrupted.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Err(e) = resize_original(original, settings) {
                            failed += 1;
                            pb.suspend(|| {
                                eprintln!("  {} {e}", style("!").yellow().bold());
                            });
                        }
                        pb.inc(1);
                    }
                    failed
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap_or(0)).sum()
    })
}

/// Generate the missing resized copies for every image under `root`.
pub fn run_thumbs(root: &Path, options: &GalleryOptions) -> Result<()> {
    if !root.is_dir() {
        anyhow::bail!("{} n'est pas un dossier", root.display());
    }
    let settings = ResizeSettings::from_options(options);
    let pending = pending_originals(root, &settings);

    if pending.is_empty() {
        println!("  {} Toutes les vignettes sont à jour.", style("✔").green().bold());
        return Ok(());
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow::anyhow!("Impossible d'installer le gestionnaire Ctrl+C : {e}"))?;
    }

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.green/dark_gray} {pos}/{len}  {percent}%  {elapsed_precise}")
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .progress_chars("━╸─"),
    );

    let failed = resize_all(&pending, &settings, &pb, &interrupted);
    pb.finish_and_clear();

    if interrupted.load(Ordering::SeqCst) {
        println!("  {} Interrompu", style("!").yellow().bold());
    }
    println!(
        "  {} {} vignettes générées  ·  {} échecs",
        style("✔").green().bold(),
        style(pb.position() as usize - failed).green().bold(),
        style(failed).yellow()
    );
    Ok(())
}
