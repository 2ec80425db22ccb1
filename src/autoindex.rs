use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use indicatif::HumanBytes;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::path::Path;

use crate::render::escape_html;

/// Characters escaped in a single path segment of a listing link.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Same, for a full path.
const PATH: &AsciiSet = &SEGMENT.remove(b'/');

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "tiff", "tif", "webp", "bmp"];

struct Entry {
    name: String,
    is_dir: bool,
    modified: Option<DateTime<Local>>,
    size: u64,
}

impl Entry {
    /// Icon and alt text, named the way Apache's mod_autoindex does.
    fn icon(&self) -> (&'static str, &'static str) {
        if self.is_dir {
            return ("/icons/folder.gif", "[DIR]");
        }
        let ext = Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            ("/icons/image2.gif", "[IMG]")
        } else if matches!(ext.as_str(), "txt" | "json" | "md" | "html") {
            ("/icons/text.gif", "[TXT]")
        } else {
            ("/icons/unknown.gif", "[   ]")
        }
    }
}

/// Flat placeholder for the icons referenced by `listing_html`, as GIF
/// bytes. `None` for names the listing never uses.
pub fn icon_gif(name: &str) -> Option<Vec<u8>> {
    let color = match name {
        "back.gif" => [70, 110, 200, 255],
        "folder.gif" => [230, 190, 60, 255],
        "image2.gif" => [80, 170, 90, 255],
        "text.gif" => [235, 235, 235, 255],
        "unknown.gif" => [150, 150, 150, 255],
        "blank.gif" => [0, 0, 0, 0],
        _ => return None,
    };
    let img = image::RgbaImage::from_pixel(20, 22, image::Rgba(color));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Gif)
        .ok()?;
    Some(buf)
}

fn read_entries(dir: &Path) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Impossible de lister {}", dir.display()))?
        .filter_map(|e| e.ok())
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        entries.push(Entry {
            name,
            is_dir: meta.is_dir(),
            modified: meta.modified().ok().map(DateTime::<Local>::from),
            size: meta.len(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// URL path of the parent of `url_path` (`/a/b/` → `/a/`).
fn parent_path(url_path: &str) -> String {
    let trimmed = url_path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => trimmed[..=pos].to_string(),
        None => "/".to_string(),
    }
}

/// Render an Apache-style index page for `dir`, served at `url_path`.
pub fn listing_html(dir: &Path, url_path: &str) -> Result<String> {
    let entries = read_entries(dir)?;
    let title = format!("Index of {}", escape_html(url_path));

    let mut rows = String::new();
    if url_path != "/" {
        rows.push_str(&format!(
            "<tr><td valign=\"top\"><img src=\"/icons/back.gif\" alt=\"[PARENTDIR]\"></td>\
             <td><a href=\"{}\">Parent Directory</a></td><td>&nbsp;</td><td align=\"right\">  - </td></tr>\n",
            escape_html(&utf8_percent_encode(&parent_path(url_path), PATH).to_string())
        ));
    }
    for entry in &entries {
        let (icon, alt) = entry.icon();
        let slash = if entry.is_dir { "/" } else { "" };
        let href = format!("{}{slash}", utf8_percent_encode(&entry.name, SEGMENT));
        let modified = entry
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let size = if entry.is_dir {
            "-".to_string()
        } else {
            HumanBytes(entry.size).to_string()
        };
        rows.push_str(&format!(
            "<tr><td valign=\"top\"><img src=\"{icon}\" alt=\"{alt}\"></td>\
             <td><a href=\"{}\">{}{slash}</a></td>\
             <td align=\"right\">{modified}  </td><td align=\"right\">{size}</td></tr>\n",
            escape_html(&href),
            escape_html(&entry.name),
        ));
    }

    Ok(format!(
        r#"<!DOCTYPE HTML PUBLIC "-//W3C//DTD HTML 3.2 Final//EN">
<html>
 <head>
  <title>{title}</title>
 </head>
 <body>
<h1>{title}</h1>
  <table>
   <tr><th valign="top"><img src="/icons/blank.gif" alt="[ICO]"></th><th>Name</th><th>Last modified</th><th>Size</th></tr>
   <tr><th colspan="4"><hr></th></tr>
{rows}   <tr><th colspan="4"><hr></th></tr>
</table>
</body></html>
"#
    ))
}
