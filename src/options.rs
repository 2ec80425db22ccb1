use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where a group of entries (sub-folders, parent link) goes relative to the images.
///
/// Accepts `"none"`, `"first"`, `"last"` or a boolean in config files:
/// `true` means `first`, `false` means `none`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(try_from = "RawPlacement", rename_all = "lowercase")]
pub enum Placement {
    #[default]
    None,
    First,
    Last,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPlacement {
    Flag(bool),
    Name(String),
}

impl TryFrom<RawPlacement> for Placement {
    type Error = String;

    fn try_from(raw: RawPlacement) -> Result<Self, Self::Error> {
        match raw {
            RawPlacement::Flag(true) => Ok(Placement::First),
            RawPlacement::Flag(false) => Ok(Placement::None),
            RawPlacement::Name(name) => match name.to_lowercase().as_str() {
                "none" | "" => Ok(Placement::None),
                "first" => Ok(Placement::First),
                "last" => Ok(Placement::Last),
                other => Err(format!("placement inconnu : {other}")),
            },
        }
    }
}

/// Icon filename patterns used to tell listing rows apart.
/// Tested in the order parent, folder, image.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FileIconTypes {
    pub parent: String,
    pub folder: String,
    pub image: String,
}

impl Default for FileIconTypes {
    fn default() -> Self {
        Self {
            parent: r"/back\.gif$".to_string(),
            folder: r"/folder\.gif$".to_string(),
            image: r"/image\d+\.gif$".to_string(),
        }
    }
}

/// Gallery configuration. Every field has a default, so a config file only
/// needs the keys it wants to change.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct GalleryOptions {
    /// Custom stylesheet added after the base one (relative to the page).
    pub gallery_stylesheet: Option<String>,
    /// Regex selecting thumbnail files by name. It is matched against the
    /// URL with its last extension removed, so `^(.+)_small$` matches
    /// `photo_small.jpg` and a pattern ending in `\.jpg$` never matches.
    /// The first group must give the name of the main image.
    pub thumbnail_name_regex: Option<String>,
    /// Used as thumbnail source for images without a thumbnail file.
    /// `%` is replaced by the absolute image URL.
    pub thumbnail_generator_url: Option<String>,
    pub description_file: String,
    pub show_sub_folders: Placement,
    pub show_parent_link: Placement,
    /// Lightbox image bounds.
    pub main_image_width: u32,
    pub main_image_height: u32,
    /// Replaces a leading `@` in the library URLs below.
    pub library_base_url: String,
    pub external_js: Vec<String>,
    pub external_css: Vec<String>,
    pub base_gallery_css: String,
    pub file_icon_types: FileIconTypes,
    /// Bounds and name template (`%s` = original name) of generated thumbnails.
    pub thumbnail_max_width: u32,
    pub thumbnail_max_height: u32,
    pub thumbnail_name: String,
}

impl Default for GalleryOptions {
    fn default() -> Self {
        Self {
            gallery_stylesheet: Some("gallery.css".to_string()),
            thumbnail_name_regex: Some("^(.+)_small$".to_string()),
            thumbnail_generator_url: None,
            description_file: "description.json".to_string(),
            show_sub_folders: Placement::First,
            show_parent_link: Placement::None,
            main_image_width: 1200,
            main_image_height: 800,
            library_base_url: "/scripts".to_string(),
            external_js: vec![
                "http://code.jquery.com/jquery-1.11.3.min.js".to_string(),
                "@/external/lightcase/lightcase.min.js".to_string(),
            ],
            external_css: vec!["@/external/lightcase/css/lightcase.css".to_string()],
            base_gallery_css: "@/IndexGallery.css".to_string(),
            file_icon_types: FileIconTypes::default(),
            thumbnail_max_width: 250,
            thumbnail_max_height: 250,
            thumbnail_name: "%s_small".to_string(),
        }
    }
}

impl GalleryOptions {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Impossible de lire la configuration : {}", path.display()))?;
        let options: GalleryOptions = serde_json::from_str(&data)
            .with_context(|| format!("Configuration invalide : {}", path.display()))?;
        Ok(options)
    }

    /// Expand a library URL: a leading `@` stands for `library_base_url`.
    pub fn library_url(&self, url: &str) -> String {
        match url.strip_prefix('@') {
            Some(rest) => format!("{}{rest}", self.library_base_url),
            None => url.to_string(),
        }
    }
}
