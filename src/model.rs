use anyhow::{Context, Result};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use regex::Regex;
use std::collections::HashMap;

use crate::description::{DescriptionItem, ExternalDescription, GalleryDescription};
use crate::listing::ListingRow;
use crate::options::{GalleryOptions, Placement};

/// Characters escaped in `href` and `url()` values. Listing URLs are
/// decoded when scraped, so a `%` here is part of the file name.
pub const URL_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Characters escaped when an URL is substituted into a query string.
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'\'');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Parent,
    Folder,
    Image,
    Thumbnail,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Parent => "parent",
            EntryKind::Folder => "folder",
            EntryKind::Image => "image",
            EntryKind::Thumbnail => "thumbnail",
        }
    }
}

/// Result of feeding one listing row to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowClass {
    DescriptionFile,
    Entry(EntryKind),
    Unrecognized,
}

/// Icon pattern that tags a row with `kind`.
#[derive(Debug, Clone)]
pub struct IconRule {
    pub kind: EntryKind,
    pub pattern: Regex,
}

/// Compile the icon rules in evaluation order: parent, folder, image.
pub fn icon_rules(options: &GalleryOptions) -> Result<Vec<IconRule>> {
    let types = &options.file_icon_types;
    [
        (EntryKind::Parent, &types.parent),
        (EntryKind::Folder, &types.folder),
        (EntryKind::Image, &types.image),
    ]
    .into_iter()
    .map(|(kind, pattern)| -> Result<IconRule> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("Motif d'icône {} invalide : {pattern}", kind.as_str()))?;
        Ok(IconRule { kind, pattern })
    })
    .collect()
}

/// Remove the last file extension (`a/b.c.jpg` → `a/b.c`).
pub fn crop_extension(url: &str) -> &str {
    match url.rfind('.') {
        Some(pos) if pos + 1 < url.len() && !url[pos + 1..].contains('/') => &url[..pos],
        _ => url,
    }
}

/// An item of the description that exists in the listing.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleItem<'a> {
    pub item: &'a DescriptionItem,
    pub kind: EntryKind,
    /// Thumbnail source, images only.
    pub thumbnail: Option<String>,
}

/// Everything learned from one listing page.
#[derive(Debug, Clone)]
pub struct GalleryModel {
    page_url: String,
    rules: Vec<IconRule>,
    thumbnail_pattern: Option<Regex>,
    thumbnail_generator: Option<String>,
    description_file: String,
    show_sub_folders: Placement,

    files: HashMap<String, EntryKind>,
    thumbnail_index: HashMap<String, String>,
    images: Vec<String>,
    folders: Vec<String>,
    parent_link: Option<String>,
    has_description: bool,
}

impl GalleryModel {
    /// Empty model for the page at `page_url`; relative item URLs are
    /// resolved against its folder.
    pub fn new(options: &GalleryOptions, page_url: &str) -> Result<Self> {
        let thumbnail_pattern = options
            .thumbnail_name_regex
            .as_deref()
            .map(|re| Regex::new(re).with_context(|| format!("Motif de vignette invalide : {re}")))
            .transpose()?;
        Ok(Self {
            page_url: page_url.to_string(),
            rules: icon_rules(options)?,
            thumbnail_pattern,
            thumbnail_generator: options.thumbnail_generator_url.clone(),
            description_file: options.description_file.clone(),
            show_sub_folders: options.show_sub_folders,
            files: HashMap::new(),
            thumbnail_index: HashMap::new(),
            images: Vec::new(),
            folders: Vec::new(),
            parent_link: None,
            has_description: false,
        })
    }

    pub fn from_rows(options: &GalleryOptions, page_url: &str, rows: &[ListingRow]) -> Result<Self> {
        let mut model = Self::new(options, page_url)?;
        for row in rows {
            model.add_row(&row.icon, &row.href);
        }
        Ok(model)
    }

    fn classify_icon(&self, icon: &str) -> Option<EntryKind> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(icon))
            .map(|rule| rule.kind)
    }

    /// Classify one row and record it.
    pub fn add_row(&mut self, icon: &str, url: &str) -> RowClass {
        if url == self.description_file {
            self.has_description = true;
            return RowClass::DescriptionFile;
        }
        let Some(kind) = self.classify_icon(icon) else {
            return RowClass::Unrecognized;
        };

        match kind {
            EntryKind::Parent => {
                if self.parent_link.is_none() {
                    self.parent_link = Some(url.to_string());
                }
            }
            EntryKind::Image => {
                let owner = self.thumbnail_pattern.as_ref().and_then(|re| {
                    re.captures(crop_extension(url))
                        .and_then(|caps| caps.get(1))
                        .map(|m| m.as_str().to_string())
                });
                if let Some(owner) = owner {
                    self.thumbnail_index.insert(owner, url.to_string());
                    return RowClass::Entry(EntryKind::Thumbnail);
                }
                self.insert_entry(url.to_string(), EntryKind::Image);
            }
            EntryKind::Folder => {
                let url = url.strip_suffix('/').unwrap_or(url);
                self.insert_entry(url.to_string(), EntryKind::Folder);
            }
            EntryKind::Thumbnail => {}
        }
        RowClass::Entry(kind)
    }

    fn insert_entry(&mut self, url: String, kind: EntryKind) {
        if self.files.contains_key(&url) {
            return;
        }
        self.files.insert(url.clone(), kind);
        match kind {
            EntryKind::Folder => self.folders.push(url),
            _ => self.images.push(url),
        }
    }

    pub fn kind_of(&self, url: &str) -> Option<EntryKind> {
        self.files.get(url).copied()
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn folders(&self) -> &[String] {
        &self.folders
    }

    pub fn parent_link(&self) -> Option<&str> {
        self.parent_link.as_deref()
    }

    pub fn has_description(&self) -> bool {
        self.has_description
    }

    pub fn description_file(&self) -> &str {
        &self.description_file
    }

    pub fn thumbnail_index(&self) -> &HashMap<String, String> {
        &self.thumbnail_index
    }

    /// Listing order filtered by the sub-folder placement.
    fn ordered_urls(&self) -> Vec<&String> {
        match self.show_sub_folders {
            Placement::First => self.folders.iter().chain(&self.images).collect(),
            Placement::Last => self.images.iter().chain(&self.folders).collect(),
            Placement::None => self.images.iter().collect(),
        }
    }

    /// Build the gallery description. An external description with `items`
    /// is used as is; without `items` it only contributes its text fields.
    pub fn build_description(&self, external: Option<ExternalDescription>) -> GalleryDescription {
        let external = external.unwrap_or_default();
        let items = match external.items {
            Some(items) => items,
            None => self
                .ordered_urls()
                .into_iter()
                .map(|url| DescriptionItem {
                    url: url.clone(),
                    ..Default::default()
                })
                .collect(),
        };
        GalleryDescription {
            title: external.title,
            subtitle: external.subtitle,
            parent_link_text: external.parent_link,
            items,
        }
    }

    /// `url` resolved against the folder of the page.
    pub fn absolute_url(&self, url: &str) -> String {
        if url.starts_with('/') || url.contains("://") {
            return url.to_string();
        }
        let folder = match self.page_url.rfind('/') {
            Some(pos) => &self.page_url[..=pos],
            None => "",
        };
        format!("{folder}{url}")
    }

    /// Thumbnail source for an image, ready for use as an URL: its thumbnail
    /// file, else the generator URL, else the image itself.
    pub fn thumbnail_for(&self, url: &str) -> String {
        if let Some(thumb) = self.thumbnail_index.get(crop_extension(url)) {
            return utf8_percent_encode(thumb, URL_UNSAFE).to_string();
        }
        if let Some(template) = &self.thumbnail_generator {
            let absolute = self.absolute_url(url);
            let encoded = utf8_percent_encode(&absolute, QUERY_VALUE).to_string();
            return template.replacen('%', &encoded, 1);
        }
        utf8_percent_encode(url, URL_UNSAFE).to_string()
    }

    /// Items of `description` that exist in the listing, in order.
    pub fn visible_items<'a>(&self, description: &'a GalleryDescription) -> Vec<VisibleItem<'a>> {
        description
            .items
            .iter()
            .filter_map(|item| {
                let kind = self.kind_of(&item.url)?;
                let thumbnail = (kind == EntryKind::Image).then(|| self.thumbnail_for(&item.url));
                Some(VisibleItem {
                    item,
                    kind,
                    thumbnail,
                })
            })
            .collect()
    }
}
