use anyhow::{Context, Result};
use console::style;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::model::GalleryModel;

/// One entry of a gallery, in display order.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DescriptionItem {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Content of a description file placed next to the pictures.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ExternalDescription {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default, rename = "parentLink")]
    pub parent_link: Option<String>,
    /// When present (even empty) it replaces the listing order entirely.
    #[serde(default)]
    pub items: Option<Vec<DescriptionItem>>,
}

/// What the renderer draws.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GalleryDescription {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub parent_link_text: Option<String>,
    pub items: Vec<DescriptionItem>,
}

/// Somewhere a description file can be read from, relative to the page.
pub trait DescriptionSource {
    fn fetch(&self, file_name: &str) -> Result<ExternalDescription>;
}

/// Fetches the description next to a remote listing page.
pub struct HttpSource {
    page_url: Url,
    client: reqwest::blocking::Client,
}

impl HttpSource {
    pub fn new(page_url: &str) -> Result<Self> {
        let page_url =
            Url::parse(page_url).with_context(|| format!("URL invalide : {page_url}"))?;
        Ok(Self {
            page_url,
            client: reqwest::blocking::Client::new(),
        })
    }

    /// The listing page itself.
    pub fn page(&self) -> Result<String> {
        fetch_text(&self.client, self.page_url.as_str())
    }
}

/// GET a resource and return its body; any non-2xx status is an error.
pub fn fetch_text(client: &reqwest::blocking::Client, url: &str) -> Result<String> {
    client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.text())
        .with_context(|| format!("Échec du téléchargement : {url}"))
}

impl DescriptionSource for HttpSource {
    fn fetch(&self, file_name: &str) -> Result<ExternalDescription> {
        let url = self
            .page_url
            .join(file_name)
            .with_context(|| format!("Impossible de résoudre {file_name}"))?;
        let body = fetch_text(&self.client, url.as_str())?;
        serde_json::from_str(&body).with_context(|| format!("Description invalide : {url}"))
    }
}

/// Reads the description from the directory being listed.
pub struct DirSource {
    pub dir: PathBuf,
}

impl DescriptionSource for DirSource {
    fn fetch(&self, file_name: &str) -> Result<ExternalDescription> {
        let path = self.dir.join(file_name);
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("Impossible de lire {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("Description invalide : {}", path.display()))
    }
}

/// Outcome of the description request.
#[derive(Debug)]
pub enum DescriptionFetch {
    Loaded(ExternalDescription),
    Failed(String),
}

impl DescriptionFetch {
    pub fn from_source(source: &dyn DescriptionSource, file_name: &str) -> Self {
        match source.fetch(file_name) {
            Ok(description) => DescriptionFetch::Loaded(description),
            Err(e) => DescriptionFetch::Failed(format!("{e:#}")),
        }
    }

    /// Turn the outcome into the description to render. A failed fetch
    /// falls back to the listing order.
    pub fn into_description(self, model: &GalleryModel) -> GalleryDescription {
        match self {
            DescriptionFetch::Loaded(external) => model.build_description(Some(external)),
            DescriptionFetch::Failed(reason) => {
                eprintln!(
                    "  {} Description ignorée : {reason}",
                    style("!").yellow().bold()
                );
                model.build_description(None)
            }
        }
    }
}

/// Description for a page: asks `source` only when the listing announced
/// a description file.
pub fn resolve_description(
    model: &GalleryModel,
    source: &dyn DescriptionSource,
) -> GalleryDescription {
    if !model.has_description() {
        return model.build_description(None);
    }
    DescriptionFetch::from_source(source, model.description_file()).into_description(model)
}
