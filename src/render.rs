use anyhow::{Context, Result};
use percent_encoding::utf8_percent_encode;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::description::{
    DescriptionSource, DirSource, GalleryDescription, HttpSource, resolve_description,
};
use crate::listing::parse_listing;
use crate::model::{EntryKind, GalleryModel, URL_UNSAFE};
use crate::options::{GalleryOptions, Placement};

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<.+?>").expect("static regex"));

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn encode_url(url: &str) -> String {
    utf8_percent_encode(url, URL_UNSAFE).to_string()
}

fn strip_tags(s: &str) -> String {
    TAG.replace_all(s, "").into_owned()
}

fn parent_link_html(url: &str, text: Option<&str>) -> String {
    format!(
        "<a class=\"parentLink\" href=\"{}\">{}</a>\n",
        escape_html(&encode_url(url)),
        escape_html(text.unwrap_or(url))
    )
}

/// Build the gallery document for `description`.
///
/// Titles may contain markup (they come from the description file) and are
/// inserted as is in `<h1>`/`<h2>`; every other value is escaped.
pub fn render_gallery(
    model: &GalleryModel,
    description: &GalleryDescription,
    options: &GalleryOptions,
    page_title: Option<&str>,
) -> String {
    let mut head = String::new();
    for js in &options.external_js {
        head.push_str(&format!(
            "<script type=\"text/javascript\" src=\"{}\"></script>\n",
            escape_html(&options.library_url(js))
        ));
    }
    let stylesheets = options
        .external_css
        .iter()
        .chain(std::iter::once(&options.base_gallery_css))
        .chain(options.gallery_stylesheet.as_ref());
    for css in stylesheets {
        head.push_str(&format!(
            "<link rel=\"stylesheet\" type=\"text/css\" href=\"{}\">\n",
            escape_html(&options.library_url(css))
        ));
    }

    let title = description
        .title
        .as_deref()
        .map(strip_tags)
        .or_else(|| page_title.map(str::to_string))
        .unwrap_or_else(|| "Galerie".to_string());

    let mut body = String::new();
    if let Some(t) = &description.title {
        body.push_str(&format!("<h1>{t}</h1>\n"));
    }
    if let Some(sub) = &description.subtitle {
        body.push_str(&format!("<h2>{sub}</h2>\n"));
    }

    let parent = model
        .parent_link()
        .map(|url| parent_link_html(url, description.parent_link_text.as_deref()));
    if options.show_parent_link == Placement::First {
        body.push_str(parent.as_deref().unwrap_or_default());
    }

    body.push_str("<ul id=\"image-list\">\n");
    for visible in model.visible_items(description) {
        let item = visible.item;
        let mut attrs = format!(
            "href=\"{}\" title=\"{}\" data-title=\"{}\"",
            escape_html(&encode_url(&item.url)),
            escape_html(item.description.as_deref().unwrap_or_default()),
            escape_html(item.title.as_deref().unwrap_or(&item.url)),
        );
        if visible.kind == EntryKind::Image {
            attrs.push_str(" data-rel=\"lightcase:imgCollection\"");
        }
        if let Some(thumb) = &visible.thumbnail {
            attrs.push_str(&format!(
                " style=\"background-image:url('{}')\"",
                escape_html(thumb)
            ));
        }
        body.push_str(&format!(
            "  <li class=\"item-{}\"><a {attrs}></a></li>\n",
            visible.kind.as_str()
        ));
    }
    body.push_str("</ul>\n");

    if options.show_parent_link == Placement::Last {
        body.push_str(parent.as_deref().unwrap_or_default());
    }

    format!(
        r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>{title}</title>
{head}</head>
<body>
{body}<script>
jQuery(function($){{
  $('#image-list li.item-image a').lightcase({{maxWidth:{width},maxHeight:{height}}});
}});
</script>
</body>
</html>
"##,
        title = escape_html(&title),
        width = options.main_image_width,
        height = options.main_image_height,
    )
}

/// A rendered gallery page.
pub struct RenderedPage {
    pub html: String,
    pub items: usize,
}

/// Scrape `listing_html`, reconcile with the description from `source` and
/// render the gallery.
pub fn render_page(
    listing_html: &str,
    page_url: &str,
    source: &dyn DescriptionSource,
    options: &GalleryOptions,
) -> Result<RenderedPage> {
    let listing = parse_listing(listing_html)?;
    let model = GalleryModel::from_rows(options, page_url, &listing.rows)?;
    let description = resolve_description(&model, source);
    let items = model.visible_items(&description).len();
    let html = render_gallery(&model, &description, options, listing.title.as_deref());
    Ok(RenderedPage { html, items })
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Render the gallery for a listing given as URL or local file.
pub fn run_render(
    source: &str,
    output: Option<&Path>,
    page_url: Option<&str>,
    options: &GalleryOptions,
) -> Result<()> {
    let page = if is_remote(source) {
        let http = HttpSource::new(source)?;
        let html = http.page()?;
        render_page(&html, page_url.unwrap_or(source), &http, options)?
    } else {
        let path = Path::new(source);
        let html = std::fs::read_to_string(path)
            .with_context(|| format!("Impossible de lire le listing : {}", path.display()))?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };
        render_page(&html, page_url.unwrap_or(source), &DirSource { dir }, options)?
    };

    match output {
        Some(out) => {
            std::fs::write(out, &page.html)
                .with_context(|| format!("Impossible d'écrire {}", out.display()))?;
            println!(
                "  {} {} éléments dans la galerie → {}",
                console::style("✔").green().bold(),
                page.items,
                out.display()
            );
        }
        None => print!("{}", page.html),
    }
    Ok(())
}
