use anyhow::Result;
use percent_encoding::percent_decode_str;
use scraper::{ElementRef, Html, Selector};

/// One usable row of a directory listing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    /// `src` of the icon image in the first cell.
    pub icon: String,
    /// Percent-decoded `href` of the link in the second cell.
    pub href: String,
}

/// Rows and title scraped from a listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub title: Option<String>,
    pub rows: Vec<ListingRow>,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("Sélecteur invalide {css} : {e:?}"))
}

fn first_attr(cell: &ElementRef, sel: &Selector, attr: &str) -> Option<String> {
    cell.select(sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
}

/// Extract the `(icon, link)` pairs from every table row of a listing page.
///
/// Rows with fewer than two `td` cells (headers, separators) and rows
/// without an icon or a link are skipped.
pub fn parse_listing(html: &str) -> Result<Listing> {
    let document = Html::parse_document(html);
    let title = document
        .select(&selector("title")?)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());
    let tr = selector("tr")?;
    let td = selector("td")?;
    let img = selector("img")?;
    let a = selector("a")?;

    let mut rows = Vec::new();
    for row in document.select(&tr) {
        let cells: Vec<ElementRef> = row.select(&td).collect();
        if cells.len() < 2 {
            continue;
        }
        let (Some(icon), Some(href)) = (
            first_attr(&cells[0], &img, "src"),
            first_attr(&cells[1], &a, "href"),
        ) else {
            continue;
        };
        rows.push(ListingRow {
            icon,
            href: percent_decode_str(&href).decode_utf8_lossy().into_owned(),
        });
    }
    Ok(Listing { title, rows })
}
