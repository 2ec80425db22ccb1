use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::autoindex::{icon_gif, listing_html};
use crate::description::DirSource;
use crate::options::GalleryOptions;
use crate::render::render_page;
use crate::resize::{ResizeError, ResizeSettings, Resized, resize_original};

/// Route of the resize endpoint.
pub const THUMBNAIL_ROUTE: &str = "/thumbnail";

/// Server state: document root and gallery options, read-only.
pub struct ServerState {
    pub root: PathBuf,
    options: GalleryOptions,
    resize: ResizeSettings,
}

impl ServerState {
    /// Canonicalize the root. Images without a thumbnail file get one from
    /// our own resize endpoint unless the options name another generator.
    pub fn new(root: &Path, mut options: GalleryOptions) -> Result<Arc<Self>> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Dossier introuvable : {}", root.display()))?;
        if !root.is_dir() {
            anyhow::bail!("{} n'est pas un dossier", root.display());
        }
        if options.thumbnail_generator_url.is_none() {
            options.thumbnail_generator_url = Some(format!("{THUMBNAIL_ROUTE}?org=%"));
        }
        let resize = ResizeSettings::from_options(&options);
        Ok(Arc::new(Self {
            root,
            options,
            resize,
        }))
    }
}

/// MIME type from file extension.
fn mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .unwrap_or_default()
        .to_string_lossy()
        .to_lowercase()
        .as_str()
    {
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "tiff" | "tif" => "image/tiff",
        "css" => "text/css",
        "js" => "application/javascript",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn header(name: &str, value: &str) -> Header {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).unwrap()
}

/// JSON error response helper.
fn json_error(status: u16, msg: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    let body = serde_json::json!({ "error": msg }).to_string();
    Response::from_string(body)
        .with_status_code(StatusCode(status))
        .with_header(header("Content-Type", "application/json"))
}

fn html_ok(html: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string(html).with_header(header("Content-Type", "text/html; charset=utf-8"))
}

/// Query string decoding (%XX and +).
pub fn urldecode(s: &str) -> String {
    percent_decode_str(&s.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// Parse query string into key-value pairs. Keys without `=` map to "".
pub fn parse_query(url: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some((_, qs)) = url.split_once('?') {
        for pair in qs.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            params.insert(urldecode(k), urldecode(v));
        }
    }
    params
}

/// Resolve a URL path under `base`, refusing anything that climbs out.
pub fn safe_path(base: &Path, relative: &str) -> Option<PathBuf> {
    let clean = relative.replace('\\', "/");
    let clean = clean.trim_start_matches('/');
    if clean.split('/').any(|part| part == "..") {
        return None;
    }
    let full = base.join(clean);
    if full.starts_with(base) {
        Some(full)
    } else {
        None
    }
}

/// Resize endpoint: `?org=<path under the root>`.
pub fn handle_thumbnail(url: &str, state: &ServerState) -> Result<Resized, ResizeError> {
    let params = parse_query(url);
    let org = params
        .get("org")
        .filter(|org| !org.is_empty())
        .ok_or(ResizeError::MissingOrigin)?;
    let source = safe_path(&state.root, org).ok_or_else(|| ResizeError::InvalidPath(org.clone()))?;
    resize_original(&source, &state.resize)
}

/// Gallery page (or raw listing with `?index`) for a directory.
fn directory_page(dir: &Path, url_path: &str, url: &str, state: &ServerState) -> Result<String> {
    let listing = listing_html(dir, url_path)?;
    if parse_query(url).contains_key("index") {
        return Ok(listing);
    }
    let source = DirSource {
        dir: dir.to_path_buf(),
    };
    let page = render_page(&listing, url_path, &source, &state.options)?;
    Ok(page.html)
}

fn serve_file(req: Request, path: &Path) {
    match std::fs::File::open(path) {
        Ok(file) => {
            let resp = Response::from_file(file).with_header(header("Content-Type", mime_type(path)));
            let _ = req.respond(resp);
        }
        Err(_) => {
            let _ = req.respond(json_error(500, "Erreur lecture fichier"));
        }
    }
}

/// Handle a single HTTP request.
pub fn handle_request(req: Request, state: &ServerState) {
    let url = req.url().to_string();
    let raw_path = url.split('?').next().unwrap_or(&url);
    let path = urldecode_path(raw_path);

    if req.method() != &Method::Get {
        let _ = req.respond(json_error(405, "Méthode non supportée"));
        return;
    }

    if path == THUMBNAIL_ROUTE {
        match handle_thumbnail(&url, state) {
            Ok(resized) => {
                let resp = Response::from_data(resized.bytes)
                    .with_header(header("Content-Type", resized.format.mime()));
                let _ = req.respond(resp);
            }
            Err(e) => {
                let _ = req.respond(json_error(e.status(), &e.to_string()));
            }
        }
        return;
    }

    let Some(full_path) = safe_path(&state.root, &path) else {
        let _ = req.respond(json_error(400, "Chemin invalide"));
        return;
    };

    // Listing icons, unless the root provides its own
    if let Some(name) = path.strip_prefix("/icons/") {
        if !full_path.is_file() {
            if let Some(gif) = icon_gif(name) {
                let resp = Response::from_data(gif).with_header(header("Content-Type", "image/gif"));
                let _ = req.respond(resp);
                return;
            }
        }
    }

    if full_path.is_dir() {
        if !path.ends_with('/') {
            let location = format!("{raw_path}/");
            match Header::from_bytes(&b"Location"[..], location.as_bytes()) {
                Ok(h) => {
                    let _ = req.respond(Response::empty(StatusCode(301)).with_header(h));
                }
                Err(()) => {
                    let _ = req.respond(json_error(400, "Chemin invalide"));
                }
            }
            return;
        }
        match directory_page(&full_path, &path, &url, state) {
            Ok(html) => {
                let _ = req.respond(html_ok(&html));
            }
            Err(e) => {
                let _ = req.respond(json_error(500, &format!("{e:#}")));
            }
        }
    } else if full_path.is_file() {
        serve_file(req, &full_path);
    } else {
        let _ = req.respond(json_error(404, "Fichier introuvable"));
    }
}

/// Percent-decode a request path (no `+` handling, unlike queries).
fn urldecode_path(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

/// Start the HTTP server.
pub fn run_serve(root: &Path, port: u16, options: GalleryOptions) -> Result<()> {
    let state = ServerState::new(root, options)?;

    let addr = format!("0.0.0.0:{port}");
    let server =
        Server::http(&addr).map_err(|e| anyhow::anyhow!("Impossible de démarrer le serveur: {e}"))?;

    println!(
        "  {} Galerie disponible sur {}",
        console::style("✔").green().bold(),
        console::style(format!("http://localhost:{port}")).cyan().bold()
    );
    println!(
        "  {}  {}",
        console::style("Racine").dim(),
        console::style(state.root.display()).white().bold()
    );
    println!(
        "  {} pour arrêter",
        console::style("Ctrl+C").yellow().bold()
    );

    for req in server.incoming_requests() {
        let state = Arc::clone(&state);
        std::thread::spawn(move || {
            handle_request(req, &state);
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn tmpdir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "index_gallery_serve_test_{}_{id}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Create a real JPEG image for integration tests.
    fn create_test_jpeg(path: &Path, width: u32, height: u32) {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        img.save(path).unwrap();
    }

    fn setup_photos(dir: &Path) {
        let album = dir.join("album");
        create_test_jpeg(&album.join("wide.jpg"), 800, 400);
        create_test_jpeg(&album.join("beach.jpg"), 120, 90);
        create_test_jpeg(&album.join("beach_small.jpg"), 60, 45);
        std::fs::create_dir_all(album.join("trips")).unwrap();
        std::fs::write(album.join("notes.txt"), "plain text").unwrap();
    }

    // --- parse_query ---

    #[test]
    fn parse_query_extracts_params() {
        let params = parse_query("/thumbnail?org=/album/a.jpg&foo=bar");
        assert_eq!(params.get("org").unwrap(), "/album/a.jpg");
        assert_eq!(params.get("foo").unwrap(), "bar");
    }

    #[test]
    fn parse_query_empty_when_no_query() {
        assert!(parse_query("/thumbnail").is_empty());
    }

    #[test]
    fn parse_query_decodes_percent_and_plus() {
        let params = parse_query("/x?name=hello%20big+world&index");
        assert_eq!(params.get("name").unwrap(), "hello big world");
        assert_eq!(params.get("index").unwrap(), "");
    }

    // --- safe_path ---

    #[test]
    fn safe_path_allows_relative_and_rooted() {
        let base = Path::new("/photos");
        assert_eq!(safe_path(base, "2020/a.jpg"), Some(PathBuf::from("/photos/2020/a.jpg")));
        assert_eq!(safe_path(base, "/2020/a.jpg"), Some(PathBuf::from("/photos/2020/a.jpg")));
        assert_eq!(safe_path(base, "/"), Some(PathBuf::from("/photos")));
    }

    #[test]
    fn safe_path_rejects_traversal() {
        let base = Path::new("/photos");
        assert!(safe_path(base, "../etc/passwd").is_none());
        assert!(safe_path(base, "/2020/../../etc/passwd").is_none());
        assert!(safe_path(base, "..\\etc").is_none());
    }

    #[test]
    fn safe_path_keeps_dotted_names() {
        let base = Path::new("/photos");
        assert!(safe_path(base, "a..b.jpg").is_some());
    }

    // --- mime_type ---

    #[test]
    fn mime_type_for_common_formats() {
        assert_eq!(mime_type(Path::new("photo.jpg")), "image/jpeg");
        assert_eq!(mime_type(Path::new("photo.GIF")), "image/gif");
        assert_eq!(mime_type(Path::new("page.html")), "text/html; charset=utf-8");
        assert_eq!(mime_type(Path::new("description.json")), "application/json");
        assert_eq!(mime_type(Path::new("raw.cr2")), "application/octet-stream");
    }

    // --- Integration: handle_request with real server ---

    fn spawn_test_server(dir: &Path) -> (u16, Arc<ServerState>) {
        let state = ServerState::new(dir, GalleryOptions::default()).unwrap();
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let state_clone = Arc::clone(&state);
        std::thread::spawn(move || {
            for req in server.incoming_requests() {
                handle_request(req, &state_clone);
            }
        });
        (port, state)
    }

    /// Minimal HTTP/1.0 client: returns (status, headers, body).
    fn http_request(port: u16, method: &str, path: &str) -> (u16, String, Vec<u8>) {
        use std::io::{Read, Write};
        use std::net::TcpStream;
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(stream, "{method} {path} HTTP/1.0\r\nHost: localhost\r\n\r\n").unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        let sep = buf.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        let head = String::from_utf8_lossy(&buf[..sep]).to_string();
        let status = head
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap();
        (status, head, buf[sep + 4..].to_vec())
    }

    fn get(port: u16, path: &str) -> (u16, String, Vec<u8>) {
        http_request(port, "GET", path)
    }

    #[test]
    fn state_enables_own_thumbnail_generator() {
        let tmp = tmpdir();
        let state = ServerState::new(&tmp, GalleryOptions::default()).unwrap();
        assert_eq!(
            state.options.thumbnail_generator_url.as_deref(),
            Some("/thumbnail?org=%")
        );
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn state_rejects_missing_root() {
        let tmp = tmpdir();
        assert!(ServerState::new(&tmp.join("nope"), GalleryOptions::default()).is_err());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn directory_serves_gallery() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let (port, _) = spawn_test_server(&tmp);

        let (status, head, body) = get(port, "/album/");
        let html = String::from_utf8(body).unwrap();
        assert_eq!(status, 200);
        assert!(head.contains("text/html"));
        assert!(html.contains("<ul id=\"image-list\">"));
        assert!(html.contains("<li class=\"item-folder\"><a href=\"trips\""));
        assert!(html.contains("background-image:url('beach_small.jpg')"));
        assert!(html.contains("background-image:url('/thumbnail?org=/album/wide.jpg')"));
        assert!(!html.contains("href=\"beach_small.jpg\""));
        assert!(!html.contains("notes.txt"));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn percent_in_file_name_links_to_that_file() {
        let tmp = tmpdir();
        create_test_jpeg(&tmp.join("album/a%20b.jpg"), 300, 300);
        let (port, _) = spawn_test_server(&tmp);

        let (_, _, body) = get(port, "/album/");
        let html = String::from_utf8(body).unwrap();
        assert!(html.contains("href=\"a%2520b.jpg\""));
        assert!(html.contains("background-image:url('/thumbnail?org=/album/a%2520b.jpg')"));

        let (status, _, _) = get(port, "/album/a%2520b.jpg");
        assert_eq!(status, 200);
        let (status, _, body) = get(port, "/thumbnail?org=/album/a%2520b.jpg");
        assert_eq!(status, 200);
        let img = image::load_from_memory(&body).unwrap();
        assert_eq!((img.width(), img.height()), (250, 250));
        assert!(tmp.join("album/a%20b_small.jpg").exists());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn directory_uses_description_file() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        std::fs::write(
            tmp.join("album/description.json"),
            r#"{"title":"Album","items":[{"url":"wide.jpg","title":"Wide"},{"url":"gone.jpg"}]}"#,
        )
        .unwrap();
        let (port, _) = spawn_test_server(&tmp);

        let (_, _, body) = get(port, "/album/");
        let html = String::from_utf8(body).unwrap();
        assert!(html.contains("<h1>Album</h1>"));
        assert!(html.contains("data-title=\"Wide\""));
        assert!(!html.contains("gone.jpg"));
        assert!(!html.contains("href=\"beach.jpg\""));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn directory_raw_index() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let (port, _) = spawn_test_server(&tmp);

        let (status, _, body) = get(port, "/album/?index");
        let html = String::from_utf8(body).unwrap();
        assert_eq!(status, 200);
        assert!(html.contains("Index of /album/"));
        assert!(html.contains("/icons/image2.gif"));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn directory_without_slash_redirects() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let (port, _) = spawn_test_server(&tmp);

        let (status, head, _) = get(port, "/album");
        assert_eq!(status, 301);
        assert!(head.contains("Location: /album/"));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn serve_static_file() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let (port, _) = spawn_test_server(&tmp);

        let (status, head, body) = get(port, "/album/notes.txt");
        assert_eq!(status, 200);
        assert!(head.contains("text/plain"));
        assert_eq!(body, b"plain text");
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn serves_listing_icons() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let (port, _) = spawn_test_server(&tmp);

        let (status, head, body) = get(port, "/icons/folder.gif");
        assert_eq!(status, 200);
        assert!(head.contains("image/gif"));
        assert!(image::load_from_memory(&body).is_ok());
        assert_eq!(get(port, "/icons/nope.gif").0, 404);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn root_icons_take_precedence() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        std::fs::create_dir_all(tmp.join("icons")).unwrap();
        std::fs::write(tmp.join("icons/folder.gif"), "custom").unwrap();
        let (port, _) = spawn_test_server(&tmp);

        let (status, _, body) = get(port, "/icons/folder.gif");
        assert_eq!(status, 200);
        assert_eq!(body, b"custom");
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn serve_404_for_missing_file() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let (port, _) = spawn_test_server(&tmp);

        let (status, _, body) = get(port, "/album/nonexistent.jpg");
        assert_eq!(status, 404);
        assert!(String::from_utf8_lossy(&body).contains("error"));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_traversal() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let (port, _) = spawn_test_server(&tmp);

        let (status, _, _) = get(port, "/album/%2E%2E/%2E%2E/etc/passwd");
        assert_eq!(status, 400);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_other_methods() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let (port, _) = spawn_test_server(&tmp);

        let (status, _, _) = http_request(port, "DELETE", "/album/notes.txt");
        assert_eq!(status, 405);
        assert!(tmp.join("album/notes.txt").exists());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    // --- Resize endpoint ---

    #[test]
    fn thumbnail_resizes_and_caches() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let (port, _) = spawn_test_server(&tmp);

        let (status, head, body) = get(port, "/thumbnail?org=/album/wide.jpg");
        assert_eq!(status, 200);
        assert!(head.contains("image/jpeg"));
        let img = image::load_from_memory(&body).unwrap();
        assert_eq!((img.width(), img.height()), (250, 125));
        assert!(tmp.join("album/wide_small.jpg").exists());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn thumbnail_without_org_is_400() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let (port, _) = spawn_test_server(&tmp);

        assert_eq!(get(port, "/thumbnail").0, 400);
        assert_eq!(get(port, "/thumbnail?org=").0, 400);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn thumbnail_of_non_image_is_500() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let (port, _) = spawn_test_server(&tmp);

        assert_eq!(get(port, "/thumbnail?org=/album/notes.txt").0, 500);
        assert_eq!(get(port, "/thumbnail?org=/album/missing.jpg").0, 500);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn thumbnail_rejects_traversal() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let (port, _) = spawn_test_server(&tmp);

        assert_eq!(get(port, "/thumbnail?org=/../etc/passwd").0, 400);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn handle_thumbnail_direct() {
        let tmp = tmpdir();
        setup_photos(&tmp);
        let state = ServerState::new(&tmp, GalleryOptions::default()).unwrap();

        let resized = handle_thumbnail("/thumbnail?org=album%2Fbeach.jpg", &state).unwrap();
        let img = image::load_from_memory(&resized.bytes).unwrap();
        assert_eq!((img.width(), img.height()), (120, 90));
        assert!(matches!(
            handle_thumbnail("/thumbnail", &state),
            Err(ResizeError::MissingOrigin)
        ));
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
