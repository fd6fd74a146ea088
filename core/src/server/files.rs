//! Request handling: path resolution, file responses, directory listings.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Router;

use super::ServerError;

#[derive(Clone)]
struct ServeState {
    /// Canonicalized site root; every resolved path must stay inside it.
    root: PathBuf,
    index: String,
    listings: bool,
}

pub(super) fn router(root: &Path, index: &str, listings: bool) -> Result<Router, ServerError> {
    let root = root.canonicalize().map_err(|source| ServerError::Root {
        root: root.to_path_buf(),
        source,
    })?;

    let state = ServeState {
        root,
        index: index.to_string(),
        listings,
    };
    Ok(Router::new().fallback(serve_path).with_state(state))
}

async fn serve_path(State(state): State<ServeState>, uri: Uri) -> Response {
    let raw_path = uri.path();
    let decoded = match urlencoding::decode(raw_path) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let candidate = state.root.join(decoded.trim_start_matches('/'));

    // Canonicalization collapses any `..` segments; anything that escapes
    // the root is refused regardless of whether it exists.
    let resolved = match tokio::fs::canonicalize(&candidate).await {
        Ok(resolved) => resolved,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    if !resolved.starts_with(&state.root) {
        return StatusCode::FORBIDDEN.into_response();
    }

    if resolved.is_dir() {
        // Listing links are relative, so a directory is only addressable
        // under its trailing-slash form.
        if !raw_path.ends_with('/') {
            return Redirect::permanent(&format!("{raw_path}/")).into_response();
        }
        let index_path = resolved.join(&state.index);
        if index_path.is_file() {
            return serve_file(&index_path).await;
        }
        if state.listings {
            return serve_listing(&resolved, &decoded).await;
        }
        return StatusCode::NOT_FOUND.into_response();
    }

    serve_file(&resolved).await
}

async fn serve_file(path: &Path) -> Response {
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    ([(header::CONTENT_TYPE, mime.to_string())], contents).into_response()
}

async fn serve_listing(dir: &Path, display_path: &str) -> Response {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let mut entries = Vec::new();
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        entries.push((name, is_dir));
    }

    let html = render_listing_html(display_path, entries);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(html))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Render a directory listing page.
///
/// Entries are sorted case-insensitively by name; directories get a trailing
/// slash. The parent link is omitted at the site root.
pub fn render_listing_html(display_path: &str, mut entries: Vec<(String, bool)>) -> String {
    entries.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));

    let title = html_escape::encode_text(display_path);
    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Index of {title}</title>\n\
         <style>\n\
         body {{ font-family: system-ui, sans-serif; margin: 2rem; }}\n\
         li.dir a {{ font-weight: 600; }}\n\
         </style>\n</head>\n<body>\n<h1>Index of {title}</h1>\n<ul>\n"
    );

    if display_path != "/" {
        html.push_str("<li class=\"dir\"><a href=\"..\">..</a></li>\n");
    }

    for (name, is_dir) in entries {
        let href = urlencoding::encode(&name);
        let shown = html_escape::encode_text(&name);
        let (class, slash) = if is_dir { ("dir", "/") } else { ("file", "") };
        html.push_str(&format!(
            "<li class=\"{class}\"><a href=\"{href}{slash}\">{shown}{slash}</a></li>\n"
        ));
    }

    html.push_str("</ul>\n</body>\n</html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_sorts_case_insensitively() {
        let html = render_listing_html(
            "/docs",
            vec![
                ("c.txt".to_string(), false),
                ("A.txt".to_string(), false),
                ("b.txt".to_string(), false),
            ],
        );

        let a = html.find("A.txt").unwrap();
        let b = html.find("b.txt").unwrap();
        let c = html.find("c.txt").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_listing_marks_directories() {
        let html = render_listing_html(
            "/",
            vec![
                ("assets".to_string(), true),
                ("main.css".to_string(), false),
            ],
        );

        assert!(html.contains("assets/"));
        assert!(!html.contains("main.css/"));
        // Root listing has no parent link
        assert!(!html.contains("href=\"..\""));
    }

    #[test]
    fn test_listing_escapes_names() {
        let html = render_listing_html("/", vec![("<script>.txt".to_string(), false)]);
        assert!(!html.contains("<script>.txt"));
        assert!(html.contains("&lt;script&gt;.txt"));
    }
}
