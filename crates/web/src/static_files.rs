//! Serving files from disk.
//!
//! These handlers are registered straight into the router: they bypass the middleware chains
//! and the context pool. Request paths are percent-decoded segment by segment and any `..`
//! segment is refused, so a request can never reach outside the configured root.

use crate::body::{RequestBody, ResponseBody};
use crate::context::PathParams;
use crate::handler::{RequestHandler, status_response};
use async_trait::async_trait;
use futures::TryStreamExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Request, Response, StatusCode};
use http_body::Frame;
use http_body_util::StreamBody;
use std::fmt::Write;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Name of the catch-all parameter used by [`StaticDir`] routes.
pub(crate) const FILEPATH_PARAM: &str = "filepath";

const INDEX_FILE: &str = "index.html";

/// Serves the tree below `root`, with `index.html` or a generated listing for directories.
#[derive(Debug, Clone)]
pub struct StaticDir {
    root: PathBuf,
}

impl StaticDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RequestHandler for StaticDir {
    async fn invoke(&self, req: Request<RequestBody>, params: PathParams) -> Response<ResponseBody> {
        let relative = params.get(FILEPATH_PARAM).unwrap_or_default();
        let Some(path) = resolve(&self.root, relative) else {
            debug!(path = relative, "refused static path");
            return not_found();
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => return io_error_response(&e),
        };

        if metadata.is_dir() {
            let index = path.join(INDEX_FILE);
            if tokio::fs::metadata(&index).await.is_ok_and(|index| index.is_file()) {
                return file_response(&index).await;
            }
            return listing_response(&path, req.uri().path()).await;
        }

        file_response(&path).await
    }
}

/// Serves one fixed file.
#[derive(Debug, Clone)]
pub struct StaticFile {
    path: PathBuf,
}

impl StaticFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RequestHandler for StaticFile {
    async fn invoke(&self, _req: Request<RequestBody>, _params: PathParams) -> Response<ResponseBody> {
        file_response(&self.path).await
    }
}

/// Joins the percent-decoded segments of `relative` onto `root`.
fn resolve(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in relative.split('/') {
        let segment = urlencoding::decode(segment).ok()?;
        match segment.as_ref() {
            "" | "." => {}
            ".." => return None,
            decoded if decoded.contains(['/', '\\', '\0']) => return None,
            decoded => path.push(decoded),
        }
    }
    Some(path)
}

async fn file_response(path: &Path) -> Response<ResponseBody> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => return io_error_response(&e),
    };
    let len = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(e) => return io_error_response(&e),
    };

    let stream = ReaderStream::new(file).map_ok(Frame::data);
    let mut response = Response::new(ResponseBody::stream(StreamBody::new(stream)));

    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    let content_type = HeaderValue::from_str(content_type_of(path).as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_TYPE, content_type);
    response
}

async fn listing_response(dir: &Path, request_path: &str) -> Response<ResponseBody> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => return io_error_response(&e),
    };

    let mut names = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await.is_ok_and(|file_type| file_type.is_dir()) {
                    name.push('/');
                }
                names.push(name);
            }
            Ok(None) => break,
            Err(e) => return io_error_response(&e),
        }
    }
    names.sort();

    let base = request_path.trim_end_matches('/');
    let title = escape_html(request_path);
    let mut html = format!("<html><head><title>{title}</title></head><body><h1>{title}</h1><ul>");
    if !base.is_empty() {
        let _ = write!(html, r#"<li><a href="{}/..">..</a></li>"#, escape_html(base));
    }
    for name in &names {
        let href = format!("{base}/{}", urlencoding::encode(name.trim_end_matches('/')));
        let _ = write!(html, r#"<li><a href="{}">{}</a></li>"#, escape_html(&href), escape_html(name));
    }
    html.push_str("</ul></body></html>");

    let mut response = Response::new(ResponseBody::from(html));
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    response
}

fn content_type_of(path: &Path) -> mime::Mime {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html" | "htm") => mime::TEXT_HTML_UTF_8,
        Some("css") => mime::TEXT_CSS_UTF_8,
        Some("js" | "mjs") => mime::APPLICATION_JAVASCRIPT_UTF_8,
        Some("json") => mime::APPLICATION_JSON,
        Some("txt") => mime::TEXT_PLAIN_UTF_8,
        Some("csv") => mime::TEXT_CSV_UTF_8,
        Some("xml") => mime::TEXT_XML,
        Some("png") => mime::IMAGE_PNG,
        Some("jpg" | "jpeg") => mime::IMAGE_JPEG,
        Some("gif") => mime::IMAGE_GIF,
        Some("bmp") => mime::IMAGE_BMP,
        Some("svg") => mime::IMAGE_SVG,
        Some("pdf") => mime::APPLICATION_PDF,
        Some("woff") => mime::FONT_WOFF,
        Some("woff2") => mime::FONT_WOFF2,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

fn io_error_response(e: &io::Error) -> Response<ResponseBody> {
    match e.kind() {
        io::ErrorKind::NotFound => not_found(),
        io::ErrorKind::PermissionDenied => status_response(StatusCode::FORBIDDEN, "Forbidden"),
        _ => {
            warn!(cause = %e, "failed to serve static file");
            status_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn not_found() -> Response<ResponseBody> {
    status_response(StatusCode::NOT_FOUND, "Cannot open requested path")
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct TempTree {
        root: PathBuf,
    }

    impl TempTree {
        fn new() -> Self {
            let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
            let root = std::env::temp_dir().join(format!("atrium-static-{}-{nanos}", std::process::id()));
            std::fs::create_dir_all(root.join("docs")).unwrap();
            std::fs::create_dir_all(root.join("site")).unwrap();
            std::fs::write(root.join("hello.txt"), "hello static").unwrap();
            std::fs::write(root.join("docs/guide one.html"), "<p>guide</p>").unwrap();
            std::fs::write(root.join("site/index.html"), "<h1>home</h1>").unwrap();
            Self { root }
        }
    }

    impl Drop for TempTree {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    async fn get(handler: &impl RequestHandler, uri: &str, filepath: &str) -> (StatusCode, String, Option<String>) {
        let req = Request::builder().uri(uri).body(RequestBody::empty()).unwrap();
        let params: PathParams = [(FILEPATH_PARAM, filepath)].into_iter().collect();
        let response = handler.invoke(req, params).await;
        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).map(|v| v.to_str().unwrap().to_owned());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap(), content_type)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn serves_files_with_content_type() {
        let tree = TempTree::new();
        let handler = StaticDir::new(&tree.root);

        let (status, body, content_type) = get(&handler, "/static/hello.txt", "hello.txt").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello static");
        assert_eq!(content_type.as_deref(), Some("text/plain; charset=utf-8"));

        let (status, body, _) = get(&handler, "/static/docs/guide%20one.html", "docs/guide%20one.html").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<p>guide</p>");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn directories_serve_index_or_listing() {
        let tree = TempTree::new();
        let handler = StaticDir::new(&tree.root);

        let (status, body, _) = get(&handler, "/static/site/", "site/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<h1>home</h1>");

        let (status, body, content_type) = get(&handler, "/static/", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/html; charset=utf-8"));
        assert!(body.contains(r#"<a href="/static/hello.txt">hello.txt</a>"#));
        assert!(body.contains(">docs/</a>"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn traversal_and_missing_files_are_not_found() {
        let tree = TempTree::new();
        let handler = StaticDir::new(tree.root.join("docs"));

        let (status, _, _) = get(&handler, "/static/../hello.txt", "../hello.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = get(&handler, "/static/%2e%2e/hello.txt", "%2e%2e/hello.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body, _) = get(&handler, "/static/nope.txt", "nope.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Cannot open requested path");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn single_file_handler() {
        let tree = TempTree::new();
        let handler = StaticFile::new(tree.root.join("site/index.html"));

        let (status, body, content_type) = get(&handler, "/", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<h1>home</h1>");
        assert_eq!(content_type.as_deref(), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn escapes_listing_names() {
        assert_eq!(escape_html(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
