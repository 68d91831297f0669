//! Development server for the destination tree.
//!
//! Files are served as they are on disk, except that every HTML page gets a
//! `<script>` tag loading the live-reload client from [`RELOAD_ROUTE`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::middleware::map_response_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use console::style;
use tower_http::services::ServeDir;

use crate::core::RunContext;

/// Route serving the live-reload client.
pub(crate) const RELOAD_ROUTE: &str = "/__assetline/reload.js";

/// Binds `ctx.port` and serves `ctx.dest` on a background thread. Returns
/// the bound address.
pub(crate) fn start(ctx: &RunContext) -> std::io::Result<(SocketAddr, thread::JoinHandle<anyhow::Result<()>>)> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", ctx.port))?;
    listener.set_nonblocking(true)?;
    let address = listener.local_addr()?;

    tracing::info!(
        url = %style(format!("http://localhost:{}/", address.port())).yellow(),
        root = %ctx.dest,
        "serving"
    );

    let router = router(ctx);
    let handle = thread::spawn(move || -> anyhow::Result<()> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(serve(listener, router))
    });

    Ok((address, handle))
}

async fn serve(listener: std::net::TcpListener, router: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    axum::serve(listener, router).await?;
    Ok(())
}

fn router(ctx: &RunContext) -> Router {
    let script = ctx.reload_script().unwrap_or_default();
    let tag: Arc<str> = format!(r#"<script src="{RELOAD_ROUTE}"></script>"#).into();

    Router::new()
        .route(
            RELOAD_ROUTE,
            get(move || {
                let script = script.clone();
                async move { ([(CONTENT_TYPE, "text/javascript")], script) }
            }),
        )
        .fallback_service(ServeDir::new(&ctx.dest))
        .layer(map_response_with_state(tag, inject_reload))
}

async fn inject_reload(State(tag): State<Arc<str>>, response: Response) -> Response {
    let html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if !html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let Ok(bytes) = axum::body::to_bytes(body, usize::MAX).await else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let page = with_tag(&String::from_utf8_lossy(&bytes), &tag);
    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(page))
}

/// Inserts `tag` before the closing `</body>`, or appends it.
fn with_tag(page: &str, tag: &str) -> String {
    let at = page
        .to_ascii_lowercase()
        .rfind("</body>")
        .unwrap_or(page.len());

    let mut out = String::with_capacity(page.len() + tag.len());
    out.push_str(&page[..at]);
    out.push_str(tag);
    out.push_str(&page[at..]);
    out
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    use camino::Utf8PathBuf;

    use super::*;

    fn fetch(address: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(address).unwrap();
        write!(stream, "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_with_tag() {
        assert_eq!(with_tag("<p>a</p></BODY>", "<s/>"), "<p>a</p><s/></BODY>");
        assert_eq!(with_tag("<p>a</p>", "<s/>"), "<p>a</p><s/>");
    }

    #[test]
    fn test_serves_pages_with_reload_client() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::write(root.join("index.html"), "<html><body><h1>hi</h1></body></html>").unwrap();
        fs::write(root.join("style.css"), "a{color:red}").unwrap();

        let mut ctx = RunContext::default().with_roots(root.join("app"), &root, root.join("vendor"));
        ctx.port = 0;
        ctx.reload = Some(4242);

        let (address, _server) = start(&ctx).unwrap();

        let page = fetch(address, "/");
        assert!(page.starts_with("HTTP/1.1 200"));
        assert!(page.contains(r#"<h1>hi</h1><script src="/__assetline/reload.js"></script></body>"#));

        let script = fetch(address, RELOAD_ROUTE);
        assert!(script.contains("text/javascript"));
        assert!(script.contains(":4242`"));

        let css = fetch(address, "/style.css");
        assert!(css.ends_with("a{color:red}"));
        assert!(!css.contains("<script"));
    }
}
