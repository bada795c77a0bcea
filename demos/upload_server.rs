//! A local library server: uploads, listing, downloads and deletion of books.
//!
//! Run with an optional JSON config file:
//!
//! ```text
//! RUST_LOG=info cargo run --example upload_server -- server.json
//! ```

use std::sync::Arc;

use localserve::{HttpResponse, HttpServer, Method, ServerConfig, StatusCode, UploadEvent, Uploader};
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize the logger
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::default(),
    };

    // Only plain text and EPUB books are accepted; renames and folders stay off
    let uploader = Uploader::from_config(&config)
        .with_allowed_extensions(["txt", "epub"])
        .with_hook(|event| match event {
            UploadEvent::Uploaded(path) => info!("New book: {}", path.display()),
            UploadEvent::Deleted(path) => info!("Removed book: {}", path.display()),
            other => info!("Library changed: {other:?}"),
        });

    let mut server = HttpServer::new(config);

    server.add_route("/", vec![Method::GET], |_req| async move {
        Ok(HttpResponse::new(StatusCode::Ok)
            .with_content_type("text/html; charset=utf-8")
            .with_body_string(INDEX_HTML))
    })?;

    Arc::new(uploader).mount(server.router_mut(), "/books")?;

    // Ctrl+C stops accepting and drains open connections
    server.start().await?;

    Ok(())
}

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<body>
  <h1>Library</h1>
  <form method="post" action="/books/upload" enctype="multipart/form-data">
    <input type="file" name="file" multiple>
    <button type="submit">Upload</button>
  </form>
  <p><a href="/books/list">Stored books</a></p>
</body>
</html>
"#;
