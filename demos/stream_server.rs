//! Streaming responses: a chunked countdown produced by a background task,
//! and files served with byte range support.

use std::path::{Component, Path};
use std::time::Duration;

use localserve::{HttpResponse, HttpServer, Method, ServerConfig, StatusCode};
use log::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize the logger
    env_logger::init();

    let config = ServerConfig {
        port: 8081,
        ..ServerConfig::default()
    };
    let mut server = HttpServer::new(config);

    // Chunks are sent as the producer makes them
    server.add_route("/countdown", vec![Method::GET], |req| async move {
        let from: u32 = req
            .get_query_param("from")
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let (response, sender) = HttpResponse::channel(StatusCode::Ok, 4);
        tokio::spawn(async move {
            for n in (0..=from).rev() {
                if sender.send(format!("{n}\n")).await.is_err() {
                    warn!("Client left the countdown at {n}");
                    return;
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        });
        Ok(response.with_content_type("text/plain"))
    })?;

    // Files below the working directory, e.g. /files/Cargo.toml
    server.add_route("/files/*path", vec![Method::GET, Method::HEAD], |req| async move {
        let name = Path::new(req.param("path").unwrap_or_default());
        if !name.components().all(|c| matches!(c, Component::Normal(_))) {
            return Ok(HttpResponse::error(StatusCode::BadRequest, "invalid path"));
        }
        Ok(HttpResponse::file(Path::new(".").join(name)))
    })?;

    info!("Try: curl -N http://127.0.0.1:8081/countdown?from=3");
    server.start().await?;

    Ok(())
}
