//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::parser::{BodyKind, HttpRequest, Method};
use crate::server::config::ServerConfig;
use crate::server::connection::{Connection, ConnectionSettings};
use crate::server::error::Error;
use crate::server::response::HttpResponse;
use crate::server::router::Router;
use crate::server::shutdown::Shutdown;

/// An HTTP server.
pub struct HttpServer {
    /// The server configuration.
    pub config: ServerConfig,
    router: Router,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            router: Router::new(),
            shutdown: Shutdown::new(),
        }
    }

    /// Add a route to the server for each of `methods`.
    pub fn add_route<F, Fut>(&mut self, path: &str, methods: Vec<Method>, handler: F) -> Result<(), Error>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        self.add_route_with_body(path, methods, BodyKind::Auto, handler)
    }

    /// Add a route whose body is read as `body_kind`.
    pub fn add_route_with_body<F, Fut>(
        &mut self,
        path: &str,
        methods: Vec<Method>,
        body_kind: BodyKind,
        handler: F,
    ) -> Result<(), Error>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        for method in methods {
            self.router.register_with_body(method, path, body_kind, handler.clone())?;
        }
        Ok(())
    }

    /// The route table, for registering routes directly.
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// A handle that stops the server when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Display the registered endpoints.
    fn display_server_info(&self) {
        info!("Registered endpoints:");
        for route in self.router.routes() {
            info!("  {} {}", route.method, route.pattern.as_str());
        }
    }

    /// Set up the TCP listener.
    async fn setup_listener(&self) -> Result<TcpListener, Error> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on http://{}", listener.local_addr().unwrap_or(addr));
        Ok(listener)
    }

    /// Set up a Ctrl+C handler for graceful shutdown.
    fn setup_ctrl_c_handler(&self) {
        let shutdown = self.shutdown.clone();
        let mut stopped = self.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => match result {
                    Ok(()) => {
                        info!("Received Ctrl+C, initiating graceful shutdown");
                        shutdown.trigger();
                    }
                    Err(e) => {
                        error!("Error setting up Ctrl+C handler: {e}");
                    }
                },
                _ = stopped.wait() => {}
            }
        });
    }

    /// Bind the configured address and serve until Ctrl+C or the shutdown
    /// handle fires.
    pub async fn start(self) -> Result<(), Error> {
        self.config.validate()?;
        let listener = self.setup_listener().await?;
        self.setup_ctrl_c_handler();
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), Error> {
        self.display_server_info();

        let HttpServer { config, router, shutdown } = self;
        let router = Arc::new(router);
        let settings = Arc::new(ConnectionSettings::from_config(&config));
        let semaphore = Arc::new(Semaphore::new(config.max_connections));
        let mut stopping = shutdown.subscribe();
        let mut tasks = JoinSet::new();

        loop {
            // Reap finished connections so the set does not grow unbounded.
            while let Some(result) = tasks.try_join_next() {
                log_task_result(result);
            }

            // Waiting for a permit first leaves excess clients in the backlog.
            let permit = tokio::select! {
                biased;
                _ = stopping.wait() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                biased;
                _ = stopping.wait() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, addr)) => {
                    debug!("Accepted connection from {addr}");
                    let connection = Connection::new(
                        socket,
                        Arc::clone(&router),
                        Arc::clone(&settings),
                        shutdown.subscribe(),
                        addr.to_string(),
                    );
                    tasks.spawn(async move {
                        // The permit is released when the connection finishes.
                        let _permit = permit;
                        if let Err(e) = connection.run().await {
                            warn!("Connection from {addr} ended with an error: {e}");
                        }
                        addr
                    });
                }
                Err(e) => {
                    if Self::handle_connection_error(e).await {
                        shutdown.trigger();
                        break;
                    }
                }
            }
        }

        info!("Shutting down server...");
        // Connections watch the same signal; make sure it is raised even when
        // the loop ended for another reason.
        shutdown.trigger();
        Self::perform_shutdown(&mut tasks, config.drain_timeout()).await;
        drop(listener);
        info!("Server shutdown complete");
        Ok(())
    }

    /// Handle an accept error. Returns true when the listener is unusable.
    async fn handle_connection_error(e: std::io::Error) -> bool {
        if is_fatal_accept_error(&e) {
            error!("Listener failed, shutting down: {e}");
            return true;
        }

        // Aborted handshakes and descriptor exhaustion pass; back off and retry.
        warn!("Error accepting connection: {e}");
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        false
    }

    /// Wait for in-flight connections, then abort whatever is left.
    async fn perform_shutdown(tasks: &mut JoinSet<SocketAddr>, drain_timeout: std::time::Duration) {
        info!("Waiting for {len} active connections to complete...", len = tasks.len());
        let drained = tokio::time::timeout(drain_timeout, async {
            while let Some(result) = tasks.join_next().await {
                log_task_result(result);
            }
        })
        .await;

        if drained.is_err() {
            warn!("Drain timeout elapsed, aborting {} connections", tasks.len());
            tasks.shutdown().await;
        }
    }
}

fn log_task_result(result: Result<SocketAddr, tokio::task::JoinError>) {
    match result {
        Ok(addr) => debug!("Connection task for {addr} finished"),
        Err(e) if e.is_cancelled() => debug!("Connection task cancelled"),
        Err(e) => error!("Connection task failed: {e}"),
    }
}

/// Whether `accept` failed because of the listening socket itself rather
/// than one incoming connection.
fn is_fatal_accept_error(e: &std::io::Error) -> bool {
    // EINVAL: the socket is no longer listening. EOPNOTSUPP: not a stream socket.
    matches!(e.kind(), std::io::ErrorKind::InvalidInput | std::io::ErrorKind::Unsupported)
}
