// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP listener that accepts tracer requests on any path and acknowledges them with `{}`.

use std::io;
use std::net::{Ipv6Addr, SocketAddr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{http, Request};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::ListenerError;
use crate::http_utils::{
    create_empty_json_response, declared_content_length, request_url, HttpResponse,
};
use crate::DEFAULT_TRACE_AGENT_PORT;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Port to bind on the loopback interfaces. `0` picks a free port.
    pub port: u16,
    /// When unset the handler is still invoked for every request, with an empty body and the
    /// declared Content-Length (0 if none).
    pub read_request_body: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            port: DEFAULT_TRACE_AGENT_PORT,
            read_request_body: true,
        }
    }
}

/// A request as seen by a [`RequestHandler`]. The body is only borrowed for the duration of the
/// call; handlers that keep it must copy it.
#[derive(Clone, Copy, Debug)]
pub struct ReceivedRequest<'a> {
    /// Path and query of the request target.
    pub url: &'a str,
    /// Declared Content-Length, or the number of bytes read when none was declared.
    pub content_length: u64,
    pub body: &'a [u8],
}

/// Callback invoked once per received request, on the connection's task.
///
/// Errors and panics are logged by the listener and never affect the response.
pub trait RequestHandler: Send + Sync {
    fn on_request(&self, request: &ReceivedRequest<'_>) -> anyhow::Result<()>;
}

impl<F> RequestHandler for F
where
    F: Fn(&ReceivedRequest<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn on_request(&self, request: &ReceivedRequest<'_>) -> anyhow::Result<()> {
        self(request)
    }
}

/// A running listener. Dropping it stops accepting connections.
pub struct TraceListener {
    local_addr: SocketAddr,
    cancel_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TraceListener {
    /// Binds `127.0.0.1:<port>`, and `[::1]` on the same port so that `localhost` works for IPv6
    /// clients, then starts accepting connections on a new task.
    ///
    /// Only the IPv4 bind is required: when the IPv6 loopback is unavailable the listener logs it
    /// and serves IPv4 alone. Without a handler request bodies are never read. Must be called from
    /// within a tokio runtime.
    pub async fn bind(
        config: ListenerConfig,
        handler: Option<Arc<dyn RequestHandler>>,
    ) -> Result<TraceListener, ListenerError> {
        let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        let ipv6_addr = SocketAddr::from((Ipv6Addr::LOCALHOST, local_addr.port()));
        let ipv6_listener = match TcpListener::bind(ipv6_addr).await {
            Ok(ipv6_listener) => Some(ipv6_listener),
            Err(e) => {
                warn!("Not listening on {ipv6_addr}, serving IPv4 only: {e}");
                None
            }
        };

        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(Self::serve_tcp(
            listener,
            ipv6_listener,
            handler,
            config.read_request_body,
            cancel_token.clone(),
        ));
        info!("Trace listener started: listening on {local_addr}");

        Ok(TraceListener {
            local_addr,
            cancel_token,
            task: Mutex::new(Some(task)),
        })
    }

    /// The IPv4 address. The IPv6 loopback, when bound, uses the same port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stops accepting connections. Connections in flight are abandoned. Safe to call repeatedly
    /// and from any thread.
    pub fn stop(&self) {
        if !self.cancel_token.is_cancelled() {
            debug!("Stopping trace listener on {}", self.local_addr);
            self.cancel_token.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Stops the listener and waits until its socket is closed.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Trace listener task failed: {e:?}");
            }
        }
    }

    async fn serve_tcp(
        listener: TcpListener,
        ipv6_listener: Option<TcpListener>,
        handler: Option<Arc<dyn RequestHandler>>,
        read_request_body: bool,
        cancel_token: CancellationToken,
    ) {
        let server = hyper::server::conn::http1::Builder::new();
        let service =
            service_fn(move |req| handle_request(req, handler.clone(), read_request_body));
        let mut joinset = JoinSet::new();

        loop {
            let conn = tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                con_res = accept_any(&listener, ipv6_listener.as_ref()) => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Trace listener error: {e}");
                        break;
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    debug!("Connection error: {e}");
                }
            });
        }

        joinset.abort_all();
        info!("Trace listener stopped");
    }
}

/// Accepts the next connection from whichever socket gets one first.
async fn accept_any(
    listener: &TcpListener,
    ipv6_listener: Option<&TcpListener>,
) -> io::Result<(TcpStream, SocketAddr)> {
    match ipv6_listener {
        Some(ipv6_listener) => tokio::select! {
            res = listener.accept() => res,
            res = ipv6_listener.accept() => res,
        },
        None => listener.accept().await,
    }
}

impl Drop for TraceListener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_request(
    req: Request<Incoming>,
    handler: Option<Arc<dyn RequestHandler>>,
    read_request_body: bool,
) -> http::Result<HttpResponse> {
    let Some(handler) = handler else {
        debug!("Received {} {}", req.method(), req.uri());
        return create_empty_json_response();
    };

    let (parts, body) = req.into_parts();
    let body = if read_request_body {
        match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("Failed to read request body for {}: {e}", parts.uri);
                return create_empty_json_response();
            }
        }
    } else {
        Bytes::new()
    };

    let request = ReceivedRequest {
        url: request_url(&parts.uri),
        content_length: declared_content_length(&parts.headers).unwrap_or(body.len() as u64),
        body: &body,
    };
    debug!(
        "Received {} {} with {} bytes",
        parts.method,
        request.url,
        body.len()
    );
    invoke_handler(handler.as_ref(), &request);
    create_empty_json_response()
}

fn invoke_handler(handler: &dyn RequestHandler, request: &ReceivedRequest<'_>) {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.on_request(request))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Request handler failed for {}: {e:#}", request.url),
        Err(_) => error!("Request handler panicked for {}", request.url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[derive(Debug, PartialEq)]
    struct Recorded {
        url: String,
        content_length: u64,
        body: Vec<u8>,
    }

    fn recording_handler() -> (Arc<dyn RequestHandler>, Arc<Mutex<Vec<Recorded>>>) {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = recorded.clone();
        let handler = move |request: &ReceivedRequest<'_>| -> anyhow::Result<()> {
            sink.lock().unwrap().push(Recorded {
                url: request.url.to_string(),
                content_length: request.content_length,
                body: request.body.to_vec(),
            });
            Ok(())
        };
        (Arc::new(handler), recorded)
    }

    async fn bind_any(handler: Option<Arc<dyn RequestHandler>>) -> TraceListener {
        TraceListener::bind(
            ListenerConfig {
                port: 0,
                ..Default::default()
            },
            handler,
        )
        .await
        .unwrap()
    }

    async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8(response).unwrap()
    }

    fn assert_empty_json_ok(response: &str) {
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.to_lowercase().contains("content-length: 2"), "{response}");
        assert!(response.ends_with("\r\n\r\n{}"), "{response}");
    }

    #[tokio::test]
    async fn test_bind_reports_port() {
        let listener = bind_any(None).await;
        assert_ne!(listener.port(), 0);
        assert!(listener.local_addr().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_responds_without_handler() {
        let listener = bind_any(None).await;
        let response = send_raw(
            listener.local_addr(),
            b"PUT /v0.4/traces HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
        )
        .await;
        assert_empty_json_ok(&response);
    }

    #[tokio::test]
    async fn test_handler_receives_request() {
        let (handler, recorded) = recording_handler();
        let listener = bind_any(Some(handler)).await;

        let response = send_raw(
            listener.local_addr(),
            b"POST /v0.4/traces?x=1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 5\r\n\r\nhello",
        )
        .await;
        assert_empty_json_ok(&response);

        assert_eq!(
            *recorded.lock().unwrap(),
            vec![Recorded {
                url: "/v0.4/traces?x=1".to_string(),
                content_length: 5,
                body: b"hello".to_vec(),
            }]
        );
    }

    #[tokio::test]
    async fn test_chunked_body_uses_bytes_read() {
        let (handler, recorded) = recording_handler();
        let listener = bind_any(Some(handler)).await;

        send_raw(
            listener.local_addr(),
            b"POST /v0.4/traces HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n4\r\ndefg\r\n0\r\n\r\n",
        )
        .await;

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded[0].content_length, 7);
        assert_eq!(recorded[0].body, b"abcdefg");
    }

    #[tokio::test]
    async fn test_any_method_and_path_is_acknowledged() {
        let (handler, recorded) = recording_handler();
        let listener = bind_any(Some(handler)).await;

        for request in [
            &b"GET /info HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"[..],
            &b"DELETE /anything/else HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"[..],
        ] {
            assert_empty_json_ok(&send_raw(listener.local_addr(), request).await);
        }
        let urls: Vec<String> = recorded.lock().unwrap().iter().map(|r| r.url.clone()).collect();
        assert_eq!(urls, vec!["/info", "/anything/else"]);
    }

    #[tokio::test]
    async fn test_handler_failures_do_not_affect_response() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = move |request: &ReceivedRequest<'_>| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            match request.url {
                "/error" => anyhow::bail!("handler error"),
                "/panic" => panic!("handler panic"),
                _ => Ok(()),
            }
        };
        let listener = bind_any(Some(Arc::new(handler))).await;

        for path in ["/error", "/panic", "/ok"] {
            let request = format!(
                "POST {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
            );
            assert_empty_json_ok(&send_raw(listener.local_addr(), request.as_bytes()).await);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let listener = bind_any(None).await;
        let result = TraceListener::bind(
            ListenerConfig {
                port: listener.port(),
                ..Default::default()
            },
            None,
        )
        .await;
        assert!(matches!(result, Err(ListenerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes_socket() {
        let listener = bind_any(None).await;
        let addr = listener.local_addr();

        listener.stop();
        listener.stop();
        assert!(listener.is_stopped());
        listener.shutdown().await;
        listener.shutdown().await;

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_accepts_ipv6_loopback_on_same_port() {
        if std::net::TcpListener::bind("[::1]:0").is_err() {
            // host without an IPv6 loopback
            return;
        }
        let (handler, recorded) = recording_handler();
        let listener = bind_any(Some(handler)).await;
        let addr = SocketAddr::from((Ipv6Addr::LOCALHOST, listener.port()));

        let response = send_raw(
            addr,
            b"PUT /v0.4/traces HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 2\r\n\r\nhi",
        )
        .await;
        assert_empty_json_ok(&response);
        assert_eq!(recorded.lock().unwrap().len(), 1);
        assert_eq!(recorded.lock().unwrap()[0].body, b"hi");

        listener.shutdown().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_port_is_reusable_after_shutdown() {
        let listener = bind_any(None).await;
        let port = listener.port();
        listener.shutdown().await;
        drop(listener);

        let config = ListenerConfig {
            port,
            ..Default::default()
        };
        let rebound = TraceListener::bind(config, None).await.unwrap();
        assert_eq!(rebound.port(), port);
    }

    #[tokio::test]
    async fn test_handler_without_body() {
        let (handler, recorded) = recording_handler();
        let config = ListenerConfig {
            port: 0,
            read_request_body: false,
        };
        let listener = TraceListener::bind(config, Some(handler)).await.unwrap();

        let response = send_raw(
            listener.local_addr(),
            b"PUT /v0.4/traces HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 5\r\n\r\nhello",
        )
        .await;
        assert_empty_json_ok(&response);

        assert_eq!(
            *recorded.lock().unwrap(),
            vec![Recorded {
                url: "/v0.4/traces".to_string(),
                content_length: 5,
                body: Vec::new(),
            }]
        );
    }

    #[test]
    fn test_default_config() {
        let config = ListenerConfig::default();
        assert_eq!(config.port, 8126);
        assert!(config.read_request_body);
    }
}
