//! Test helpers: a running adapter and local subscriber endpoints.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use presence_events::AdapterConfig;
use presence_server::{DeviceCatalog, PresenceServer, ServerConfig};
use tokio::sync::{mpsc, oneshot};
use warp::http::{HeaderMap, Method, StatusCode};
use warp::Filter;

/// A request received by the [`CallbackReceiver`].
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Subscriber endpoint that answers every request with a fixed status and
/// forwards what it received to a channel.
pub struct CallbackReceiver {
    addr: SocketAddr,
    requests: mpsc::UnboundedReceiver<ReceivedRequest>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl CallbackReceiver {
    pub async fn start() -> Self {
        Self::start_with_status(StatusCode::OK).await
    }

    pub async fn start_with_status(status: StatusCode) -> Self {
        let (tx, requests) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let route = warp::method()
            .and(warp::path::full())
            .and(warp::header::headers_cloned())
            .and(warp::body::bytes())
            .map(
                move |method: Method, path: warp::path::FullPath, headers: HeaderMap, body: Bytes| {
                    let _ = tx.send(ReceivedRequest {
                        method,
                        path: path.as_str().to_string(),
                        headers,
                        body: String::from_utf8_lossy(&body).to_string(),
                    });
                    warp::reply::with_status("", status)
                },
            );

        let (addr, server) = warp::serve(route).bind_with_graceful_shutdown(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            async move {
                let _ = shutdown_rx.await;
            },
        );
        tokio::spawn(server);

        Self {
            addr,
            requests,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Callback URL of this receiver, with `path` appended.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Next received request, or `None` if nothing arrives within `wait`.
    pub async fn next(&mut self, wait: Duration) -> Option<ReceivedRequest> {
        tokio::time::timeout(wait, self.requests.recv()).await.ok().flatten()
    }
}

impl Drop for CallbackReceiver {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// URL on localhost where nothing is listening.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/callback")
}

/// Start an adapter on a free localhost port describing `phone-1`.
pub async fn start_server(adapter: AdapterConfig) -> PresenceServer {
    let config = ServerConfig::default()
        .with_bind_address(SocketAddr::from(([127, 0, 0, 1], 0)))
        .with_devices(DeviceCatalog::new().with_device("phone-1", "Test Phone"))
        .with_adapter_config(adapter);

    PresenceServer::start(config)
        .await
        .expect("Failed to start presence server")
}

/// `SUBSCRIBE`, `UNSUBSCRIBE` and the other request kinds used by GENA.
pub fn method(name: &str) -> reqwest::Method {
    reqwest::Method::from_bytes(name.as_bytes()).unwrap()
}
