//! HTTP control surface of the presence adapter.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use presence_events::{
    AdapterConfig, CallbackRegistry, ExpirationSweeper, HttpDelivery, NewSubscription,
    NotificationDispatcher, Subscription,
};
use presence_store::{DeviceId, PresenceState, PresenceStore};
use tokio::sync::mpsc;
use tokio::time::Instant;
use warp::http::header::{CONTENT_LENGTH, CONTENT_TYPE, SERVER};
use warp::http::{HeaderMap, Method, Response, StatusCode};
use warp::hyper::Body;
use warp::{Filter, Rejection};

use crate::config::ServerConfig;
use crate::description::DescriptionSource;
use crate::error::{RequestError, ServerError};
use crate::headers::{self, HeaderError};

/// Header echoing the device a subscription was made for, under the name
/// SmartThings hubs read it from.
pub const DEVICE_HEADER: &str = "Smartthings-Device";

const DESCRIPTION_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Shared state handed to every request.
struct AppState {
    dispatcher: NotificationDispatcher,
    adapter: AdapterConfig,
    server_header: String,
    descriptions: Arc<dyn DescriptionSource>,
}

/// The presence adapter's HTTP server.
///
/// Serves `GET`, `SUBSCRIBE`, `UNSUBSCRIBE` and `PUT` on `/devices/{id}`,
/// and owns the expiration sweeper for its callback registry.
///
/// # Example
///
/// ```no_run
/// use presence_server::{DeviceCatalog, PresenceServer, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), presence_server::ServerError> {
///     let config = ServerConfig::default()
///         .with_devices(DeviceCatalog::new().with_device("phone-1", "Alice's Phone"));
///
///     let server = PresenceServer::start(config).await?;
///     println!("Listening at {}", server.base_url());
///
///     tokio::signal::ctrl_c().await.ok();
///     server.shutdown().await
/// }
/// ```
pub struct PresenceServer {
    local_addr: SocketAddr,
    base_url: String,
    dispatcher: NotificationDispatcher,
    sweeper: Option<ExpirationSweeper>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl PresenceServer {
    /// Start a server whose description documents come from `config.devices`.
    pub async fn start(config: ServerConfig) -> Result<Self, ServerError> {
        let descriptions = Arc::new(config.devices.clone());
        Self::with_descriptions(config, descriptions).await
    }

    /// Start a server with a custom description source.
    ///
    /// Binds the listener, starts the expiration sweeper and begins serving
    /// requests before returning.
    pub async fn with_descriptions(
        config: ServerConfig,
        descriptions: Arc<dyn DescriptionSource>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let registry = CallbackRegistry::new();
        let delivery = Arc::new(HttpDelivery::new(config.adapter.delivery_timeout)?);
        let dispatcher = NotificationDispatcher::new(
            PresenceStore::new(),
            registry.clone(),
            delivery,
            &config.adapter,
        );

        let state = Arc::new(AppState {
            dispatcher: dispatcher.clone(),
            adapter: config.adapter.clone(),
            server_header: config.server_header.clone(),
            descriptions,
        });

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let (local_addr, server) = warp::serve(routes(state))
            .try_bind_with_graceful_shutdown(config.bind_address, async move {
                shutdown_rx.recv().await;
            })
            .map_err(|e| ServerError::Bind {
                address: config.bind_address.to_string(),
                message: e.to_string(),
            })?;

        let server_handle = tokio::spawn(server);
        let sweeper = ExpirationSweeper::start(registry, config.adapter.sweep_interval);

        tracing::info!(
            address = %local_addr,
            sweep_interval_ms = config.adapter.sweep_interval.as_millis() as u64,
            "presence server listening"
        );

        Ok(Self {
            local_addr,
            base_url: format!("http://{local_addr}"),
            dispatcher,
            sweeper: Some(sweeper),
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://<address>:<port>` of this server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &CallbackRegistry {
        self.dispatcher.registry()
    }

    pub fn store(&self) -> &PresenceStore {
        self.dispatcher.store()
    }

    /// Stop accepting requests, wait for in-flight requests, then stop the sweeper.
    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| ServerError::Task(e.to_string()))?;
        }

        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown().await?;
        }

        tracing::info!(address = %self.local_addr, "presence server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for PresenceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceServer")
            .field("local_addr", &self.local_addr)
            .field("running", &self.server_handle.is_some())
            .finish()
    }
}

fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    warp::path("devices")
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::method())
        .and(warp::header::headers_cloned())
        .and(warp::body::bytes())
        .and(with_state(state))
        .and_then(handle_device_request)
        .recover(handle_rejection)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn handle_device_request(
    device_id: String,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
    state: Arc<AppState>,
) -> Result<Response<Body>, Rejection> {
    let device_id = DeviceId::new(device_id);

    let result = match method.as_str() {
        "GET" => return describe(&state, &device_id),
        "SUBSCRIBE" => subscribe(&state, &device_id, &headers).await,
        "UNSUBSCRIBE" => unsubscribe(&state, &device_id, &headers).await,
        "PUT" => set_presence(&state, &device_id, &body).await,
        _ => return Err(warp::reject::not_found()),
    };

    result.map_err(|e| {
        tracing::debug!(device_id = %device_id, method = %method, error = %e, "request rejected");
        warp::reject::custom(e)
    })
}

fn describe(state: &AppState, device_id: &DeviceId) -> Result<Response<Body>, Rejection> {
    let document = state
        .descriptions
        .description(device_id)
        .ok_or_else(warp::reject::not_found)?;

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, DESCRIPTION_CONTENT_TYPE)
        .body(Body::from(document))
        .map_err(|e| warp::reject::custom(RequestError::Internal(e.to_string())))
}

async fn subscribe(
    state: &AppState,
    device_id: &DeviceId,
    headers: &HeaderMap,
) -> Result<Response<Body>, RequestError> {
    let callback = header_value(headers, "CALLBACK")?;
    let sid = header_value(headers, "SID")?;
    let timeout = header_value(headers, "TIMEOUT")?
        .map(headers::parse_timeout)
        .transpose()?;
    let lease = state.adapter.grant_lease(timeout);

    let subscription = match (sid, callback) {
        (Some(_), Some(_)) => return Err(HeaderError::SidWithCallback.into()),
        (None, None) => return Err(HeaderError::Missing("CALLBACK").into()),
        (Some(sid), None) => {
            let id = headers::parse_sid(sid)?;
            state
                .dispatcher
                .registry()
                .renew(device_id, &id, lease, Instant::now())
                .await?
        }
        (None, Some(callback)) => {
            let callback = headers::parse_callback(callback)?;
            state
                .dispatcher
                .subscribe(device_id, NewSubscription::new(callback, lease))
                .await?
        }
    };

    subscription_response(state, &subscription)
}

fn subscription_response(
    state: &AppState,
    subscription: &Subscription,
) -> Result<Response<Body>, RequestError> {
    Response::builder()
        .status(StatusCode::OK)
        .header("SID", subscription.id().to_sid())
        .header("TIMEOUT", headers::format_timeout(subscription.duration()))
        .header(SERVER, state.server_header.as_str())
        .header(CONTENT_LENGTH, "0")
        .header(DEVICE_HEADER, subscription.device_id().as_str())
        .body(Body::empty())
        .map_err(|e| RequestError::Internal(e.to_string()))
}

async fn unsubscribe(
    state: &AppState,
    device_id: &DeviceId,
    headers: &HeaderMap,
) -> Result<Response<Body>, RequestError> {
    let sid = header_value(headers, "SID")?.ok_or(HeaderError::Missing("SID"))?;
    let id = headers::parse_sid(sid)?;

    state.dispatcher.registry().remove(device_id, &id).await?;

    empty_response(StatusCode::OK)
}

async fn set_presence(
    state: &AppState,
    device_id: &DeviceId,
    body: &Bytes,
) -> Result<Response<Body>, RequestError> {
    if !device_id.is_valid() {
        return Err(RequestError::BadRequest(
            "device id must not be empty".to_string(),
        ));
    }

    let presence = parse_presence_body(body)?;
    let changed = state.dispatcher.publish(device_id, presence).await;

    tracing::debug!(
        device_id = %device_id,
        state = %presence,
        changed,
        "presence override"
    );
    empty_response(StatusCode::OK)
}

/// Parse a `PUT` body: the form `state=Present` or a bare `Present`/`Absent`.
fn parse_presence_body(body: &[u8]) -> Result<PresenceState, RequestError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| RequestError::BadRequest("body is not valid UTF-8".to_string()))?;

    let value = if text.contains('=') {
        url::form_urlencoded::parse(text.as_bytes())
            .find(|(key, _)| key.eq_ignore_ascii_case("state"))
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| RequestError::BadRequest("missing state field".to_string()))?
    } else {
        text.to_string()
    };

    value
        .parse()
        .map_err(|e: presence_store::ParsePresenceError| RequestError::BadRequest(e.to_string()))
}

fn header_value<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<Option<&'a str>, HeaderError> {
    headers
        .get(name)
        .map(|value| value.to_str().map_err(|_| HeaderError::NotUtf8(name)))
        .transpose()
}

fn empty_response(status: StatusCode) -> Result<Response<Body>, RequestError> {
    Response::builder()
        .status(status)
        .header(CONTENT_LENGTH, "0")
        .body(Body::empty())
        .map_err(|e| RequestError::Internal(e.to_string()))
}

/// Handle rejections and convert them to HTTP responses.
async fn handle_rejection(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(error) = err.find::<RequestError>() {
        (error.status(), error.to_string())
    } else {
        tracing::warn!(rejection = ?err, "unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(warp::reply::with_status(message, code))
}
