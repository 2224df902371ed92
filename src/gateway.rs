use std::future::{Future, IntoFuture};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::{RawQuery, Request, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeHandle, NativeBridgeEvent};
use crate::config::RunnerConfig;
use crate::credential::SessionCredential;
use crate::error::RunnerError;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::results::ResultQueue;
use crate::services::commands::{Command, Dispatch};
use crate::services::CommandService;
use crate::sse::SseChannels;

pub const EVENT_PATH: &str = "/@vueRunner/event";
pub const COMMAND_PATH: &str = "/@vueRunner/";
/// Terminal SSE payload telling a browser tab to close itself.
pub const STOP_PAYLOAD: &str = "stop";

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Process-scoped state shared by the network loop and the UI shell.
pub struct GatewayContext {
    pub(crate) config: RunnerConfig,
    pub(crate) credential: SessionCredential,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) results: ResultQueue,
    pub(crate) channels: Arc<SseChannels>,
    pub(crate) commands: CommandService,
    pub(crate) events: mpsc::UnboundedSender<NativeBridgeEvent>,
    static_files: ServeDir,
}

impl GatewayContext {
    pub(crate) fn new(
        config: RunnerConfig,
        events: mpsc::UnboundedSender<NativeBridgeEvent>,
    ) -> Self {
        let static_files = ServeDir::new(&config.doc_root).append_index_html_on_directories(true);
        Self {
            config,
            credential: SessionCredential::generate(),
            lifecycle: Lifecycle::new(),
            results: ResultQueue::new(),
            channels: Arc::new(SseChannels::new()),
            commands: CommandService::new(),
            events,
            static_files,
        }
    }

    /// When the UI shell asked for a server-side stop, address a `stop` frame
    /// to the live subscriber (if any) and move on to `Stopping`.
    pub(crate) fn notify_server_stop(&self) {
        if self.lifecycle.current() != LifecycleState::StopFromServer {
            return;
        }
        match self.channels.subscriber() {
            Some(connection_id) => {
                info!(connection_id, "notifying event subscriber of shutdown");
                self.results.push(connection_id, STOP_PAYLOAD);
            }
            None => info!("no live event subscriber to notify of shutdown"),
        }
        self.lifecycle
            .transition(LifecycleState::StopFromServer, LifecycleState::Stopping);
    }

    /// Pushes every queued result to its connection. Results for connections
    /// that have gone away are dropped.
    pub(crate) fn deliver_pending(&self) -> usize {
        let mut delivered = 0;
        for entry in self.results.drain() {
            let connection_id = entry.connection_id;
            if self.channels.push_and_close(connection_id, entry.payload) {
                delivered += 1;
            } else {
                debug!(connection_id, "dropping result for closed connection");
            }
        }
        delivered
    }

    fn is_authorized_cookie(&self, headers: &HeaderMap) -> bool {
        let ok = self.credential.cookie_header_matches(headers);
        if !ok {
            warn!("rejecting request without a valid session cookie");
        }
        ok
    }
}

pub(crate) fn router(context: Arc<GatewayContext>) -> Router {
    Router::new()
        .route(EVENT_PATH, get(open_event_stream))
        .route(COMMAND_PATH, post(run_command))
        .fallback(serve_static)
        .with_state(context)
}

async fn open_event_stream(
    State(context): State<Arc<GatewayContext>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, RunnerError> {
    if context.config.ui_mode.is_embedded() {
        return Err(RunnerError::not_found("event stream unavailable in embedded view"));
    }
    if !context.is_authorized_cookie(&headers)
        || !context.credential.event_query_matches(query.as_deref())
    {
        return Err(RunnerError::unauthorized("invalid event subscription"));
    }

    let (connection_id, stream) = context.channels.open();
    context.channels.set_subscriber(connection_id);
    info!(connection_id, "event subscriber attached");
    Ok(stream.into_response(context.config.keep_alive))
}

async fn run_command(
    State(context): State<Arc<GatewayContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RunnerError> {
    if !context.is_authorized_cookie(&headers) {
        return Err(RunnerError::unauthorized("missing or invalid cookie"));
    }

    let value: Value = serde_json::from_slice(&body)
        .map_err(|error| RunnerError::bad_request(&format!("invalid json body: {error}")))?;
    if !context
        .credential
        .request_token_matches(value.get("id").and_then(Value::as_str))
    {
        warn!("rejecting command with a mismatched request token");
        return Err(RunnerError::unauthorized("request token mismatch"));
    }
    let command = Command::from_value(value)
        .map_err(|error| RunnerError::bad_request(&format!("invalid command: {error}")))?;
    debug!(command = command.name(), "running command");

    match context.commands.dispatch(command).await {
        Dispatch::Reply(body) => Ok(body.into_response()),
        Dispatch::SaveDialog(options) => {
            // The request connection itself carries the dialog result.
            let (connection_id, stream) = context.channels.open();
            let event = NativeBridgeEvent::SaveDialog {
                connection_id,
                options,
            };
            if context.events.send(event).is_err() {
                warn!(connection_id, "ui shell is gone; cancelling save dialog");
                context.results.push(connection_id, "");
            }
            Ok(stream.into_response(context.config.keep_alive))
        }
        Dispatch::Terminate => {
            let previous = context.lifecycle.advance(LifecycleState::StopFromClient);
            info!(from = ?previous, "termination requested by client");
            let _ = context.events.send(NativeBridgeEvent::ClientTerminated);
            context.results.wake();
            Ok(String::new().into_response())
        }
    }
}

async fn serve_static(State(context): State<Arc<GatewayContext>>, request: Request) -> Response {
    let minted = context
        .credential
        .mint_cookie()
        .map(SessionCredential::set_cookie_value);

    let mut response = match context.static_files.clone().try_call(request).await {
        Ok(response) => response.map(Body::new),
        Err(error) => {
            warn!(%error, "static file request failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    };

    if let Some(cookie) = minted {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
                info!("session cookie issued");
            }
            Err(error) => error!(%error, "session cookie is not a valid header value"),
        }
    }
    response
}

/// Returns the first port at or above `base` that refuses a loopback
/// connection. Port 0 is returned as-is and lets the OS pick.
pub fn probe_port(base: u16) -> Option<u16> {
    let mut port = base;
    loop {
        if port == 0 {
            return Some(0);
        }
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
        if TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_err() {
            debug!(port, "port looks free");
            return Some(port);
        }
        debug!(port, "port in use");
        port = port.checked_add(1)?;
    }
}

fn bind_loopback(base: u16) -> Result<TcpListener> {
    let mut next = base;
    loop {
        let port = probe_port(next)
            .ok_or_else(|| anyhow!("no free loopback port at or above {base}"))?;
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => return Ok(listener),
            Err(error) if error.kind() == io::ErrorKind::AddrInUse && port != 0 => {
                warn!(port, "lost the race for port; probing further");
                next = port
                    .checked_add(1)
                    .ok_or_else(|| anyhow!("no free loopback port at or above {base}"))?;
            }
            Err(error) => {
                return Err(error).with_context(|| format!("failed to bind 127.0.0.1:{port}"))
            }
        }
    }
}

/// Sets `Terminated` however the gateway thread exits.
struct TerminateOnExit(Arc<GatewayContext>);

impl Drop for TerminateOnExit {
    fn drop(&mut self) {
        self.0.channels.close_all();
        self.0.lifecycle.mark_terminated();
        info!("gateway terminated");
    }
}

fn run_gateway(context: Arc<GatewayContext>, listener: TcpListener) -> Result<()> {
    run_until_terminated(context, move |context| serve(context, listener))
}

/// Drives `body` on a current-thread runtime. `Terminated` is set on return,
/// error or panic.
fn run_until_terminated<F, Fut>(context: Arc<GatewayContext>, body: F) -> Result<()>
where
    F: FnOnce(Arc<GatewayContext>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let _terminate = TerminateOnExit(Arc::clone(&context));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build gateway runtime")?;
    let result = runtime.block_on(body(context));
    if let Err(error) = &result {
        error!("gateway loop failed: {error:#}");
    }
    result
}

async fn serve(context: Arc<GatewayContext>, listener: TcpListener) -> Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router(Arc::clone(&context)))
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        })
        .into_future();
    let mut server = tokio::spawn(server);

    context.lifecycle.advance(LifecycleState::Running);
    info!("gateway running");

    tokio::select! {
        _ = pump_results(Arc::clone(&context)) => {}
        outcome = &mut server => {
            return match outcome {
                Ok(Ok(())) => Err(anyhow!("http server stopped unexpectedly")),
                Ok(Err(error)) => Err(error).context("http server failed"),
                Err(error) => Err(anyhow!("http server task failed: {error}")),
            };
        }
    }

    context.channels.close_all();
    let _ = stop_tx.send(());
    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(error))) => Err(error).context("http server failed during shutdown"),
        Ok(Err(error)) => Err(anyhow!("http server task failed: {error}")),
        Err(_) => {
            warn!("connections still open after grace period; abandoning them");
            Ok(())
        }
    }
}

/// The gateway's per-cycle work: shutdown notification, result delivery,
/// then a bounded wait. Ends once a stop has been requested.
async fn pump_results(context: Arc<GatewayContext>) {
    loop {
        context.notify_server_stop();
        context.deliver_pending();
        let state = context.lifecycle.current();
        if state.is_stop_requested() {
            info!(state = ?state, "gateway loop exiting");
            return;
        }
        context.results.wait(context.config.poll_interval).await;
    }
}

pub struct Gateway;

impl Gateway {
    /// Binds the loopback port on the calling thread, then runs the gateway
    /// on its own thread. The returned [`BridgeHandle`] belongs to the UI
    /// shell.
    pub fn spawn(config: RunnerConfig) -> Result<(GatewayHandle, BridgeHandle)> {
        if !config.doc_root.is_dir() {
            bail!("document root {} is not a directory", config.doc_root.display());
        }
        let listener = bind_loopback(config.base_port)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        info!(%addr, ui_mode = ?config.ui_mode, "gateway bound");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let context = Arc::new(GatewayContext::new(config, events_tx));
        let thread = std::thread::Builder::new()
            .name("vuerunner-gateway".to_string())
            .spawn({
                let context = Arc::clone(&context);
                move || run_gateway(context, listener)
            })
            .context("failed to start gateway thread")?;

        let handle = GatewayHandle {
            addr,
            context: Arc::clone(&context),
            thread,
        };
        Ok((handle, BridgeHandle::new(context, events_rx)))
    }
}

/// Owner's view of a running gateway thread.
pub struct GatewayHandle {
    addr: SocketAddr,
    context: Arc<GatewayContext>,
    thread: JoinHandle<Result<()>>,
}

impl GatewayHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn request_token(&self) -> &str {
        self.context.credential.request_token()
    }

    /// The URL a browser or web view should open first.
    pub fn launch_url(&self) -> String {
        format!("http://{}/?id={}", self.addr, self.request_token())
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.context.lifecycle.current()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| anyhow!("gateway thread panicked"))?
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::header::{CONTENT_TYPE, COOKIE};
    use axum::http::Method;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::bridge::SaveDialogOptions;
    use crate::config::UiMode;

    struct Fixture {
        root: tempfile::TempDir,
        context: Arc<GatewayContext>,
        events: mpsc::UnboundedReceiver<NativeBridgeEvent>,
    }

    fn fixture(ui_mode: UiMode) -> Fixture {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::write(root.path().join("index.html"), "<html>runner</html>").expect("index");
        let config = RunnerConfig::new(root.path()).with_ui_mode(ui_mode);
        let (tx, events) = mpsc::unbounded_channel();
        Fixture {
            root,
            context: Arc::new(GatewayContext::new(config, tx)),
            events,
        }
    }

    fn cookie_for(context: &GatewayContext) -> String {
        context.credential.mint_cookie();
        format!(
            "token={}",
            context.credential.cookie_token().expect("cookie minted")
        )
    }

    fn command_request(cookie: Option<&str>, body: Value) -> Request {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(COMMAND_PATH)
            .header(CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn first_static_response_sets_cookie_once() {
        let fx = fixture(UiMode::Browser);
        let app = router(Arc::clone(&fx.context));

        let first = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(first.status(), StatusCode::OK);
        let cookie = first
            .headers()
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .expect("set-cookie")
            .to_string();
        assert!(cookie.starts_with("token="));
        assert_eq!(body_text(first).await, "<html>runner</html>");

        let second = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert!(second.headers().get(SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn command_without_cookie_is_unauthorized() {
        let fx = fixture(UiMode::Browser);
        let token = fx.context.credential.request_token().to_string();
        let response = router(Arc::clone(&fx.context))
            .oneshot(command_request(None, json!({ "id": token, "cmd": "isAvailable" })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn command_with_wrong_token_has_no_side_effect() {
        let fx = fixture(UiMode::Browser);
        let cookie = cookie_for(&fx.context);
        let target = fx.root.path().join("never.txt");

        let response = router(Arc::clone(&fx.context))
            .oneshot(command_request(
                Some(&cookie),
                json!({ "id": "wrong", "cmd": "create", "path": target.to_string_lossy() }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn command_route_rejects_other_methods() {
        let fx = fixture(UiMode::Browser);
        let response = router(Arc::clone(&fx.context))
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri(COMMAND_PATH)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let fx = fixture(UiMode::Browser);
        let cookie = cookie_for(&fx.context);
        let request = Request::builder()
            .method(Method::POST)
            .uri(COMMAND_PATH)
            .header(COOKIE, cookie)
            .body(Body::from("{not json"))
            .expect("request");

        let response = router(Arc::clone(&fx.context))
            .oneshot(request)
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn is_available_answers_ok_text() {
        let fx = fixture(UiMode::Browser);
        let cookie = cookie_for(&fx.context);
        let token = fx.context.credential.request_token().to_string();

        let response = router(Arc::clone(&fx.context))
            .oneshot(command_request(
                Some(&cookie),
                json!({ "id": token, "cmd": "isAvailable" }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/plain")));
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn event_stream_is_not_found_in_embedded_view() {
        let fx = fixture(UiMode::EmbeddedView);
        let cookie = cookie_for(&fx.context);
        let uri = format!("{EVENT_PATH}?id={}", fx.context.credential.request_token());

        let response = router(Arc::clone(&fx.context))
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header(COOKIE, cookie)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn event_stream_requires_exact_query() {
        let fx = fixture(UiMode::Browser);
        let cookie = cookie_for(&fx.context);
        let uri = format!("{EVENT_PATH}?id={}&extra=1", fx.context.credential.request_token());

        let response = router(Arc::clone(&fx.context))
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header(COOKIE, cookie)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(fx.context.channels.subscriber(), None);
    }

    #[tokio::test]
    async fn event_stream_registers_subscriber() {
        let fx = fixture(UiMode::Browser);
        let cookie = cookie_for(&fx.context);
        let uri = format!("{EVENT_PATH}?id={}", fx.context.credential.request_token());

        let response = router(Arc::clone(&fx.context))
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header(COOKIE, cookie)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
        assert!(fx.context.channels.subscriber().is_some());

        drop(response);
        assert_eq!(fx.context.channels.subscriber(), None);
    }

    #[tokio::test]
    async fn save_dialog_hands_off_to_ui_and_streams_result() {
        let mut fx = fixture(UiMode::Browser);
        let cookie = cookie_for(&fx.context);
        let token = fx.context.credential.request_token().to_string();

        let response = router(Arc::clone(&fx.context))
            .oneshot(command_request(
                Some(&cookie),
                json!({
                    "id": token,
                    "cmd": "saveDialog",
                    "options": { "title": "Save", "defaultPath": "song.json" }
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let event = fx.events.try_recv().expect("bridge event");
        let NativeBridgeEvent::SaveDialog {
            connection_id,
            options,
        } = event
        else {
            panic!("expected a save dialog event");
        };
        assert_eq!(
            options,
            SaveDialogOptions {
                title: Some("Save".to_string()),
                default_path: Some("song.json".to_string()),
                ..SaveDialogOptions::default()
            }
        );

        fx.context.results.push(connection_id, "/home/me/song.json");
        assert_eq!(fx.context.deliver_pending(), 1);

        assert_eq!(body_text(response).await, "data: /home/me/song.json\n\n");
    }

    #[tokio::test]
    async fn terminate_requests_client_stop() {
        let mut fx = fixture(UiMode::Browser);
        let cookie = cookie_for(&fx.context);
        let token = fx.context.credential.request_token().to_string();
        fx.context.lifecycle.advance(LifecycleState::Running);

        let response = router(Arc::clone(&fx.context))
            .oneshot(command_request(
                Some(&cookie),
                json!({ "id": token, "cmd": "terminate" }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "");
        assert_eq!(fx.context.lifecycle.current(), LifecycleState::StopFromClient);
        assert_eq!(fx.events.try_recv().ok(), Some(NativeBridgeEvent::ClientTerminated));
    }

    #[tokio::test]
    async fn server_stop_notifies_live_subscriber() {
        let fx = fixture(UiMode::Browser);
        let (id, mut stream) = fx.context.channels.open();
        fx.context.channels.set_subscriber(id);
        fx.context.lifecycle.advance(LifecycleState::Running);
        fx.context.lifecycle.advance(LifecycleState::StopFromServer);

        fx.context.notify_server_stop();
        assert_eq!(fx.context.lifecycle.current(), LifecycleState::Stopping);
        assert_eq!(fx.context.deliver_pending(), 1);

        assert_eq!(stream.next_payload().await.as_deref(), Some(STOP_PAYLOAD));
        assert_eq!(stream.next_payload().await, None);
    }

    #[test]
    fn server_stop_without_subscriber_still_progresses() {
        let fx = fixture(UiMode::Browser);
        fx.context.lifecycle.advance(LifecycleState::StopFromServer);

        fx.context.notify_server_stop();

        assert_eq!(fx.context.lifecycle.current(), LifecycleState::Stopping);
        assert!(fx.context.results.is_empty());
    }

    #[test]
    fn results_for_closed_connections_are_dropped() {
        let fx = fixture(UiMode::Browser);
        let (live, _live_stream) = fx.context.channels.open();
        let (gone, gone_stream) = fx.context.channels.open();
        drop(gone_stream);

        fx.context.results.push(gone, "/tmp/lost.txt");
        fx.context.results.push(live, "/tmp/kept.txt");

        assert_eq!(fx.context.deliver_pending(), 1);
        assert!(fx.context.results.is_empty());
    }

    #[tokio::test]
    async fn failed_loop_still_terminates() {
        let fx = fixture(UiMode::Browser);
        let (_, mut stream) = fx.context.channels.open();
        let context = Arc::clone(&fx.context);

        let result = std::thread::spawn(move || {
            run_until_terminated(context, |context| async move {
                context.lifecycle.advance(LifecycleState::Running);
                Err(anyhow!("listener failed"))
            })
        })
        .join()
        .expect("gateway thread");

        assert!(result.is_err());
        assert_eq!(fx.context.lifecycle.current(), LifecycleState::Terminated);
        assert_eq!(fx.context.channels.open_count(), 0);
        assert_eq!(stream.next_payload().await, None);
    }

    #[tokio::test]
    async fn panicking_loop_still_terminates() {
        let fx = fixture(UiMode::Browser);
        let (_, mut stream) = fx.context.channels.open();
        let context = Arc::clone(&fx.context);

        let outcome = std::thread::spawn(move || {
            run_until_terminated(context, |context| async move {
                context.lifecycle.advance(LifecycleState::Running);
                if context.lifecycle.current() == LifecycleState::Running {
                    panic!("pump crashed");
                }
                Ok(())
            })
        })
        .join();

        assert!(outcome.is_err());
        assert_eq!(fx.context.lifecycle.current(), LifecycleState::Terminated);
        assert_eq!(fx.context.channels.open_count(), 0);
        assert_eq!(stream.next_payload().await, None);
    }

    #[test]
    fn probe_skips_listening_ports() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind");
        let port = taken.local_addr().expect("addr").port();

        let probed = probe_port(port).expect("free port");

        assert!(probed > port);
    }

    #[test]
    fn probe_of_zero_defers_to_os() {
        assert_eq!(probe_port(0), Some(0));
    }
}
