//! # WebSocket Session Handler
//!
//! Clients connect to `/ws` and send transcribed speech as JSON text frames.
//! Each connection is an independent Actix actor wrapping a
//! [`SessionHandler`].
//!
//! ## Session Lifecycle:
//! 1. **Connected**: Actor starts, session is added to the registry
//! 2. **Reading**: Waiting for the next frame
//! 3. **Dispatching**: Frame handled (including the weather lookup), reply sent
//! 4. **Closed**: Client closed, transport error, heartbeat timeout or an
//!    internal fault; session is removed from the registry
//!
//! ## Ordering:
//! Frames are handled with `ctx.wait`, which suspends the actor's input until
//! the future resolves. A second frame is therefore never looked at before the
//! reply to the first one has been queued. Other connections are separate
//! actors and keep running while one of them waits on the backend.

use crate::session::{ConnectionRegistry, OutboundMessage, SessionHandler};
use crate::session::handler::{INTERNAL_ERROR_MESSAGE, INVALID_FORMAT_MESSAGE};
use crate::state::AppState;
use crate::weather::WeatherProvider;

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a frame's processing ended, as seen by the actor.
type FrameOutcome = Result<Option<OutboundMessage>, Box<dyn Any + Send>>;

/// Upper bound for a message reassembled from continuation frames.
const MAX_FRAGMENTED_MESSAGE_BYTES: usize = 256 * 1024;

/// A fragmented message whose final frame has not arrived yet.
struct Fragments {
    is_text: bool,
    data: Vec<u8>,
}

/// One WebSocket connection.
pub struct WeatherWebSocket {
    session_id: Uuid,
    peer_addr: Option<String>,
    handler: Arc<SessionHandler>,
    registry: ConnectionRegistry,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
    fragments: Option<Fragments>,
}

impl WeatherWebSocket {
    pub fn new(
        handler: SessionHandler,
        registry: ConnectionRegistry,
        peer_addr: Option<String>,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            session_id: handler.session_id(),
            peer_addr,
            handler: Arc::new(handler),
            registry,
            heartbeat_interval,
            client_timeout,
            last_heartbeat: Instant::now(),
            fragments: None,
        }
    }

    /// Hand a text frame to the session handler and block further input until it is answered.
    fn dispatch(&mut self, frame: String, ctx: &mut ws::WebsocketContext<Self>) {
        let handler = self.handler.clone();
        let work = async move {
            AssertUnwindSafe(handler.handle_frame(&frame))
                .catch_unwind()
                .await
        };

        ctx.wait(work.into_actor(self).map(
            |outcome: FrameOutcome, act, ctx| match outcome {
                Ok(Some(reply)) => act.send(&reply, ctx),
                Ok(None) => {}
                Err(panic) => act.fail(&panic_message(panic.as_ref()), ctx),
            },
        ));
    }

    fn send(&mut self, message: &OutboundMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => self.fail(&format!("could not encode reply: {}", err), ctx),
        }
    }

    /// Unexpected fault: tell the client if we still can, then close this session only.
    fn fail(&mut self, cause: &str, ctx: &mut ws::WebsocketContext<Self>) {
        error!(session_id = %self.session_id, cause = %cause, "Internal error in WebSocket session");

        match serde_json::to_string(&OutboundMessage::error(INTERNAL_ERROR_MESSAGE)) {
            Ok(json) => ctx.text(json),
            Err(err) => warn!(
                session_id = %self.session_id,
                error = %err,
                "Could not notify client about internal error"
            ),
        }

        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Error,
            description: Some("internal error".to_string()),
        }));
        ctx.stop();
    }

    /// Collect continuation frames; the complete message is handled like a single frame.
    ///
    /// The codec already rejects out-of-order fragments as protocol errors.
    fn continuation(&mut self, item: Item, ctx: &mut ws::WebsocketContext<Self>) {
        let (chunk, last) = match item {
            Item::FirstText(data) => {
                self.fragments = Some(Fragments { is_text: true, data: Vec::new() });
                (data, false)
            }
            Item::FirstBinary(data) => {
                self.fragments = Some(Fragments { is_text: false, data: Vec::new() });
                (data, false)
            }
            Item::Continue(data) => (data, false),
            Item::Last(data) => (data, true),
        };

        let Some(fragments) = self.fragments.as_mut() else {
            warn!(session_id = %self.session_id, "Continuation frame without a start frame");
            return;
        };

        if fragments.data.len() + chunk.len() > MAX_FRAGMENTED_MESSAGE_BYTES {
            warn!(session_id = %self.session_id, "Fragmented message too large, dropping it");
            self.fragments = None;
            self.send(&OutboundMessage::error(INVALID_FORMAT_MESSAGE), ctx);
            return;
        }
        fragments.data.extend_from_slice(&chunk);

        if !last {
            return;
        }
        let Some(Fragments { is_text, data }) = self.fragments.take() else {
            return;
        };

        match String::from_utf8(data) {
            Ok(text) if is_text => self.dispatch(text, ctx),
            _ => {
                warn!(session_id = %self.session_id, "Fragmented message is not valid text");
                self.send(&OutboundMessage::error(INVALID_FORMAT_MESSAGE), ctx);
            }
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(session_id = %act.session_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WeatherWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let total = self.registry.add(self.session_id, self.peer_addr.clone());
        info!(
            session_id = %self.session_id,
            peer_addr = ?self.peer_addr,
            total_clients = total,
            "Client connected"
        );
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.registry.remove(&self.session_id);
        info!(
            session_id = %self.session_id,
            total_clients = self.registry.count(),
            "Client disconnected"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WeatherWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.dispatch(text.to_string(), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                warn!(session_id = %self.session_id, bytes = data.len(), "Received binary frame");
                self.send(&OutboundMessage::error(INVALID_FORMAT_MESSAGE), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, reason = ?reason, "WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(item)) => {
                self.last_heartbeat = Instant::now();
                self.continuation(item, ctx);
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic while handling frame".to_string()
    }
}

/// WebSocket endpoint: upgrades the request and starts a session actor.
pub async fn weather_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let peer_addr = req.connection_info().peer_addr().map(str::to_string);
    debug!(peer_addr = ?peer_addr, "New WebSocket connection request");

    let config = app_state.get_config();
    let provider: Arc<dyn WeatherProvider> = app_state.weather.clone();
    let handler = SessionHandler::new(Uuid::new_v4(), &config.session.trigger_word, provider);

    let websocket = WeatherWebSocket::new(
        handler,
        app_state.registry.clone(),
        peer_addr,
        config.session.heartbeat_interval(),
        config.session.client_timeout(),
    );

    ws::start(websocket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::weather::WeatherResult;
    use actix_web::{App, HttpServer};
    use async_trait::async_trait;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};
    use tokio_tungstenite::tungstenite::protocol::frame::Frame;
    use tokio_tungstenite::tungstenite::Message;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Backend stub answering `{"temp": 20, "city": <last path segment>}`.
    struct EchoCity;

    impl Respond for EchoCity {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let segment = request.url.path_segments().and_then(|s| s.last()).unwrap_or("");
            let city = percent_encoding::percent_decode_str(segment).decode_utf8_lossy().to_string();
            ResponseTemplate::new(200).set_body_json(json!({"temp": 20, "city": city}))
        }
    }

    async fn start_relay(backend: &MockServer) -> (SocketAddr, AppState) {
        let mut config = AppConfig::default();
        config.weather.base_url = format!("{}/api/weather", backend.uri());
        let state = AppState::new(config).unwrap();

        let data = web::Data::new(state.clone());
        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .route("/ws", web::get().to(weather_websocket))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());

        (addr, state)
    }

    /// Provider that panics for "absturz" and answers every other city.
    struct CrashingProvider;

    #[async_trait]
    impl WeatherProvider for CrashingProvider {
        async fn fetch(&self, location: &str) -> WeatherResult {
            if location == "absturz" {
                panic!("provider blew up");
            }
            WeatherResult::Success {
                payload: json!({"city": location}),
            }
        }
    }

    /// Relay whose sessions use `provider` directly instead of the HTTP client.
    async fn start_relay_with(provider: Arc<dyn WeatherProvider>) -> (SocketAddr, ConnectionRegistry) {
        let registry = ConnectionRegistry::new();
        let shared = registry.clone();

        let server = HttpServer::new(move || {
            let provider = provider.clone();
            let registry = shared.clone();
            App::new().route(
                "/ws",
                web::get().to(move |req: HttpRequest, stream: web::Payload| {
                    let handler = SessionHandler::new(Uuid::new_v4(), "wetter", provider.clone());
                    let session = WeatherWebSocket::new(
                        handler,
                        registry.clone(),
                        None,
                        Duration::from_secs(30),
                        Duration::from_secs(60),
                    );
                    async move { ws::start(session, &req, stream) }
                }),
            )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());

        (addr, registry)
    }

    async fn start_backend() -> MockServer {
        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/weather/.+$"))
            .respond_with(EchoCity)
            .mount(&backend)
            .await;
        backend
    }

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn connect(addr: SocketAddr) -> Client {
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();
        client
    }

    async fn send_text(client: &mut Client, text: &str) {
        client.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Next frame that is not a ping or pong.
    async fn next_message(client: &mut Client) -> Message {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection closed")
                .unwrap();
            if !matches!(msg, Message::Ping(_) | Message::Pong(_)) {
                return msg;
            }
        }
    }

    async fn wait_for_count(registry: &ConnectionRegistry, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.count() != expected && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(registry.count(), expected);
    }

    /// Next JSON text frame, skipping heartbeat pings.
    async fn next_json(client: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for reply")
                .expect("connection closed")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    fn transcription(text: &str) -> String {
        json!({"type": "transcription_frontend", "text": text}).to_string()
    }

    #[actix_web::test]
    async fn round_trip_over_websocket() {
        let backend = start_backend().await;
        let (addr, _state) = start_relay(&backend).await;
        let mut client = connect(addr).await;

        send_text(&mut client, &transcription("wetter berlin")).await;
        let reply = next_json(&mut client).await;

        assert_eq!(
            reply,
            json!({
                "type": "command_understood_display_weather",
                "city": "berlin",
                "weatherPayload": {"temp": 20, "city": "berlin"}
            })
        );
    }

    #[actix_web::test]
    async fn bad_frames_do_not_close_the_connection() {
        let backend = start_backend().await;
        let (addr, _state) = start_relay(&backend).await;
        let mut client = connect(addr).await;

        send_text(&mut client, "this is not json").await;
        assert_eq!(next_json(&mut client).await["message"], INVALID_FORMAT_MESSAGE);

        send_text(&mut client, &transcription("wetter")).await;
        assert_eq!(next_json(&mut client).await["type"], "error_from_python");

        // Ignored: no trigger word. The next reply must belong to the following frame.
        send_text(&mut client, &transcription("hallo welt")).await;
        send_text(&mut client, &transcription("wetter köln")).await;
        let reply = next_json(&mut client).await;
        assert_eq!(reply["type"], "command_understood_display_weather");
        assert_eq!(reply["city"], "köln");
    }

    #[actix_web::test]
    async fn replies_keep_frame_order() {
        let backend = start_backend().await;
        let (addr, _state) = start_relay(&backend).await;
        let mut client = connect(addr).await;

        for city in ["bonn", "mainz", "trier"] {
            send_text(&mut client, &transcription(&format!("wetter {}", city))).await;
        }
        for city in ["bonn", "mainz", "trier"] {
            assert_eq!(next_json(&mut client).await["city"], city);
        }
    }

    #[actix_web::test]
    async fn concurrent_clients_only_see_their_own_reply() {
        let backend = start_backend().await;
        let (addr, _state) = start_relay(&backend).await;
        let cities = ["berlin", "hamburg", "dresden", "leipzig", "kiel"];

        let mut clients = Vec::new();
        for _ in cities {
            clients.push(connect(addr).await);
        }
        for (client, city) in clients.iter_mut().zip(cities) {
            send_text(client, &transcription(&format!("wetter {}", city))).await;
        }
        for (client, city) in clients.iter_mut().zip(cities) {
            let reply = next_json(client).await;
            assert_eq!(reply["city"], city);
            assert_eq!(reply["weatherPayload"]["city"], city);
        }
    }

    #[actix_web::test]
    async fn registry_tracks_connect_and_disconnect() {
        let backend = start_backend().await;
        let (addr, state) = start_relay(&backend).await;

        let mut client = connect(addr).await;
        // A reply proves the actor has started and registered itself
        send_text(&mut client, "{}").await;
        next_json(&mut client).await;
        assert_eq!(state.registry.count(), 1);

        client.close(None).await.unwrap();
        drop(client);

        wait_for_count(&state.registry, 0).await;
    }

    #[actix_web::test]
    async fn binary_frame_gets_error_and_session_stays_open() {
        let backend = start_backend().await;
        let (addr, _state) = start_relay(&backend).await;
        let mut client = connect(addr).await;

        client.send(Message::Binary(vec![0x01, 0x02, 0x03])).await.unwrap();
        let reply = next_json(&mut client).await;
        assert_eq!(reply, json!({"type": "error_from_python", "message": INVALID_FORMAT_MESSAGE}));

        send_text(&mut client, &transcription("wetter ulm")).await;
        assert_eq!(next_json(&mut client).await["city"], "ulm");
    }

    #[actix_web::test]
    async fn fragmented_text_is_reassembled() {
        let backend = start_backend().await;
        let (addr, _state) = start_relay(&backend).await;
        let mut client = connect(addr).await;

        let message = transcription("wetter potsdam").into_bytes();
        let (head, tail) = message.split_at(10);
        let (middle, last) = tail.split_at(12);
        let frames = [
            Frame::message(head.to_vec(), OpCode::Data(Data::Text), false),
            Frame::message(middle.to_vec(), OpCode::Data(Data::Continue), false),
            Frame::message(last.to_vec(), OpCode::Data(Data::Continue), true),
        ];
        for frame in frames {
            client.send(Message::Frame(frame)).await.unwrap();
        }

        let reply = next_json(&mut client).await;
        assert_eq!(reply["type"], "command_understood_display_weather");
        assert_eq!(reply["city"], "potsdam");
    }

    #[actix_web::test]
    async fn fragmented_binary_gets_error() {
        let backend = start_backend().await;
        let (addr, _state) = start_relay(&backend).await;
        let mut client = connect(addr).await;

        client
            .send(Message::Frame(Frame::message(vec![0xff], OpCode::Data(Data::Binary), false)))
            .await
            .unwrap();
        client
            .send(Message::Frame(Frame::message(vec![0xfe], OpCode::Data(Data::Continue), true)))
            .await
            .unwrap();

        assert_eq!(next_json(&mut client).await["message"], INVALID_FORMAT_MESSAGE);
    }

    #[actix_web::test]
    async fn fault_closes_only_the_failing_session() {
        let (addr, registry) = start_relay_with(Arc::new(CrashingProvider)).await;
        let mut failing = connect(addr).await;
        let mut healthy = connect(addr).await;

        // One reply each proves both actors are registered
        send_text(&mut failing, "{}").await;
        next_json(&mut failing).await;
        send_text(&mut healthy, "{}").await;
        next_json(&mut healthy).await;
        assert_eq!(registry.count(), 2);

        send_text(&mut failing, &transcription("wetter absturz")).await;
        let reply = next_json(&mut failing).await;
        assert_eq!(
            reply,
            json!({"type": "error_from_python", "message": INTERNAL_ERROR_MESSAGE})
        );
        match next_message(&mut failing).await {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Error),
            other => panic!("expected close frame, got {:?}", other),
        }

        wait_for_count(&registry, 1).await;

        send_text(&mut healthy, &transcription("wetter bonn")).await;
        let reply = next_json(&mut healthy).await;
        assert_eq!(reply["type"], "command_understood_display_weather");
        assert_eq!(reply["weatherPayload"], json!({"city": "bonn"}));
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "panic while handling frame");
    }
}
