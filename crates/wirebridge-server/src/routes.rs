use crate::context::BridgeContext;
use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt, future};
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use wirebridge_core::{
    BridgeError, ChannelCreated, ChannelError, ChannelId, CommandKind, CommandResponse,
    SocketSession,
};

pub fn router(ctx: BridgeContext) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/commands", get(list_commands))
        .route("/command/{name}", post(call_command))
        .route("/channel/{name}", post(create_channel).delete(close_channel))
        .route("/channel/stream/{id}", get(stream_channel))
        .route("/ws/{name}", get(connect_socket))
        .with_state(ctx)
}

#[derive(Serialize)]
struct Status {
    status: &'static str,
    bridge: String,
    commands: Vec<String>,
}

async fn index(State(ctx): State<BridgeContext>) -> Json<Status> {
    let registry = ctx.registry().snapshot();
    Json(Status {
        status: "ok",
        bridge: ctx.config().title.clone(),
        commands: registry.commands().map(|c| c.name().to_string()).collect(),
    })
}

#[derive(Serialize)]
struct Listing {
    commands: Vec<CommandInfo>,
    sockets: Vec<SocketInfo>,
}

#[derive(Serialize)]
struct CommandInfo {
    name: String,
    kind: CommandKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    doc: Option<String>,
    params: Vec<ParamInfo>,
}

#[derive(Serialize)]
struct ParamInfo {
    name: String,
    required: bool,
}

#[derive(Serialize)]
struct SocketInfo {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    module: Option<String>,
    server_events: Vec<String>,
    client_events: Vec<String>,
}

async fn list_commands(State(ctx): State<BridgeContext>) -> Json<Listing> {
    let registry = ctx.registry().snapshot();
    let commands = registry
        .commands()
        .map(|command| CommandInfo {
            name: command.name().to_string(),
            kind: command.kind(),
            module: command.module_name().map(str::to_string),
            doc: command.doc().map(str::to_string),
            params: command
                .params()
                .iter()
                .map(|param| ParamInfo {
                    name: param.name.clone(),
                    required: param.is_required(),
                })
                .collect(),
        })
        .collect();
    let sockets = registry
        .sockets()
        .map(|socket| SocketInfo {
            name: socket.name().to_string(),
            module: socket.module_name().map(str::to_string),
            server_events: socket.server_events().map(|(e, _)| e.to_string()).collect(),
            client_events: socket.client_events().map(|(e, _)| e.to_string()).collect(),
        })
        .collect();
    Json(Listing { commands, sockets })
}

/// Empty body means no arguments.
fn parse_body(body: &Bytes) -> Result<Value, BridgeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|err| BridgeError::invalid_argument(format!("Request body is not valid JSON: {err}")))
}

async fn call_command(
    State(ctx): State<BridgeContext>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<CommandResponse>, ApiError> {
    let payload = parse_body(&body).map_err(|e| ctx.error(e))?;
    let result = ctx
        .dispatcher()
        .call(&name, payload)
        .await
        .map_err(|e| ctx.error(e))?;
    Ok(Json(CommandResponse { result }))
}

async fn create_channel(
    State(ctx): State<BridgeContext>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<ChannelCreated>, ApiError> {
    let payload = parse_body(&body).map_err(|e| ctx.error(e))?;
    let id = ctx
        .channels()
        .create(&name, payload)
        .map_err(|e| ctx.error(e))?;
    Ok(Json(ChannelCreated {
        channel_id: id.to_string(),
    }))
}

fn parse_channel_id(raw: &str) -> Result<ChannelId, ChannelError> {
    raw.parse()
        .map_err(|_| ChannelError::NotFound(raw.to_string()))
}

async fn stream_channel(
    State(ctx): State<BridgeContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_channel_id(&id).map_err(|e| ctx.error(e))?;
    let subscription = ctx.channels().attach(id).map_err(|e| ctx.error(e))?;
    let events = subscription.into_stream().map(|message| {
        Ok::<_, Infallible>(
            Event::default()
                .event(message.event_name())
                .data(message.payload().to_string()),
        )
    });
    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    response.headers_mut().insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    Ok(response)
}

async fn close_channel(
    State(ctx): State<BridgeContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_channel_id(&id).map_err(|e| ctx.error(e))?;
    ctx.channels().close(id).map_err(|e| ctx.error(e))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn connect_socket(
    State(ctx): State<BridgeContext>,
    Path(name): Path<String>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let session = match ctx.sockets().open(&name) {
        Ok(session) => session,
        Err(err) => return ctx.error(err).into_response(),
    };
    match upgrade {
        Ok(upgrade) => upgrade
            .on_upgrade(move |socket| serve_socket(socket, session))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn serve_socket(socket: WebSocket, session: SocketSession) {
    let id = session.id();
    let (sink, stream) = socket.split();
    let inbound = stream
        .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(text.to_string()),
                _ => None,
            })
        });
    let outbound = sink.with(|frame: String| {
        future::ready(Ok::<_, axum::Error>(Message::Text(frame.into())))
    });
    let state = session.run(Box::pin(inbound), Box::pin(outbound)).await;
    tracing::debug!("Socket {} finished in state {:?}", id, state);
}
