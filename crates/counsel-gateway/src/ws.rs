use std::collections::HashSet;
use std::time::Instant;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::IntoResponse;
use counsel_agents::ReplyEvent;
use counsel_common::{ClientRequest, Error, Result, ServerEvent};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::state::SharedState;

type WsSender = SplitSink<WebSocket, Message>;

/// WebSocket upgrade handler. Messages above the configured size are
/// rejected by the protocol layer and end the connection.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    let limit = state.config.gateway.max_message_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| {
            let connection_id = Uuid::new_v4();
            handle_socket(socket, state).instrument(info_span!("ws", %connection_id))
        })
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let connected_at = Instant::now();
    let (mut sender, mut receiver) = socket.split();
    let mut attached: HashSet<String> = HashSet::new();

    let open = state.connection_opened();
    info!(open, "client connected");

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    let event = ServerEvent::error("binary frames must contain UTF-8 JSON");
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                debug!("client sent close frame");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("websocket receive error: {e}");
                break;
            }
        };

        match relay_request(&state, &mut sender, &mut attached, &text).await {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                debug!("rejected request: {e}");
                if send_event(&mut sender, &ServerEvent::error(client_message(&e)))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                error!("request failed, closing connection: {e}");
                let _ = send_event(&mut sender, &ServerEvent::error(client_message(&e))).await;
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::ERROR,
                        reason: "request failed".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    for user_id in attached {
        state.runtime.detach(&user_id).await;
    }

    let open = state.connection_closed();
    info!(
        open,
        elapsed_ms = connected_at.elapsed().as_millis() as u64,
        "client disconnected"
    );
}

/// Validate one request, stream the reply as chunks, persist it, and finish
/// with a `done` event carrying the full text.
async fn relay_request(
    state: &SharedState,
    sender: &mut WsSender,
    attached: &mut HashSet<String>,
    raw: &str,
) -> Result<()> {
    let request = ClientRequest::parse(raw)?.validate(&state.defaults)?;

    if attached.insert(request.user_id.clone()) {
        state.runtime.attach(&request.user_id);
    }

    let mut pending = state.runtime.begin_turn(request).await?;

    let mut answer = None;
    let mut fragments = 0usize;
    while let Some(event) = pending.replies.next().await {
        match event? {
            ReplyEvent::Fragment(text) => {
                fragments += 1;
                send_event(sender, &ServerEvent::chunk(text)).await?;
            }
            ReplyEvent::Finished(text) => answer = Some(text),
        }
    }
    let answer =
        answer.ok_or_else(|| Error::Agent("reply stream ended without a final text".to_string()))?;

    let outcome = state.runtime.complete_turn(pending, &answer).await;
    debug!(
        fragments,
        turn_count = outcome.turn_count,
        rotated = outcome.rotated,
        "reply complete"
    );

    send_event(sender, &ServerEvent::done(answer)).await
}

async fn send_event(sender: &mut WsSender, event: &ServerEvent) -> Result<()> {
    let json = event.to_json()?;
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| Error::Gateway(format!("failed to send event: {e}")))
}

/// Validation messages go to the client verbatim; other errors keep their
/// category prefix.
fn client_message(error: &Error) -> String {
    match error {
        Error::Validation(message) => message.clone(),
        other => other.to_string(),
    }
}
