use actix::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::models::{lock_or_recover, AppState, BoardMessage, ServerMessage, SocketText};
use crate::sensor::Reading;
use crate::websocket::handler::send;

/// What the board transport reported, as seen by the tick loop
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    Connected(String),
    Disconnected(String),
    Reading(Reading),
    CalibrationDone,
}

/// WebSocket connection of the process that talks to the physical board
pub struct BoardSocket {
    pub id: String,
    pub app_state: web::Data<AppState>,
}

impl BoardSocket {
    fn publish(&self, event: BoardEvent) {
        if self.app_state.board_events.send(event).is_err() {
            warn!("Controller is gone, dropping board event");
        }
    }

    fn handle_message(&self, msg: BoardMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match msg.message_type.as_str() {
            "reading" => {
                let Some(layout) = msg.layout else {
                    send(ctx, &ServerMessage::error("Reading without layout"));
                    return;
                };
                let missing = msg.layout_missing.unwrap_or_else(|| layout.clone());
                match Reading::new(&layout, &missing, msg.needs_calibration.unwrap_or(false)) {
                    Ok(reading) => self.publish(BoardEvent::Reading(reading)),
                    Err(e) => {
                        warn!("Board {}: {}", self.id, e);
                        send(ctx, &ServerMessage::error(e.to_string()));
                    }
                }
            }
            "calibrated" => {
                info!("Board {} finished calibrating", self.id);
                self.publish(BoardEvent::CalibrationDone);
            }
            other => {
                warn!("Unknown board message type: {}", other);
                send(ctx, &ServerMessage::error("Unknown message type"));
            }
        }
    }
}

impl Actor for BoardSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        lock_or_recover(&self.app_state.boards).insert(self.id.clone(), ctx.address());
        info!("Board connected: {}", self.id);
        self.publish(BoardEvent::Connected(self.id.clone()));
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        lock_or_recover(&self.app_state.boards).remove(&self.id);
        info!("Board disconnected: {}", self.id);
        self.publish(BoardEvent::Disconnected(self.id.clone()));
        Running::Stop
    }
}

impl Handler<SocketText> for BoardSocket {
    type Result = ();

    fn handle(&mut self, msg: SocketText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for BoardSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<BoardMessage>(text.as_ref()) {
                Ok(board_msg) => {
                    debug!("Board {} sent {}", self.id, board_msg.message_type);
                    self.handle_message(board_msg, ctx);
                }
                Err(e) => {
                    warn!("Error parsing board message: {}", e);
                    send(ctx, &ServerMessage::error(format!("Invalid message format: {}", e)));
                }
            },
            Ok(ws::Message::Binary(_)) => {
                send(ctx, &ServerMessage::error("Binary messages are not supported"));
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => ctx.stop(),
        }
    }
}

/// Upgrades a board transport connection on `/board`
pub async fn board_index(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let id = Uuid::new_v4().to_string();
    info!("New board connection request: {}", id);
    ws::start(BoardSocket { id, app_state }, &req, stream)
}
