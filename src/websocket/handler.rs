use actix::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::models::{lock_or_recover, AppState, ClientMessage, ServerMessage, SocketText};

/// WebSocket connection of a display client
pub struct DisplaySocket {
    pub id: String,
    pub app_state: web::Data<AppState>,
}

impl Actor for DisplaySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let total = {
            let mut displays = lock_or_recover(&self.app_state.displays);
            displays.insert(self.id.clone(), ctx.address());
            displays.len()
        };
        info!("Display connected: {}", self.id);
        info!("Total displays: {}", total);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        let total = {
            let mut displays = lock_or_recover(&self.app_state.displays);
            displays.remove(&self.id);
            displays.len()
        };
        info!("Display disconnected: {}", self.id);
        info!("Total displays: {}", total);
        Running::Stop
    }
}

impl Handler<SocketText> for DisplaySocket {
    type Result = ();

    fn handle(&mut self, msg: SocketText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for DisplaySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Text(text)) => {
                debug!("Display {} sent: {}", self.id, text);
                match serde_json::from_str::<ClientMessage>(text.as_ref()) {
                    Ok(client_msg) => self.forward(client_msg, ctx),
                    Err(e) => {
                        warn!("Error parsing display message: {}", e);
                        send(ctx, &ServerMessage::error(format!("Invalid message format: {}", e)));
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary messages are not supported");
                send(ctx, &ServerMessage::error("Binary messages are not supported"));
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Display connection closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            _ => ctx.stop(),
        }
    }
}

impl DisplaySocket {
    fn forward(&self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        if self.app_state.actions.send(msg).is_err() {
            warn!("Controller is gone, dropping display input");
            send(ctx, &ServerMessage::error("Driver is shutting down"));
        }
    }
}

/// Serializes `message` straight to this connection
pub(crate) fn send<A>(ctx: &mut ws::WebsocketContext<A>, message: &ServerMessage)
where
    A: Actor<Context = ws::WebsocketContext<A>>,
{
    match serde_json::to_string(message) {
        Ok(text) => ctx.text(text),
        Err(e) => warn!("Error serializing message: {}", e),
    }
}

/// Upgrades a display connection on `/ws`
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let id = Uuid::new_v4().to_string();
    info!("New display connection request: {}", id);
    ws::start(DisplaySocket { id, app_state }, &req, stream)
}
