use actix_files as fs;
use actix_web::{web, HttpResponse, Responder};
use std::path::Path;

/// HTTP handler for the index page
pub async fn index() -> impl Responder {
    HttpResponse::Ok().body("Chessboard driver")
}

/// Configure the HTTP routes
pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: &Path) {
    cfg.service(web::resource("/ws").route(web::get().to(crate::websocket::ws_index)))
        .service(web::resource("/board").route(web::get().to(crate::websocket::board_index)))
        .service(web::resource("/").route(web::get().to(index)))
        .service(fs::Files::new("/static", static_dir));
}
