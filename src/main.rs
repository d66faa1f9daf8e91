use actix_web::{web, App, HttpServer};
use clap::Parser;
use log::{error, info};
use std::time::Duration;

use chessboard_driver::archive::JsonArchive;
use chessboard_driver::config::{Args, SettingsStore};
use chessboard_driver::controller::{Collaborators, Controller};
use chessboard_driver::engine::process::ProcessFactory;
use chessboard_driver::models::{AppState, Session};
use chessboard_driver::routes;
use chessboard_driver::websocket::{HubLeds, RemoteBoard, WebPresentation};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(level));

    let data_dir = args.data_dir();
    info!("Using data directory {}", data_dir.display());
    let settings = SettingsStore::new(data_dir.clone());
    let (game_settings, mut board_settings) = settings.load_or_default();
    board_settings.remote_control |= args.remote_control;

    let mut session = Session::new(game_settings, board_settings);
    session.max_depth = args.max_depth;
    session.strict = args.strict;

    // Shared application state
    let (actions_tx, actions_rx) = crossbeam_channel::unbounded();
    let (board_tx, board_rx) = crossbeam_channel::unbounded();
    let app_state = web::Data::new(AppState::new(actions_tx, board_tx));

    let io = Collaborators {
        sensor: Box::new(RemoteBoard::new(board_rx, app_state.clone())),
        leds: Box::new(HubLeds::new(app_state.clone())),
        presentation: Box::new(WebPresentation::new(actions_rx, app_state.clone())),
        archive: Box::new(JsonArchive::new(data_dir.join("games"))),
        engines: Box::new(ProcessFactory::new(args.engines_dir.clone())),
    };
    let mut controller = Controller::new(
        session,
        io,
        settings,
        args.engines_dir.clone(),
        args.books_dir.clone(),
    );

    info!("Starting chessboard driver at http://{}", args.bind);
    let static_dir = args.static_dir.clone();
    let server = HttpServer::new(move || {
        let static_dir = static_dir.clone();
        App::new()
            .app_data(app_state.clone())
            .configure(move |cfg| routes::configure_routes(cfg, &static_dir))
    })
    .bind(&args.bind)?
    .disable_signals()
    .run();
    let handle = server.handle();
    let server_task = actix_rt::spawn(server);

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    actix_rt::spawn(async move {
        if actix_rt::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            let _ = stop_tx.send(());
        }
    });

    let period = Duration::from_millis(args.tick_ms.max(1));
    let outcome = actix_rt::task::spawn_blocking(move || controller.run(period, &stop_rx)).await;

    handle.stop(true).await;
    match server_task.await {
        Ok(Err(e)) => error!("Server failed: {}", e),
        Err(e) => error!("Server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    match outcome {
        Ok(Ok(reason)) => {
            info!("Stopped: {:?}", reason);
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Driver stopped: {}", e);
            Err(std::io::Error::other(e.to_string()))
        }
        Err(e) => {
            error!("Controller thread failed: {}", e);
            Err(std::io::Error::other(e.to_string()))
        }
    }
}
