//! Driver for an electronic chessboard: a game and menu state machine fed by
//! board readings, UCI engines as opponents and analysts, and a websocket
//! server for displays and the board transport.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod game;
pub mod models;
pub mod remote;
pub mod routes;
pub mod sensor;
pub mod websocket;
