pub mod board;
pub mod bridge;
pub mod handler;

pub use board::{board_index, BoardEvent, BoardSocket};
pub use bridge::{HubLeds, RemoteBoard, WebPresentation};
pub use handler::{ws_index, DisplaySocket};
