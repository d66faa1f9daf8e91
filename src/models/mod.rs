pub mod app_state;
pub mod commands;
pub mod effects;
pub mod messages;
pub mod session;
pub mod settings;
pub mod state;

// Re-export important types
pub use app_state::*;
pub use commands::*;
pub use effects::*;
pub use messages::*;
pub use session::*;
pub use settings::*;
pub use state::*;
