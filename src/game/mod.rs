pub mod board;
pub mod book;
pub mod clock;
pub mod detect;
pub mod machine;
pub mod rules;
