//! Per-user conversation driving the add, delete and report flows.

pub mod controller;
pub mod parsing;
pub mod reply;
pub mod state;


pub use controller::DialogueController;
pub use reply::{Keyboard, Reply};
pub use state::State;
