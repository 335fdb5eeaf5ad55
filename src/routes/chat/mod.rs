mod handler;

pub use handler::{get_chat_state, get_history};
