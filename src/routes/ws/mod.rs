mod handler;

pub use handler::{OUTBOUND_BUFFER, WsQuery, ws_handler};
