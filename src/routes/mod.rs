pub mod chat;
pub mod health;
pub mod location;
pub mod ws;
