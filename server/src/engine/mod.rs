pub mod error;
pub mod events;
pub mod fanout;
pub mod hub;
pub mod registry;
pub mod user_session;
