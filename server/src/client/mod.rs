//! Consumer side of the relay: what a browser session does around the socket.
//!
//! Every mutation is stored through the REST layer first and only then
//! announced over the socket. The two steps are not atomic; a connection lost
//! in between leaves the change stored but unannounced until the next refetch.

pub mod announce;
pub mod session;
pub mod typing;
pub mod view;
