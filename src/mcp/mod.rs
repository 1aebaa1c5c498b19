//! Model Context Protocol surface.

pub mod protocol;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;
