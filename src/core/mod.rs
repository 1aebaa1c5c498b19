pub mod completion;
pub mod config;
pub mod errors;
pub mod search;
pub mod transport;
pub mod upstream;
