pub mod graph_client;

pub use graph_client::*;
