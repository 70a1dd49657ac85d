// Handlers do processo servidor
pub mod graph;
pub mod health;

pub use graph::*;
pub use health::*;
