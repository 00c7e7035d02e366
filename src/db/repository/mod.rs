//! Repository layer: entity-scoped database operations as free functions
//! over a borrowed `Connection`.

mod history;

pub use history::*;
