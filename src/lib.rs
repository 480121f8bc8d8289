pub mod absence;
pub mod calc;
pub mod calendar;
pub mod db;
pub mod discipline;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod ledger;
pub mod model;
pub mod rank;
pub mod report;
pub mod roster;
pub mod settings;
pub mod store;

pub use engine::Engine;
pub use error::{EngineError, EngineResult};
