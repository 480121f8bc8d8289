use std::path::PathBuf;

use crate::engine::Engine;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub engine: Option<Engine>,
}
