use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;
use crate::mailer::Mailer;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub mailer: Box<dyn Mailer>,
}

impl AppState {
    pub fn new(config: Config, mailer: Box<dyn Mailer>) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
            mailer,
        }
    }
}

/// What a workspace-bound handler gets to work with.
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub config: &'a Config,
    pub mailer: &'a dyn Mailer,
}
