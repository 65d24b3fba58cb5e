//! Connection records as the settings document stores them.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::model::Connection;

pub const DEFAULT_CONNECTIONS_FILE: &str = "connections.json";
pub const CONNECTIONS_ENV: &str = "OBJSTORE_CONNECTIONS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no connection with id or name '{0}'")]
    UnknownConnection(String),

    #[error("{0} connections configured, pick one with --connection")]
    Ambiguous(usize),

    #[error("no connections configured")]
    Empty,
}

/// Either a bare array or the full settings document.
#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    Connections(Vec<Connection>),
    Settings {
        #[serde(default)]
        connections: Vec<Connection>,
    },
}

pub fn parse_connections(raw: &str) -> Result<Vec<Connection>, serde_json::Error> {
    let connections = match serde_json::from_str::<Document>(raw)? {
        Document::Connections(connections) => connections,
        Document::Settings { connections } => connections,
    };
    Ok(connections)
}

pub async fn load_connections(path: &Path) -> Result<Vec<Connection>, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let connections = parse_connections(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    info!(
        path = %path.display(),
        count = connections.len(),
        "loaded connections"
    );
    Ok(connections)
}

/// Matches by id first, then by name. Without a selector a single
/// configured connection is picked.
pub fn select<'a>(
    connections: &'a [Connection],
    selector: Option<&str>,
) -> Result<&'a Connection, ConfigError> {
    match selector {
        Some(wanted) => connections
            .iter()
            .find(|c| c.id == wanted)
            .or_else(|| connections.iter().find(|c| c.name == wanted))
            .ok_or_else(|| ConfigError::UnknownConnection(wanted.to_string())),
        None => match connections {
            [] => Err(ConfigError::Empty),
            [only] => Ok(only),
            many => Err(ConfigError::Ambiguous(many.len())),
        },
    }
}
