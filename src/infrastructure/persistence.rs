use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::PersistedSession;
use crate::error::PersistError;

pub const SESSION_STORE_FILE_NAME: &str = "sessions.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLoad {
    Loaded(Vec<PersistedSession>),
    Missing,
    Corrupt(String),
}

impl StoreLoad {
    /// Missing and corrupt stores both recover as an empty table.
    pub fn into_sessions(self) -> Vec<PersistedSession> {
        match self {
            Self::Loaded(sessions) => sessions,
            Self::Missing | Self::Corrupt(_) => Vec::new(),
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> StoreLoad;
    async fn save(&self, sessions: &[PersistedSession]) -> Result<(), PersistError>;
}

#[derive(Debug, Clone)]
pub struct JsonFileSessionStore {
    path: PathBuf,
}

impl JsonFileSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn io_error(&self, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn load(&self) -> StoreLoad {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return StoreLoad::Missing;
            }
            Err(error) => return StoreLoad::Corrupt(format!("session store read failed: {error}")),
        };

        match serde_json::from_str::<Vec<PersistedSession>>(&raw) {
            Ok(sessions) => StoreLoad::Loaded(sessions),
            Err(error) => StoreLoad::Corrupt(format!("session store parse failed: {error}")),
        }
    }

    async fn save(&self, sessions: &[PersistedSession]) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| self.io_error(error))?;
        }

        let encoded = serde_json::to_string_pretty(sessions)?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, encoded)
            .await
            .map_err(|error| self.io_error(error))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|error| self.io_error(error))
    }
}
