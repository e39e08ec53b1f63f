use serde::{de::DeserializeOwned, Serialize};
use std::{path::Path, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{fs, sync::RwLock, time};
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Codec(String),
    #[error("Database error: {0}")]
    Custom(String),
}

#[derive(Debug)]
struct DatabaseInner<T> {
    data: T,
    path: String,
}

/// Small bincode-backed file holding one value of `T`.
///
/// A missing or unreadable file yields `T::default()`; the file is only
/// written by [`Database::transaction`] and [`Database::reset`].
#[derive(Clone, Debug)]
pub struct Database<T: Serialize + DeserializeOwned + Default + Send + Sync + Clone + 'static> {
    inner: Arc<RwLock<DatabaseInner<T>>>,
}

impl<T: Serialize + DeserializeOwned + Default + Send + Sync + Clone + 'static> Database<T> {
    pub async fn new(path: impl Into<String>) -> Result<Self, DbError> {
        let path = path.into();

        if let Some(parent) = Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    error!("Failed to create database directory: {}", e);
                    DbError::Io(e)
                })?;
            }
        }

        let data = match fs::read(&path).await {
            Ok(bytes) => match bincode::deserialize(&bytes) {
                Ok(data) => data,
                Err(e) => {
                    error!("Failed to deserialize database {}: {}", path, e);
                    T::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No database at {}, starting empty", path);
                T::default()
            }
            Err(e) => {
                error!("Failed to read database {}: {}", path, e);
                T::default()
            }
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(DatabaseInner { data, path })),
        })
    }

    pub async fn path(&self) -> String {
        self.inner.read().await.path.clone()
    }

    async fn save(&self, data: &T) -> Result<(), DbError> {
        let path = self.path().await;
        let bytes = bincode::serialize(data).map_err(|e| DbError::Codec(e.to_string()))?;

        match time::timeout(Duration::from_secs(5), fs::write(&path, bytes)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                error!("Database save operation timed out");
                Err(DbError::Custom("Save operation timed out".into()))
            }
        }
    }

    pub async fn get_data(&self) -> T {
        self.inner.read().await.data.clone()
    }

    pub async fn transaction<F, R>(&self, f: F) -> Result<R, DbError>
    where
        F: FnOnce(&mut T) -> Result<R, String>,
    {
        let mut data = self.get_data().await;
        let result = f(&mut data).map_err(DbError::Custom)?;

        self.save(&data).await?;
        self.inner.write().await.data = data;

        Ok(result)
    }

    /// Drops the stored value and removes the backing file.
    pub async fn reset(&self) -> Result<(), DbError> {
        let mut guard = self.inner.write().await;
        guard.data = T::default();
        match fs::remove_file(&guard.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
