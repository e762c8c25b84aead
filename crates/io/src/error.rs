use crate::ObjectKey;

#[derive(Debug, thiserror::Error)]
#[error("invalid object key `{key}`: keys must be non-empty relative paths without `..`")]
pub struct InvalidObjectKey {
    pub key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object `{key}` not found")]
    NotFound { key: ObjectKey },
    #[error("multipart upload `{upload_id}` for `{key}` is unknown or already completed")]
    UnknownUpload { key: ObjectKey, upload_id: String },
    #[error("storage backend failed during `{operation}` on `{key}`: {source}")]
    Backend {
        operation: &'static str,
        key: ObjectKey,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("storage backend failed during `{operation}`: {source}")]
    BackendList {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StorageError {
    pub fn backend<E>(operation: &'static str, key: &ObjectKey, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            operation,
            key: key.clone(),
            source: Box::new(source),
        }
    }

    pub fn backend_list<E>(operation: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::BackendList {
            operation,
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
