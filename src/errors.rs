pub type AccessResult<T> = Result<T, AccessError>;

#[derive(thiserror::Error, Debug)]
pub enum AccessError {
    #[error("malformed pattern: {0}")]
    MalformedPattern(String),
    #[error("inheritance cycle involving pattern: {0}")]
    InheritanceCycle(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AccessError {
    pub fn malformed_pattern(pattern: impl Into<String>) -> Self {
        Self::MalformedPattern(pattern.into())
    }

    pub fn inheritance_cycle(pattern: impl Into<String>) -> Self {
        Self::InheritanceCycle(pattern.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<anyhow::Error> for AccessError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
