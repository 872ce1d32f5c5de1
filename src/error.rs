use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl Serialize for GateError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<GateError> for axum::http::StatusCode {
    fn from(err: GateError) -> Self {
        match err {
            GateError::NotFound(_) => axum::http::StatusCode::NOT_FOUND,
            GateError::Conflict(_) => axum::http::StatusCode::CONFLICT,
            GateError::InvalidInput(_) => axum::http::StatusCode::BAD_REQUEST,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type GateResult<T> = Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn status_mapping() {
        assert_eq!(StatusCode::from(GateError::NotFound("k".into())), StatusCode::NOT_FOUND);
        assert_eq!(StatusCode::from(GateError::Conflict("w".into())), StatusCode::CONFLICT);
        assert_eq!(
            StatusCode::from(GateError::InvalidInput("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            StatusCode::from(GateError::Other("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn serializes_as_display_string() {
        let json = serde_json::to_string(&GateError::NotFound("key-1".into())).unwrap();
        assert_eq!(json, "\"Not found: key-1\"");
    }
}
