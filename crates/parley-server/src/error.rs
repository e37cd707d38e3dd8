use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Map a settings key such as `ollama.base_url` to the variable that sets it
pub fn to_env_var(field_path: &str) -> String {
    format!(
        "PARLEY_{}",
        field_path.to_uppercase().replace('.', "__")
    )
}

/// Any endpoint failure, reported as a 500 with the error text
#[derive(Debug)]
pub struct ServerError(anyhow::Error);

impl<E> From<E> for ServerError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        ServerError(err.into())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        tracing::error!("Request failed: {:#}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", self.0)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("ollama.base_url"), "PARLEY_OLLAMA__BASE_URL");
        assert_eq!(to_env_var("server"), "PARLEY_SERVER");
    }

    #[test]
    fn test_server_error_is_500() {
        let response = ServerError::from(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
