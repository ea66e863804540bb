use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous result: {0}")]
    Ambiguous(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("upstream: {0}")]
    Upstream(#[from] anyhow::Error),
}

impl RegistryError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Ambiguous(_) => 422,
            Self::Validation(_) => 400,
            Self::UnknownEntity(_) => 404,
            Self::Upstream(_) => 502,
        }
    }

    /// Stable machine-readable code carried in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Ambiguous(_) => "AMBIGUOUS_RESULT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UnknownEntity(_) => "UNKNOWN_ENTITY",
            Self::Upstream(_) => "UPSTREAM_FAILURE",
        }
    }

    /// Inverse of [`RegistryError::code`], used by remote callers to rebuild
    /// the typed error from a response body.
    pub fn from_code(code: &str, message: String) -> Self {
        match code {
            "NOT_FOUND" => Self::NotFound(message),
            "AMBIGUOUS_RESULT" => Self::Ambiguous(message),
            "VALIDATION_ERROR" => Self::Validation(message),
            "UNKNOWN_ENTITY" => Self::UnknownEntity(message),
            _ => Self::Upstream(anyhow::anyhow!(message)),
        }
    }

    /// The bare message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(m)
            | Self::Ambiguous(m)
            | Self::Validation(m)
            | Self::UnknownEntity(m) => m.clone(),
            Self::Upstream(e) => e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ── http_status ──────────────────────────────────────────────

    #[test]
    fn http_status_not_found() {
        assert_eq!(RegistryError::NotFound("x".into()).http_status(), 404);
    }

    #[test]
    fn http_status_ambiguous_is_client_error() {
        assert_eq!(RegistryError::Ambiguous("x".into()).http_status(), 422);
    }

    #[test]
    fn http_status_validation() {
        assert_eq!(RegistryError::Validation("x".into()).http_status(), 400);
    }

    #[test]
    fn http_status_upstream() {
        let err = RegistryError::Upstream(anyhow::anyhow!("db down"));
        assert_eq!(err.http_status(), 502);
    }

    // ── Display ──────────────────────────────────────────────────

    #[test]
    fn display_not_found() {
        let e = RegistryError::NotFound("Certificate not found.".into());
        assert_eq!(e.to_string(), "not found: Certificate not found.");
    }

    #[test]
    fn display_upstream_is_verbatim() {
        let e = RegistryError::Upstream(anyhow::anyhow!("connection reset"));
        assert_eq!(e.to_string(), "upstream: connection reset");
        assert_eq!(e.message(), "connection reset");
    }

    // ── code round trip ──────────────────────────────────────────

    #[test]
    fn code_maps_back_to_variant() {
        let original = RegistryError::Ambiguous("two".into());
        let rebuilt = RegistryError::from_code(original.code(), original.message());
        assert!(matches!(rebuilt, RegistryError::Ambiguous(m) if m == "two"));
    }

    #[test]
    fn unknown_code_becomes_upstream() {
        let rebuilt = RegistryError::from_code("TEAPOT", "short and stout".into());
        assert!(matches!(rebuilt, RegistryError::Upstream(_)));
    }
}
