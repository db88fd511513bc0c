use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Network request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Catalog returned HTTP {0}")]
    Status(u16),

    #[error("Invalid catalog response: {0}")]
    InvalidResponse(String),

    #[error("Catalog lookup is not supported for `{0}` links")]
    Unsupported(String),

    #[error("Invalid catalog URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}
