use std::path::PathBuf;
use thiserror::Error;

/// Failures that stop a single mod from being built at all.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("mod {reference} is not installed")]
    NotInstalled { reference: String },

    #[error("malformed metadata in {}: {reason}", path.display())]
    MalformedMetadata { path: PathBuf, reason: String },

    #[error("invalid mod reference {reference:?}: {reason}")]
    InvalidIdentity { reference: String, reason: String },
}

impl ResolveError {
    pub fn not_installed(reference: impl Into<String>) -> Self {
        Self::NotInstalled {
            reference: reference.into(),
        }
    }

    pub fn invalid(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

/// Remote catalog failures. None of these abort a build; the mod is kept with
/// `catalog_ok = false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("catalog listing {catalog_id} does not exist")]
    NotFoundRemotely { catalog_id: String },

    #[error("catalog listing {catalog_id} unavailable after {attempts} attempt(s): {last}")]
    TransientFetchFailure {
        catalog_id: String,
        attempts: u32,
        last: String,
    },

    #[error("fetch of catalog listing {catalog_id} was cancelled")]
    Cancelled { catalog_id: String },
}

impl CatalogError {
    pub fn catalog_id(&self) -> &str {
        match self {
            CatalogError::NotFoundRemotely { catalog_id }
            | CatalogError::TransientFetchFailure { catalog_id, .. }
            | CatalogError::Cancelled { catalog_id } => catalog_id,
        }
    }
}
