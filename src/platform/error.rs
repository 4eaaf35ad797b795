use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Invalid CIDR notation: {0}")]
    InvalidCidr(String),

    #[error("Public IP lookup failed: {0}")]
    PublicIpLookup(String),

    #[error("Folder does not exist: {0}")]
    FolderNotFound(String),

    #[error("Could not delete {path} after {attempts} attempts: {source}")]
    DeleteFailed {
        path: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type PlatformResult<T> = Result<T, PlatformError>;
