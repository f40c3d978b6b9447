use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Unsupported language: '{0}'")]
    UnsupportedLanguage(String),

    #[error("Invalid command template for '{language}': {reason}")]
    InvalidTemplate { language: String, reason: String },

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Failed to launch '{command}': {source}")]
    LaunchFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// True when the launch failed because the program is missing or not
    /// executable, as opposed to an unexpected OS fault.
    pub fn is_missing_program(&self) -> bool {
        matches!(
            self,
            RuntimeError::LaunchFailed { source, .. }
                if matches!(
                    source.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                )
        )
    }
}
