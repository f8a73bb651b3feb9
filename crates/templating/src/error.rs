//! Template errors

use thiserror::Error;

/// Errors that can occur while loading or rendering templates
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Template text could not be parsed
    #[error("{name}:{line}: {message}")]
    Parse {
        name: String,
        line: usize,
        message: String,
    },

    /// Failure while executing a template
    #[error("Execution error: {0}")]
    Execute(String),

    /// Named template does not exist
    #[error("Template not found: {0}")]
    NotFound(String),

    /// Template output is not valid YAML
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Reading the template tree failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Datastore lookup failed
    #[error("Datastore error: {0}")]
    DataStore(#[from] datastore::DataStoreError),
}
