// src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Dataset '{dataset}' compute error: {message}")]
    Compute {
        dataset: String,
        message: String,
    },

    #[error("Dataset '{dataset}' is closed")]
    ClosedDataset {
        dataset: String,
    },

    #[error("Item error: {message}")]
    Item {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// Convenience constructors
impl PipelineError {

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn compute(dataset: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Compute {
            dataset: dataset.into(),
            message: message.into(),
        }
    }

    pub fn closed(dataset: impl Into<String>) -> Self {
        Self::ClosedDataset {
            dataset: dataset.into(),
        }
    }

    pub fn item(message: impl Into<String>) -> Self {
        Self::Item {
            message: message.into(),
        }
    }
}
