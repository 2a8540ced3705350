//! Tuning error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TuneError {
    /// Grouping or options violate a tuning invariant; fatal for the kernel.
    #[error("invalid tuning configuration for `{kernel}`: {reason}")]
    Configuration { kernel: String, reason: String },

    /// The executor failed or returned an unusable cost for one configuration.
    #[error("execution of `{kernel}` failed for layout\n{signature}")]
    Execution {
        kernel: String,
        signature: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cache entry `{key}` is corrupt: {reason}")]
    CacheCorruption { key: String, reason: String },

    #[error("no usable capture for `{array}` in `{kernel}`")]
    Capture {
        kernel: String,
        array: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not extract kernel `{kernel}`")]
    Extraction {
        kernel: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not lay out `{array}` in `{kernel}`")]
    Layout {
        kernel: String,
        array: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cache I/O failed for `{key}`")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl TuneError {
    pub fn configuration(kernel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            kernel: kernel.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TuneError>;
