//! The message sender capability

/// A provider of the message sender capability.
///
/// The host never looks at what a provider does with the message; it only
/// guarantees the call is made. Implementations are constructed lazily inside
/// an isolation context and dropped when that context is torn down.
///
/// Providers may print freely. Inside a boundary worker process anything
/// written to stdout ends up on the worker's stderr.
pub trait MessageSender: Send + Sync + std::fmt::Debug {
    /// Deliver one message
    fn send(&self, message: &str) -> Result<(), SendError>;

    /// Provider name for logging/display
    fn sender_name(&self) -> &str;
}

/// Errors raised by providers
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("send failed: {message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("provider construction failed: {message}")]
    Construction { message: String },
}

impl SendError {
    /// Shorthand for a [`SendError::Failed`] with no source
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for a [`SendError::Construction`]
    pub fn construction(message: impl Into<String>) -> Self {
        Self::Construction {
            message: message.into(),
        }
    }
}
