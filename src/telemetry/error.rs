use thiserror::Error;

/// Errors that can occur when handing a message to the log channel
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChannelError {
    /// Queue stayed full across the retry; the message was dropped
    #[error("Log channel saturated, message dropped")]
    Saturated,

    /// Drain task has stopped; the message was written synchronously instead
    #[error("Log channel closed")]
    Closed,
}
