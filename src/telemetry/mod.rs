pub mod channel;
pub mod drain;
pub mod error;
pub mod message;

pub use channel::{ChannelStats, LogChannel};
pub use drain::LogDrain;
pub use error::LogChannelError;
pub use message::{FieldValue, LogLevel, LogMessage};
