use std::fmt;

/// Longest string field value (in characters) kept in a queued message
pub const MAX_FIELD_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Value attached to a log field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    U64(u64),
    I64(i64),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::U64(v) => write!(f, "{v}"),
            FieldValue::I64(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::U64(value)
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::U64(value as u64)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::I64(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// A telemetry record produced by any component and owned by the log channel
/// until the drain task dispatches it.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    pub level: LogLevel,
    pub text: String,
    /// Ordered key/value pairs, rendered in insertion order
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl LogMessage {
    pub fn new(level: LogLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            fields: Vec::new(),
        }
    }

    pub fn debug(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, text)
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, text)
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, text)
    }

    pub fn with_field(mut self, key: &'static str, value: impl Into<FieldValue>) -> Self {
        self.fields.push((key, value.into()));
        self
    }

    /// Cut every string field down to [`MAX_FIELD_LEN`] characters.
    pub fn truncate_fields(&mut self) {
        for (_, value) in &mut self.fields {
            if let FieldValue::Str(s) = value
                && let Some((idx, _)) = s.char_indices().nth(MAX_FIELD_LEN)
            {
                s.truncate(idx);
            }
        }
    }

    /// Render fields as `key=value` pairs separated by spaces
    pub fn render_fields(&self) -> String {
        let mut out = String::new();
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(key);
            out.push('=');
            out.push_str(&value.to_string());
        }
        out
    }

    /// Write the message to the installed `tracing` subscriber.
    pub fn dispatch(&self) {
        let fields = self.render_fields();
        match self.level {
            LogLevel::Debug => tracing::debug!(fields = %fields, "{}", self.text),
            LogLevel::Info => tracing::info!(fields = %fields, "{}", self.text),
            LogLevel::Warn => tracing::warn!(fields = %fields, "{}", self.text),
            LogLevel::Error => tracing::error!(fields = %fields, "{}", self.text),
        }
    }
}
