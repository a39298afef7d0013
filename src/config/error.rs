//! Configuration errors.

use thiserror::Error;

/// Error produced while reading or parsing a schema configuration file.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Deser(#[from] toml::de::Error),

    #[error("{0}, line {1}")]
    MissingField(String, usize),
}

impl Error {
    /// Map a `toml` deserialization error back to the line it came from.
    pub fn config(source: &str, err: toml::de::Error) -> Self {
        let Some(span) = err.span() else {
            return Self::MissingField(err.message().into(), 0);
        };
        let message = err.message();

        let mut lines = vec![];
        let mut line = 1;
        for (i, c) in source.chars().enumerate() {
            if c == '\n' {
                lines.push((line, i));
                line += 1;
            }
        }

        let mut lines = lines.into_iter().peekable();
        while let Some(line) = lines.next() {
            if span.start < line.1 {
                if let Some(next) = lines.peek() {
                    if next.1 > span.start {
                        return Self::MissingField(message.into(), line.0);
                    }
                }
            }
        }

        Self::MissingField(message.into(), 0)
    }
}
