//! Header codec errors.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

impl HeaderError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::TooShort { .. } => "too_short",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_short_message() {
        let err = HeaderError::TooShort {
            expected: 22,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "packet too short: expected at least 22 bytes, got 5"
        );
        assert_eq!(err.error_code(), "too_short");
    }
}
