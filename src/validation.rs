use std::fmt;

/// Node input rejected before any call to the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingQuery,
    MissingTarget,
    MissingUrl,
    MissingEventObject,
    MissingArrayPath,
    /// Describe-all and a single object were both requested.
    DescribeConflict(String),
    DescribeMissingObject,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingQuery => write!(f, "Query is undefined"),
            ValidationError::MissingTarget => write!(f, "Target is undefined"),
            ValidationError::MissingUrl => write!(f, "URL is undefined"),
            ValidationError::MissingEventObject => write!(f, "Event object is undefined"),
            ValidationError::MissingArrayPath => write!(f, "Array path is undefined"),
            ValidationError::DescribeConflict(object) => write!(
                f,
                "Cannot describe everything and describe an object[{}] at the same time",
                object
            ),
            ValidationError::DescribeMissingObject => write!(
                f,
                "If not describing all, you must specify an object to describe"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A configured strategy key that names no known strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownProcessor {
    pub kind: &'static str,
    pub key: String,
}

impl UnknownProcessor {
    pub fn new(kind: &'static str, key: &str) -> Self {
        Self {
            kind,
            key: key.to_string(),
        }
    }
}

impl fmt::Display for UnknownProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown {} processor type:{}", self.kind, self.key)
    }
}

impl std::error::Error for UnknownProcessor {}
