use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("Column not found: {0}")]
    UnknownColumn(String),
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),
    #[error("Board invariant broken: {0}")]
    Invariant(String),
    #[error("Invalid board document: {0}")]
    Malformed(String),
    #[error("No unused {0} id after {1} attempts")]
    IdsExhausted(&'static str, usize),
}

impl From<serde_json::Error> for BoardError {
    fn from(e: serde_json::Error) -> Self {
        BoardError::Malformed(e.to_string())
    }
}
