use thiserror::Error;

#[derive(Debug, Error)]
pub enum TapeError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported or malformed wave container")]
    BadFormat,

    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),
}

impl From<hound::Error> for TapeError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => TapeError::Io(e),
            _ => TapeError::BadFormat,
        }
    }
}

pub type Result<T> = std::result::Result<T, TapeError>;
