use thiserror::Error;

/**
    Errors from archive writing.
*/
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive output failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive already holds the maximum of {0} entries")]
    TooManyEntries(usize),

    #[error("archive would exceed {0} bytes")]
    TooLarge(u64),

    #[error("entry name '{0}' is too long")]
    NameTooLong(String),
}

impl ArchiveError {
    /**
        Returns true if the downstream consumer went away.
    */
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::WriteZero
            ),
            _ => false,
        }
    }
}
