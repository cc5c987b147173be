use std::{
    fmt::{self, Display},
    io,
    path::PathBuf,
};

/// The result type used across the whole crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the training engine.
#[derive(Debug)]
pub enum Error {
    /// A buffer length did not match what the layer geometry requires.
    SizeMismatch {
        /// Human-readable context for the mismatch (e.g. "input", "kernel weights").
        what: &'static str,
        got: usize,
        expected: usize,
    },

    /// The network was configured in a way that cannot be evaluated
    /// (softmax used pointwise, unsupported layer arrangement, empty stack).
    Config(&'static str),

    /// A NaN or infinity showed up in outputs or gradients during training.
    NumericInstability {
        /// Which buffer the non-finite value was found in.
        context: &'static str,
    },

    /// No checkpoint file exists for the requested network name.
    CheckpointNotFound { path: PathBuf },

    /// The checkpoint file exists but cannot be decoded, or its topology
    /// does not allocate buffers consistent with its weight arrays.
    CheckpointCorrupt { reason: String },

    /// An I/O failure while reading or writing a checkpoint.
    Io(io::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SizeMismatch { what, got, expected } => {
                write!(f, "size mismatch for {what}: got {got}, expected {expected}")
            }
            Error::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Error::NumericInstability { context } => {
                write!(f, "non-finite value detected in {context}")
            }
            Error::CheckpointNotFound { path } => {
                write!(f, "no checkpoint at {}", path.display())
            }
            Error::CheckpointCorrupt { reason } => {
                write!(f, "checkpoint is not usable: {reason}")
            }
            Error::Io(err) => write!(f, "checkpoint I/O failed: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::CheckpointCorrupt {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = Error::SizeMismatch {
            what: "input",
            got: 3,
            expected: 4,
        };
        assert_eq!(err.to_string(), "size mismatch for input: got 3, expected 4");

        let err = Error::NumericInstability { context: "outputs" };
        assert!(err.to_string().contains("outputs"));
    }
}
