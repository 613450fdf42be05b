//! Crate-wide error type.
//!
//! Only *fatal* conditions become an `AppError`: configuration mistakes, shape
//! mismatches between buffers, and I/O failures. Numeric degeneracy inside a
//! single voxel's fit (singular solve, NaN residual, non-finite posterior) is
//! never an error; it is recovered locally by the solver/sampler.

/// Exit-code convention:
///
/// - 2: configuration error (malformed model spec, bad run settings)
/// - 3: data/shape error (buffer sizes inconsistent with the descriptor)
/// - 4: I/O error (sample archive read/write)
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    /// Configuration error (exit code 2).
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(2, message)
    }

    /// Data/shape error (exit code 3).
    pub fn data(message: impl Into<String>) -> Self {
        Self::new(3, message)
    }

    /// I/O error (exit code 4).
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(4, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
