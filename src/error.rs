use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Soft or hard unbind did not release the UDC within the polling bound
    #[error("UDC not released (last value: '{udc}')")]
    UnbindTimeout { udc: String },

    /// ADB preservation was requested but the controller could not be released softly
    #[error("Cannot keep ADB: the system rebinds the gadget immediately")]
    AdbPreservationImpossible,

    #[error("No USB Device Controller (UDC) found")]
    NoUdcController,

    #[error("Failed to bind UDC after {attempts} attempts (last value: '{last_udc}')")]
    BindExhausted { attempts: u32, last_udc: String },

    #[error("Gadget configuration failed: {0}")]
    GadgetConfig(String),

    #[error("No SELinux policy tool succeeded")]
    PolicyApplyFailed,

    #[error("UAC2 gadget sound card not found")]
    CardNotFound,

    #[error("Native engine error: {0}")]
    Native(String),

    #[error("Shell error: {0}")]
    Shell(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
