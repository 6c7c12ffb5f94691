use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheInfoError {
    /// Past the last cache leaf. Ends enumeration, nothing is wrong.
    #[error("cache leaf {0} is not present")]
    NotPresent(u32),
    #[error("cache leaf {0} could not be read")]
    Io(u32),
    #[error("invalid argument")]
    InvalidArgument,
    #[error("slot in use or index already disabled")]
    AlreadyExists,
    #[error("operation requires administrative privilege")]
    PermissionDenied,
    #[error("processor reports no cache leaves")]
    NoEntry,
    #[error("control not available on this cache")]
    Unsupported,
}
