//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;
use kiln_core::error::AppError;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const OWNERSHIP: i32 = 4009;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Validation(msg) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg, None::<()>)
        }
        AppError::Serialization(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        AppError::NotFound(msg) => ErrorObjectOwned::owned(code::NOT_FOUND, msg, None::<()>),
        AppError::InvalidState(msg) => ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>),
        AppError::Ownership(msg) => ErrorObjectOwned::owned(code::OWNERSHIP, msg, None::<()>),
        AppError::Database(msg) => ErrorObjectOwned::owned(code::DB_ERROR, msg, None::<()>),
        AppError::Config(msg) | AppError::Internal(msg) => {
            ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>)
        }
    }
}

/// Convert an error reported by a remote Kiln back to AppError
pub fn from_rpc_error(code: i32, message: impl Into<String>) -> AppError {
    let message = message.into();
    match code {
        code::VALIDATION_ERROR => AppError::Validation(message),
        code::NOT_FOUND => AppError::NotFound(message),
        code::CONFLICT => AppError::InvalidState(message),
        code::OWNERSHIP => AppError::Ownership(message),
        code::DB_ERROR => AppError::Database(message),
        _ => AppError::Internal(format!("remote error {}: {}", code, message)),
    }
}
