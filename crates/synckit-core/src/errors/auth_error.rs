/// Authentication and authorization errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication required")]
    TokenMissing,

    #[error("token rejected: {reason}")]
    TokenInvalid { reason: String },

    #[error("token expired at {expired_at}")]
    TokenExpired { expired_at: i64 },

    #[error("no {access} permission on document {doc_id}")]
    PermissionDenied { doc_id: String, access: &'static str },
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::TokenMissing => "AUTH_REQUIRED",
            AuthError::TokenInvalid { .. } => "AUTH_FAILED",
            AuthError::TokenExpired { .. } => "AUTH_EXPIRED",
            AuthError::PermissionDenied { .. } => "PERMISSION_DENIED",
        }
    }
}
