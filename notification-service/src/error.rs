#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Worth retrying: timeouts, connection failures, 5xx answers.
    #[error("{service} unavailable: {message}")]
    Transient { service: &'static str, message: String },

    /// The collaborator refused the request; retrying cannot help.
    #[error("{service} rejected the request: {message}")]
    Permanent { service: &'static str, message: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Ledger(_))
    }

    /// Classifies a failed HTTP exchange with a collaborator.
    pub fn from_http(service: &'static str, err: reqwest::Error) -> Self {
        let message = err.to_string();
        match err.status() {
            Some(status) if status.is_client_error() => Self::Permanent { service, message },
            _ => Self::Transient { service, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_failures_are_retried() {
        let err = DispatchError::from(LedgerError::Pool("timed out".to_string()));
        assert!(err.is_transient());
        assert!(!DispatchError::Permanent {
            service: "mailer",
            message: "bad address".to_string()
        }
        .is_transient());
    }
}
