use chanpost_core::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error ({code}): {description}")]
    Api { code: i64, description: String },

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("nothing to send: {0}")]
    Empty(String),
}

impl From<TelegramError> for TransportError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::RateLimited { retry_after_secs } => {
                TransportError::RateLimited { retry_after_secs }
            }
            TelegramError::Api { .. } => TransportError::Api(err.to_string()),
            TelegramError::Io(_) => TransportError::Download(err.to_string()),
            TelegramError::Empty(what) => TransportError::Empty(what),
            TelegramError::Http(_) | TelegramError::Json(_) => {
                TransportError::Request(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_into_transport_error() {
        let limited: TransportError = TelegramError::RateLimited { retry_after_secs: 7 }.into();
        assert!(matches!(limited, TransportError::RateLimited { retry_after_secs: 7 }));

        let api: TransportError = TelegramError::Api {
            code: 400,
            description: "Bad Request: message to delete not found".into(),
        }
        .into();
        assert!(api.to_string().contains("message to delete not found"));

        let io: TransportError =
            TelegramError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")).into();
        assert!(matches!(io, TransportError::Download(_)));
    }
}
