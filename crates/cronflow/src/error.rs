use uuid::Uuid;

/// Domain errors. The validation variants are stable identifiers surfaced
/// to API callers as 400s; the rest map per `Error::status_hint`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Validation
    #[error("invalid job id")]
    InvalidJobId,
    #[error("invalid job type")]
    InvalidJobType,
    #[error("invalid job status")]
    InvalidJobStatus,
    #[error("exactly one of cronSchedule and executeAt must be set")]
    InvalidJobSchedule,
    #[error("invalid cron schedule")]
    InvalidCronSchedule,
    #[error("http job not defined")]
    HttpJobNotDefined,
    #[error("amqp job not defined")]
    AmqpJobNotDefined,
    #[error("http job url is empty")]
    EmptyHttpJobUrl,
    #[error("http job method is empty")]
    EmptyHttpJobMethod,
    #[error("amqp exchange is empty")]
    EmptyExchange,
    #[error("amqp routing key is empty")]
    EmptyRoutingKey,
    #[error("invalid auth type")]
    InvalidAuthType,
    #[error("username is empty")]
    EmptyUsername,
    #[error("password is empty")]
    EmptyPassword,
    #[error("bearer token is empty")]
    EmptyBearerToken,

    // Runtime
    #[error("job {0} not found")]
    JobNotFound(Uuid),
    #[error("response code {0} not in valid set")]
    InvalidResponseCode(u16),
    #[error("execution canceled")]
    Canceled,

    #[error("crypto: {0}")]
    Crypto(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidJobId
                | Error::InvalidJobType
                | Error::InvalidJobStatus
                | Error::InvalidJobSchedule
                | Error::InvalidCronSchedule
                | Error::HttpJobNotDefined
                | Error::AmqpJobNotDefined
                | Error::EmptyHttpJobUrl
                | Error::EmptyHttpJobMethod
                | Error::EmptyExchange
                | Error::EmptyRoutingKey
                | Error::InvalidAuthType
                | Error::EmptyUsername
                | Error::EmptyPassword
                | Error::EmptyBearerToken
        )
    }

    /// Whether an executor error should short-circuit the retry decorator.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
