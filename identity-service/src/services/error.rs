use service_core::error::AppError;
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Validation failed")]
    Validation(ValidationErrors),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid confirmation code")]
    InvalidCode,

    #[error("Attempt expired")]
    AttemptExpired,

    #[error("Attempt not found")]
    AttemptNotFound,

    #[error("Attempt already advanced")]
    AttemptAlreadyAdvanced,

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Insufficient scope")]
    InsufficientScope,

    #[error("Delivery failure: {0}")]
    DeliveryFailure(String),

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Organization already exists")]
    OrganizationAlreadyExists,

    #[error("Organization not found")]
    OrganizationNotFound,

    #[error("An organization must keep at least one owner")]
    LastOwner,

    #[error("Edge would create an ownership cycle")]
    CycleDetected,

    #[error("Grant revoked")]
    GrantRevoked,
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> Self {
        ServiceError::Validation(errors)
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::Validation(e) => AppError::ValidationError(e),
            ServiceError::InvalidCredentials => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::InvalidCode => {
                AppError::BadRequest(anyhow::anyhow!("Invalid confirmation code"))
            }
            ServiceError::AttemptExpired => AppError::Gone(anyhow::anyhow!("Attempt expired")),
            ServiceError::AttemptNotFound => {
                AppError::NotFound(anyhow::anyhow!("Attempt not found"))
            }
            ServiceError::AttemptAlreadyAdvanced => {
                AppError::Conflict(anyhow::anyhow!("Attempt already advanced"))
            }
            ServiceError::Unauthenticated => {
                AppError::Unauthorized(anyhow::anyhow!("Not authenticated"))
            }
            ServiceError::InsufficientScope => {
                AppError::Forbidden(anyhow::anyhow!("Insufficient scope"))
            }
            ServiceError::DeliveryFailure(e) => AppError::BadGateway(e),
            ServiceError::UserAlreadyExists => {
                AppError::Conflict(anyhow::anyhow!("User already exists"))
            }
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::OrganizationAlreadyExists => {
                AppError::Conflict(anyhow::anyhow!("Organization already exists"))
            }
            ServiceError::OrganizationNotFound => {
                AppError::NotFound(anyhow::anyhow!("Organization not found"))
            }
            ServiceError::LastOwner => AppError::Conflict(anyhow::anyhow!(
                "An organization must keep at least one owner"
            )),
            ServiceError::CycleDetected => AppError::Conflict(anyhow::anyhow!(
                "Edge would create an ownership cycle"
            )),
            ServiceError::GrantRevoked => AppError::Unauthorized(anyhow::anyhow!("Grant revoked")),
        }
    }
}
