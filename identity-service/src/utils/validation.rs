use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use service_core::error::AppError;

/// JSON extractor that runs the DTO's validation rules before the
/// handler sees the value. Rejections go through [`AppError`], so the
/// error shape matches the rest of the API: malformed JSON is a 400, a
/// failed rule a 422 with field detail.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("malformed JSON body: {}", e)))?;
        value.validate()?;
        Ok(ValidatedJson(value))
    }
}
