use axum::Json;
use service_core::error::AppError;

use crate::middleware::ReqContext;
use crate::models::Identity;

/// Identity the request resolved to. Anonymous identities are returned as
/// such; a request nothing claimed gets 401.
pub async fn current_user(ctx: ReqContext) -> Result<Json<Identity>, AppError> {
    if !ctx.identity.is_signed_in && !ctx.identity.is_anonymous {
        return Err(AppError::auth("Unauthorized"));
    }

    Ok(Json(ctx.identity))
}
