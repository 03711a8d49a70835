use axum::Json;

use crate::{error::AppError, middleware::CurrentUser, models::User};

#[utoipa::path(
    get,
    path = "/api/user/me",
    tag = "users",
    responses(
        (status = 200, description = "Profile of the caller", body = User),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("iap" = []),
        ("user_email" = [])
    )
)]
pub async fn me(CurrentUser(user): CurrentUser) -> Result<Json<User>, AppError> {
    Ok(Json(user))
}
