use crate::error::{AppError, AppResult};
use actix_web::{HttpRequest, HttpResponse};

/// Catch-all for unknown routes, answered in the same JSON error shape as every other failure.
pub async fn not_found(req: HttpRequest) -> AppResult<HttpResponse> {
    Err(AppError::NotFound(format!(
        "No route for {} {}",
        req.method(),
        req.path()
    )))
}
