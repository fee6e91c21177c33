use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::AppState;
use crate::error::AppError;
use crate::utils::verify_token;

/// 校验 Bearer 凭证，并把解析出的用户身份写进请求扩展，
/// 后续处理函数通过 `Extension<Claims>` 读取
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "));

    match token {
        Some(token) => {
            let claims =
                verify_token(token, &state.config).map_err(|_| AppError::Authentication)?;
            // 凭证里的展示名喂给用户目录，供房间列表解析参与者
            state.directory.record(&claims.sub, &claims.name).await;
            request.extensions_mut().insert(claims);
            Ok(next.run(request).await)
        }
        None => Err(AppError::Authentication),
    }
}
