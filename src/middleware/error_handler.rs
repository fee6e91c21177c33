use axum::{
    body::{Body, to_bytes},
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::error;

/// 错误响应体的日志上限。信封加消息远小于这个值，
/// 超限时退化为只记录状态行。
const ERROR_BODY_LOG_LIMIT: usize = 16 * 1024;

/// 把服务端错误连同请求上下文记进日志后原样返回
pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    if response.status().is_server_error() {
        let (mut parts, body) = response.into_parts();
        let bytes = match to_bytes(body, ERROR_BODY_LOG_LIMIT).await {
            Ok(b) => b,
            Err(e) => {
                error!(
                    "Server error on {} {} - Status: {}, body unreadable: {}",
                    method, path, parts.status, e
                );
                return Response::from_parts(parts, Body::empty());
            }
        };
        let body_str = String::from_utf8_lossy(&bytes);

        error!(
            "Server error on {} {} - Status: {}, Body: {}",
            method, path, parts.status, body_str
        );

        // 重置body以便重新构建响应
        parts.headers.remove(axum::http::header::CONTENT_LENGTH);
        Response::from_parts(parts, Body::from(bytes))
    } else {
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
    use tower::ServiceExt;

    fn failing_app(body: String) -> Router {
        Router::new()
            .route(
                "/boom",
                get(move || async move { (StatusCode::INTERNAL_SERVER_ERROR, body).into_response() }),
            )
            .layer(axum::middleware::from_fn(log_errors))
    }

    #[tokio::test]
    async fn large_error_bodies_survive_logging() {
        // 超过 1 KiB 的错误响应体必须原样到达客户端
        let body = "x".repeat(4 * 1024);
        let app = failing_app(body.clone());

        let response = app
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.len(), body.len());
    }

    #[tokio::test]
    async fn success_responses_pass_through_untouched() {
        let app = Router::new()
            .route("/ok", get(|| async { "fine" }))
            .layer(axum::middleware::from_fn(log_errors));

        let response = app
            .oneshot(Request::builder().uri("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"fine");
    }
}
