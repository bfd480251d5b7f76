use crate::gate::AuthGate;
use axum::{
    http::{header::AUTHORIZATION, HeaderMap, Request, Response},
    response::IntoResponse,
};
use dm_error::DmError;
use tower_http::auth::{AsyncAuthorizeRequest, AsyncRequireAuthorizationLayer};

/// 校验 `Authorization: Bearer <token>`
#[derive(Clone)]
pub struct BearerAuthorizer {
    gate: AuthGate,
}

impl BearerAuthorizer {
    pub fn new(gate: AuthGate) -> Self {
        Self { gate }
    }

    pub fn layer(gate: AuthGate) -> AsyncRequireAuthorizationLayer<Self> {
        AsyncRequireAuthorizationLayer::new(Self::new(gate))
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

impl<B> AsyncAuthorizeRequest<B> for BearerAuthorizer
where
    B: Send + 'static,
{
    type RequestBody = B;
    type ResponseBody = axum::body::Body;
    type Future = std::pin::Pin<
        Box<
            dyn std::future::Future<Output = Result<Request<B>, Response<Self::ResponseBody>>>
                + Send,
        >,
    >;

    fn authorize(&mut self, request: Request<B>) -> Self::Future {
        let gate = self.gate.clone();
        Box::pin(async move {
            let ok = bearer_token(request.headers())
                .map(|token| gate.check_token(token))
                .unwrap_or(false);
            if ok {
                Ok(request)
            } else {
                Err(DmError::Authentication {
                    message: "未登录或令牌无效".to_string(),
                }
                .into_response())
            }
        })
    }
}
