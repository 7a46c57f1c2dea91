// File: ./src/client/middleware.rs
//! Tower middleware that stamps outgoing requests with our User-Agent.
use http::{HeaderValue, Request, header};
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

#[derive(Clone, Debug)]
pub struct UserAgentLayer {
    value: Option<HeaderValue>,
}

impl UserAgentLayer {
    pub fn new(user_agent: String) -> Self {
        let value = HeaderValue::from_str(&user_agent).ok();
        if value.is_none() {
            log::warn!("Invalid User-Agent '{}', sending none", user_agent);
        }
        Self { value }
    }
}

impl<S> Layer<S> for UserAgentLayer {
    type Service = UserAgentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UserAgentService {
            inner,
            value: self.value.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UserAgentService<S> {
    inner: S,
    value: Option<HeaderValue>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for UserAgentService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        // A caller-supplied agent wins.
        if let Some(value) = &self.value
            && !req.headers().contains_key(header::USER_AGENT)
        {
            req.headers_mut().insert(header::USER_AGENT, value.clone());
        }
        self.inner.call(req)
    }
}
