use axum::http::Request;
use tower_http::trace::MakeSpan;
use tracing::Span;

/// Tags every request span with the deployment env and instance.
#[derive(Clone)]
pub struct InstanceRequestSpan {
    env: String,
    instance_id: String,
}

impl InstanceRequestSpan {
    pub fn new(env: &str, instance_id: &str) -> Self {
        Self {
            env: env.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}

impl<B> MakeSpan<B> for InstanceRequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::info_span!(
            "request",
            env = %self.env,
            instance_id = %self.instance_id,
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}
