//! Shared-key authentication for the worker endpoints.
//!
//! Both the stream and the unary heartbeat require an `x-api-key` metadata
//! entry matching the configured key. An empty configured key disables the
//! check entirely (development mode).

use tonic::service::Interceptor;
use tonic::{Request, Status};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct ApiKeyInterceptor {
    key: String,
}

impl ApiKeyInterceptor {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl Interceptor for ApiKeyInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        if self.key.is_empty() {
            return Ok(request);
        }
        match request.metadata().get(API_KEY_HEADER) {
            None => Err(Status::unauthenticated("missing api key")),
            Some(value) => match value.to_str() {
                Ok(provided) if provided == self.key => Ok(request),
                _ => Err(Status::unauthenticated("invalid api key")),
            },
        }
    }
}
