use crate::tools::json_response;
use reqwest::StatusCode;
use serde_json::json;
use volo_http::{
    response::Response,
    server::{Router, route::get},
};

async fn health_handler() -> Response {
    json_response(StatusCode::OK, &json!({ "status": "ok" }))
}

pub fn health_router() -> Router {
    Router::new().route("/health", get(health_handler))
}
