use crate::Gateway;
use crate::tools::{json_response, unix_timestamp};
use faststr::FastStr;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use volo_http::{
    response::Response,
    server::{Router, route::get},
    utils::Extension,
};

#[derive(Debug, Serialize)]
struct ModelCard {
    id:       FastStr,
    object:   &'static str,
    created:  i64,
    owned_by: &'static str,
    name:     FastStr,
}

async fn models_handler(Extension(gateway): Extension<Gateway>) -> Response {
    let config = &gateway.config;
    debug!(model_id=%config.model_id, "listing models");
    let card = ModelCard {
        id:       config.model_id.clone(),
        object:   "model",
        created:  unix_timestamp(),
        owned_by: "ragflow",
        name:     config.model_name.clone(),
    };
    json_response(StatusCode::OK, &json!({ "object": "list", "data": [card] }))
}

pub fn models_router() -> Router {
    Router::new().route("/v1/models", get(models_handler))
}
