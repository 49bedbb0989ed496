pub mod auth;
pub mod courses;

use axum::Json;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({ "message": "Backend is working!" }))
}
