// rest/routes/tasks.rs — Task CRUD routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::store::{StoreError, Task};
use crate::AppContext;

type RestError = (StatusCode, Json<Value>);

fn task_json(task: &Task) -> Value {
    json!({
        "id": task.id,
        "description": task.description,
        "completed": task.completed,
    })
}

fn bad_request(msg: &str) -> RestError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg })))
}

/// NotFound becomes a 404; anything else (persistence failure) is an
/// internal error, logged here rather than swallowed.
fn store_error(e: StoreError) -> RestError {
    match e {
        StoreError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Task not found" })),
        ),
        other => {
            warn!(err = %other, "task store operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
        }
    }
}

pub async fn list_tasks(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let tasks = ctx.store.list().await;
    let list: Vec<Value> = tasks.iter().map(task_json).collect();
    Json(Value::Array(list))
}

pub async fn get_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, RestError> {
    let task = ctx.store.get(id).await.map_err(store_error)?;
    Ok(Json(task_json(&task)))
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub description: Option<String>,
}

pub async fn create_task(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Value>), RestError> {
    let description = match body.description.as_deref() {
        Some(d) if !d.is_empty() => d,
        _ => return Err(bad_request("Invalid input: missing or empty 'description'")),
    };

    let task = ctx.store.create(description).await.map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(task_json(&task))))
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub description: Option<String>,
    pub completed: Option<bool>,
}

pub async fn update_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<u64>,
    Json(body): Json<UpdateTaskRequest>,
) -> Result<Json<Value>, RestError> {
    if body.description.is_none() && body.completed.is_none() {
        return Err(bad_request(
            "Invalid input: provide 'description' and/or 'completed'",
        ));
    }
    if matches!(body.description.as_deref(), Some("")) {
        return Err(bad_request("Invalid input: 'description' must not be empty"));
    }

    if let Some(description) = body.description.as_deref() {
        ctx.store
            .update_description(id, description)
            .await
            .map_err(store_error)?;
    }
    if let Some(completed) = body.completed {
        ctx.store
            .set_completed(id, completed)
            .await
            .map_err(store_error)?;
    }

    let task = ctx.store.get(id).await.map_err(store_error)?;
    Ok(Json(task_json(&task)))
}

pub async fn delete_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, RestError> {
    ctx.store.delete(id).await.map_err(store_error)?;
    Ok(Json(json!({ "message": "Task deleted" })))
}
