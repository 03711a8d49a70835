use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use sqlx::PgPool;

use crate::{
    error::AppError,
    middleware::{CurrentUser, JsonObject},
    models::{CreateTodo, Todo, TodoInsights, TodoPatch, UpdateTodo, TODO_COLUMNS},
};

fn not_found() -> AppError {
    AppError::NotFound("Todo not found".to_string())
}

/// Ids that cannot name a row are reported the same way as rows that do not exist.
fn parse_id(raw: &str) -> Result<i32, AppError> {
    raw.parse().map_err(|_| not_found())
}

#[utoipa::path(
    get,
    path = "/api/todos",
    tag = "todos",
    responses(
        (status = 200, description = "Todos of the caller, newest first", body = Vec<Todo>),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("iap" = []),
        ("user_email" = [])
    )
)]
pub async fn list_todos(
    State(pool): State<PgPool>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Todo>>, AppError> {
    let todos = sqlx::query_as::<_, Todo>(
        "SELECT id, title, completed, created_at, completed_at FROM todos \
         WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user.id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(todos))
}

#[utoipa::path(
    get,
    path = "/api/todos/insights",
    tag = "todos",
    responses(
        (status = 200, description = "Completion ratio and most common title words of the caller's todos", body = TodoInsights),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("iap" = []),
        ("user_email" = [])
    )
)]
pub async fn todo_insights(
    State(pool): State<PgPool>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<TodoInsights>, AppError> {
    let rows = sqlx::query_as::<_, (String, bool)>(
        "SELECT title, completed FROM todos WHERE user_id = $1",
    )
    .bind(user.id)
    .fetch_all(&pool)
    .await?;

    let insights = TodoInsights::from_todos(
        rows.iter()
            .map(|(title, completed)| (title.as_str(), *completed)),
    );

    Ok(Json(insights))
}

#[utoipa::path(
    get,
    path = "/api/todos/{id}",
    tag = "todos",
    params(
        ("id" = i32, Path, description = "Todo ID")
    ),
    responses(
        (status = 200, description = "Todo details", body = Todo),
        (status = 404, description = "Todo not found"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("iap" = []),
        ("user_email" = [])
    )
)]
pub async fn get_todo(
    State(pool): State<PgPool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Todo>, AppError> {
    let id = parse_id(&id)?;

    let todo = sqlx::query_as::<_, Todo>(&format!(
        "SELECT {TODO_COLUMNS} FROM todos WHERE id = $1 AND user_id = $2"
    ))
    .bind(id)
    .bind(user.id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(not_found)?;

    Ok(Json(todo))
}

#[utoipa::path(
    post,
    path = "/api/todos",
    tag = "todos",
    request_body = CreateTodo,
    responses(
        (status = 201, description = "Todo created", body = Todo),
        (status = 400, description = "Title is missing or blank"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("iap" = []),
        ("user_email" = [])
    )
)]
pub async fn create_todo(
    State(pool): State<PgPool>,
    CurrentUser(user): CurrentUser,
    JsonObject(payload): JsonObject,
) -> Result<(StatusCode, Json<Todo>), AppError> {
    let new_todo = CreateTodo::from_payload(&payload)?;

    let todo = sqlx::query_as::<_, Todo>(&format!(
        "INSERT INTO todos (title, user_id) VALUES ($1, $2) RETURNING {TODO_COLUMNS}"
    ))
    .bind(&new_todo.title)
    .bind(user.id)
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, Json(todo)))
}

#[utoipa::path(
    put,
    path = "/api/todos/{id}",
    tag = "todos",
    params(
        ("id" = i32, Path, description = "Todo ID")
    ),
    request_body = UpdateTodo,
    responses(
        (status = 200, description = "Todo updated", body = Todo),
        (status = 400, description = "No updatable field, or a field has the wrong type"),
        (status = 404, description = "Todo not found"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("iap" = []),
        ("user_email" = [])
    )
)]
pub async fn update_todo(
    State(pool): State<PgPool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    JsonObject(payload): JsonObject,
) -> Result<Json<Todo>, AppError> {
    let update = UpdateTodo::from_payload(&payload)?;
    let id = parse_id(&id)?;

    let mut query = TodoPatch::new(update, chrono::Utc::now()).update_query(id, user.id);
    let todo = query
        .build_query_as::<Todo>()
        .fetch_optional(&pool)
        .await?
        .ok_or_else(not_found)?;

    Ok(Json(todo))
}

#[utoipa::path(
    delete,
    path = "/api/todos/{id}",
    tag = "todos",
    params(
        ("id" = i32, Path, description = "Todo ID")
    ),
    responses(
        (status = 204, description = "Todo deleted"),
        (status = 404, description = "Todo not found"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("iap" = []),
        ("user_email" = [])
    )
)]
pub async fn delete_todo(
    State(pool): State<PgPool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;

    let result = sqlx::query("DELETE FROM todos WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}
