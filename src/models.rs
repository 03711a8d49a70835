use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{ser::SerializeMap, Serialize, Serializer};
use serde_json::{Map, Value};
use sqlx::{FromRow, Postgres, QueryBuilder};
use utoipa::ToSchema;

use crate::error::AppError;

pub const TITLE_REQUIRED: &str = "Title is required and must be a non-empty string.";
pub const TITLE_INVALID: &str = "Title must be a non-empty string if provided.";
pub const COMPLETED_INVALID: &str = "Completed must be a boolean value.";
pub const UPDATE_EMPTY: &str =
    "At least one field (title or completed) must be provided for update.";

/// Columns returned by single-row reads and writes.
pub const TODO_COLUMNS: &str = "id, title, completed, created_at, completed_at, user_id";

// --- Domain Models (Mapped to DB) ---

#[derive(Debug, Serialize, FromRow, Clone, ToSchema)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct Todo {
    pub id: i32,
    pub title: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Absent from list responses.
    #[sqlx(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i32>,
}

// --- Request DTOs ---
//
// Bodies arrive as raw JSON objects so that a wrong type (`"completed": "yes"`)
// is reported with the field's own message instead of a generic decode error.

#[derive(Debug, ToSchema)]
pub struct CreateTodo {
    pub title: String,
}

impl CreateTodo {
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, AppError> {
        match payload.get("title").and_then(non_blank) {
            Some(title) => Ok(CreateTodo { title }),
            None => Err(AppError::ValidationError(TITLE_REQUIRED.to_string())),
        }
    }
}

#[derive(Debug, ToSchema)]
pub struct UpdateTodo {
    pub title: Option<String>,
    pub completed: Option<bool>,
}

impl UpdateTodo {
    /// A key holding JSON `null` counts as present.
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, AppError> {
        let title = payload.get("title");
        let completed = payload.get("completed");

        if title.is_none() && completed.is_none() {
            return Err(AppError::ValidationError(UPDATE_EMPTY.to_string()));
        }

        let title = match title {
            None => None,
            Some(value) => Some(
                non_blank(value)
                    .ok_or_else(|| AppError::ValidationError(TITLE_INVALID.to_string()))?,
            ),
        };

        let completed = match completed {
            None => None,
            Some(value) => Some(
                value
                    .as_bool()
                    .ok_or_else(|| AppError::ValidationError(COMPLETED_INVALID.to_string()))?,
            ),
        };

        Ok(UpdateTodo { title, completed })
    }
}

fn non_blank(value: &Value) -> Option<String> {
    let trimmed = value.as_str()?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// --- Partial updates ---

/// One column assignment of an `UPDATE todos` statement.
#[derive(Debug, Clone, PartialEq)]
pub enum TodoField {
    Title(String),
    Completed(bool),
    CompletedAt(Option<DateTime<Utc>>),
}

impl TodoField {
    pub fn column(&self) -> &'static str {
        match self {
            TodoField::Title(_) => "title",
            TodoField::Completed(_) => "completed",
            TodoField::CompletedAt(_) => "completed_at",
        }
    }
}

/// Ordered, non-empty set of assignments for one todo.
#[derive(Debug, Clone, PartialEq)]
pub struct TodoPatch {
    fields: Vec<TodoField>,
}

impl TodoPatch {
    /// `completed_at` follows every `completed` write, even when the flag does not change.
    pub fn new(update: UpdateTodo, now: DateTime<Utc>) -> Self {
        let mut fields = Vec::with_capacity(3);
        if let Some(title) = update.title {
            fields.push(TodoField::Title(title));
        }
        if let Some(completed) = update.completed {
            fields.push(TodoField::Completed(completed));
            fields.push(TodoField::CompletedAt(completed.then_some(now)));
        }
        TodoPatch { fields }
    }

    #[cfg(test)]
    pub fn fields(&self) -> &[TodoField] {
        &self.fields
    }

    /// Renders the owner-scoped statement; every value is a bind parameter.
    pub fn update_query(&self, id: i32, user_id: i32) -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new("UPDATE todos SET ");

        {
            let mut assignments = builder.separated(", ");
            for field in &self.fields {
                assignments.push(format_args!("{} = ", field.column()));
                match field {
                    TodoField::Title(title) => assignments.push_bind_unseparated(title.clone()),
                    TodoField::Completed(done) => assignments.push_bind_unseparated(*done),
                    TodoField::CompletedAt(at) => assignments.push_bind_unseparated(*at),
                };
            }
        }

        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND user_id = ")
            .push_bind(user_id)
            .push(" RETURNING ")
            .push(TODO_COLUMNS);
        builder
    }
}

// --- Insights ---

/// Words too common to say anything about a todo list.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "to", "in", "on", "for", "with", "is", "of", "and", "buy", "get", "it",
    "me", "my", "i",
];

const TOP_WORDS: usize = 5;

/// Completion statistics over one user's todos.
#[derive(Debug, Serialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TodoInsights {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub completion_ratio: f64,
    /// Serialized as a JSON object whose keys keep this order.
    #[serde(serialize_with = "ordered_counts")]
    #[schema(value_type = Object)]
    pub most_common_words: Vec<(String, i64)>,
}

impl TodoInsights {
    pub fn from_todos<'a, I>(todos: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        let mut total_tasks = 0;
        let mut completed_tasks = 0;
        let mut counts: HashMap<String, i64> = HashMap::new();

        for (title, completed) in todos {
            total_tasks += 1;
            if completed {
                completed_tasks += 1;
            }
            for word in title_words(title) {
                *counts.entry(word).or_default() += 1;
            }
        }

        let completion_ratio = if total_tasks > 0 {
            completed_tasks as f64 / total_tasks as f64
        } else {
            0.0
        };

        // Highest count first, ties broken alphabetically
        let mut most_common_words: Vec<(String, i64)> = counts.into_iter().collect();
        most_common_words.sort_by(|(a, a_count), (b, b_count)| b_count.cmp(a_count).then(a.cmp(b)));
        most_common_words.truncate(TOP_WORDS);

        TodoInsights {
            total_tasks,
            completed_tasks,
            completion_ratio,
            most_common_words,
        }
    }
}

/// Lowercased ASCII-alphanumeric runs of a title, minus stop words.
fn title_words(title: &str) -> impl Iterator<Item = String> + '_ {
    title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| word.to_ascii_lowercase())
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
}

fn ordered_counts<S: Serializer>(counts: &[(String, i64)], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(counts.len()))?;
    for (word, count) in counts {
        map.serialize_entry(word, count)?;
    }
    map.end()
}
