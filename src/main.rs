use axum::{
    extract::FromRef,
    routing::get,
    Router,
};
use dotenvy::dotenv;
use sqlx::PgPool;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod db;
mod error;
mod handlers;
mod identity;
mod middleware;
mod models;

#[cfg(test)]
mod tests;

use config::Config;
use identity::IdentityStrategy;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::todos::list_todos,
        handlers::todos::todo_insights,
        handlers::todos::get_todo,
        handlers::todos::create_todo,
        handlers::todos::update_todo,
        handlers::todos::delete_todo,
        handlers::users::me,
        handlers::health::health
    ),
    components(
        schemas(
            models::User,
            models::Todo,
            models::CreateTodo,
            models::UpdateTodo,
            models::TodoInsights,
            handlers::health::HealthStatus
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "todos", description = "Per-user todo items"),
        (name = "users", description = "Caller identity"),
        (name = "health", description = "Liveness and database readiness")
    )
)]
struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};

        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "iap",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(
                    identity::IAP_ASSERTION_HEADER,
                ))),
            );
            components.add_security_scheme(
                "user_email",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(
                    identity::USER_EMAIL_HEADER,
                ))),
            );
        }
    }
}

/// Shared by every request; both members are cheap to clone.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub pool: PgPool,
    pub identity: Arc<IdentityStrategy>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info,todo_backend=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let identity = IdentityStrategy::from_config(&config.auth)?;
    tracing::info!("Identity resolved from {}", identity.describe());

    // The server does not start without a reachable database
    let pool = db::establish_connection(&config.database).await?;

    let app = create_app(AppState {
        pool,
        identity: Arc::new(identity),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route(
            "/todos",
            get(handlers::todos::list_todos).post(handlers::todos::create_todo),
        )
        .route("/todos/insights", get(handlers::todos::todo_insights))
        .route(
            "/todos/:id",
            get(handlers::todos::get_todo)
                .put(handlers::todos::update_todo)
                .delete(handlers::todos::delete_todo),
        )
        .route("/user/me", get(handlers::users::me))
        .route("/health", get(handlers::health::health));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(handlers::health::health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
