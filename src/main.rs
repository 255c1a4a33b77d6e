// Define data modules
mod models; // Data structures (WorkCalendar, TimeInState, upstream records)
mod error; // Error types and their HTTP mapping
mod config; // Command line / environment configuration
mod logic; // Core working-time accounting
mod aggregate; // Time in state across a whole project
mod membership; // User -> project membership lookup
mod upstream; // Azure DevOps client
mod state; // Shared handler state and clock
mod routes_projects; // HTTP handlers for project & work item relays
mod routes_history; // HTTP handlers for time in state
mod routes_tasks; // HTTP handlers for task activities
mod routes_users; // HTTP handlers for user lookup

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
// Import axum routing utilities and Router
use axum::{
    routing::{get, post}, // HTTP method helpers
    Router, // Main router type
};
use clap::Parser;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::Config;
use crate::state::{AppState, SystemClock};
use crate::upstream::AzureDevOps;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RELAY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "devops_relay=debug,tower_http=debug,info"
        } else {
            "devops_relay=info,tower_http=warn"
        })
    });

    let format = env::var("RELAY_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => registry.with(fmt::layer().json().with_ansi(false)).init(),
        _ => registry.with(fmt::layer().compact()).init(),
    }
}

fn router(state: AppState) -> Router {
    let projects = Router::new()
        .route("/getAllProjects", get(routes_projects::get_all_projects))
        .route("/getWorkItems", get(routes_projects::get_work_items))
        .route("/getWorkItemHistory", post(routes_history::get_work_item_history))
        .route("/getTotalWorkItem", get(routes_projects::get_total_work_items))
        .route("/getProjectWorkItems", post(routes_projects::get_project_work_items))
        .route("/projects-work-items", get(routes_projects::get_projects_and_work_items))
        .route("/:projectId/work-items", get(routes_projects::get_project_work_items_by_id))
        .route("/all-workitems-history", post(routes_history::get_all_work_items_history));

    let api = Router::new()
        .nest("/projects", projects)
        // user
        .route("/user/getUserByEmail", post(routes_users::get_user_by_email))
        // task
        .route("/task/:taskId/activities", post(routes_tasks::get_task_activities));

    Router::new()
        .route("/", get(|| async { "Welcome to the DevOps relay" }))
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::parse();
    let calendar = config.work_calendar().context("invalid work calendar")?;

    let tracker = AzureDevOps::new(
        config.org_url(),
        &config.graph_url(),
        &config.token,
        config.request_timeout(),
    )
    .context("invalid Azure DevOps url")?;

    info!(
        org_url = config.org_url(),
        work_days = ?calendar.work_days().collect::<Vec<_>>(),
        work_start_hour = calendar.start_hour(),
        work_end_hour = calendar.end_hour(),
        utc_offset = %calendar.offset(),
        "starting relay"
    );

    let state = AppState {
        tracker: Arc::new(tracker),
        calendar: Arc::new(calendar),
        clock: Arc::new(SystemClock),
    };

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .context("invalid bind address")?;

    info!("listening on http://{}", addr);
    info!("API base: http://{}/api", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind failed")?;

    axum::serve(listener, router(state))
        .await
        .context("server error")?;

    Ok(())
}
