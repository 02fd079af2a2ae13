//! HTTP API for vmagent.
//!
//! Game servers heartbeat against `/v1/sessionHosts/{id}`; the control
//! plane assigns and unassigns the VM, queues goal states and pushes
//! maintenance schedules.
//!
//! # Example
//!
//! ```bash
//! # Start the agent
//! vmagent serve --listen 0.0.0.0:56001
//!
//! # Assign a workload
//! curl -X POST http://localhost:56001/v1/assignment \
//!   -H "Content-Type: application/json" \
//!   -d '{"assignmentId": "title:build:region", "sessionHostType": "Process",
//!        "count": 1, "startGameCommand": "./server"}'
//! ```

pub mod error;
pub mod handlers;
pub mod state;
pub mod supervisor;
pub mod types;
pub mod validation;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::ApiState;

/// OpenAPI documentation for the vmagent API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "vmagent API",
        version = "0.1.0",
        description = "Game server VM agent: session host heartbeats, assignment lifecycle and maintenance.",
        license(name = "Apache-2.0", url = "https://www.apache.org/licenses/LICENSE-2.0")
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Heartbeats", description = "Game server SDK heartbeats"),
        (name = "Assignment", description = "VM assignment lifecycle"),
        (name = "Session Hosts", description = "Session host goal states"),
        (name = "Maintenance", description = "Scheduled maintenance"),
        (name = "Diagnostics", description = "State inspection")
    ),
    paths(
        // Health
        handlers::health::health,
        // Heartbeats
        handlers::heartbeat::heartbeat,
        handlers::heartbeat::legacy_heartbeat,
        // Assignment
        handlers::assignment::assign,
        handlers::assignment::get_assignment,
        handlers::assignment::unassign,
        handlers::assignment::complete_unassignment,
        // Session hosts
        handlers::session_hosts::set_goal_state,
        // Maintenance
        handlers::maintenance::set_maintenance,
        // Diagnostics
        handlers::diagnostics::get_state,
    ),
    components(schemas(
        // Request types
        vmagent_protocol::HeartbeatRequest,
        vmagent_protocol::LegacyHeartbeatRequest,
        vmagent_protocol::MaintenanceSchedule,
        crate::state::SessionHostsStartInfo,
        types::UnassignRequest,
        types::GoalStateRequest,
        // Response types
        vmagent_protocol::HeartbeatResponse,
        types::HealthResponse,
        types::AssignResponse,
        types::AssignmentDataResponse,
        types::SessionHostSummary,
        types::VmStateResponse,
        types::GoalStateResponse,
        types::MaintenanceResponse,
        types::ApiErrorResponse,
    ))
)]
pub struct ApiDoc;

/// Timeout for control-plane requests. Heartbeats never block on I/O and
/// get a tighter bound.
const API_REQUEST_TIMEOUT_SECS: u64 = 60;
const HEARTBEAT_TIMEOUT_SECS: u64 = 10;

/// Create the API router with all endpoints.
pub fn create_router(state: Arc<ApiState>) -> Router {
    // Health check route
    let health_route = Router::new().route("/health", get(handlers::health::health));

    // Session host routes
    let session_host_routes = Router::new()
        .route(
            "/:id",
            post(handlers::heartbeat::heartbeat).patch(handlers::heartbeat::legacy_heartbeat),
        )
        .route("/:id/goalState", put(handlers::session_hosts::set_goal_state))
        .layer(TimeoutLayer::new(Duration::from_secs(HEARTBEAT_TIMEOUT_SECS)));

    // Assignment routes
    let assignment_routes = Router::new()
        .route(
            "/",
            post(handlers::assignment::assign).get(handlers::assignment::get_assignment),
        )
        .route("/unassign", post(handlers::assignment::unassign))
        .route("/complete", post(handlers::assignment::complete_unassignment))
        .layer(TimeoutLayer::new(Duration::from_secs(API_REQUEST_TIMEOUT_SECS)));

    // API v1 routes
    let api_v1 = Router::new()
        .nest("/sessionHosts", session_host_routes)
        .nest("/assignment", assignment_routes)
        .route("/maintenance", put(handlers::maintenance::set_maintenance))
        .route("/state", get(handlers::diagnostics::get_state));

    // Combine all routes
    Router::new()
        .merge(health_route)
        .nest("/v1", api_v1)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
