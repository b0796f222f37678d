pub mod admin;
pub mod connectors;
pub mod datasources;
pub mod health;
pub mod webhooks;

use salvo::prelude::*;

use crate::utils::middleware::{admin_required, inject_state, principal_required};
use crate::utils::AppState;

/// Routes mounted under `/api`. Webhooks authenticate by signature, not by principal.
pub fn api_routes() -> Router {
    Router::new()
        .push(Router::with_path("health").get(health::health))
        .push(webhooks::webhook_routes())
        .push(
            Router::new()
                .hoop(principal_required)
                .push(connectors::connector_routes())
                .push(datasources::datasource_routes()),
        )
        .push(Router::new().hoop(admin_required).push(admin::admin_routes()))
}

/// Full application router with state injected, as served by the binary.
pub fn app_router(state: AppState) -> Router {
    Router::new().push(
        Router::with_path("api")
            .hoop(inject_state(state))
            .push(api_routes()),
    )
}
