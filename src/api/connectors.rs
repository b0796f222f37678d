use salvo::prelude::*;

use crate::utils::{get_app_state, AppError};

/// Lists source connectors. An unreachable runner yields an empty list rather than an error.
#[handler]
pub async fn list_connectors(res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let connectors = state.catalog.list_connector_types_or_empty().await;
    res.render(Json(connectors));
    Ok(())
}

#[handler]
pub async fn get_specification(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    let connector_type_id = req
        .param::<String>("connector_type_id")
        .ok_or_else(|| AppError::BadRequest("Missing connector_type_id".to_string()))?;
    let refresh = req.query::<bool>("refresh").unwrap_or(false);

    let spec = state
        .catalog
        .get_specification(&connector_type_id, refresh)
        .await?;
    res.render(Json(spec));
    Ok(())
}

pub fn connector_routes() -> Router {
    Router::with_path("connectors")
        .get(list_connectors)
        .push(Router::with_path("{connector_type_id}/specification").get(get_specification))
}
