use salvo::prelude::*;

use crate::utils::{get_app_state, AppError};

#[handler]
pub async fn health(res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;
    res.render(Json(serde_json::json!({
        "status": "ok",
        "storage": if state.config.is_in_memory() { "memory" } else { "postgres" },
    })));
    Ok(())
}
