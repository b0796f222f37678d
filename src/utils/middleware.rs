use salvo::prelude::*;

use crate::core::collaborators::Principal;
use crate::utils::{get_app_state, AppError, AppState};

pub const ACCOUNT_HEADER: &str = "x-account-id";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
const PRINCIPAL_KEY: &str = "principal";

pub struct StateInjector {
    state: AppState,
}

impl StateInjector {
    pub fn new(state: AppState) -> Self {
        StateInjector { state }
    }
}

#[async_trait]
impl Handler for StateInjector {
    async fn handle(&self, _req: &mut Request, depot: &mut Depot, _res: &mut Response, _ctrl: &mut FlowCtrl) {
        depot.inject(self.state.clone());
    }
}

pub fn inject_state(state: AppState) -> StateInjector {
    StateInjector::new(state)
}

/// Requires the caller's account id; session handling lives in the gateway.
#[handler]
pub async fn principal_required(req: &mut Request, depot: &mut Depot, res: &mut Response, ctrl: &mut FlowCtrl) {
    let account = req
        .header::<String>(ACCOUNT_HEADER)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    match account {
        Some(account) => {
            depot.insert(PRINCIPAL_KEY, Principal::Account(account));
        }
        None => {
            AppError::Unauthorized(format!("missing {} header", ACCOUNT_HEADER))
                .write(req, depot, res)
                .await;
            ctrl.skip_rest();
        }
    }
}

#[handler]
pub async fn admin_required(req: &mut Request, depot: &mut Depot, res: &mut Response, ctrl: &mut FlowCtrl) {
    let expected = match get_app_state(depot) {
        Ok(state) => state.config.admin_token.clone(),
        Err(_) => None,
    };
    let provided = req.header::<String>(ADMIN_TOKEN_HEADER);

    let allowed = matches!((&expected, &provided), (Some(expected), Some(provided)) if expected == provided);
    if allowed {
        depot.insert(PRINCIPAL_KEY, Principal::System);
        return;
    }

    AppError::Forbidden("admin token required".to_string())
        .write(req, depot, res)
        .await;
    ctrl.skip_rest();
}

pub fn get_principal(depot: &Depot) -> Result<Principal, AppError> {
    depot
        .get::<Principal>(PRINCIPAL_KEY)
        .cloned()
        .map_err(|_| AppError::Unauthorized("no authenticated principal".to_string()))
}
