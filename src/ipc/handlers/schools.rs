use serde::Deserialize;
use serde_json::{json, Value};

use crate::directory::{self, RegisterSchool};
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::Reply;
use crate::ipc::handlers::with_db;
use crate::ipc::params::required_str;
use crate::ipc::types::{AppState, Ctx, Request};

#[derive(Deserialize)]
struct PrincipalParams {
    name: String,
    email: String,
    password: String,
}

fn register(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let name = required_str(params, "name")?;
    let principal: PrincipalParams = params
        .get("principal")
        .cloned()
        .ok_or_else(|| ServiceError::validation("missing principal"))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| ServiceError::validation(format!("invalid principal: {e}")))
        })?;

    let registered = directory::register_school(
        ctx.conn,
        &RegisterSchool {
            name,
            principal_name: principal.name,
            principal_email: principal.email,
            principal_password: principal.password,
        },
    )?;
    Ok(Reply::created("School registered successfully", json!(registered)).shown())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.register" => Some(with_db(state, req, register)),
        _ => None,
    }
}
