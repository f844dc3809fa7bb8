use serde_json::{json, Value};

use crate::directory;
use crate::error::ServiceResult;
use crate::ipc::error::Reply;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{caller, required_str, PRINCIPAL};
use crate::ipc::types::{AppState, Ctx, Request};

fn create(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let name = required_str(params, "name")?;
    let subject = directory::create_subject(ctx.conn, &caller, &name)?;
    Ok(Reply::created("Subject created successfully", json!({ "subject": subject })).shown())
}

fn list(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let subjects = directory::list_subjects(ctx.conn, &caller)?;
    Ok(Reply::ok("Subjects fetched", json!({ "subjects": subjects })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(with_db(state, req, create)),
        "subjects.list" => Some(with_db(state, req, list)),
        _ => None,
    }
}
