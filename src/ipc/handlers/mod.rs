pub mod attendance;
pub mod classrooms;
pub mod core;
pub mod schools;
pub mod students;
pub mod subjects;
pub mod teachers;
pub mod timetable;

use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{respond, Reply};
use crate::ipc::types::{AppState, Ctx, Request};

pub(crate) type Op = fn(&Ctx<'_>, &serde_json::Value) -> ServiceResult<Reply>;

/// Runs a workspace-bound operation and wraps its outcome in a response line.
pub(crate) fn with_db(state: &AppState, req: &Request, op: Op) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return respond(&req.id, Err(ServiceError::NoWorkspace));
    };
    let ctx = Ctx {
        conn,
        config: &state.config,
        mailer: state.mailer.as_ref(),
    };
    respond(&req.id, op(&ctx, &req.params))
}
