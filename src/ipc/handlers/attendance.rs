use serde::Deserialize;
use serde_json::{json, Value};

use crate::attendance::{self, AttendanceEntry, SubjectAttendanceQuery};
use crate::error::ServiceResult;
use crate::ipc::error::Reply;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{self, caller, optional_str, required_list, required_str, STAFF, TEACHER};
use crate::ipc::types::{AppState, Ctx, Request};
use crate::query::{Sort, SortDir, StudentSort};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryParams {
    student_id: String,
    present: bool,
}

fn take(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, TEACHER)?;
    let period_id = required_str(params, "periodId")?;
    let date = required_str(params, "date")?;
    let entries: Vec<EntryParams> = required_list(params, "entries")?;
    let entries: Vec<AttendanceEntry> = entries
        .into_iter()
        .map(|e| AttendanceEntry {
            student_id: e.student_id,
            present: e.present,
        })
        .collect();

    let taken = attendance::take_attendance(ctx.conn, &caller, &period_id, &date, &entries)?;
    Ok(Reply::created("Attendance recorded successfully", json!(taken)).shown())
}

fn subject_summary(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, STAFF)?;
    let query = SubjectAttendanceQuery {
        classroom_id: required_str(params, "classroomId")?,
        subject_id: optional_str(params, "subjectId")?,
        search: optional_str(params, "search")?,
        sort: params::sort(
            params,
            Sort {
                field: StudentSort::Name,
                dir: SortDir::Asc,
            },
        )?,
        page: params::page(params, ctx.config.page_limit)?,
    };
    let summary = attendance::get_subject_attendance(ctx.conn, &caller, &query)?;
    Ok(Reply::ok("Attendance fetched", json!(summary)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.take" => Some(with_db(state, req, take)),
        "attendance.subjectSummary" => Some(with_db(state, req, subject_summary)),
        _ => None,
    }
}
