use serde_json::{json, Value};

use crate::directory::{self, StudentFilter};
use crate::error::ServiceResult;
use crate::ipc::error::Reply;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{self, caller, optional_str, required_str, PRINCIPAL};
use crate::ipc::types::{AppState, Ctx, Request};
use crate::query::{Sort, SortDir, StudentSort};

fn create(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let name = required_str(params, "name")?;
    let roll = required_str(params, "roll")?;
    let student = directory::create_student(ctx.conn, &caller, &name, &roll)?;
    Ok(Reply::created("Student created successfully", json!({ "student": student })).shown())
}

fn list(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let page = params::page(params, ctx.config.page_limit)?;
    let filter = StudentFilter {
        search: optional_str(params, "search")?,
        classroom_id: optional_str(params, "classroomId")?,
        sort: params::sort(
            params,
            Sort {
                field: StudentSort::CreatedAt,
                dir: SortDir::Desc,
            },
        )?,
        page,
    };
    let out = directory::list_students(ctx.conn, &caller, &filter)?;
    Ok(Reply::ok(
        "Students fetched",
        json!({
            "students": out.students,
            "totalStudents": out.total_students,
            "currentPage": page.page,
            "totalPages": page.total_pages(out.total_students),
        }),
    ))
}

fn remove(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let student_id = required_str(params, "studentId")?;
    directory::remove_student(ctx.conn, &caller, &student_id)?;
    Ok(Reply::ok("Student removed successfully", json!({ "studentId": student_id })).shown())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(with_db(state, req, create)),
        "students.list" => Some(with_db(state, req, list)),
        "students.remove" => Some(with_db(state, req, remove)),
        _ => None,
    }
}
