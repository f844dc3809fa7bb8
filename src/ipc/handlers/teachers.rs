use serde::Deserialize;
use serde_json::{json, Value};

use crate::attendance;
use crate::error::ServiceResult;
use crate::ipc::error::Reply;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{
    self, caller, optional_str, required_list, required_str, PRINCIPAL, STAFF, TEACHER,
};
use crate::ipc::types::{AppState, Ctx, Request};
use crate::model::parse_date;
use crate::query::{Sort, SortDir, TeacherSort};
use crate::roster;
use crate::teachers::{self, BulkTeacher, NewTeacher, TeacherFilter, TeacherUpdate};

fn create(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let input = NewTeacher {
        name: required_str(params, "name")?,
        email: required_str(params, "email")?,
        subject_id: required_str(params, "subjectId")?,
    };
    let created = teachers::create_teacher(ctx.conn, &caller, &input)?;
    ctx.mailer.send(&created.mail);
    Ok(Reply::created(
        "Teacher created successfully",
        json!({ "teacherId": created.teacher_id }),
    )
    .shown())
}

#[derive(Deserialize)]
struct BulkRow {
    name: String,
    email: String,
    subject: String,
}

fn create_bulk(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let rows: Vec<BulkRow> = required_list(params, "teachers")?;
    let rows: Vec<BulkTeacher> = rows
        .into_iter()
        .map(|r| BulkTeacher {
            name: r.name,
            email: r.email,
            subject: r.subject,
        })
        .collect();

    let created = teachers::create_bulk_teachers(ctx.conn, &caller, &rows)?;
    for c in &created {
        ctx.mailer.send(&c.mail);
    }
    let ids: Vec<&str> = created.iter().map(|c| c.teacher_id.as_str()).collect();
    Ok(Reply::created(
        "Teachers created successfully",
        json!({ "teacherIds": ids, "count": ids.len() }),
    )
    .shown())
}

fn update(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let teacher_id = required_str(params, "teacherId")?;
    let update = TeacherUpdate {
        name: required_str(params, "name")?,
        subject_id: required_str(params, "subjectId")?,
        password: optional_str(params, "password")?,
    };
    teachers::update_teacher(ctx.conn, &caller, &teacher_id, &update)?;
    Ok(Reply::ok("Teacher updated successfully", json!({ "teacherId": teacher_id })).shown())
}

fn remove(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let teacher_id = required_str(params, "teacherId")?;
    let removal = roster::remove_teacher(ctx.conn, &caller, &teacher_id)?;
    Ok(Reply::ok("Teacher removed successfully", json!(removal)).shown())
}

fn list(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let page = params::page(params, ctx.config.page_limit)?;
    let filter = TeacherFilter {
        search: optional_str(params, "search")?,
        classroom_id: optional_str(params, "classroomId")?,
        subject_id: optional_str(params, "subjectId")?,
        sort: params::sort(
            params,
            Sort {
                field: TeacherSort::CreatedAt,
                dir: SortDir::Desc,
            },
        )?,
        page,
    };
    let out = teachers::list_teachers(ctx.conn, &caller, &filter)?;
    Ok(Reply::ok(
        "Teachers fetched",
        json!({
            "teachers": out.teachers,
            "totalTeachers": out.total_teachers,
            "currentPage": page.page,
            "totalPages": page.total_pages(out.total_teachers),
        }),
    ))
}

fn my_classroom(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, TEACHER)?;
    let classroom = roster::my_classroom(ctx.conn, &caller)?;
    Ok(Reply::ok("Classroom fetched", json!({ "classroom": classroom })))
}

fn schedule(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, STAFF)?;
    let teacher_id = optional_str(params, "teacherId")?;
    let as_of = match optional_str(params, "asOf")? {
        Some(raw) => parse_date(&raw)?,
        None => chrono::Local::now().date_naive(),
    };
    let schedule = attendance::get_teacher_schedule(
        ctx.conn,
        &caller,
        teacher_id.as_deref(),
        as_of,
        ctx.config.week_start,
    )?;
    Ok(Reply::ok("Schedule fetched", json!(schedule)))
}

fn attendance_classes(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, TEACHER)?;
    let classrooms = attendance::attendance_classes(ctx.conn, &caller)?;
    Ok(Reply::ok("Classes fetched", json!({ "classrooms": classrooms })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" => Some(with_db(state, req, create)),
        "teachers.createBulk" => Some(with_db(state, req, create_bulk)),
        "teachers.update" => Some(with_db(state, req, update)),
        "teachers.remove" => Some(with_db(state, req, remove)),
        "teachers.list" => Some(with_db(state, req, list)),
        "teachers.myClassroom" => Some(with_db(state, req, my_classroom)),
        "teachers.schedule" => Some(with_db(state, req, schedule)),
        "teachers.attendanceClasses" => Some(with_db(state, req, attendance_classes)),
        _ => None,
    }
}
