use serde_json::{json, Value};

use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::Reply;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{caller, optional_str_list, required_str, ANY_ROLE, PRINCIPAL, STAFF};
use crate::ipc::types::{AppState, Ctx, Request};
use crate::roster::{self, StudentAssignment};

fn create(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let name = required_str(params, "name")?;
    let subjects = optional_str_list(params, "subjects")?.unwrap_or_default();
    let classroom = roster::create_classroom(ctx.conn, &caller, &name, &subjects)?;
    Ok(Reply::created(
        "Classroom created successfully",
        json!({ "classroom": classroom }),
    )
    .shown())
}

fn assign_teacher(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let classroom_id = required_str(params, "classroomId")?;
    let teacher_id = required_str(params, "teacherId")?;
    let classroom = roster::assign_teacher(ctx.conn, &caller, &classroom_id, &teacher_id)?;
    Ok(Reply::ok(
        "Teacher assigned successfully",
        json!({ "classroom": classroom }),
    )
    .shown())
}

fn list(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let classrooms = roster::list_classrooms(ctx.conn, &caller)?;
    Ok(Reply::ok("Classrooms fetched", json!({ "classrooms": classrooms })))
}

fn assign_students(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, STAFF)?;
    let classroom_id = required_str(params, "classroomId")?;
    let student_ids = optional_str_list(params, "studentIds")?
        .ok_or_else(|| ServiceError::validation("missing studentIds"))?;
    match roster::assign_students(ctx.conn, &caller, &classroom_id, &student_ids)? {
        StudentAssignment::AlreadyAssigned => Ok(Reply::ok(
            "All students are already assigned to this classroom",
            json!({ "newlyAssignedStudents": [] }),
        )
        .shown()),
        StudentAssignment::Assigned(ids) => Ok(Reply::ok(
            "Students assigned successfully",
            json!({ "newlyAssignedStudents": ids }),
        )
        .shown()),
    }
}

fn kick_student(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, STAFF)?;
    let classroom_id = required_str(params, "classroomId")?;
    let student_id = required_str(params, "studentId")?;
    roster::kick_student(ctx.conn, &caller, &classroom_id, &student_id)?;
    Ok(Reply::ok(
        "Student removed from classroom",
        json!({ "classroomId": classroom_id, "studentId": student_id }),
    )
    .shown())
}

fn update(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let classroom_id = required_str(params, "classroomId")?;
    let name = required_str(params, "name")?;
    let subjects = optional_str_list(params, "subjects")?;
    let classroom =
        roster::update_classroom(ctx.conn, &caller, &classroom_id, &name, subjects.as_deref())?;
    Ok(Reply::ok(
        "Classroom updated successfully",
        json!({ "classroom": classroom }),
    )
    .shown())
}

fn delete(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let classroom_id = required_str(params, "classroomId")?;
    roster::delete_classroom(ctx.conn, &caller, &classroom_id)?;
    Ok(Reply::ok(
        "Classroom deleted successfully",
        json!({ "classroomId": classroom_id }),
    )
    .shown())
}

fn details(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, ANY_ROLE)?;
    let classroom_id = required_str(params, "classroomId")?;
    let classroom = roster::classroom_details(ctx.conn, &caller, &classroom_id)?;
    Ok(Reply::ok("Classroom fetched", json!({ "classroom": classroom })))
}

fn subjects(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, ANY_ROLE)?;
    let classroom_id = required_str(params, "classroomId")?;
    let subjects = roster::classroom_subjects(ctx.conn, &caller, &classroom_id)?;
    Ok(Reply::ok("Subjects fetched", json!({ "subjects": subjects })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classrooms.create" => Some(with_db(state, req, create)),
        "classrooms.assignTeacher" => Some(with_db(state, req, assign_teacher)),
        "classrooms.list" => Some(with_db(state, req, list)),
        "classrooms.assignStudents" => Some(with_db(state, req, assign_students)),
        "classrooms.kickStudent" => Some(with_db(state, req, kick_student)),
        "classrooms.update" => Some(with_db(state, req, update)),
        "classrooms.delete" => Some(with_db(state, req, delete)),
        "classrooms.details" => Some(with_db(state, req, details)),
        "classrooms.subjects" => Some(with_db(state, req, subjects)),
        _ => None,
    }
}
