//! Classroom roster workflow: classroom lifecycle, mentor assignment and student
//! membership. Every mutating operation runs in a single transaction; a failure at any
//! step leaves the workspace untouched.

use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;

use crate::db::{in_transaction, new_id, now_stamp};
use crate::directory::{required_text, subject_in_school};
use crate::error::{ServiceError, ServiceResult};
use crate::model::{
    Caller, Classroom, NamedRef, CLASSROOM_ACTIVE, CLASSROOM_DELETED, MEMBER_ACTIVE,
    MEMBER_REMOVED,
};
use crate::timetable;

#[derive(Debug, Clone)]
pub(crate) struct ClassroomRow {
    pub id: String,
    pub name: String,
    pub mentor_id: Option<String>,
}

pub(crate) fn active_classroom(
    conn: &Connection,
    school_id: &str,
    classroom_id: &str,
) -> ServiceResult<Option<ClassroomRow>> {
    Ok(conn
        .query_row(
            "SELECT id, name, mentor_id FROM classrooms
             WHERE id = ? AND school_id = ? AND status = ?",
            (classroom_id, school_id, CLASSROOM_ACTIVE),
            |r| {
                Ok(ClassroomRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    mentor_id: r.get(2)?,
                })
            },
        )
        .optional()?)
}

pub(crate) fn require_classroom(
    conn: &Connection,
    caller: &Caller,
    classroom_id: &str,
) -> ServiceResult<ClassroomRow> {
    active_classroom(conn, &caller.school_id, classroom_id)?
        .ok_or_else(|| ServiceError::not_found("Classroom not found"))
}

pub(crate) fn active_teacher(
    conn: &Connection,
    school_id: &str,
    teacher_id: &str,
) -> ServiceResult<Option<NamedRef>> {
    Ok(conn
        .query_row(
            "SELECT id, name FROM teachers WHERE id = ? AND school_id = ? AND status = ?",
            (teacher_id, school_id, MEMBER_ACTIVE),
            |r| {
                Ok(NamedRef {
                    id: r.get(0)?,
                    name: r.get(1)?,
                })
            },
        )
        .optional()?)
}

fn mentored_classroom(conn: &Connection, teacher_id: &str) -> ServiceResult<Option<ClassroomRow>> {
    Ok(conn
        .query_row(
            "SELECT id, name, mentor_id FROM classrooms WHERE mentor_id = ? AND status = ?",
            (teacher_id, CLASSROOM_ACTIVE),
            |r| {
                Ok(ClassroomRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    mentor_id: r.get(2)?,
                })
            },
        )
        .optional()?)
}

fn name_taken(
    conn: &Connection,
    school_id: &str,
    name: &str,
    except_id: Option<&str>,
) -> ServiceResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM classrooms
             WHERE school_id = ? AND name = ? AND status = ? AND id <> COALESCE(?, '')",
            (school_id, name, CLASSROOM_ACTIVE, except_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn load_classroom(conn: &Connection, classroom_id: &str) -> ServiceResult<Classroom> {
    Ok(conn.query_row(
        "SELECT c.id, c.name, c.school_id, c.status, c.created_at, t.id, t.name
         FROM classrooms c
         LEFT JOIN teachers t ON t.id = c.mentor_id
         WHERE c.id = ?",
        [classroom_id],
        |r| {
            let mentor_id: Option<String> = r.get(5)?;
            let mentor_name: Option<String> = r.get(6)?;
            Ok(Classroom {
                id: r.get(0)?,
                name: r.get(1)?,
                school_id: r.get(2)?,
                status: r.get(3)?,
                created_at: r.get(4)?,
                mentor: mentor_id
                    .zip(mentor_name)
                    .map(|(id, name)| NamedRef { id, name }),
            })
        },
    )?)
}

/// Deduplicates ids while keeping first-seen order.
fn unique_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

fn insert_subject_links(
    conn: &Connection,
    caller: &Caller,
    classroom_id: &str,
    subject_ids: &[String],
) -> ServiceResult<usize> {
    for subject_id in subject_ids {
        if subject_in_school(conn, &caller.school_id, subject_id)?.is_none() {
            return Err(ServiceError::NotFound {
                message: "Subject not found".to_string(),
                details: Some(serde_json::json!({ "subjectId": subject_id })),
            });
        }
        conn.execute(
            "INSERT INTO classroom_subjects(id, classroom_id, subject_id) VALUES(?, ?, ?)",
            (new_id(), classroom_id, subject_id),
        )?;
    }
    Ok(subject_ids.len())
}

pub fn create_classroom(
    conn: &Connection,
    caller: &Caller,
    name: &str,
    subject_ids: &[String],
) -> ServiceResult<Classroom> {
    let name = required_text(name, "name")?;
    let subject_ids = unique_ids(subject_ids);

    in_transaction(conn, |tx| {
        if name_taken(tx, &caller.school_id, &name, None)? {
            return Err(ServiceError::conflict("Classroom with this name already exists"));
        }

        let classroom_id = new_id();
        tx.execute(
            "INSERT INTO classrooms(id, school_id, name, mentor_id, status, created_at)
             VALUES(?, ?, ?, NULL, ?, ?)",
            (&classroom_id, &caller.school_id, &name, CLASSROOM_ACTIVE, now_stamp()),
        )?;
        insert_subject_links(tx, caller, &classroom_id, &subject_ids)?;
        timetable::seed_week(tx, &classroom_id)?;

        tracing::info!(%classroom_id, school_id = %caller.school_id, subjects = subject_ids.len(), "classroom created");
        load_classroom(tx, &classroom_id)
    })
}

pub fn assign_teacher(
    conn: &Connection,
    caller: &Caller,
    classroom_id: &str,
    teacher_id: &str,
) -> ServiceResult<Classroom> {
    in_transaction(conn, |tx| {
        let teacher = active_teacher(tx, &caller.school_id, teacher_id)?
            .ok_or_else(|| ServiceError::not_found("Teacher not found"))?;
        let classroom = require_classroom(tx, caller, classroom_id)?;

        if let Some(current) = mentored_classroom(tx, &teacher.id)? {
            if current.id != classroom.id {
                return Err(ServiceError::conflict(
                    "Teacher is already assigned to a classroom",
                ));
            }
            return load_classroom(tx, &classroom.id);
        }

        tx.execute(
            "UPDATE classrooms SET mentor_id = ? WHERE id = ?",
            (&teacher.id, &classroom.id),
        )?;
        tracing::info!(
            classroom_id = %classroom.id,
            teacher_id = %teacher.id,
            replaced = ?classroom.mentor_id,
            "mentor assigned"
        );
        load_classroom(tx, &classroom.id)
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudentAssignment {
    AlreadyAssigned,
    Assigned(Vec<String>),
}

pub fn assign_students(
    conn: &Connection,
    caller: &Caller,
    classroom_id: &str,
    student_ids: &[String],
) -> ServiceResult<StudentAssignment> {
    let requested = unique_ids(student_ids);
    if requested.is_empty() {
        return Err(ServiceError::validation("studentIds must not be empty"));
    }

    in_transaction(conn, |tx| {
        let classroom = require_classroom(tx, caller, classroom_id)?;

        let placeholders = vec!["?"; requested.len()].join(", ");
        let mut bind: Vec<Value> = vec![
            Value::Text(caller.school_id.clone()),
            Value::Text(MEMBER_ACTIVE.to_string()),
        ];
        bind.extend(requested.iter().cloned().map(Value::Text));
        let mut stmt = tx.prepare(&format!(
            "SELECT id FROM students WHERE school_id = ? AND status = ? AND id IN ({placeholders})"
        ))?;
        let found: HashSet<String> = stmt
            .query_map(params_from_iter(bind), |r| r.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;
        if found.len() != requested.len() {
            let missing: Vec<&String> = requested.iter().filter(|id| !found.contains(*id)).collect();
            return Err(ServiceError::NotFound {
                message: "Some students not found".to_string(),
                details: Some(serde_json::json!({ "missing": missing })),
            });
        }

        let mut bind: Vec<Value> = vec![Value::Text(classroom.id.clone())];
        bind.extend(requested.iter().cloned().map(Value::Text));
        let mut stmt = tx.prepare(&format!(
            "SELECT student_id FROM classroom_students
             WHERE classroom_id = ? AND student_id IN ({placeholders})"
        ))?;
        let existing: HashSet<String> = stmt
            .query_map(params_from_iter(bind), |r| r.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;

        let to_assign: Vec<String> = requested
            .into_iter()
            .filter(|id| !existing.contains(id))
            .collect();
        if to_assign.is_empty() {
            return Ok(StudentAssignment::AlreadyAssigned);
        }

        let mut insert = tx.prepare(
            "INSERT INTO classroom_students(id, classroom_id, student_id) VALUES(?, ?, ?)",
        )?;
        for student_id in &to_assign {
            insert.execute((new_id(), &classroom.id, student_id))?;
        }
        tracing::info!(classroom_id = %classroom.id, added = to_assign.len(), "students assigned");
        Ok(StudentAssignment::Assigned(to_assign))
    })
}

pub fn update_classroom(
    conn: &Connection,
    caller: &Caller,
    classroom_id: &str,
    name: &str,
    subject_ids: Option<&[String]>,
) -> ServiceResult<Classroom> {
    let name = required_text(name, "name")?;

    in_transaction(conn, |tx| {
        // Both reads happen before any write; the duplicate check wins when both fail.
        let duplicate = name_taken(tx, &caller.school_id, &name, Some(classroom_id))?;
        let existing = active_classroom(tx, &caller.school_id, classroom_id)?;
        if duplicate {
            return Err(ServiceError::conflict("Classroom with this name already present"));
        }
        let classroom = existing.ok_or_else(|| ServiceError::not_found("Classroom not found"))?;

        // An empty list leaves the current subjects alone.
        if let Some(subject_ids) = subject_ids.filter(|ids| !ids.is_empty()) {
            let subject_ids = unique_ids(subject_ids);
            tx.execute(
                "DELETE FROM classroom_subjects WHERE classroom_id = ?",
                [&classroom.id],
            )?;
            insert_subject_links(tx, caller, &classroom.id, &subject_ids)?;
        }

        tx.execute(
            "UPDATE classrooms SET name = ? WHERE id = ?",
            (&name, &classroom.id),
        )?;
        tracing::info!(classroom_id = %classroom.id, "classroom updated");
        load_classroom(tx, &classroom.id)
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherRemoval {
    pub teacher_id: String,
    pub released_classroom: Option<String>,
}

pub fn remove_teacher(
    conn: &Connection,
    caller: &Caller,
    teacher_id: &str,
) -> ServiceResult<TeacherRemoval> {
    in_transaction(conn, |tx| {
        let teacher = active_teacher(tx, &caller.school_id, teacher_id)?
            .ok_or_else(|| ServiceError::not_found("Teacher not found"))?;

        let released = mentored_classroom(tx, &teacher.id)?;
        if let Some(classroom) = &released {
            tx.execute(
                "UPDATE classrooms SET mentor_id = NULL WHERE id = ?",
                [&classroom.id],
            )?;
        }
        tx.execute(
            "UPDATE teachers SET status = ? WHERE id = ?",
            (MEMBER_REMOVED, &teacher.id),
        )?;

        tracing::info!(teacher_id = %teacher.id, released = ?released.as_ref().map(|c| &c.id), "teacher removed");
        Ok(TeacherRemoval {
            teacher_id: teacher.id,
            released_classroom: released.map(|c| c.id),
        })
    })
}

pub fn delete_classroom(conn: &Connection, caller: &Caller, classroom_id: &str) -> ServiceResult<()> {
    in_transaction(conn, |tx| {
        let classroom = require_classroom(tx, caller, classroom_id)?;
        tx.execute(
            "UPDATE classrooms SET status = ?, mentor_id = NULL WHERE id = ?",
            (CLASSROOM_DELETED, &classroom.id),
        )?;
        tracing::info!(classroom_id = %classroom.id, name = %classroom.name, "classroom deleted");
        Ok(())
    })
}

pub fn kick_student(
    conn: &Connection,
    caller: &Caller,
    classroom_id: &str,
    student_id: &str,
) -> ServiceResult<()> {
    in_transaction(conn, |tx| {
        let classroom = require_classroom(tx, caller, classroom_id)?;
        let removed = tx.execute(
            "DELETE FROM classroom_students WHERE classroom_id = ? AND student_id = ?",
            (&classroom.id, student_id),
        )?;
        if removed == 0 {
            return Err(ServiceError::not_found("Student is not in this classroom"));
        }
        Ok(())
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomSummary {
    #[serde(flatten)]
    pub classroom: Classroom,
    pub student_count: i64,
}

pub fn list_classrooms(conn: &Connection, caller: &Caller) -> ServiceResult<Vec<ClassroomSummary>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.school_id, c.status, c.created_at, t.id, t.name,
           (SELECT COUNT(*) FROM classroom_students cs
            JOIN students s ON s.id = cs.student_id
            WHERE cs.classroom_id = c.id AND s.status = 'active') AS student_count
         FROM classrooms c
         LEFT JOIN teachers t ON t.id = c.mentor_id
         WHERE c.school_id = ? AND c.status = ?
         ORDER BY c.name COLLATE NOCASE, c.id",
    )?;
    let rows = stmt
        .query_map((&caller.school_id, CLASSROOM_ACTIVE), |r| {
            let mentor_id: Option<String> = r.get(5)?;
            let mentor_name: Option<String> = r.get(6)?;
            Ok(ClassroomSummary {
                classroom: Classroom {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    school_id: r.get(2)?,
                    status: r.get(3)?,
                    created_at: r.get(4)?,
                    mentor: mentor_id
                        .zip(mentor_name)
                        .map(|(id, name)| NamedRef { id, name }),
                },
                student_count: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn classroom_details(
    conn: &Connection,
    caller: &Caller,
    classroom_id: &str,
) -> ServiceResult<Classroom> {
    let classroom = require_classroom(conn, caller, classroom_id)?;
    load_classroom(conn, &classroom.id)
}

pub fn classroom_subjects(
    conn: &Connection,
    caller: &Caller,
    classroom_id: &str,
) -> ServiceResult<Vec<NamedRef>> {
    let classroom = require_classroom(conn, caller, classroom_id)?;
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name
         FROM classroom_subjects cs
         JOIN subjects s ON s.id = cs.subject_id
         WHERE cs.classroom_id = ?
         ORDER BY s.name COLLATE NOCASE, s.id",
    )?;
    let rows = stmt
        .query_map([&classroom.id], |r| {
            Ok(NamedRef {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The active classroom the calling teacher mentors, if any.
pub fn my_classroom(conn: &Connection, caller: &Caller) -> ServiceResult<Option<Classroom>> {
    match mentored_classroom(conn, &caller.profile_id)? {
        Some(row) => Ok(Some(load_classroom(conn, &row.id)?)),
        None => Ok(None),
    }
}
