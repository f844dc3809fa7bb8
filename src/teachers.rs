use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db::{in_transaction, new_id, now_stamp};
use crate::directory::{email_taken, normalize_email, required_text, subject_in_school};
use crate::error::{ServiceError, ServiceResult};
use crate::mailer::{welcome_mail, Mail};
use crate::model::{Caller, NamedRef, MEMBER_ACTIVE};
use crate::password::{generate_password, hash_password};
use crate::query::{like_pattern, PageRequest, Sort, TeacherSort};
use crate::roster::active_teacher;

#[derive(Debug, Clone)]
pub struct NewTeacher {
    pub name: String,
    pub email: String,
    pub subject_id: String,
}

/// A committed-or-pending teacher account. `mail` carries the initial credentials and
/// must only be sent once the surrounding transaction has committed.
#[derive(Debug, Clone)]
pub struct CreatedTeacher {
    pub teacher_id: String,
    pub user_id: String,
    pub mail: Mail,
}

fn insert_teacher(
    conn: &Connection,
    caller: &Caller,
    name: &str,
    email: &str,
    subject_id: &str,
) -> ServiceResult<CreatedTeacher> {
    let name = required_text(name, "name")?;
    let email = normalize_email(email)?;
    if email_taken(conn, &email)? {
        return Err(ServiceError::conflict("A user with this email already exists"));
    }

    let password = generate_password();
    let password_hash = hash_password(&password)?;
    let now = now_stamp();

    let user_id = new_id();
    conn.execute(
        "INSERT INTO users(id, email, password_hash, role, created_at)
         VALUES(?, ?, ?, 'teacher', ?)",
        (&user_id, &email, &password_hash, &now),
    )?;
    let teacher_id = new_id();
    conn.execute(
        "INSERT INTO teachers(id, school_id, user_id, name, subject_id, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&teacher_id, &caller.school_id, &user_id, &name, subject_id, MEMBER_ACTIVE, &now),
    )?;

    Ok(CreatedTeacher {
        teacher_id,
        user_id,
        mail: welcome_mail(&name, &email, &password),
    })
}

pub fn create_teacher(conn: &Connection, caller: &Caller, input: &NewTeacher) -> ServiceResult<CreatedTeacher> {
    in_transaction(conn, |tx| {
        if subject_in_school(tx, &caller.school_id, &input.subject_id)?.is_none() {
            return Err(ServiceError::not_found(format!(
                "{} doesn't exist",
                input.subject_id
            )));
        }
        let created = insert_teacher(tx, caller, &input.name, &input.email, &input.subject_id)?;
        tracing::info!(teacher_id = %created.teacher_id, school_id = %caller.school_id, "teacher created");
        Ok(created)
    })
}

#[derive(Debug, Clone)]
pub struct BulkTeacher {
    pub name: String,
    pub email: String,
    /// Subject name, resolved within the caller's school.
    pub subject: String,
}

/// All-or-nothing: the first failing row aborts the batch.
pub fn create_bulk_teachers(
    conn: &Connection,
    caller: &Caller,
    rows: &[BulkTeacher],
) -> ServiceResult<Vec<CreatedTeacher>> {
    if rows.is_empty() {
        return Err(ServiceError::validation("teachers must not be empty"));
    }

    in_transaction(conn, |tx| {
        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            let one = || -> ServiceResult<CreatedTeacher> {
                let subject_id: String = tx
                    .query_row(
                        "SELECT id FROM subjects WHERE school_id = ? AND name = ?",
                        (&caller.school_id, row.subject.trim()),
                        |r| r.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| {
                        ServiceError::not_found(format!("{} doesn't exist", row.subject))
                    })?;
                insert_teacher(tx, caller, &row.name, &row.email, &subject_id)
            };
            match one() {
                Ok(c) => created.push(c),
                Err(e) => {
                    tracing::warn!(name = %row.name, error = %e, "bulk teacher row rejected");
                    return Err(ServiceError::validation(format!(
                        "Error creating {}: {}",
                        row.name, e
                    )));
                }
            }
        }
        tracing::info!(count = created.len(), school_id = %caller.school_id, "teachers created in bulk");
        Ok(created)
    })
}

#[derive(Debug, Clone)]
pub struct TeacherUpdate {
    pub name: String,
    pub subject_id: String,
    pub password: Option<String>,
}

pub fn update_teacher(
    conn: &Connection,
    caller: &Caller,
    teacher_id: &str,
    update: &TeacherUpdate,
) -> ServiceResult<()> {
    let name = required_text(&update.name, "name")?;
    let password_hash = match update.password.as_deref().filter(|p| !p.is_empty()) {
        Some(p) => Some(hash_password(p)?),
        None => None,
    };

    in_transaction(conn, |tx| {
        let teacher = active_teacher(tx, &caller.school_id, teacher_id)?
            .ok_or_else(|| ServiceError::not_found("Teacher not found"))?;
        if subject_in_school(tx, &caller.school_id, &update.subject_id)?.is_none() {
            return Err(ServiceError::not_found("Subject not found"));
        }

        tx.execute(
            "UPDATE teachers SET name = ?, subject_id = ? WHERE id = ?",
            (&name, &update.subject_id, &teacher.id),
        )?;
        if let Some(hash) = &password_hash {
            tx.execute(
                "UPDATE users SET password_hash = ?
                 WHERE id = (SELECT user_id FROM teachers WHERE id = ?)",
                (hash, &teacher.id),
            )?;
        }
        tracing::info!(teacher_id = %teacher.id, password_changed = password_hash.is_some(), "teacher updated");
        Ok(())
    })
}

#[derive(Debug, Clone)]
pub struct TeacherFilter {
    pub search: Option<String>,
    pub classroom_id: Option<String>,
    pub subject_id: Option<String>,
    pub sort: Sort<TeacherSort>,
    pub page: PageRequest,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherItem {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: String,
    pub subject: Option<NamedRef>,
    pub classroom: Option<NamedRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherPage {
    pub teachers: Vec<TeacherItem>,
    pub total_teachers: u64,
}

pub fn list_teachers(
    conn: &Connection,
    caller: &Caller,
    filter: &TeacherFilter,
) -> ServiceResult<TeacherPage> {
    let pattern = filter.search.as_deref().map(like_pattern);
    let from_where = "FROM teachers t
         JOIN users u ON u.id = t.user_id
         LEFT JOIN subjects sub ON sub.id = t.subject_id
         LEFT JOIN classrooms c ON c.mentor_id = t.id AND c.status = 'active'
         WHERE t.school_id = ?1 AND t.status = 'active'
           AND (?2 IS NULL OR t.name LIKE ?2 ESCAPE '\\')
           AND (?3 IS NULL OR t.subject_id = ?3)
           AND (?4 IS NULL OR c.id = ?4)";

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) {from_where}"),
        params![&caller.school_id, &pattern, &filter.subject_id, &filter.classroom_id],
        |r| r.get(0),
    )?;

    let sql = format!(
        "SELECT t.id, t.name, u.email, t.created_at, sub.id, sub.name, c.id, c.name
         {from_where}
         ORDER BY {}, t.id
         LIMIT ?5 OFFSET ?6",
        filter.sort.order_by()
    );
    let mut stmt = conn.prepare(&sql)?;
    let teachers = stmt
        .query_map(
            params![
                &caller.school_id,
                &pattern,
                &filter.subject_id,
                &filter.classroom_id,
                filter.page.sql_limit(),
                filter.page.sql_offset()
            ],
            |r| {
                let subject_id: Option<String> = r.get(4)?;
                let subject_name: Option<String> = r.get(5)?;
                let classroom_id: Option<String> = r.get(6)?;
                let classroom_name: Option<String> = r.get(7)?;
                Ok(TeacherItem {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    email: r.get(2)?,
                    created_at: r.get(3)?,
                    subject: subject_id
                        .zip(subject_name)
                        .map(|(id, name)| NamedRef { id, name }),
                    classroom: classroom_id
                        .zip(classroom_name)
                        .map(|(id, name)| NamedRef { id, name }),
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TeacherPage {
        teachers,
        total_teachers: total.max(0) as u64,
    })
}

/// Subject the teacher is registered for; used as the default attendance subject.
pub fn teacher_subject(conn: &Connection, caller: &Caller, teacher_id: &str) -> ServiceResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT subject_id FROM teachers WHERE id = ? AND school_id = ? AND status = ?",
            (teacher_id, &caller.school_id, MEMBER_ACTIVE),
            |r| r.get(0),
        )
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::directory::fixtures;
    use crate::password::verify_password;
    use crate::query::{PageLimit, SortDir};
    use crate::roster::{assign_teacher, create_classroom};

    fn bulk(name: &str, email: &str, subject: &str) -> BulkTeacher {
        BulkTeacher {
            name: name.into(),
            email: email.into(),
            subject: subject.into(),
        }
    }

    fn all_by_name() -> TeacherFilter {
        TeacherFilter {
            search: None,
            classroom_id: None,
            subject_id: None,
            sort: Sort {
                field: TeacherSort::Name,
                dir: SortDir::Asc,
            },
            page: PageRequest::new(1, PageLimit::All),
        }
    }

    fn teacher_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM teachers", [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn create_rejects_foreign_subject_and_duplicate_email() {
        let conn = open_in_memory();
        let caller = fixtures::school(&conn);
        let other = fixtures::school(&conn);
        let foreign_subject = fixtures::subject(&conn, &other, "Math");
        let math = fixtures::subject(&conn, &caller, "Math");

        let e = create_teacher(
            &conn,
            &caller,
            &NewTeacher {
                name: "Ada".into(),
                email: "ada@maple.test".into(),
                subject_id: foreign_subject,
            },
        )
        .expect_err("foreign subject");
        assert_eq!(e.status(), 404);

        let created = create_teacher(
            &conn,
            &caller,
            &NewTeacher {
                name: "Ada".into(),
                email: "ada@maple.test".into(),
                subject_id: math.clone(),
            },
        )
        .expect("create");
        assert_eq!(created.mail.to, "ada@maple.test");

        let e = create_teacher(
            &conn,
            &caller,
            &NewTeacher {
                name: "Ada Two".into(),
                email: "ADA@maple.test".into(),
                subject_id: math,
            },
        )
        .expect_err("duplicate email");
        assert_eq!(e.status(), 409);
        assert_eq!(teacher_count(&conn), 1);
    }

    #[test]
    fn bulk_creation_is_all_or_nothing() {
        let conn = open_in_memory();
        let caller = fixtures::school(&conn);
        fixtures::subject(&conn, &caller, "Math");

        let e = create_bulk_teachers(
            &conn,
            &caller,
            &[
                bulk("Ada", "ada@maple.test", "Math"),
                bulk("Bo", "bo@maple.test", "Alchemy"),
            ],
        )
        .expect_err("unknown subject");
        assert_eq!(e.status(), 400);
        assert!(e.to_string().starts_with("Error creating Bo:"), "{e}");
        assert_eq!(teacher_count(&conn), 0);
        let users: i64 = conn
            .query_row("SELECT COUNT(*) FROM users WHERE role = 'teacher'", [], |r| r.get(0))
            .expect("count");
        assert_eq!(users, 0);

        let created = create_bulk_teachers(
            &conn,
            &caller,
            &[
                bulk("Ada", "ada@maple.test", "Math"),
                bulk("Bo", "bo@maple.test", "Math"),
            ],
        )
        .expect("bulk");
        assert_eq!(created.len(), 2);
        assert_eq!(teacher_count(&conn), 2);
    }

    #[test]
    fn update_changes_subject_and_password() {
        let conn = open_in_memory();
        let caller = fixtures::school(&conn);
        let math = fixtures::subject(&conn, &caller, "Math");
        let art = fixtures::subject(&conn, &caller, "Art");
        let created = create_teacher(
            &conn,
            &caller,
            &NewTeacher {
                name: "Ada".into(),
                email: "ada@maple.test".into(),
                subject_id: math,
            },
        )
        .expect("create");

        update_teacher(
            &conn,
            &caller,
            &created.teacher_id,
            &TeacherUpdate {
                name: "Ada L.".into(),
                subject_id: art.clone(),
                password: Some("new-secret".into()),
            },
        )
        .expect("update");

        let hash: String = conn
            .query_row(
                "SELECT password_hash FROM users WHERE id = ?",
                [&created.user_id],
                |r| r.get(0),
            )
            .expect("hash");
        assert!(verify_password("new-secret", &hash).expect("verify"));
        assert_eq!(
            teacher_subject(&conn, &caller, &created.teacher_id).expect("subject"),
            Some(art)
        );

        let e = update_teacher(
            &conn,
            &caller,
            "ghost",
            &TeacherUpdate {
                name: "x".into(),
                subject_id: "y".into(),
                password: None,
            },
        )
        .expect_err("missing teacher");
        assert_eq!(e.status(), 404);
    }

    #[test]
    fn list_joins_classroom_and_filters() {
        let conn = open_in_memory();
        let caller = fixtures::school(&conn);
        let math = fixtures::subject(&conn, &caller, "Math");
        let art = fixtures::subject(&conn, &caller, "Art");
        let created = create_bulk_teachers(
            &conn,
            &caller,
            &[
                bulk("Zoe", "zoe@maple.test", "Math"),
                bulk("Ada", "ada@maple.test", "Art"),
            ],
        )
        .expect("bulk");
        let room = create_classroom(&conn, &caller, "Room 1", &[]).expect("classroom");
        assign_teacher(&conn, &caller, &room.id, &created[0].teacher_id).expect("assign");

        let page = list_teachers(&conn, &caller, &all_by_name()).expect("list");
        assert_eq!(page.total_teachers, 2);
        assert_eq!(page.teachers[0].name, "Ada");
        assert_eq!(page.teachers[1].classroom.as_ref().map(|c| c.name.as_str()), Some("Room 1"));

        let by_subject = list_teachers(
            &conn,
            &caller,
            &TeacherFilter {
                subject_id: Some(art),
                ..all_by_name()
            },
        )
        .expect("by subject");
        assert_eq!(by_subject.total_teachers, 1);
        assert_eq!(by_subject.teachers[0].name, "Ada");

        let by_room = list_teachers(
            &conn,
            &caller,
            &TeacherFilter {
                classroom_id: Some(room.id),
                ..all_by_name()
            },
        )
        .expect("by classroom");
        assert_eq!(by_room.total_teachers, 1);
        assert_eq!(by_room.teachers[0].subject.as_ref().map(|s| s.id.clone()), Some(math));
    }
}
