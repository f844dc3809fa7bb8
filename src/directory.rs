use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db::{in_transaction, new_id, now_stamp};
use crate::error::{ServiceError, ServiceResult};
use crate::model::{Caller, NamedRef, MEMBER_ACTIVE, MEMBER_REMOVED};
use crate::password::hash_password;
use crate::query::{like_pattern, PageRequest, Sort, StudentSort};

#[derive(Debug, Clone)]
pub struct RegisterSchool {
    pub name: String,
    pub principal_name: String,
    pub principal_email: String,
    pub principal_password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredSchool {
    pub school_id: String,
    pub principal_id: String,
}

pub fn register_school(conn: &Connection, input: &RegisterSchool) -> ServiceResult<RegisteredSchool> {
    let name = required_text(&input.name, "name")?;
    let principal_name = required_text(&input.principal_name, "principal.name")?;
    let email = normalize_email(&input.principal_email)?;
    if input.principal_password.is_empty() {
        return Err(ServiceError::validation("Password is required"));
    }
    let password_hash = hash_password(&input.principal_password)?;

    in_transaction(conn, |tx| {
        if email_taken(tx, &email)? {
            return Err(ServiceError::conflict("A user with this email already exists"));
        }
        let now = now_stamp();
        let school_id = new_id();
        tx.execute(
            "INSERT INTO schools(id, name, created_at) VALUES(?, ?, ?)",
            (&school_id, &name, &now),
        )?;
        let user_id = new_id();
        tx.execute(
            "INSERT INTO users(id, email, password_hash, role, created_at)
             VALUES(?, ?, ?, 'principal', ?)",
            (&user_id, &email, &password_hash, &now),
        )?;
        let principal_id = new_id();
        tx.execute(
            "INSERT INTO principals(id, school_id, user_id, name) VALUES(?, ?, ?, ?)",
            (&principal_id, &school_id, &user_id, &principal_name),
        )?;
        tracing::info!(%school_id, "school registered");
        Ok(RegisteredSchool {
            school_id,
            principal_id,
        })
    })
}

pub fn create_subject(conn: &Connection, caller: &Caller, name: &str) -> ServiceResult<NamedRef> {
    let name = required_text(name, "name")?;
    in_transaction(conn, |tx| {
        let exists = tx
            .query_row(
                "SELECT 1 FROM subjects WHERE school_id = ? AND name = ?",
                (&caller.school_id, &name),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if exists {
            return Err(ServiceError::conflict("Subject with this name already exists"));
        }
        let id = new_id();
        tx.execute(
            "INSERT INTO subjects(id, school_id, name) VALUES(?, ?, ?)",
            (&id, &caller.school_id, &name),
        )?;
        Ok(NamedRef { id, name })
    })
}

pub fn list_subjects(conn: &Connection, caller: &Caller) -> ServiceResult<Vec<NamedRef>> {
    let mut stmt = conn.prepare(
        "SELECT id, name FROM subjects WHERE school_id = ? ORDER BY name COLLATE NOCASE, id",
    )?;
    let rows = stmt
        .query_map([&caller.school_id], |r| {
            Ok(NamedRef {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn subject_in_school(
    conn: &Connection,
    school_id: &str,
    subject_id: &str,
) -> ServiceResult<Option<NamedRef>> {
    Ok(conn
        .query_row(
            "SELECT id, name FROM subjects WHERE id = ? AND school_id = ?",
            (subject_id, school_id),
            |r| {
                Ok(NamedRef {
                    id: r.get(0)?,
                    name: r.get(1)?,
                })
            },
        )
        .optional()?)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentItem {
    pub id: String,
    pub name: String,
    pub roll: String,
    pub created_at: String,
    pub classroom: Option<NamedRef>,
}

pub fn create_student(
    conn: &Connection,
    caller: &Caller,
    name: &str,
    roll: &str,
) -> ServiceResult<StudentItem> {
    let name = required_text(name, "name")?;
    let roll = required_text(roll, "roll")?;
    let id = new_id();
    let created_at = now_stamp();
    conn.execute(
        "INSERT INTO students(id, school_id, name, roll, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &caller.school_id, &name, &roll, MEMBER_ACTIVE, &created_at),
    )?;
    tracing::info!(student_id = %id, school_id = %caller.school_id, "student created");
    Ok(StudentItem {
        id,
        name,
        roll,
        created_at,
        classroom: None,
    })
}

#[derive(Debug, Clone)]
pub struct StudentFilter {
    pub search: Option<String>,
    pub classroom_id: Option<String>,
    pub sort: Sort<StudentSort>,
    pub page: PageRequest,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPage {
    pub students: Vec<StudentItem>,
    pub total_students: u64,
}

pub fn list_students(
    conn: &Connection,
    caller: &Caller,
    filter: &StudentFilter,
) -> ServiceResult<StudentPage> {
    let pattern = filter.search.as_deref().map(like_pattern);
    let where_clause = "s.school_id = ?1 AND s.status = 'active'
           AND (?2 IS NULL OR s.name LIKE ?2 ESCAPE '\\')
           AND (?3 IS NULL OR EXISTS (
             SELECT 1 FROM classroom_students f
             WHERE f.student_id = s.id AND f.classroom_id = ?3))";

    let total_students: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM students s WHERE {where_clause}"),
        params![&caller.school_id, &pattern, &filter.classroom_id],
        |r| r.get(0),
    )?;

    let sql = format!(
        "SELECT s.id, s.name, s.roll, s.created_at, c.id, c.name
         FROM students s
         LEFT JOIN classrooms c ON c.id = (
           SELECT cs.classroom_id
           FROM classroom_students cs
           JOIN classrooms cc ON cc.id = cs.classroom_id
           WHERE cs.student_id = s.id AND cc.status = 'active'
           ORDER BY cc.name
           LIMIT 1)
         WHERE {where_clause}
         ORDER BY {}, s.id
         LIMIT ?4 OFFSET ?5",
        filter.sort.order_by()
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map(
            params![
                &caller.school_id,
                &pattern,
                &filter.classroom_id,
                filter.page.sql_limit(),
                filter.page.sql_offset()
            ],
            |r| {
                let classroom_id: Option<String> = r.get(4)?;
                let classroom_name: Option<String> = r.get(5)?;
                Ok(StudentItem {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    roll: r.get(2)?,
                    created_at: r.get(3)?,
                    classroom: classroom_id
                        .zip(classroom_name)
                        .map(|(id, name)| NamedRef { id, name }),
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StudentPage {
        students,
        total_students: total_students.max(0) as u64,
    })
}

/// Soft-deletes the student and drops their classroom memberships.
pub fn remove_student(conn: &Connection, caller: &Caller, student_id: &str) -> ServiceResult<()> {
    in_transaction(conn, |tx| {
        let updated = tx.execute(
            "UPDATE students SET status = ? WHERE id = ? AND school_id = ? AND status = ?",
            (MEMBER_REMOVED, student_id, &caller.school_id, MEMBER_ACTIVE),
        )?;
        if updated == 0 {
            return Err(ServiceError::not_found("Student not found"));
        }
        tx.execute(
            "DELETE FROM classroom_students WHERE student_id = ?",
            [student_id],
        )?;
        tracing::info!(%student_id, "student removed");
        Ok(())
    })
}

pub(crate) fn email_taken(conn: &Connection, email: &str) -> ServiceResult<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM users WHERE email = ?", [email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub(crate) fn required_text(raw: &str, field: &str) -> ServiceResult<String> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(ServiceError::validation(format!("{field} must not be empty")));
    }
    Ok(t.to_string())
}

pub(crate) fn normalize_email(raw: &str) -> ServiceResult<String> {
    let t = raw.trim().to_ascii_lowercase();
    let valid = match t.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        return Err(ServiceError::validation("Invalid email address"));
    }
    Ok(t)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::model::Role;

    pub fn school(conn: &Connection) -> Caller {
        let reg = register_school(
            conn,
            &RegisterSchool {
                name: "Maple Grove".into(),
                principal_name: "Dana Reyes".into(),
                principal_email: format!("principal-{}@maple.test", new_id()),
                principal_password: "secret-pass".into(),
            },
        )
        .expect("register school");
        Caller {
            school_id: reg.school_id,
            profile_id: reg.principal_id,
            role: Role::Principal,
        }
    }

    pub fn subject(conn: &Connection, caller: &Caller, name: &str) -> String {
        create_subject(conn, caller, name).expect("create subject").id
    }

    pub fn student(conn: &Connection, caller: &Caller, name: &str, roll: &str) -> String {
        create_student(conn, caller, name, roll)
            .expect("create student")
            .id
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;
    use crate::db::open_in_memory;
    use crate::query::{PageLimit, SortDir};

    fn filter(search: Option<&str>, classroom_id: Option<&str>) -> StudentFilter {
        StudentFilter {
            search: search.map(str::to_string),
            classroom_id: classroom_id.map(str::to_string),
            sort: Sort {
                field: StudentSort::Name,
                dir: SortDir::Asc,
            },
            page: PageRequest::new(1, PageLimit::Count(10)),
        }
    }

    #[test]
    fn duplicate_subject_names_conflict() {
        let conn = open_in_memory();
        let caller = fixtures::school(&conn);
        fixtures::subject(&conn, &caller, "Math");
        let e = create_subject(&conn, &caller, " Math ").expect_err("duplicate");
        assert_eq!(e.status(), 409);
        assert_eq!(list_subjects(&conn, &caller).expect("list").len(), 1);
    }

    #[test]
    fn duplicate_principal_email_conflicts() {
        let conn = open_in_memory();
        let input = RegisterSchool {
            name: "A".into(),
            principal_name: "P".into(),
            principal_email: "head@school.test".into(),
            principal_password: "pw".into(),
        };
        register_school(&conn, &input).expect("first");
        let e = register_school(
            &conn,
            &RegisterSchool {
                principal_email: "HEAD@school.test".into(),
                ..input
            },
        )
        .expect_err("second");
        assert_eq!(e.status(), 409);
        let schools: i64 = conn
            .query_row("SELECT COUNT(*) FROM schools", [], |r| r.get(0))
            .expect("count");
        assert_eq!(schools, 1);
    }

    #[test]
    fn list_students_filters_by_name_case_insensitively() {
        let conn = open_in_memory();
        let caller = fixtures::school(&conn);
        fixtures::student(&conn, &caller, "Anna Bell", "1");
        fixtures::student(&conn, &caller, "Ben Carr", "2");
        fixtures::student(&conn, &caller, "joANNa Dee", "3");

        let page = list_students(&conn, &caller, &filter(Some("anna"), None)).expect("list");
        let names: Vec<&str> = page.students.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Anna Bell", "joANNa Dee"]);
        assert_eq!(page.total_students, 2);
    }

    #[test]
    fn removed_students_disappear_from_listing() {
        let conn = open_in_memory();
        let caller = fixtures::school(&conn);
        let a = fixtures::student(&conn, &caller, "Anna", "1");
        fixtures::student(&conn, &caller, "Ben", "2");
        remove_student(&conn, &caller, &a).expect("remove");

        let page = list_students(&conn, &caller, &filter(None, None)).expect("list");
        assert_eq!(page.total_students, 1);
        assert_eq!(page.students[0].name, "Ben");

        let again = remove_student(&conn, &caller, &a).expect_err("already removed");
        assert_eq!(again.status(), 404);
    }

    #[test]
    fn email_validation() {
        assert_eq!(
            normalize_email(" Ada@School.Test ").expect("email"),
            "ada@school.test"
        );
        assert!(normalize_email("ada").is_err());
        assert!(normalize_email("@school.test").is_err());
        assert!(normalize_email("ada@localhost").is_err());
    }
}
