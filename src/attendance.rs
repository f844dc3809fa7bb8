//! Attendance taking and the read-side aggregations built on it: a teacher's weekly
//! schedule with attendance-taken flags, and per-student attendance percentages for one
//! classroom subject.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::db::{in_transaction, new_id, now_stamp};
use crate::directory::subject_in_school;
use crate::error::{ServiceError, ServiceResult};
use crate::model::{parse_date, Caller, NamedRef, Role, WeekStart, Weekday, MEMBER_ACTIVE};
use crate::query::{like_pattern, PageRequest, Sort, StudentSort};
use crate::roster::{active_teacher, require_classroom};
use crate::teachers::teacher_subject;
use crate::timetable::{period_from_row, PeriodView, PERIOD_SELECT};

pub const PRESENT: &str = "present";
pub const ABSENT: &str = "absent";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPeriod {
    #[serde(flatten)]
    pub period: PeriodView,
    pub attendance_taken: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherSchedule {
    pub teacher: NamedRef,
    pub week_start: String,
    pub week_end: String,
    /// Days that have at least one period, in week order.
    pub days: Vec<&'static str>,
    pub schedule: BTreeMap<&'static str, Vec<ScheduledPeriod>>,
}

fn week_order(start: WeekStart) -> Vec<Weekday> {
    let mut days = Weekday::ALL.to_vec();
    if start == WeekStart::Sunday {
        days.rotate_right(1);
    }
    days
}

pub fn get_teacher_schedule(
    conn: &Connection,
    caller: &Caller,
    teacher_id: Option<&str>,
    as_of: NaiveDate,
    week_start: WeekStart,
) -> ServiceResult<TeacherSchedule> {
    // Teachers only ever see their own week.
    let teacher_id = match (caller.role, teacher_id) {
        (Role::Teacher, _) => caller.profile_id.as_str(),
        (_, Some(id)) => id,
        (_, None) => return Err(ServiceError::validation("missing teacherId")),
    };
    let teacher = active_teacher(conn, &caller.school_id, teacher_id)?
        .ok_or_else(|| ServiceError::not_found("Teacher not found"))?;
    let (from, to) = week_start.bounds(as_of);
    let (from, to) = (from.to_string(), to.to_string());

    let mut stmt = conn.prepare(&format!(
        "{PERIOD_SELECT}
         WHERE p.teacher_id = ? AND c.school_id = ? AND c.status = 'active'
         ORDER BY p.start_time, p.position"
    ))?;
    let rows = stmt
        .query_map((&teacher.id, &caller.school_id), |r| {
            Ok((period_from_row(r)?, r.get::<_, String>(9)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut taken = conn.prepare(
        "SELECT 1 FROM attendance_records WHERE period_id = ? AND date BETWEEN ? AND ? LIMIT 1",
    )?;
    let mut by_day: BTreeMap<Weekday, Vec<ScheduledPeriod>> = BTreeMap::new();
    for (period, day) in rows {
        let Some(day) = Weekday::parse(&day) else {
            tracing::warn!(period_id = %period.id, day = %day, "skipping period with unknown day");
            continue;
        };
        let attendance_taken = taken
            .query_row((&period.id, &from, &to), |r| r.get::<_, i64>(0))
            .optional()?
            .is_some();
        by_day.entry(day).or_default().push(ScheduledPeriod {
            period,
            attendance_taken,
        });
    }

    let days = week_order(week_start)
        .into_iter()
        .filter(|d| by_day.contains_key(d))
        .map(Weekday::as_str)
        .collect();
    let schedule = by_day
        .into_iter()
        .map(|(day, periods)| (day.as_str(), periods))
        .collect();

    Ok(TeacherSchedule {
        teacher,
        week_start: from,
        week_end: to,
        days,
        schedule,
    })
}

#[derive(Debug, Clone)]
pub struct SubjectAttendanceQuery {
    pub classroom_id: String,
    pub subject_id: Option<String>,
    pub search: Option<String>,
    pub sort: Sort<StudentSort>,
    pub page: PageRequest,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendance {
    pub student_id: String,
    pub name: String,
    pub roll: String,
    pub present_count: u64,
    pub percentage: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAttendance {
    pub attendance_data: Vec<StudentAttendance>,
    pub total_classes: u64,
    pub total_items: u64,
    pub current_page: u32,
    pub total_pages: u64,
    pub classroom: NamedRef,
    pub subject: NamedRef,
}

pub fn percentage(present: u64, total: u64) -> String {
    if total == 0 {
        return "0.00".to_string();
    }
    // Hundredths of a percent, ties rounded up.
    let hundredths = (present * 20_000 + total) / (2 * total);
    format!("{}.{:02}", hundredths / 100, hundredths % 100)
}

pub fn get_subject_attendance(
    conn: &Connection,
    caller: &Caller,
    query: &SubjectAttendanceQuery,
) -> ServiceResult<SubjectAttendance> {
    let classroom = require_classroom(conn, caller, &query.classroom_id)?;
    let subject_id = match (&query.subject_id, caller.role) {
        (Some(id), _) => id.clone(),
        (None, Role::Teacher) => teacher_subject(conn, caller, &caller.profile_id)?
            .ok_or_else(|| ServiceError::not_found("Teacher not found"))?,
        (None, _) => return Err(ServiceError::validation("missing subjectId")),
    };
    let subject = subject_in_school(conn, &caller.school_id, &subject_id)?
        .ok_or_else(|| ServiceError::not_found("Subject not found"))?;
    let pattern = query.search.as_deref().map(like_pattern);

    let from_where = "FROM students s
         JOIN classroom_students cs ON cs.student_id = s.id
         WHERE cs.classroom_id = ?1 AND s.school_id = ?2 AND s.status = ?3
           AND (?4 IS NULL OR s.name LIKE ?4 ESCAPE '\\')";

    let total_items: i64 = conn.query_row(
        &format!("SELECT COUNT(*) {from_where}"),
        params![&classroom.id, &caller.school_id, MEMBER_ACTIVE, &pattern],
        |r| r.get(0),
    )?;
    let total_classes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM attendance_records WHERE classroom_id = ? AND subject_id = ?",
        (&classroom.id, &subject.id),
        |r| r.get(0),
    )?;
    let total_classes = total_classes.max(0) as u64;

    let sql = format!(
        "SELECT s.id, s.name, s.roll,
                (SELECT COUNT(*) FROM student_attendance sa
                 JOIN attendance_records ar ON ar.id = sa.attendance_id
                 WHERE sa.student_id = s.id AND ar.classroom_id = ?1 AND ar.subject_id = ?5
                   AND sa.status = '{PRESENT}')
         {from_where}
         ORDER BY {}, s.id
         LIMIT ?6 OFFSET ?7",
        query.sort.order_by()
    );
    let mut stmt = conn.prepare(&sql)?;
    let attendance_data = stmt
        .query_map(
            params![
                &classroom.id,
                &caller.school_id,
                MEMBER_ACTIVE,
                &pattern,
                &subject.id,
                query.page.sql_limit(),
                query.page.sql_offset()
            ],
            |r| {
                let present: i64 = r.get(3)?;
                let present = present.max(0) as u64;
                Ok(StudentAttendance {
                    student_id: r.get(0)?,
                    name: r.get(1)?,
                    roll: r.get(2)?,
                    present_count: present,
                    percentage: percentage(present, total_classes),
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let total_items = total_items.max(0) as u64;
    Ok(SubjectAttendance {
        attendance_data,
        total_classes,
        total_items,
        current_page: query.page.page,
        total_pages: query.page.total_pages(total_items),
        classroom: NamedRef {
            id: classroom.id,
            name: classroom.name,
        },
        subject,
    })
}

#[derive(Debug, Clone)]
pub struct AttendanceEntry {
    pub student_id: String,
    pub present: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TakenAttendance {
    pub attendance_id: String,
    pub classroom: NamedRef,
    pub subject: NamedRef,
    pub period_id: String,
    pub date: String,
    pub present: usize,
    pub absent: usize,
}

pub fn take_attendance(
    conn: &Connection,
    caller: &Caller,
    period_id: &str,
    date: &str,
    entries: &[AttendanceEntry],
) -> ServiceResult<TakenAttendance> {
    let date = parse_date(date)?.to_string();
    if entries.is_empty() {
        return Err(ServiceError::validation("entries must not be empty"));
    }
    let mut seen = HashSet::new();
    for e in entries {
        if !seen.insert(e.student_id.as_str()) {
            return Err(ServiceError::Validation {
                message: "Student listed more than once".to_string(),
                details: Some(serde_json::json!({ "studentId": e.student_id })),
            });
        }
    }

    in_transaction(conn, |tx| {
        let (classroom, subject) = tx
            .query_row(
                "SELECT c.id, c.name, s.id, s.name
                 FROM periods p
                 JOIN classrooms c ON c.id = p.classroom_id
                 JOIN subjects s ON s.id = p.subject_id
                 WHERE p.id = ? AND c.school_id = ? AND c.status = 'active'",
                (period_id, &caller.school_id),
                |r| {
                    Ok((
                        NamedRef {
                            id: r.get(0)?,
                            name: r.get(1)?,
                        },
                        NamedRef {
                            id: r.get(2)?,
                            name: r.get(3)?,
                        },
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| ServiceError::not_found("Period not found"))?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM attendance_records WHERE period_id = ? AND date = ?",
                (period_id, &date),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if exists {
            return Err(ServiceError::conflict(
                "Attendance already taken for this period",
            ));
        }

        let mut member = tx.prepare(
            "SELECT 1 FROM classroom_students cs
             JOIN students s ON s.id = cs.student_id
             WHERE cs.classroom_id = ? AND cs.student_id = ? AND s.status = ?",
        )?;
        for e in entries {
            let found = member
                .query_row((&classroom.id, &e.student_id, MEMBER_ACTIVE), |r| {
                    r.get::<_, i64>(0)
                })
                .optional()?
                .is_some();
            if !found {
                return Err(ServiceError::NotFound {
                    message: "Student not found in classroom".to_string(),
                    details: Some(serde_json::json!({ "studentId": e.student_id })),
                });
            }
        }

        let attendance_id = new_id();
        tx.execute(
            "INSERT INTO attendance_records(id, classroom_id, subject_id, period_id, date, taken_by, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &attendance_id,
                &classroom.id,
                &subject.id,
                period_id,
                &date,
                &caller.profile_id,
                now_stamp(),
            ),
        )?;
        let mut insert = tx.prepare(
            "INSERT INTO student_attendance(id, attendance_id, student_id, status) VALUES(?, ?, ?, ?)",
        )?;
        for e in entries {
            let status = if e.present { PRESENT } else { ABSENT };
            insert.execute((new_id(), &attendance_id, &e.student_id, status))?;
        }

        let present = entries.iter().filter(|e| e.present).count();
        tracing::info!(
            attendance_id = %attendance_id,
            classroom_id = %classroom.id,
            date = %date,
            present,
            "attendance taken"
        );
        Ok(TakenAttendance {
            attendance_id,
            classroom,
            subject,
            period_id: period_id.to_string(),
            date,
            present,
            absent: entries.len() - present,
        })
    })
}

/// Classrooms in which the calling teacher has taken attendance at least once.
pub fn attendance_classes(conn: &Connection, caller: &Caller) -> ServiceResult<Vec<NamedRef>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT c.id, c.name
         FROM attendance_records ar
         JOIN classrooms c ON c.id = ar.classroom_id
         WHERE ar.taken_by = ? AND c.school_id = ? AND c.status = 'active'
         ORDER BY c.name COLLATE NOCASE",
    )?;
    let rows = stmt
        .query_map((&caller.profile_id, &caller.school_id), |r| {
            Ok(NamedRef {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
