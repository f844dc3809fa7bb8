use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::db::{in_transaction, new_id};
use crate::directory::subject_in_school;
use crate::error::{ServiceError, ServiceResult};
use crate::model::{parse_hhmm, Caller, NamedRef, Weekday};
use crate::roster::{active_teacher, require_classroom};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodView {
    pub id: String,
    pub start_time: String,
    pub end_time: String,
    pub classroom: NamedRef,
    pub subject: NamedRef,
    pub teacher: NamedRef,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayView {
    pub day: &'static str,
    pub periods: Vec<PeriodView>,
}

#[derive(Debug, Clone)]
pub struct NewPeriod {
    pub subject_id: String,
    pub teacher_id: String,
    pub start_time: String,
    pub end_time: String,
}

/// One empty timetable per weekday. Runs inside the caller's transaction.
pub fn seed_week(conn: &Connection, classroom_id: &str) -> ServiceResult<()> {
    let mut stmt =
        conn.prepare("INSERT INTO timetables(id, classroom_id, day) VALUES(?, ?, ?)")?;
    for day in Weekday::ALL {
        stmt.execute((new_id(), classroom_id, day.as_str()))?;
    }
    Ok(())
}

/// Period rows with their names resolved. `period_from_row` reads columns 0-8; the
/// timetable day is column 9.
pub(crate) const PERIOD_SELECT: &str = "SELECT p.id, p.start_time, p.end_time,
       c.id, c.name, s.id, s.name, t.id, t.name, tt.day
     FROM periods p
     JOIN timetables tt ON tt.id = p.timetable_id
     JOIN classrooms c ON c.id = p.classroom_id
     JOIN subjects s ON s.id = p.subject_id
     JOIN teachers t ON t.id = p.teacher_id";

pub(crate) fn period_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<PeriodView> {
    Ok(PeriodView {
        id: r.get(0)?,
        start_time: r.get(1)?,
        end_time: r.get(2)?,
        classroom: NamedRef {
            id: r.get(3)?,
            name: r.get(4)?,
        },
        subject: NamedRef {
            id: r.get(5)?,
            name: r.get(6)?,
        },
        teacher: NamedRef {
            id: r.get(7)?,
            name: r.get(8)?,
        },
    })
}

fn day_periods(conn: &Connection, classroom_id: &str, day: Weekday) -> ServiceResult<Vec<PeriodView>> {
    let mut stmt = conn.prepare(&format!(
        "{PERIOD_SELECT}
         WHERE tt.classroom_id = ? AND tt.day = ?
         ORDER BY p.start_time, p.position"
    ))?;
    let rows = stmt
        .query_map((classroom_id, day.as_str()), period_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_timetable(conn: &Connection, caller: &Caller, classroom_id: &str) -> ServiceResult<Vec<DayView>> {
    let classroom = require_classroom(conn, caller, classroom_id)?;
    Weekday::ALL
        .iter()
        .map(|&day| -> ServiceResult<DayView> {
            Ok(DayView {
                day: day.as_str(),
                periods: day_periods(conn, &classroom.id, day)?,
            })
        })
        .collect()
}

fn validate_periods(periods: &[NewPeriod]) -> ServiceResult<Vec<(String, String)>> {
    let mut slots = Vec::with_capacity(periods.len());
    for p in periods {
        let start = parse_hhmm(&p.start_time)?;
        let end = parse_hhmm(&p.end_time)?;
        if start >= end {
            return Err(ServiceError::validation(format!(
                "period must end after it starts ({start} - {end})"
            )));
        }
        slots.push((start, end));
    }

    let mut sorted = slots.clone();
    sorted.sort();
    for pair in sorted.windows(2) {
        if pair[0].1 > pair[1].0 {
            return Err(ServiceError::validation(format!(
                "periods overlap ({} - {} and {} - {})",
                pair[0].0, pair[0].1, pair[1].0, pair[1].1
            )));
        }
    }
    Ok(slots)
}

/// Replaces every period of one classroom day.
pub fn set_periods(
    conn: &Connection,
    caller: &Caller,
    classroom_id: &str,
    day: Weekday,
    periods: &[NewPeriod],
) -> ServiceResult<DayView> {
    let slots = validate_periods(periods)?;

    in_transaction(conn, |tx| {
        let classroom = require_classroom(tx, caller, classroom_id)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM timetables WHERE classroom_id = ? AND day = ?",
                (&classroom.id, day.as_str()),
                |r| r.get(0),
            )
            .optional()?;
        let timetable_id = match existing {
            Some(id) => id,
            None => {
                let id = new_id();
                tx.execute(
                    "INSERT INTO timetables(id, classroom_id, day) VALUES(?, ?, ?)",
                    (&id, &classroom.id, day.as_str()),
                )?;
                id
            }
        };

        tx.execute("DELETE FROM periods WHERE timetable_id = ?", [&timetable_id])?;

        let mut insert = tx.prepare(
            "INSERT INTO periods(id, timetable_id, classroom_id, subject_id, teacher_id, start_time, end_time, position)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for (position, (p, (start, end))) in periods.iter().zip(&slots).enumerate() {
            if subject_in_school(tx, &caller.school_id, &p.subject_id)?.is_none() {
                return Err(ServiceError::not_found("Subject not found"));
            }
            if active_teacher(tx, &caller.school_id, &p.teacher_id)?.is_none() {
                return Err(ServiceError::not_found("Teacher not found"));
            }
            insert.execute((
                new_id(),
                &timetable_id,
                &classroom.id,
                &p.subject_id,
                &p.teacher_id,
                start,
                end,
                position as i64,
            ))?;
        }

        tracing::info!(classroom_id = %classroom.id, day = day.as_str(), periods = periods.len(), "timetable day replaced");
        Ok(DayView {
            day: day.as_str(),
            periods: day_periods(tx, &classroom.id, day)?,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::directory::fixtures;
    use crate::roster::create_classroom;
    use crate::teachers::{create_teacher, NewTeacher};

    fn period(subject: &str, teacher: &str, start: &str, end: &str) -> NewPeriod {
        NewPeriod {
            subject_id: subject.to_string(),
            teacher_id: teacher.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
        }
    }

    #[test]
    fn set_periods_orders_by_start_time() {
        let conn = open_in_memory();
        let caller = fixtures::school(&conn);
        let math = fixtures::subject(&conn, &caller, "Math");
        let teacher = create_teacher(
            &conn,
            &caller,
            &NewTeacher {
                name: "Ada".into(),
                email: "ada@maple.test".into(),
                subject_id: math.clone(),
            },
        )
        .expect("teacher")
        .teacher_id;
        let c = create_classroom(&conn, &caller, "A", &[math.clone()]).expect("classroom");

        let day = set_periods(
            &conn,
            &caller,
            &c.id,
            Weekday::Tuesday,
            &[
                period(&math, &teacher, "10:00", "10:45"),
                period(&math, &teacher, "08:00", "08:45"),
            ],
        )
        .expect("set periods");
        let starts: Vec<&str> = day.periods.iter().map(|p| p.start_time.as_str()).collect();
        assert_eq!(starts, vec!["08:00", "10:00"]);
        assert_eq!(day.periods[0].teacher.name, "Ada");

        let week = get_timetable(&conn, &caller, &c.id).expect("timetable");
        assert_eq!(week.len(), 7);
        assert_eq!(week[0].day, "Monday");
        assert_eq!(week[1].periods.len(), 2);
        assert!(week.iter().enumerate().all(|(i, d)| i == 1 || d.periods.is_empty()));

        // Replacing the day drops the old periods.
        let day = set_periods(&conn, &caller, &c.id, Weekday::Tuesday, &[]).expect("clear");
        assert!(day.periods.is_empty());
    }

    #[test]
    fn rejects_bad_slots() {
        let slot = |s: &str, e: &str| period("s", "t", s, e);
        assert!(validate_periods(&[slot("09:00", "08:00")]).is_err());
        assert!(validate_periods(&[slot("09:00", "09:00")]).is_err());
        assert!(validate_periods(&[slot("9:00", "10:00")]).is_err());
        assert!(validate_periods(&[slot("08:00", "09:00"), slot("08:30", "09:30")]).is_err());
        assert!(validate_periods(&[slot("08:00", "09:00"), slot("09:00", "10:00")]).is_ok());
    }

    #[test]
    fn unknown_teacher_rolls_back_day() {
        let conn = open_in_memory();
        let caller = fixtures::school(&conn);
        let math = fixtures::subject(&conn, &caller, "Math");
        let c = create_classroom(&conn, &caller, "A", &[]).expect("classroom");
        let e = set_periods(
            &conn,
            &caller,
            &c.id,
            Weekday::Monday,
            &[period(&math, "ghost", "08:00", "09:00")],
        )
        .expect_err("ghost teacher");
        assert_eq!(e.status(), 404);
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM periods", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 0);
    }
}
