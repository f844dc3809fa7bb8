use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Principal,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Principal => "principal",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

/// Identity of the authenticated caller, supplied by the front end with every
/// school-scoped request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub school_id: String,
    pub profile_id: String,
    pub role: Role,
}

impl Caller {
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ServiceError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "role {} may not perform this action",
                self.role.as_str()
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
            Weekday::Sunday => "Sunday",
        }
    }

    pub fn parse(s: &str) -> Option<Weekday> {
        Weekday::ALL
            .iter()
            .copied()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekStart {
    Sunday,
    Monday,
}

impl WeekStart {
    /// Inclusive first and last day of the calendar week containing `day`.
    pub fn bounds(self, day: NaiveDate) -> (NaiveDate, NaiveDate) {
        let offset = match self {
            WeekStart::Sunday => day.weekday().num_days_from_sunday(),
            WeekStart::Monday => day.weekday().num_days_from_monday(),
        };
        let start = day - Duration::days(i64::from(offset));
        (start, start + Duration::days(6))
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, ServiceError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ServiceError::validation("date must be YYYY-MM-DD"))
}

/// Validates a same-day `HH:mm` time. Stored as-is so that string order is time order.
pub fn parse_hhmm(raw: &str) -> Result<String, ServiceError> {
    let t = raw.trim();
    let bad = || ServiceError::validation(format!("time must be HH:mm, got {t:?}"));
    let (h, m) = t.split_once(':').ok_or_else(bad)?;
    if h.len() != 2 || m.len() != 2 {
        return Err(bad());
    }
    let hour: u32 = h.parse().map_err(|_| bad())?;
    let minute: u32 = m.parse().map_err(|_| bad())?;
    if hour > 23 || minute > 59 {
        return Err(bad());
    }
    Ok(t.to_string())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: String,
    pub name: String,
    pub school_id: String,
    pub mentor: Option<NamedRef>,
    pub status: String,
    pub created_at: String,
}

pub const CLASSROOM_ACTIVE: &str = "active";
pub const CLASSROOM_DELETED: &str = "deleted";
pub const MEMBER_ACTIVE: &str = "active";
pub const MEMBER_REMOVED: &str = "removed";
