use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::Reply;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{caller, required_list, required_str, ANY_ROLE, PRINCIPAL};
use crate::ipc::types::{AppState, Ctx, Request};
use crate::model::Weekday;
use crate::timetable::{self, NewPeriod};

fn get(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, ANY_ROLE)?;
    let classroom_id = required_str(params, "classroomId")?;
    let days = timetable::get_timetable(ctx.conn, &caller, &classroom_id)?;
    Ok(Reply::ok("Timetable fetched", json!({ "timetable": days })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeriodParams {
    subject_id: String,
    teacher_id: String,
    start_time: String,
    end_time: String,
}

fn set_periods(ctx: &Ctx<'_>, params: &Value) -> ServiceResult<Reply> {
    let caller = caller(params, PRINCIPAL)?;
    let classroom_id = required_str(params, "classroomId")?;
    let raw_day = required_str(params, "day")?;
    let day = Weekday::parse(&raw_day)
        .ok_or_else(|| ServiceError::validation(format!("unknown day {raw_day:?}")))?;
    let periods: Vec<PeriodParams> = required_list(params, "periods")?;
    let periods: Vec<NewPeriod> = periods
        .into_iter()
        .map(|p| NewPeriod {
            subject_id: p.subject_id,
            teacher_id: p.teacher_id,
            start_time: p.start_time,
            end_time: p.end_time,
        })
        .collect();

    let day = timetable::set_periods(ctx.conn, &caller, &classroom_id, day, &periods)?;
    Ok(Reply::ok("Timetable updated successfully", json!({ "day": day })).shown())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.get" => Some(with_db(state, req, get)),
        "timetable.setPeriods" => Some(with_db(state, req, set_periods)),
        _ => None,
    }
}
