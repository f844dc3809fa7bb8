//! Typed extraction of request parameters. Every failure is a `bad_params` validation
//! error naming the offending key.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ServiceError, ServiceResult};
use crate::model::{Caller, Role};
use crate::query::{PageLimit, PageRequest, Sort, SortDir, SortField};

pub const ANY_ROLE: &[Role] = &[Role::Principal, Role::Teacher, Role::Student];
pub const PRINCIPAL: &[Role] = &[Role::Principal];
pub const TEACHER: &[Role] = &[Role::Teacher];
pub const STAFF: &[Role] = &[Role::Principal, Role::Teacher];

pub fn required_str(params: &Value, key: &str) -> ServiceResult<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ServiceError::validation(format!("missing {key}")))
}

pub fn optional_str(params: &Value, key: &str) -> ServiceResult<Option<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ServiceError::validation(format!("{key} must be a string"))),
    }
}

/// `None` when the key is absent or null. Callers decide what an empty array means.
pub fn optional_str_list(params: &Value, key: &str) -> ServiceResult<Option<Vec<String>>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ServiceError::validation(format!("{key} must contain strings")))
            })
            .collect::<ServiceResult<Vec<_>>>()
            .map(Some),
        Some(_) => Err(ServiceError::validation(format!("{key} must be an array"))),
    }
}

pub fn required_list<T: DeserializeOwned>(params: &Value, key: &str) -> ServiceResult<Vec<T>> {
    let raw = params
        .get(key)
        .ok_or_else(|| ServiceError::validation(format!("missing {key}")))?;
    serde_json::from_value(raw.clone())
        .map_err(|e| ServiceError::validation(format!("invalid {key}: {e}")))
}

pub fn caller(params: &Value, allowed: &[Role]) -> ServiceResult<Caller> {
    let raw = params
        .get("caller")
        .ok_or_else(|| ServiceError::validation("missing caller"))?;
    let caller: Caller = serde_json::from_value(raw.clone())
        .map_err(|e| ServiceError::validation(format!("invalid caller: {e}")))?;
    caller.require_role(allowed)?;
    Ok(caller)
}

/// `page` defaults to 1; `limit` is a positive number or `"all"`.
pub fn page(params: &Value, default_limit: u32) -> ServiceResult<PageRequest> {
    let page = match params.get("page") {
        None | Some(Value::Null) => 1,
        Some(v) => as_int(v).ok_or_else(|| ServiceError::validation("page must be a number"))?,
    };
    let limit = match params.get("limit") {
        None | Some(Value::Null) => PageLimit::Count(default_limit),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("all") => PageLimit::All,
        Some(v) => match as_int(v) {
            Some(n) if n >= 1 => PageLimit::Count(u32::try_from(n).unwrap_or(u32::MAX)),
            _ => {
                return Err(ServiceError::validation(
                    "limit must be a positive number or \"all\"",
                ))
            }
        },
    };
    Ok(PageRequest::new(page, limit))
}

fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn sort<F: SortField>(params: &Value, default: Sort<F>) -> ServiceResult<Sort<F>> {
    let field = match optional_str(params, "sortField")? {
        Some(raw) => F::parse(&raw)?,
        None => default.field,
    };
    let dir_raw = optional_str(params, "sortOrder")?;
    let dir = SortDir::parse(dir_raw.as_deref(), default.dir)?;
    Ok(Sort { field, dir })
}
