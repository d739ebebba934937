//! Readiness evaluation for composed resources.
//!
//! Precedence: a function's explicit ready assertion wins; otherwise the
//! composition's declared checks for that resource; otherwise the standard
//! `Ready` status condition.

use serde_json::Value;
use weft_api::condition::TYPE_READY;
use weft_api::{Condition, ConditionStatus, DynamicObject, ReadinessCheck, ReadinessCheckType};

/// Whether a composed resource counts as ready.
pub fn is_ready(
    object: &DynamicObject,
    asserted: Option<bool>,
    checks: Option<&[ReadinessCheck]>,
) -> bool {
    if let Some(ready) = asserted {
        return ready;
    }
    if let Some(checks) = checks {
        if !checks.is_empty() {
            return checks.iter().all(|check| evaluate(object, check));
        }
    }
    standard_ready(object)
}

fn standard_ready(object: &DynamicObject) -> bool {
    let conditions: Vec<Condition> = object.get_at("status.conditions").unwrap_or_default();
    conditions
        .iter()
        .any(|c| c.type_ == TYPE_READY && c.status == ConditionStatus::True)
}

fn evaluate(object: &DynamicObject, check: &ReadinessCheck) -> bool {
    let field = check
        .field_path
        .as_deref()
        .and_then(|path| object.value_at(path));

    match check.type_ {
        ReadinessCheckType::NonEmpty => match field {
            Some(Value::Null) | None => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        },
        ReadinessCheckType::MatchString => match (field, &check.match_string) {
            (Some(Value::String(actual)), Some(expected)) => actual == expected,
            _ => false,
        },
        ReadinessCheckType::MatchInteger => match (field.and_then(Value::as_i64), check.match_integer) {
            (Some(actual), Some(expected)) => actual == expected,
            _ => false,
        },
        ReadinessCheckType::MatchTrue => field == Some(&Value::Bool(true)),
        ReadinessCheckType::MatchFalse => field == Some(&Value::Bool(false)),
        ReadinessCheckType::MatchFieldValue => match (&field, &check.match_field_value) {
            (Some(actual), Some(expected)) => *actual == expected,
            _ => false,
        },
        ReadinessCheckType::MatchCondition => {
            let Some(expected) = &check.match_condition else {
                return false;
            };
            let conditions: Vec<Condition> =
                object.get_at("status.conditions").unwrap_or_default();
            conditions
                .iter()
                .any(|c| c.type_ == expected.type_ && c.status == expected.status)
        }
    }
}
