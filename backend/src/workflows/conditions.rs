// Workflow Conditions - evaluation of trigger and workflow conditions against an event payload

use serde_json::Value;
use verigrade_shared::{Condition, ConditionLogic, ConditionOperator, WorkflowCondition};

/// Resolve a dot-notation path (`invoice.customer.email`) inside a JSON payload
pub fn get_nested_value<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(json, |current, part| match current {
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => current.get(part),
    })
}

/// Numbers and numeric strings both compare numerically
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

fn string_test(field: Option<&Value>, expected: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
    match (field.and_then(Value::as_str), expected.as_str()) {
        (Some(s), Some(pattern)) => test(&s.to_lowercase(), &pattern.to_lowercase()),
        _ => false,
    }
}

fn numeric_test(field: Option<&Value>, expected: &Value, test: impl Fn(f64, f64) -> bool) -> bool {
    match (field.and_then(as_number), as_number(expected)) {
        (Some(v), Some(c)) => test(v, c),
        _ => false,
    }
}

fn contains(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        Some(Value::Array(items)) => items.iter().any(|item| loosely_equal(item, expected)),
        _ => string_test(field, expected, |s, p| s.contains(p)),
    }
}

fn in_list(field: Option<&Value>, expected: &Value) -> bool {
    match (field, expected.as_array()) {
        (Some(v), Some(items)) => items.iter().any(|item| loosely_equal(item, v)),
        _ => false,
    }
}

/// Evaluate one condition. String operators are case-insensitive; a missing field
/// only satisfies the negative operators and `is_empty`.
pub fn evaluate_condition(condition: &Condition, payload: &Value) -> bool {
    let field = get_nested_value(payload, &condition.field);
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Equals => field.is_some_and(|v| loosely_equal(v, expected)),
        ConditionOperator::NotEquals => !field.is_some_and(|v| loosely_equal(v, expected)),
        ConditionOperator::Contains => contains(field, expected),
        ConditionOperator::NotContains => !contains(field, expected),
        ConditionOperator::StartsWith => string_test(field, expected, |s, p| s.starts_with(p)),
        ConditionOperator::EndsWith => string_test(field, expected, |s, p| s.ends_with(p)),
        ConditionOperator::GreaterThan => numeric_test(field, expected, |v, c| v > c),
        ConditionOperator::GreaterThanOrEqual => numeric_test(field, expected, |v, c| v >= c),
        ConditionOperator::LessThan => numeric_test(field, expected, |v, c| v < c),
        ConditionOperator::LessThanOrEqual => numeric_test(field, expected, |v, c| v <= c),
        ConditionOperator::In => in_list(field, expected),
        ConditionOperator::NotIn => !in_list(field, expected),
        ConditionOperator::IsEmpty => is_empty(field),
        ConditionOperator::IsNotEmpty => !is_empty(field),
        ConditionOperator::Regex => match (field.and_then(Value::as_str), expected.as_str()) {
            (Some(s), Some(pattern)) => regex::Regex::new(pattern).is_ok_and(|re| re.is_match(s)),
            _ => false,
        },
    }
}

/// Trigger conditions are ANDed
pub fn all_conditions_hold(conditions: &[Condition], payload: &Value) -> bool {
    conditions.iter().all(|c| evaluate_condition(c, payload))
}

/// Workflow conditions fold left to right: each condition's `logic` joins it to the
/// result so far. The first condition's `logic` is ignored; an empty list holds.
pub fn workflow_conditions_hold(conditions: &[WorkflowCondition], payload: &Value) -> bool {
    let mut iter = conditions.iter();
    let Some(first) = iter.next() else {
        return true;
    };

    iter.fold(evaluate_condition(&first.as_condition(), payload), |acc, c| {
        let result = evaluate_condition(&c.as_condition(), payload);
        match c.logic {
            ConditionLogic::And => acc && result,
            ConditionLogic::Or => acc || result,
        }
    })
}
