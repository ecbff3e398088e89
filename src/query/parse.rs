use crate::errors::DbError;
use bson::{Bson, Document as BsonDocument};

use super::types::{CmpOp, Condition, Filter, Predicate};

fn parse_operands(key: &str, value: &Bson) -> Result<Vec<Filter>, DbError> {
    let Bson::Array(items) = value else {
        return Err(DbError::invalid(format!("{key} requires an array of predicates")));
    };
    if items.is_empty() {
        return Err(DbError::invalid(format!("{key} requires a non-empty array")));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => parse_filter(d),
            _ => Err(DbError::invalid(format!("{key} operands must be documents"))),
        })
        .collect()
}

fn parse_condition(field: &str, op: &str, value: &Bson) -> Result<Condition, DbError> {
    let cmp = |op: CmpOp| -> Result<Condition, DbError> {
        Ok(Condition::Cmp { op, value: value.clone() })
    };
    let array = |v: &Bson| match v {
        Bson::Array(a) => Ok(a.clone()),
        _ => Err(DbError::invalid(format!("{op} on '{field}' requires an array"))),
    };
    match op {
        "$eq" => cmp(CmpOp::Eq),
        "$ne" => cmp(CmpOp::Ne),
        "$gt" => cmp(CmpOp::Gt),
        "$gte" => cmp(CmpOp::Gte),
        "$lt" => cmp(CmpOp::Lt),
        "$lte" => cmp(CmpOp::Lte),
        "$in" => Ok(Condition::In(array(value)?)),
        "$nin" => Ok(Condition::Nin(array(value)?)),
        "$exists" => match value {
            Bson::Boolean(b) => Ok(Condition::Exists(*b)),
            Bson::Int32(i) => Ok(Condition::Exists(*i != 0)),
            Bson::Int64(i) => Ok(Condition::Exists(*i != 0)),
            _ => Err(DbError::invalid(format!("$exists on '{field}' requires a boolean"))),
        },
        "$regex" => match value {
            Bson::String(pattern) => {
                Ok(Condition::Regex { pattern: pattern.clone(), options: String::new() })
            }
            _ => Err(DbError::invalid(format!("$regex on '{field}' requires a string"))),
        },
        other => Err(DbError::invalid(format!("unsupported operator {other} on '{field}'"))),
    }
}

fn parse_predicate(field: &str, value: &Bson) -> Result<Predicate, DbError> {
    let ops = match value {
        Bson::Document(d) if !d.is_empty() && d.keys().all(|k| k.starts_with('$')) => d,
        other => return Ok(Predicate::Value(other.clone())),
    };
    let options = match ops.get("$options") {
        None => None,
        Some(Bson::String(s)) => Some(s.clone()),
        Some(_) => return Err(DbError::invalid(format!("$options on '{field}' must be a string"))),
    };
    let mut conditions = Vec::with_capacity(ops.len());
    for (op, v) in ops {
        if op == "$options" {
            continue;
        }
        let mut cond = parse_condition(field, op, v)?;
        if let (Condition::Regex { options: o, .. }, Some(opts)) = (&mut cond, &options) {
            o.clone_from(opts);
        }
        conditions.push(cond);
    }
    if conditions.is_empty() {
        return Err(DbError::invalid(format!("$options on '{field}' requires $regex")));
    }
    Ok(Predicate::Ops(conditions))
}

/// Parse a native predicate document (`{field: cond, $and: [..], $or: [..]}`).
///
/// # Errors
/// Returns `InvalidArgument` on unknown operators or malformed operands.
pub fn parse_filter(doc: &BsonDocument) -> Result<Filter, DbError> {
    let mut filter = Filter::default();
    for (key, value) in doc {
        match key.as_str() {
            "$and" => filter.and.extend(parse_operands(key, value)?),
            "$or" => filter.or.extend(parse_operands(key, value)?),
            "$where" => match value {
                Bson::String(s) | Bson::JavaScriptCode(s) => filter.where_expr = Some(s.clone()),
                _ => return Err(DbError::invalid("$where requires a string expression")),
            },
            k if k.starts_with('$') => {
                return Err(DbError::invalid(format!("unsupported top-level operator {k}")));
            }
            k if k.is_empty() => return Err(DbError::invalid("empty field name in predicate")),
            _ => filter.fields.push((key.clone(), parse_predicate(key, value)?)),
        }
    }
    Ok(filter)
}

/// Plain JSON to BSON; `$`-keys stay ordinary keys (no extended-JSON decoding).
fn json_to_bson(value: serde_json::Value) -> Bson {
    use serde_json::Value as J;
    match value {
        J::Null => Bson::Null,
        J::Bool(b) => Bson::Boolean(b),
        J::Number(n) => match n.as_i64() {
            Some(i) => i32::try_from(i).map_or(Bson::Int64(i), Bson::Int32),
            None => Bson::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        J::String(s) => Bson::String(s),
        J::Array(items) => Bson::Array(items.into_iter().map(json_to_bson).collect()),
        J::Object(map) => {
            Bson::Document(map.into_iter().map(|(k, v)| (k, json_to_bson(v))).collect())
        }
    }
}

/// # Errors
/// Returns an error if the JSON string is not an object or is not a valid predicate.
pub fn parse_filter_json(json: &str) -> Result<Filter, DbError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let Bson::Document(doc) = json_to_bson(value) else {
        return Err(DbError::invalid("predicate JSON must be an object"));
    };
    parse_filter(&doc)
}
