use bson::{Bson, Document as BsonDocument};
use std::cmp::Ordering;

use super::types::{CmpOp, Condition, Filter, MAX_PATH_DEPTH, Order, Predicate, SortSpec};
use crate::errors::DbError;

/// Evaluate a filter against a document.
///
/// Dotted paths descend through sub-documents and arrays of sub-documents;
/// equality and set membership also match individual array elements.
/// `$where` never matches here: it needs a store that can run expressions.
pub fn eval_filter(doc: &BsonDocument, filter: &Filter) -> bool {
    if filter.where_expr.is_some() {
        return false;
    }
    filter.fields.iter().all(|(path, pred)| eval_predicate(&resolve(doc, path), pred))
        && filter.and.iter().all(|f| eval_filter(doc, f))
        && (filter.or.is_empty() || filter.or.iter().any(|f| eval_filter(doc, f)))
}

/// True if the filter (or any operand) carries a `$where` expression.
pub fn uses_where(filter: &Filter) -> bool {
    filter.where_expr.is_some()
        || filter.and.iter().any(uses_where)
        || filter.or.iter().any(uses_where)
}

fn eval_predicate(vals: &[&Bson], pred: &Predicate) -> bool {
    match pred {
        Predicate::Value(v) => matches_eq(vals, v),
        Predicate::Ops(conds) => conds.iter().all(|c| eval_condition(vals, c)),
    }
}

fn eval_condition(vals: &[&Bson], cond: &Condition) -> bool {
    match cond {
        Condition::Cmp { op: CmpOp::Eq, value } => matches_eq(vals, value),
        Condition::Cmp { op: CmpOp::Ne, value } => !matches_eq(vals, value),
        Condition::Cmp { op, value } => leaves(vals).any(|v| {
            comparable(v, value).is_some_and(|ord| match op {
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::Gte => ord != Ordering::Less,
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Lte => ord != Ordering::Greater,
                CmpOp::Eq | CmpOp::Ne => false,
            })
        }),
        Condition::In(set) => set.iter().any(|s| matches_eq(vals, s)),
        Condition::Nin(set) => !set.iter().any(|s| matches_eq(vals, s)),
        Condition::Exists(exists) => vals.is_empty() != *exists,
        #[cfg(feature = "regex")]
        Condition::Regex { pattern, options } => {
            let mut re = regex::RegexBuilder::new(pattern);
            re.case_insensitive(options.contains('i'))
                .multi_line(options.contains('m'))
                .dot_matches_new_line(options.contains('s'))
                .ignore_whitespace(options.contains('x'));
            let Ok(re) = re.build() else {
                log::warn!("invalid regex pattern {pattern:?}");
                return false;
            };
            leaves(vals).any(|v| matches!(v, Bson::String(s) if re.is_match(s)))
        }
        #[cfg(not(feature = "regex"))]
        Condition::Regex { .. } => false,
    }
}

fn matches_eq(vals: &[&Bson], target: &Bson) -> bool {
    vals.iter().any(|v| bson_eq(v, target)) || leaves(vals).any(|v| bson_eq(v, target))
}

/// Candidate values plus the elements of array candidates.
fn leaves<'a>(vals: &'a [&'a Bson]) -> impl Iterator<Item = &'a Bson> + 'a {
    vals.iter().flat_map(|v| match v {
        Bson::Array(items) => items.iter().collect::<Vec<_>>(),
        other => vec![*other],
    })
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

#[allow(clippy::cast_precision_loss)]
fn as_f64_num(x: &Bson) -> f64 {
    match x {
        Bson::Int32(i) => f64::from(*i),
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        _ => f64::NAN,
    }
}

fn bson_eq(a: &Bson, b: &Bson) -> bool {
    if is_num(a) && is_num(b) {
        return as_f64_num(a) == as_f64_num(b);
    }
    a == b
}

/// Ordering between values of the same type bracket; `None` across brackets.
fn comparable(a: &Bson, b: &Bson) -> Option<Ordering> {
    if is_num(a) && is_num(b) {
        return Some(as_f64_num(a).total_cmp(&as_f64_num(b)));
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Resolve a dotted path to every value it reaches.
pub fn resolve<'a>(doc: &'a BsonDocument, path: &str) -> Vec<&'a Bson> {
    let segs: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if path.is_empty() || segs.len() > MAX_PATH_DEPTH {
        return out;
    }
    if let Some((head, rest)) = segs.split_first()
        && let Some(v) = doc.get(*head)
    {
        collect(v, rest, &mut out);
    }
    out
}

fn collect<'a>(value: &'a Bson, segs: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segs.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Bson::Document(d) => {
            if let Some(v) = d.get(*head) {
                collect(v, rest, out);
            }
        }
        Bson::Array(items) => {
            if let Ok(i) = head.parse::<usize>() {
                if let Some(v) = items.get(i) {
                    collect(v, rest, out);
                }
            } else {
                for item in items.iter().filter(|i| matches!(i, Bson::Document(_))) {
                    collect(item, segs, out);
                }
            }
        }
        _ => {}
    }
}

pub fn compare_docs(a: &BsonDocument, b: &BsonDocument, sort: &[SortSpec]) -> Ordering {
    for s in sort {
        let va = resolve(a, &s.field).into_iter().next();
        let vb = resolve(b, &s.field).into_iter().next();
        let ord = match (va, vb) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return if matches!(s.order, Order::Asc) { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

/// Total order used for sorting: by value within a type bracket, else by type rank.
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    comparable(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

fn type_rank(v: &Bson) -> u8 {
    use bson::Bson as T;
    match v {
        T::MinKey => 0,
        T::Null | T::Undefined => 1,
        T::Int32(_) | T::Int64(_) | T::Double(_) | T::Decimal128(_) => 2,
        T::String(_) | T::Symbol(_) => 3,
        T::Document(_) => 4,
        T::Array(_) => 5,
        T::Binary(_) => 6,
        T::ObjectId(_) => 7,
        T::Boolean(_) => 8,
        T::DateTime(_) => 9,
        T::Timestamp(_) => 10,
        T::RegularExpression(_) => 11,
        T::DbPointer(_) | T::JavaScriptCode(_) | T::JavaScriptCodeWithScope(_) => 12,
        T::MaxKey => 255,
    }
}

fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        _ => true,
    }
}

/// Apply a native inclusion/exclusion projection.
///
/// # Errors
/// Returns `StoreError` when inclusion and exclusion are mixed (other than `_id`).
pub fn apply_projection(doc: &BsonDocument, projection: &BsonDocument) -> Result<BsonDocument, DbError> {
    let keep_id = projection.get("_id").is_none_or(truthy);
    let (include, exclude): (Vec<_>, Vec<_>) =
        projection.iter().filter(|(k, _)| k.as_str() != "_id").partition(|(_, v)| truthy(v));
    if !include.is_empty() && !exclude.is_empty() {
        return Err(DbError::store("cannot mix inclusion and exclusion in a projection"));
    }
    let mut out = if include.is_empty() {
        let mut out = doc.clone();
        for (path, _) in &exclude {
            let segs: Vec<&str> = path.split('.').collect();
            remove_path(&mut out, &segs);
        }
        out
    } else {
        let mut out = BsonDocument::new();
        for (path, _) in &include {
            let segs: Vec<&str> = path.split('.').collect();
            copy_path(doc, &mut out, &segs);
        }
        if keep_id && let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
        out
    };
    if !keep_id {
        out.remove("_id");
    }
    Ok(out)
}

fn remove_path(doc: &mut BsonDocument, segs: &[&str]) {
    match segs {
        [] => {}
        [last] => {
            doc.remove(*last);
        }
        [head, rest @ ..] => match doc.get_mut(*head) {
            Some(Bson::Document(d)) => remove_path(d, rest),
            Some(Bson::Array(items)) => {
                for item in items {
                    if let Bson::Document(d) = item {
                        remove_path(d, rest);
                    }
                }
            }
            _ => {}
        },
    }
}

fn copy_path(src: &BsonDocument, dst: &mut BsonDocument, segs: &[&str]) {
    let Some((head, rest)) = segs.split_first() else { return };
    let Some(v) = src.get(*head) else { return };
    match (v, rest.is_empty()) {
        (Bson::Document(sub), false) => {
            if !matches!(dst.get(*head), Some(Bson::Document(_))) {
                dst.insert(*head, BsonDocument::new());
            }
            if let Some(Bson::Document(dsub)) = dst.get_mut(*head) {
                copy_path(sub, dsub, rest);
            }
        }
        (Bson::Array(items), false) => {
            // Document elements keep their position; scalars are dropped.
            if !matches!(dst.get(*head), Some(Bson::Array(_))) {
                let shells: Vec<Bson> =
                    items.iter().filter_map(Bson::as_document).map(|_| Bson::Document(BsonDocument::new())).collect();
                dst.insert(*head, shells);
            }
            if let Some(Bson::Array(out)) = dst.get_mut(*head) {
                for (sub, slot) in items.iter().filter_map(Bson::as_document).zip(out.iter_mut()) {
                    if let Bson::Document(dsub) = slot {
                        copy_path(sub, dsub, rest);
                    }
                }
            }
        }
        (_, true) => {
            dst.insert(*head, v.clone());
        }
        (_, false) => {}
    }
}
