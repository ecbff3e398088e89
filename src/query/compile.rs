//! Filter accumulation and rendering to the store's native predicate document.
//!
//! Merging is structural: field predicates union by path and then by operator,
//! sub-documents merge key by key, arrays concatenate, `$and`/`$or` operand lists
//! concatenate. Scalars with the same key are replaced by the later value.

use bson::{Bson, Document as BsonDocument};

use super::types::{Condition, Filter, Predicate};

fn deep_merge(into: &mut BsonDocument, from: BsonDocument) {
    for (k, v) in from {
        match (into.get_mut(&k), v) {
            (Some(Bson::Document(a)), Bson::Document(b)) => deep_merge(a, b),
            (Some(Bson::Array(a)), Bson::Array(b)) => a.extend(b),
            (_, v) => {
                into.insert(k, v);
            }
        }
    }
}

fn merge_condition(into: &mut Vec<Condition>, cond: Condition) {
    let Some(slot) = into.iter_mut().find(|c| c.operator() == cond.operator()) else {
        into.push(cond);
        return;
    };
    match (slot, cond) {
        (Condition::In(a), Condition::In(b)) | (Condition::Nin(a), Condition::Nin(b)) => {
            a.extend(b);
        }
        (slot, cond) => *slot = cond,
    }
}

fn merge_predicate(into: &mut Predicate, pred: Predicate) {
    match (into, pred) {
        (Predicate::Ops(a), Predicate::Ops(b)) => {
            for c in b {
                merge_condition(a, c);
            }
        }
        (Predicate::Value(Bson::Document(a)), Predicate::Value(Bson::Document(b))) => {
            deep_merge(a, b);
        }
        (Predicate::Value(Bson::Array(a)), Predicate::Value(Bson::Array(b))) => a.extend(b),
        (slot, pred) => *slot = pred,
    }
}

fn render_predicate(pred: &Predicate) -> Bson {
    let conds = match pred {
        Predicate::Value(v) => return v.clone(),
        Predicate::Ops(conds) => conds,
    };
    let mut out = BsonDocument::new();
    for c in conds {
        match c {
            Condition::Cmp { op, value } => {
                out.insert(op.operator(), value.clone());
            }
            Condition::In(values) => {
                out.insert("$in", values.clone());
            }
            Condition::Nin(values) => {
                out.insert("$nin", values.clone());
            }
            Condition::Exists(b) => {
                out.insert("$exists", *b);
            }
            Condition::Regex { pattern, options } => {
                out.insert("$regex", pattern.as_str());
                out.insert("$options", options.as_str());
            }
        }
    }
    Bson::Document(out)
}

impl Filter {
    /// Fold `other` into `self` under the structural merge rule.
    pub fn merge(&mut self, other: Filter) {
        for (path, pred) in other.fields {
            match self.fields.iter_mut().find(|(p, _)| *p == path) {
                Some((_, existing)) => merge_predicate(existing, pred),
                None => self.fields.push((path, pred)),
            }
        }
        self.and.extend(other.and);
        self.or.extend(other.or);
        if other.where_expr.is_some() {
            self.where_expr = other.where_expr;
        }
    }

    #[must_use]
    pub fn merged(mut self, other: Filter) -> Self {
        self.merge(other);
        self
    }

    /// Render with field paths as written.
    #[must_use]
    pub fn to_document(&self) -> BsonDocument {
        self.render(None)
    }

    /// Render with every field path namespaced under `prefix`.
    #[must_use]
    pub fn to_native(&self, prefix: &str) -> BsonDocument {
        self.render(Some(prefix))
    }

    fn render(&self, prefix: Option<&str>) -> BsonDocument {
        let mut out = BsonDocument::new();
        for (path, pred) in &self.fields {
            let key = match prefix {
                Some(p) => format!("{p}.{path}"),
                None => path.clone(),
            };
            out.insert(key, render_predicate(pred));
        }
        let operands = |fs: &[Filter]| -> Vec<Bson> {
            fs.iter().map(|f| Bson::Document(f.render(prefix))).collect()
        };
        if !self.and.is_empty() {
            out.insert("$and", operands(&self.and));
        }
        if !self.or.is_empty() {
            out.insert("$or", operands(&self.or));
        }
        if let Some(expr) = &self.where_expr {
            out.insert("$where", expr.as_str());
        }
        out
    }
}
