use bson::{Bson, Document as BsonDocument};
use serde::{Deserialize, Serialize};

// Safety limit for dotted path traversal
pub(crate) const MAX_PATH_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

/// Options handed to [`crate::store::Store::find`].
///
/// Semantics:
/// - `projection` is a native inclusion or exclusion map (`path -> 0|1`).
/// - Sorting is applied before skip/limit.
/// - `limit: Some(0)` means no limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Option<BsonDocument>,
    pub sort: Option<Vec<SortSpec>>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    #[must_use]
    pub const fn operator(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
        }
    }
}

/// One operator applied to a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Cmp { op: CmpOp, value: Bson },
    In(Vec<Bson>),
    Nin(Vec<Bson>),
    Exists(bool),
    Regex { pattern: String, options: String },
}

impl Condition {
    /// Operator name; conditions with equal names replace or merge with each other.
    #[must_use]
    pub const fn operator(&self) -> &'static str {
        match self {
            Self::Cmp { op, .. } => op.operator(),
            Self::In(_) => "$in",
            Self::Nin(_) => "$nin",
            Self::Exists(_) => "$exists",
            Self::Regex { .. } => "$regex",
        }
    }
}

/// Leaf node: what a single field must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `{field: value}` implicit equality.
    Value(Bson),
    /// `{field: {$op: .., ...}}`, all conditions must hold.
    Ops(Vec<Condition>),
}

/// Accumulated native filter expression.
///
/// Field predicates are implicitly conjunctive; `and`/`or` hold combinator
/// operands; `where_expr` is the store-specific `$where` escape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub fields: Vec<(String, Predicate)>,
    pub and: Vec<Filter>,
    pub or: Vec<Filter>,
    pub where_expr: Option<String>,
}

impl Filter {
    /// A filter with a single field predicate.
    pub fn field(path: impl Into<String>, predicate: Predicate) -> Self {
        Self { fields: vec![(path.into(), predicate)], ..Self::default() }
    }

    pub fn condition(path: impl Into<String>, condition: Condition) -> Self {
        Self::field(path, Predicate::Ops(vec![condition]))
    }

    #[must_use]
    pub fn and_of(operands: Vec<Filter>) -> Self {
        Self { and: operands, ..Self::default() }
    }

    #[must_use]
    pub fn or_of(operands: Vec<Filter>) -> Self {
        Self { or: operands, ..Self::default() }
    }

    /// Matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.and.is_empty() && self.or.is_empty() && self.where_expr.is_none()
    }
}
