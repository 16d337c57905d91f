//! Index keys and key ranges.

use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;

/// A possibly composite index key.
///
/// Keys compare field by field in declared order. A shorter key sorts
/// before every longer key it is a prefix of, so a partial key can be used
/// as the start of a range scan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey(Vec<Value>);

impl IndexKey {
    /// Creates a key from its field values.
    #[must_use]
    pub fn new(fields: Vec<Value>) -> Self {
        Self(fields)
    }

    /// Creates a single-field key.
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    /// Creates a composite key.
    pub fn composite<V: Into<Value>>(fields: impl IntoIterator<Item = V>) -> Self {
        Self(fields.into_iter().map(Into::into).collect())
    }

    /// Returns the field values.
    #[must_use]
    pub fn fields(&self) -> &[Value] {
        &self.0
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if any field is null.
    #[must_use]
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }

    /// Compares only the leading `prefix.len()` fields of this key with
    /// `prefix`.
    #[must_use]
    pub fn compare_prefix(&self, prefix: &IndexKey) -> Ordering {
        for (i, bound) in prefix.0.iter().enumerate() {
            let Some(field) = self.0.get(i) else {
                return Ordering::Less;
            };
            match field.cmp(bound) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    pub(crate) fn into_fields(self) -> Vec<Value> {
        self.0
    }
}

impl From<Value> for IndexKey {
    fn from(value: Value) -> Self {
        Self(vec![value])
    }
}

impl From<Vec<Value>> for IndexKey {
    fn from(fields: Vec<Value>) -> Self {
        Self(fields)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [single] = self.0.as_slice() {
            return write!(f, "{single}");
        }
        f.write_str("[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str("]")
    }
}

/// One end of a key range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBound {
    /// Bound key, possibly a prefix of the index keys.
    pub key: IndexKey,
    /// Whether keys equal to the bound are included.
    pub inclusive: bool,
}

impl KeyBound {
    /// A bound that includes `key`.
    #[must_use]
    pub fn inclusive(key: IndexKey) -> Self {
        Self {
            key,
            inclusive: true,
        }
    }

    /// A bound that excludes `key`.
    #[must_use]
    pub fn exclusive(key: IndexKey) -> Self {
        Self {
            key,
            inclusive: false,
        }
    }
}

/// Comparison operator of a single-field predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConditionOp {
    /// `=`
    Eq,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

/// A predicate on the leading field(s) of an index key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct KeyCondition {
    /// Operator.
    pub op: ConditionOp,
    /// Right-hand side.
    pub key: IndexKey,
}

impl KeyCondition {
    /// Creates a condition.
    pub fn new(op: ConditionOp, key: impl Into<IndexKey>) -> Self {
        Self {
            op,
            key: key.into(),
        }
    }
}

/// How a range was built, kept so the index can rebuild it over keys in
/// stored form: bounds that compare one way as given may compare the other
/// way once a collation folds them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum RangeSource {
    /// Explicit lower and upper ends.
    #[default]
    Bounds,
    /// Two ends given in either order.
    Between,
    /// Folded predicates, sorted.
    Conditions(Vec<KeyCondition>),
}

/// A range of index keys with optional, independently inclusive ends.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexRange {
    /// Lower end, `None` for unbounded.
    pub lower: Option<KeyBound>,
    /// Upper end, `None` for unbounded.
    pub upper: Option<KeyBound>,
    source: RangeSource,
}

impl IndexRange {
    /// The range of all keys.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// A range with explicit ends. Keys between an upper end below the
    /// lower end form an empty range.
    #[must_use]
    pub fn new(lower: Option<KeyBound>, upper: Option<KeyBound>) -> Self {
        Self {
            lower,
            upper,
            source: RangeSource::Bounds,
        }
    }

    /// Keys equal to `key` (or starting with it, for a partial key).
    #[must_use]
    pub fn exact(key: IndexKey) -> Self {
        Self::new(Some(KeyBound::inclusive(key.clone())), Some(KeyBound::inclusive(key)))
    }

    /// Keys between two bounds given in either order.
    #[must_use]
    pub fn between(a: KeyBound, b: KeyBound) -> Self {
        let (lower, upper) = if a.key > b.key { (b, a) } else { (a, b) };
        Self {
            lower: Some(lower),
            upper: Some(upper),
            source: RangeSource::Between,
        }
    }

    /// Keys at or above `key`.
    #[must_use]
    pub fn at_least(key: IndexKey) -> Self {
        Self::new(Some(KeyBound::inclusive(key)), None)
    }

    /// Keys at or below `key`.
    #[must_use]
    pub fn at_most(key: IndexKey) -> Self {
        Self::new(None, Some(KeyBound::inclusive(key)))
    }

    /// Folds `=, >, >=, <, <=` predicates into one range.
    ///
    /// The result does not depend on the order of the predicates. When two
    /// predicates bound the same side, the tighter one wins, and at equal
    /// keys the exclusive one wins.
    #[must_use]
    pub fn from_conditions(conditions: &[KeyCondition]) -> Self {
        let mut range = Self::all();
        for cond in conditions {
            let key = cond.key.clone();
            match cond.op {
                ConditionOp::Eq => {
                    range.tighten_lower(KeyBound::inclusive(key.clone()));
                    range.tighten_upper(KeyBound::inclusive(key));
                }
                ConditionOp::Gt => range.tighten_lower(KeyBound::exclusive(key)),
                ConditionOp::Ge => range.tighten_lower(KeyBound::inclusive(key)),
                ConditionOp::Lt => range.tighten_upper(KeyBound::exclusive(key)),
                ConditionOp::Le => range.tighten_upper(KeyBound::inclusive(key)),
            }
        }
        let mut sorted = conditions.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        range.source = RangeSource::Conditions(sorted);
        range
    }

    fn tighten_lower(&mut self, bound: KeyBound) {
        let replace = match &self.lower {
            None => true,
            Some(current) => match bound.key.cmp(&current.key) {
                Ordering::Greater => true,
                Ordering::Equal => !bound.inclusive,
                Ordering::Less => false,
            },
        };
        if replace {
            self.lower = Some(bound);
        }
    }

    fn tighten_upper(&mut self, bound: KeyBound) {
        let replace = match &self.upper {
            None => true,
            Some(current) => match bound.key.cmp(&current.key) {
                Ordering::Less => true,
                Ordering::Equal => !bound.inclusive,
                Ordering::Greater => false,
            },
        };
        if replace {
            self.upper = Some(bound);
        }
    }

    /// Returns true if `key` lies above the lower end.
    #[must_use]
    pub fn above_lower(&self, key: &IndexKey) -> bool {
        self.lower.as_ref().map_or(true, |b| match key.compare_prefix(&b.key) {
            Ordering::Greater => true,
            Ordering::Equal => b.inclusive,
            Ordering::Less => false,
        })
    }

    /// Returns true if `key` lies beyond the upper end, which ends an
    /// ascending scan.
    #[must_use]
    pub fn past_upper(&self, key: &IndexKey) -> bool {
        self.upper.as_ref().is_some_and(|b| match key.compare_prefix(&b.key) {
            Ordering::Greater => true,
            Ordering::Equal => !b.inclusive,
            Ordering::Less => false,
        })
    }

    /// Returns true if `key` lies inside the range.
    #[must_use]
    pub fn contains(&self, key: &IndexKey) -> bool {
        self.above_lower(key) && !self.past_upper(key)
    }

    /// Rebuilds the range over keys mapped through `f`.
    ///
    /// Ordering and tightening are redone on the mapped keys, so a range
    /// over folded keys compares its ends the way the index orders them.
    pub(crate) fn try_map_keys<E>(
        &self,
        mut f: impl FnMut(&IndexKey) -> Result<IndexKey, E>,
    ) -> Result<Self, E> {
        let mut map = |b: &Option<KeyBound>| -> Result<Option<KeyBound>, E> {
            match b {
                Some(b) => Ok(Some(KeyBound {
                    key: f(&b.key)?,
                    inclusive: b.inclusive,
                })),
                None => Ok(None),
            }
        };
        match &self.source {
            RangeSource::Bounds => Ok(Self::new(map(&self.lower)?, map(&self.upper)?)),
            RangeSource::Between => match (map(&self.lower)?, map(&self.upper)?) {
                (Some(a), Some(b)) => Ok(Self::between(a, b)),
                (lower, upper) => Ok(Self::new(lower, upper)),
            },
            RangeSource::Conditions(conditions) => {
                let mapped = conditions
                    .iter()
                    .map(|c| {
                        Ok(KeyCondition {
                            op: c.op,
                            key: f(&c.key)?,
                        })
                    })
                    .collect::<Result<Vec<_>, E>>()?;
                Ok(Self::from_conditions(&mapped))
            }
        }
    }
}
