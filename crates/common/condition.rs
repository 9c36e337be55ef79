use serde::{Deserialize, Serialize};

use crate::entry::{Entry, EntryStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// One `(field, comparator, literal)` clause of a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareTriple {
    pub field: String,
    pub cmp: Comparator,
    pub value: String,
}

/// Conjunction of compare triples with an optional window.
///
/// Ordered comparators coerce both sides to signed 64-bit integers; a
/// missing or empty field reads as `i64::MIN` for `Gt`/`Ge` and
/// `i64::MAX` for `Lt`/`Le`, so such rows never match. `Eq`/`Ne` compare
/// bytes. Any parse failure makes the row non-matching.
#[derive(Debug, Clone, Default)]
pub struct Condition {
    pub triples: Vec<CompareTriple>,
    pub limit: Option<(usize, usize)>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(field.into(), Comparator::Eq, value.into());
        self
    }

    pub fn ne(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(field.into(), Comparator::Ne, value.into());
        self
    }

    pub fn gt(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(field.into(), Comparator::Gt, value.into());
        self
    }

    pub fn ge(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(field.into(), Comparator::Ge, value.into());
        self
    }

    pub fn lt(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(field.into(), Comparator::Lt, value.into());
        self
    }

    pub fn le(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(field.into(), Comparator::Le, value.into());
        self
    }

    pub fn set_limit(&mut self, offset: usize, count: usize) {
        self.limit = Some((offset, count));
    }

    // duplicate clauses are dropped
    fn push(&mut self, field: String, cmp: Comparator, value: String) {
        let exists = self
            .triples
            .iter()
            .any(|t| t.field == field && t.cmp == cmp && t.value == value);
        if !exists {
            self.triples.push(CompareTriple { field, cmp, value });
        }
    }

    /// True when every clause holds for `entry`. Absent or deleted rows
    /// never match.
    pub fn filter(&self, entry: Option<&Entry>) -> bool {
        let Some(entry) = entry else {
            return false;
        };
        if matches!(entry.status(), EntryStatus::Deleted | EntryStatus::Purged) {
            return false;
        }
        self.triples
            .iter()
            .all(|triple| clause_holds(triple, entry.field_str(&triple.field)))
    }
}

fn clause_holds(triple: &CompareTriple, field_value: &str) -> bool {
    match triple.cmp {
        Comparator::Eq => field_value == triple.value,
        Comparator::Ne => field_value != triple.value,
        Comparator::Gt | Comparator::Ge | Comparator::Lt | Comparator::Le => {
            let Ok(rhs) = triple.value.parse::<i64>() else {
                return false;
            };
            let lhs = match triple.cmp {
                Comparator::Gt | Comparator::Ge => parse_or(field_value, i64::MIN),
                _ => parse_or(field_value, i64::MAX),
            };
            let Some(lhs) = lhs else { return false };
            match triple.cmp {
                Comparator::Gt => lhs > rhs,
                Comparator::Ge => lhs >= rhs,
                Comparator::Lt => lhs < rhs,
                Comparator::Le => lhs <= rhs,
                _ => unreachable!(),
            }
        }
    }
}

fn parse_or(value: &str, empty_default: i64) -> Option<i64> {
    if value.is_empty() {
        Some(empty_default)
    } else {
        value.parse::<i64>().ok()
    }
}

/// Condition projected onto a table's primary key: the comparators apply
/// to the key string itself. Used by `get_primary_keys`; full field
/// filtering stays with the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyCondition {
    pub triples: Vec<(Comparator, String)>,
    pub limit: Option<(usize, usize)>,
}

impl KeyCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cmp: Comparator, value: impl Into<String>) {
        self.triples.push((cmp, value.into()));
    }

    pub fn matches(&self, key: &str) -> bool {
        self.triples.iter().all(|(cmp, value)| match cmp {
            Comparator::Eq => key == value,
            Comparator::Ne => key != value,
            Comparator::Gt => key > value.as_str(),
            Comparator::Ge => key >= value.as_str(),
            Comparator::Lt => key < value.as_str(),
            Comparator::Le => key <= value.as_str(),
        })
    }
}
