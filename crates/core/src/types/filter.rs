//! Query filters and their canonical fingerprints.
//!
//! A list query is a collection name plus an AND-ed set of field predicates.
//! The cache keys list results by a [`QueryFingerprint`], which must not
//! depend on the order the predicates were built in.

use core::cmp::Ordering;
use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOp {
    /// Whether the operand is a list whose order carries no meaning.
    #[must_use]
    pub const fn takes_set(self) -> bool {
        matches!(self, Self::In | Self::NotIn | Self::ArrayContainsAny)
    }

    /// Wire name of the operator (matches the serde representation).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "EQUAL",
            Self::NotEqual => "NOT_EQUAL",
            Self::LessThan => "LESS_THAN",
            Self::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            Self::GreaterThan => "GREATER_THAN",
            Self::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            Self::ArrayContains => "ARRAY_CONTAINS",
            Self::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
        }
    }
}

/// A single field predicate, e.g. `tripMembers.<uid>.status NOT_IN [..]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Dotted field path.
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    #[must_use]
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    #[must_use]
    pub fn equals(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Equal, value)
    }

    #[must_use]
    pub fn not_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, FilterOp::NotIn, Value::Array(values))
    }

    /// Evaluate the predicate against a document body.
    ///
    /// Follows the document store's semantics: a missing field never
    /// matches, not even `NotEqual`/`NotIn`, and ordering comparisons only
    /// match values of the same kind (numbers or strings).
    #[must_use]
    pub fn matches(&self, fields: &Map<String, Value>) -> bool {
        let Some(actual) = lookup(fields, &self.field) else {
            return false;
        };
        let operand_list = || self.value.as_array().map_or(&[][..], Vec::as_slice);

        match self.op {
            FilterOp::Equal => actual == &self.value,
            FilterOp::NotEqual => actual != &self.value,
            FilterOp::LessThan => compare(actual, &self.value).is_some_and(Ordering::is_lt),
            FilterOp::LessThanOrEqual => compare(actual, &self.value).is_some_and(Ordering::is_le),
            FilterOp::GreaterThan => compare(actual, &self.value).is_some_and(Ordering::is_gt),
            FilterOp::GreaterThanOrEqual => {
                compare(actual, &self.value).is_some_and(Ordering::is_ge)
            }
            FilterOp::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.contains(&self.value)),
            FilterOp::ArrayContainsAny => actual
                .as_array()
                .is_some_and(|items| operand_list().iter().any(|v| items.contains(v))),
            FilterOp::In => operand_list().contains(actual),
            FilterOp::NotIn => !operand_list().contains(actual),
        }
    }

    /// The predicate with set-valued operands sorted and deduplicated.
    fn canonical(&self) -> (String, FilterOp, String) {
        let value = match (&self.value, self.op.takes_set()) {
            (Value::Array(items), true) => {
                let mut rendered: Vec<String> = items.iter().map(Value::to_string).collect();
                rendered.sort();
                rendered.dedup();
                format!("[{}]", rendered.join(","))
            }
            // serde_json's map keeps keys sorted, so nested objects render
            // identically regardless of insertion order.
            (other, _) => other.to_string(),
        };
        (self.field.clone(), self.op, value)
    }
}

/// Resolve a dotted path such as `tripMembers.u1.status`.
fn lookup<'a>(fields: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// An AND-ed set of predicates.
///
/// Construction order is preserved for the remote query, but equality and
/// [`FilterSet::fingerprint`] only look at the canonical form, so
/// `[a, b]` and `[b, a]` name the same query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet(Vec<Filter>);

impl FilterSet {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Add a predicate.
    #[must_use]
    pub fn with(mut self, filter: Filter) -> Self {
        self.0.push(filter);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Filter> {
        self.0.iter()
    }

    /// Whether a document body satisfies every predicate.
    #[must_use]
    pub fn matches(&self, fields: &Map<String, Value>) -> bool {
        self.0.iter().all(|filter| filter.matches(fields))
    }

    fn canonical(&self) -> Vec<(String, FilterOp, String)> {
        let mut parts: Vec<_> = self.0.iter().map(Filter::canonical).collect();
        parts.sort();
        parts.dedup();
        parts
    }

    /// Order-independent identifier of `collection` queried with this set.
    #[must_use]
    pub fn fingerprint(&self, collection: &str) -> QueryFingerprint {
        let filters: Vec<Value> = self
            .canonical()
            .into_iter()
            .map(|(field, op, value)| json!([field, op.as_str(), value]))
            .collect();
        let material = json!({ "collection": collection, "filters": filters }).to_string();
        QueryFingerprint(hex::encode(Sha256::digest(material.as_bytes())))
    }
}

impl PartialEq for FilterSet {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl FromIterator<Filter> for FilterSet {
    fn from_iter<I: IntoIterator<Item = Filter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FilterSet {
    type Item = &'a Filter;
    type IntoIter = std::slice::Iter<'a, Filter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Hex SHA-256 of a canonicalised `(collection, filters)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is plenty for logs.
        f.write_str(self.0.get(..12).unwrap_or(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_filter() -> Filter {
        Filter::not_in(
            "tripMembers.u1.status",
            vec![json!("Declined"), json!("Removed")],
        )
    }

    #[test]
    fn test_fingerprint_ignores_filter_order() {
        let a = FilterSet::new()
            .with(status_filter())
            .with(Filter::equals("archived", json!(false)));
        let b = FilterSet::new()
            .with(Filter::equals("archived", json!(false)))
            .with(status_filter());

        assert_eq!(a.fingerprint("trips"), b.fingerprint("trips"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_ignores_set_operand_order() {
        let a = FilterSet::new().with(status_filter());
        let b = FilterSet::new().with(Filter::not_in(
            "tripMembers.u1.status",
            vec![json!("Removed"), json!("Declined")],
        ));

        assert_eq!(a.fingerprint("trips"), b.fingerprint("trips"));
    }

    #[test]
    fn test_fingerprint_keeps_ordered_operands_distinct() {
        let a = FilterSet::new().with(Filter::equals("tags", json!(["a", "b"])));
        let b = FilterSet::new().with(Filter::equals("tags", json!(["b", "a"])));

        assert_ne!(a.fingerprint("trips"), b.fingerprint("trips"));
    }

    #[test]
    fn test_fingerprint_depends_on_collection_and_values() {
        let set = FilterSet::new().with(Filter::equals("owner", json!("u1")));
        let other = FilterSet::new().with(Filter::equals("owner", json!("u2")));

        assert_ne!(set.fingerprint("trips"), set.fingerprint("users"));
        assert_ne!(set.fingerprint("trips"), other.fingerprint("trips"));
    }

    #[test]
    fn test_duplicate_predicates_collapse() {
        let once = FilterSet::new().with(status_filter());
        let twice = FilterSet::new().with(status_filter()).with(status_filter());

        assert_eq!(once.fingerprint("trips"), twice.fingerprint("trips"));
    }

    #[test]
    fn test_matches_member_status_filter() {
        let Value::Object(active) = json!({
            "name": "Coast",
            "tripMembers": {"u1": {"status": "Accepted"}},
        }) else {
            unreachable!()
        };
        let Value::Object(declined) = json!({
            "tripMembers": {"u1": {"status": "Declined"}},
        }) else {
            unreachable!()
        };
        let Value::Object(not_member) = json!({
            "tripMembers": {"u2": {"status": "Owner"}},
        }) else {
            unreachable!()
        };

        let set = FilterSet::new().with(status_filter());
        assert!(set.matches(&active));
        assert!(!set.matches(&declined));
        // Missing fields never match, even for NOT_IN.
        assert!(!set.matches(&not_member));
    }

    #[test]
    fn test_matches_comparisons_and_arrays() {
        let Value::Object(trip) = json!({"tripLength": 4, "tags": ["sea", "hike"], "name": "Coast"}) else {
            unreachable!()
        };

        assert!(Filter::new("tripLength", FilterOp::GreaterThan, json!(3)).matches(&trip));
        assert!(!Filter::new("tripLength", FilterOp::LessThan, json!(4)).matches(&trip));
        assert!(Filter::new("name", FilterOp::LessThanOrEqual, json!("Coast")).matches(&trip));
        assert!(!Filter::new("name", FilterOp::GreaterThan, json!(1)).matches(&trip));
        assert!(Filter::new("tags", FilterOp::ArrayContains, json!("sea")).matches(&trip));
        assert!(
            Filter::new("tags", FilterOp::ArrayContainsAny, json!(["ski", "hike"])).matches(&trip)
        );
        assert!(Filter::new("name", FilterOp::In, json!(["Coast", "Peak"])).matches(&trip));
        assert!(Filter::new("name", FilterOp::NotEqual, json!("Peak")).matches(&trip));
    }

    #[test]
    fn test_empty_set_fingerprint_is_stable() {
        assert_eq!(
            FilterSet::new().fingerprint("trips"),
            FilterSet::default().fingerprint("trips")
        );
        assert_eq!(FilterSet::new().fingerprint("trips").as_str().len(), 64);
    }
}
