//! Filter and sort chains for projections.
//!
//! Both chains are ordered lists of plain closures evaluated directly
//! against records. A [`FilterChain`] folds its predicates left to right;
//! a [`SortChain`] orders by its first entry and breaks ties with each later
//! entry in turn.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// How a filter joins the result of the filters before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Combinator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

pub type Predicate<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;
pub type Comparator<R> = Arc<dyn Fn(&R, &R) -> Ordering + Send + Sync>;

struct FilterEntry<R> {
    combinator: Combinator,
    predicate: Predicate<R>,
}

/// Ordered predicates combined as a left fold.
///
/// `P0`, then `c1(P0, P1)`, then `c2(.., P2)` and so on. The first entry's
/// combinator has no left operand and is ignored. An empty chain matches
/// everything.
pub struct FilterChain<R> {
    entries: Vec<FilterEntry<R>>,
}

impl<R> FilterChain<R> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Append a predicate joined with AND.
    pub fn add(&mut self, predicate: impl Fn(&R) -> bool + Send + Sync + 'static) {
        self.push(Combinator::And, Arc::new(predicate));
    }

    /// Append a predicate joined with OR.
    pub fn add_or(&mut self, predicate: impl Fn(&R) -> bool + Send + Sync + 'static) {
        self.push(Combinator::Or, Arc::new(predicate));
    }

    pub fn push(&mut self, combinator: Combinator, predicate: Predicate<R>) {
        self.entries.push(FilterEntry {
            combinator,
            predicate,
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matches(&self, record: &R) -> bool {
        let mut entries = self.entries.iter();
        let Some(first) = entries.next() else {
            return true;
        };
        entries.fold((first.predicate)(record), |acc, entry| {
            match entry.combinator {
                Combinator::And => acc && (entry.predicate)(record),
                Combinator::Or => acc || (entry.predicate)(record),
            }
        })
    }
}

impl<R> Default for FilterChain<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for FilterChain<R> {
    fn clone(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|e| FilterEntry {
                    combinator: e.combinator,
                    predicate: e.predicate.clone(),
                })
                .collect(),
        }
    }
}

impl<R> fmt::Debug for FilterChain<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.combinator))
            .finish()
    }
}

/// Ordered comparators forming a multi-key stable sort.
pub struct SortChain<R> {
    entries: Vec<(Comparator<R>, SortDirection)>,
}

impl<R> SortChain<R> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Sort ascending by a derived key.
    pub fn add_by_key<K, F>(&mut self, key: F)
    where
        K: Ord,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.push(
            Arc::new(move |a: &R, b: &R| key(a).cmp(&key(b))),
            SortDirection::Ascending,
        );
    }

    /// Sort descending by a derived key.
    pub fn add_by_key_descending<K, F>(&mut self, key: F)
    where
        K: Ord,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.push(
            Arc::new(move |a: &R, b: &R| key(a).cmp(&key(b))),
            SortDirection::Descending,
        );
    }

    pub fn push(&mut self, comparator: Comparator<R>, direction: SortDirection) {
        self.entries.push((comparator, direction));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compare two records under the whole chain. `Equal` when the chain
    /// is empty, which leaves a stable sort in source order.
    pub fn compare(&self, a: &R, b: &R) -> Ordering {
        self.entries
            .iter()
            .fold(Ordering::Equal, |ordering, (comparator, direction)| {
                ordering.then_with(|| match direction {
                    SortDirection::Ascending => comparator(a, b),
                    SortDirection::Descending => comparator(b, a),
                })
            })
    }
}

impl<R> Default for SortChain<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for SortChain<R> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<R> fmt::Debug for SortChain<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(_, d)| d))
            .finish()
    }
}

/// Apply `filters` then `sorts` to `(handle, record)` pairs and return the
/// surviving handles in projection order.
pub fn project<'a, T, R: 'a>(
    items: impl IntoIterator<Item = (T, &'a R)>,
    filters: &FilterChain<R>,
    sorts: &SortChain<R>,
) -> Vec<T> {
    let mut kept: Vec<(T, &R)> = items
        .into_iter()
        .filter(|(_, record)| filters.matches(record))
        .collect();
    if !sorts.is_empty() {
        kept.sort_by(|(_, a), (_, b)| sorts.compare(a, b));
    }
    kept.into_iter().map(|(handle, _)| handle).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Person;

    fn sample() -> Vec<Person> {
        vec![
            Person::new(1, "Ann").aged(30),
            Person::new(2, "Bob").aged(25),
            Person::new(3, "Cid").aged(30),
            Person::new(4, "Dee").aged(41),
        ]
    }

    fn ids(filters: &FilterChain<Person>, sorts: &SortChain<Person>) -> Vec<i64> {
        let records = sample();
        project(records.iter().map(|p| (p.id, p)), filters, sorts)
    }

    #[test]
    fn test_empty_chains_keep_everything_in_order() {
        assert_eq!(ids(&FilterChain::new(), &SortChain::new()), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_filters_combine_with_and() {
        let mut filters = FilterChain::new();
        filters.add(|p: &Person| p.age == Some(30));
        filters.add(|p: &Person| p.id > 1);
        assert_eq!(ids(&filters, &SortChain::new()), vec![3]);
    }

    #[test]
    fn test_or_filter_applies_at_its_position() {
        let mut filters = FilterChain::new();
        filters.add(|p: &Person| p.age == Some(30));
        filters.add(|p: &Person| p.id > 1);
        filters.add_or(|p: &Person| p.name == "Bob");
        assert_eq!(ids(&filters, &SortChain::new()), vec![2, 3]);
    }

    #[test]
    fn test_first_combinator_is_ignored() {
        let mut filters = FilterChain::new();
        filters.add_or(|p: &Person| p.id == 2);
        assert_eq!(ids(&filters, &SortChain::new()), vec![2]);
    }

    #[test]
    fn test_cleared_filters_match_all() {
        let mut filters = FilterChain::new();
        filters.add(|_: &Person| false);
        filters.clear();
        assert!(filters.is_empty());
        assert_eq!(ids(&filters, &SortChain::new()).len(), 4);
    }

    #[test]
    fn test_ascending_then_descending_tiebreak() {
        let mut sorts = SortChain::new();
        sorts.add_by_key(|p: &Person| p.age);
        sorts.add_by_key_descending(|p: &Person| p.name.clone());
        assert_eq!(ids(&FilterChain::new(), &sorts), vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_sort_is_stable_for_full_ties() {
        let mut sorts = SortChain::new();
        sorts.add_by_key(|p: &Person| p.age);
        assert_eq!(ids(&FilterChain::new(), &sorts), vec![2, 1, 3, 4]);
    }

    #[test]
    fn test_descending_primary() {
        let mut sorts = SortChain::new();
        sorts.add_by_key_descending(|p: &Person| p.id);
        assert_eq!(ids(&FilterChain::new(), &sorts), vec![4, 3, 2, 1]);
    }
}
