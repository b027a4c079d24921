//! Majority-vote column typing
//!
//! Each sampled value votes for the type [`classify`] gives it. The column
//! takes the type with the most votes; ties go to the earlier type in
//! [`PropertyType::ALL`]. A column with no votes is a string.

use tabula_protocol::PropertyType;

use super::classify;
use crate::config::BooleanTokens;

/// Vote counts for one column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeTally {
    counts: [usize; PropertyType::ALL.len()],
}

impl TypeTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observed: PropertyType) {
        self.counts[observed.priority()] += 1;
    }

    pub fn count(&self, ty: PropertyType) -> usize {
        self.counts[ty.priority()]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// The winning type.
    pub fn winner(&self) -> PropertyType {
        let mut best = PropertyType::String;
        let mut best_count = 0;
        for ty in PropertyType::ALL {
            // Strictly greater keeps the earlier type on ties
            if self.count(ty) > best_count {
                best = ty;
                best_count = self.count(ty);
            }
        }
        best
    }
}

/// Classify every value and return the majority type.
pub fn infer_column<'a, I>(values: I, tokens: BooleanTokens) -> PropertyType
where
    I: IntoIterator<Item = &'a str>,
{
    let mut tally = TypeTally::new();
    for value in values {
        tally.add(classify(value, tokens));
    }
    tally.winner()
}

/// Per-column tallies fed one row at a time, up to a sample limit.
#[derive(Debug, Clone)]
pub struct ColumnTallies {
    tallies: Vec<TypeTally>,
    tokens: BooleanTokens,
    sample_limit: usize,
    rows_sampled: usize,
}

impl ColumnTallies {
    pub fn new(columns: usize, tokens: BooleanTokens, sample_limit: usize) -> Self {
        Self {
            tallies: vec![TypeTally::new(); columns],
            tokens,
            sample_limit,
            rows_sampled: 0,
        }
    }

    /// True once the sample limit has been reached.
    pub fn is_full(&self) -> bool {
        self.rows_sampled >= self.sample_limit
    }

    pub fn rows_sampled(&self) -> usize {
        self.rows_sampled
    }

    /// Record one row. Returns `false` (and records nothing) for rows whose
    /// width differs from the header or once the sample is full.
    pub fn observe_row(&mut self, cells: &[&str]) -> bool {
        if self.is_full() || cells.len() != self.tallies.len() {
            return false;
        }
        for (tally, cell) in self.tallies.iter_mut().zip(cells) {
            tally.add(classify(cell, self.tokens));
        }
        self.rows_sampled += 1;
        true
    }

    /// One type per column, in column order.
    pub fn finish(&self) -> Vec<PropertyType> {
        self.tallies.iter().map(TypeTally::winner).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: BooleanTokens = BooleanTokens::Permissive;

    #[test]
    fn test_empty_column_is_string() {
        assert_eq!(TypeTally::new().winner(), PropertyType::String);
        assert_eq!(infer_column(Vec::<&str>::new(), P), PropertyType::String);
    }

    #[test]
    fn test_majority_beats_stray_text() {
        let mut values: Vec<String> = (0..90).map(|i| i.to_string()).collect();
        values.extend((0..10).map(|i| format!("word{}", i)));
        let ty = infer_column(values.iter().map(String::as_str), P);
        assert_eq!(ty, PropertyType::Integer);
    }

    #[test]
    fn test_ties_go_to_higher_priority() {
        assert_eq!(infer_column(["1", "1.5"], P), PropertyType::Integer);
        assert_eq!(infer_column(["true", "2020-01-01"], P), PropertyType::Boolean);
        assert_eq!(infer_column(["abc", "2020-01-01"], P), PropertyType::DateTime);
    }

    #[test]
    fn test_mixed_numeric_column_prefers_the_mode() {
        assert_eq!(infer_column(["1.5", "2.5", "3"], P), PropertyType::Number);
    }

    #[test]
    fn test_column_tallies_respect_limit_and_width() {
        let mut tallies = ColumnTallies::new(2, P, 2);
        assert!(tallies.observe_row(&["1", "x"]));
        assert!(!tallies.observe_row(&["1"]));
        assert!(tallies.observe_row(&["2", "y"]));
        assert!(tallies.is_full());
        assert!(!tallies.observe_row(&["3", "z"]));
        assert_eq!(tallies.rows_sampled(), 2);
        assert_eq!(
            tallies.finish(),
            vec![PropertyType::Integer, PropertyType::String]
        );
    }

    #[test]
    fn test_column_tallies_without_rows_default_to_string() {
        let tallies = ColumnTallies::new(3, P, 10);
        assert_eq!(tallies.finish(), vec![PropertyType::String; 3]);
    }
}
