use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

/// A set of named values: an initial state, a parameter set, or a module's inputs and outputs.
///
/// Names are kept sorted so that iteration (and therefore reporting) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuantityStore {
    values: BTreeMap<String, f64>,
}

impl QuantityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Inserts or overwrites `name`.
    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    /// Returns a mutable slot for an existing quantity.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut f64> {
        self.values.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sets every value to `value`.
    pub fn fill(&mut self, value: f64) {
        self.values.values_mut().for_each(|v| *v = value);
    }

    /// Builds a store with every name in `names` set to zero.
    pub fn zeroed<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names.into_iter().map(|name| (name, 0.0)).collect()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for QuantityStore {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl<const N: usize> From<[(&str, f64); N]> for QuantityStore {
    fn from(pairs: [(&str, f64); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Named columns of values, one entry per time step. Used for system drivers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuantitySeries {
    columns: BTreeMap<String, Vec<f64>>,
}

impl QuantitySeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.columns.insert(name.into(), values);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The shared length of every column.
    ///
    /// Fails when there are no columns, when the columns are empty, or when
    /// two columns disagree on their length.
    pub fn series_len(&self) -> Result<usize> {
        let mut iter = self.columns.iter();
        let (first_name, first) = iter
            .next()
            .ok_or_else(|| Error::InvalidDrivers("at least one driver series is required".into()))?;
        let n = first.len();
        if n == 0 {
            return Err(Error::InvalidDrivers(format!(
                "driver `{first_name}` has no values"
            )));
        }
        for (name, column) in iter {
            if column.len() != n {
                return Err(Error::InvalidDrivers(format!(
                    "driver `{name}` has {} values but `{first_name}` has {n}",
                    column.len()
                )));
            }
        }
        Ok(n)
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<f64>)> for QuantitySeries {
    fn from_iter<I: IntoIterator<Item = (S, Vec<f64>)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl<const N: usize> From<[(&str, Vec<f64>); N]> for QuantitySeries {
    fn from(pairs: [(&str, Vec<f64>); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// The sampled trace of one integration run: one column per quantity, one row per time step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulationResult {
    columns: BTreeMap<String, Vec<f64>>,
}

impl SimulationResult {
    pub(crate) fn with_columns<'a>(names: impl IntoIterator<Item = &'a str>, ntimes: usize) -> Self {
        Self {
            columns: names
                .into_iter()
                .map(|name| (name.to_string(), Vec::with_capacity(ntimes)))
                .collect(),
        }
    }

    /// Appends one row, taking every column's value from `quantities`.
    pub(crate) fn record(&mut self, quantities: &QuantityStore) {
        for (name, column) in self.columns.iter_mut() {
            column.push(quantities.get(name).unwrap_or(f64::NAN));
        }
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of recorded time steps.
    pub fn ntimes(&self) -> usize {
        self.columns.values().next().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn into_columns(self) -> BTreeMap<String, Vec<f64>> {
        self.columns
    }
}

impl Index<&str> for SimulationResult {
    type Output = [f64];

    fn index(&self, name: &str) -> &[f64] {
        match self.columns.get(name) {
            Some(column) => column,
            None => panic!("no quantity named `{name}` in the simulation result"),
        }
    }
}

impl fmt::Display for SimulationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in self.columns.keys() {
            write!(f, "{name:>11}   ")?;
        }
        writeln!(f)?;
        for row in 0..self.ntimes() {
            for column in self.columns.values() {
                write!(f, "{:>11}   ", format_significant(column[row], 4))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Formats `value` with `digits` significant digits, trimming trailing zeros.
fn format_significant(value: f64, digits: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{value}");
    }
    let magnitude = value.abs().log10().floor() as i32;
    if magnitude < -4 || magnitude >= digits as i32 {
        return format!("{:.*e}", digits.saturating_sub(1), value);
    }
    let decimals = (digits as i32 - 1 - magnitude).max(0) as usize;
    let text = format!("{value:.decimals$}");
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_iterates_in_name_order() {
        let store = QuantityStore::from([("velocity", 1.0), ("position", 0.0), ("mass", 10.0)]);
        let names: Vec<_> = store.names().collect();
        assert_eq!(names, vec!["mass", "position", "velocity"]);
    }

    #[test]
    fn zeroed_store_seeds_every_name() {
        let store = QuantityStore::zeroed(["a", "b"]);
        assert_eq!(store.get("a"), Some(0.0));
        assert_eq!(store.get("b"), Some(0.0));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn series_len_requires_equal_lengths() {
        let drivers = QuantitySeries::from([
            ("time", vec![0.0, 1.0, 2.0]),
            ("temp", vec![5.0, 8.0, 10.0]),
        ]);
        assert_eq!(drivers.series_len().expect("equal lengths"), 3);

        let uneven = QuantitySeries::from([("time", vec![0.0, 1.0]), ("temp", vec![5.0])]);
        assert!(matches!(uneven.series_len(), Err(Error::InvalidDrivers(_))));
    }

    #[test]
    fn series_len_rejects_empty_drivers() {
        assert!(QuantitySeries::new().series_len().is_err());
        let empty = QuantitySeries::from([("time", Vec::new())]);
        assert!(empty.series_len().is_err());
    }

    #[test]
    fn result_records_rows_for_every_column() {
        let mut result = SimulationResult::with_columns(["time", "x"], 2);
        result.record(&QuantityStore::from([("time", 0.0), ("x", 1.5), ("unused", 9.0)]));
        result.record(&QuantityStore::from([("time", 1.0), ("x", 2.5)]));
        assert_eq!(result.ntimes(), 2);
        assert_eq!(&result["x"], &[1.5, 2.5]);
        assert!(result.get("unused").is_none());
    }

    #[test]
    fn result_table_has_header_and_rows() {
        let mut result = SimulationResult::with_columns(["time", "x"], 1);
        result.record(&QuantityStore::from([("time", 0.0), ("x", 0.123456)]));
        let table = result.to_string();
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("time"));
        assert!(lines[1].contains("0.1235"));
    }

    #[test]
    fn significant_digit_formatting() {
        assert_eq!(format_significant(1.0, 4), "1");
        assert_eq!(format_significant(-0.0999833, 4), "-0.09998");
        assert_eq!(format_significant(12340.0, 4), "1.234e4");
    }
}
