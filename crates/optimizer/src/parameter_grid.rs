//! Cartesian-product parameter grids.

use backtester::strategy::normalize_name;
use backtester::{ParamValue, ParameterSet};
use serde::{Deserialize, Serialize};

/// Named candidate-value lists whose Cartesian product is searched.
///
/// Combinations are produced in odometer order: the first-added parameter is
/// the outermost loop and the last-added one varies fastest. Nothing is
/// materialized up front; `get(i)` decodes combination `i` directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterGrid {
    params: Vec<(String, Vec<ParamValue>)>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter. Re-adding a name replaces its values in place.
    pub fn add<V: Into<ParamValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let name = name.into();
        let values: Vec<ParamValue> = values.into_iter().map(Into::into).collect();
        match self.params.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = values,
            None => self.params.push((name, values)),
        }
        self
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<ParamValue>,
        I: IntoIterator<Item = (K, Vec<V>)>,
    {
        pairs
            .into_iter()
            .fold(Self::new(), |grid, (name, values)| grid.add(name, values))
    }

    /// Parameter names in iteration order (outermost first).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(name, _)| name.as_str())
    }

    /// Number of combinations: the product of the list lengths, or 1 for a
    /// grid with no parameters.
    pub fn len(&self) -> usize {
        self.params
            .iter()
            .fold(1usize, |acc, (_, values)| acc.saturating_mul(values.len()))
    }

    /// True only when some parameter has no candidate values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Combination at `index` in iteration order.
    pub fn get(&self, index: usize) -> Option<ParameterSet> {
        if index >= self.len() {
            return None;
        }

        let mut remainder = index;
        let mut picked = Vec::with_capacity(self.params.len());
        for (name, values) in self.params.iter().rev() {
            let radix = values.len();
            picked.push((name.clone(), values[remainder % radix].clone()));
            remainder /= radix;
        }
        picked.reverse();
        Some(ParameterSet::from_pairs(picked))
    }

    /// Fresh iterator over all combinations.
    pub fn iter(&self) -> GridIter<'_> {
        GridIter {
            grid: self,
            next: 0,
            len: self.len(),
        }
    }
}

impl<'a> IntoIterator for &'a ParameterGrid {
    type Item = ParameterSet;
    type IntoIter = GridIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over a [`ParameterGrid`].
#[derive(Debug, Clone)]
pub struct GridIter<'a> {
    grid: &'a ParameterGrid,
    next: usize,
    len: usize,
}

impl Iterator for GridIter<'_> {
    type Item = ParameterSet;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.len {
            return None;
        }
        let item = self.grid.get(self.next);
        self.next += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for GridIter<'_> {}

/// Default search space for a built-in strategy. Names are matched case
/// insensitively with `-` treated as `_`.
pub fn predefined_grid(strategy: &str) -> Option<ParameterGrid> {
    let grid = match normalize_name(strategy).as_str() {
        "sma_crossover" => ParameterGrid::new()
            .add("fast_period", [5, 10, 20, 30])
            .add("slow_period", [50, 100, 150, 200]),
        "rsi_mean_reversion" => ParameterGrid::new()
            .add("period", [7, 14, 21, 28])
            .add("oversold", [20, 25, 30])
            .add("overbought", [70, 75, 80]),
        "bollinger_breakout" => ParameterGrid::new()
            .add("period", [10, 20, 30])
            .add("std_dev", [1.5, 2.0, 2.5, 3.0]),
        "macd_momentum" => ParameterGrid::new()
            .add("fast_period", [8, 12, 16])
            .add("slow_period", [21, 26, 30])
            .add("signal_period", [7, 9, 11]),
        _ => return None,
    };
    Some(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_grid_yields_single_empty_combination() {
        let grid = ParameterGrid::new();
        assert_eq!(grid.len(), 1);
        assert!(!grid.is_empty());
        let all: Vec<ParameterSet> = grid.iter().collect();
        assert_eq!(all, vec![ParameterSet::empty()]);
    }

    #[test]
    fn test_insertion_order_cartesian_product() {
        let grid = ParameterGrid::new().add("a", [1, 2]).add("b", [10, 20, 30]);
        assert_eq!(grid.len(), 6);

        let pairs: Vec<(i64, i64)> = grid
            .iter()
            .map(|p| (p.get_i64("a", 0).unwrap(), p.get_i64("b", 0).unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![(1, 10), (1, 20), (1, 30), (2, 10), (2, 20), (2, 30)]
        );

        let first = grid.get(0).unwrap();
        let names: Vec<&str> = first.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_iteration_is_restartable_and_matches_get() {
        let grid = ParameterGrid::from_pairs([("x", vec![1, 2, 3]), ("y", vec![4, 5])]);
        let first: Vec<ParameterSet> = grid.iter().collect();
        let second: Vec<ParameterSet> = (&grid).into_iter().collect();
        assert_eq!(first, second);
        for (i, combo) in first.iter().enumerate() {
            assert_eq!(grid.get(i).as_ref(), Some(combo));
        }
        assert_eq!(grid.get(6), None);
        assert_eq!(grid.iter().len(), 6);
    }

    #[test]
    fn test_empty_value_list_and_replacement() {
        let grid = ParameterGrid::new().add("a", [1, 2]).add("b", Vec::<i64>::new());
        assert_eq!(grid.len(), 0);
        assert!(grid.is_empty());
        assert_eq!(grid.iter().count(), 0);

        let grid = ParameterGrid::new().add("a", [1]).add("b", [2]).add("a", [7, 8]);
        assert_eq!(grid.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(grid.len(), 2);
    }

    #[test]
    fn test_predefined_grids() {
        assert_eq!(predefined_grid("sma_crossover").unwrap().len(), 16);
        assert_eq!(predefined_grid("RSI-Mean-Reversion").unwrap().len(), 36);
        assert_eq!(predefined_grid("bollinger_breakout").unwrap().len(), 12);
        assert_eq!(predefined_grid("macd_momentum").unwrap().len(), 27);
        assert!(predefined_grid("unknown").is_none());
    }
}
