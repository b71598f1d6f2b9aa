use serde::{Deserialize, Serialize};

/// Minimum and maximum over one or more concentration fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl Default for ValueRange {
    /// Series ranges start from 0/0 so that the color scale always contains zero.
    fn default() -> Self {
        ValueRange { min: 0.0, max: 0.0 }
    }
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        ValueRange { min, max }
    }

    pub fn include(&mut self, value: f64) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn merge(self, other: ValueRange) -> ValueRange {
        ValueRange {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn shifted(self, shift: f64) -> ValueRange {
        ValueRange { min: self.min + shift, max: self.max + shift }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

/// A 2-D concentration field indexed `[x, y]`, stored x-major like the solver lattice.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcentrationMatrix {
    pub size_x: usize,
    pub size_y: usize,
    pub data: Vec<f64>,
}

impl ConcentrationMatrix {
    pub fn zeros(size_x: usize, size_y: usize) -> Self {
        ConcentrationMatrix { size_x, size_y, data: vec![0.0; size_x * size_y] }
    }

    pub fn from_vec(size_x: usize, size_y: usize, data: Vec<f64>) -> anyhow::Result<Self> {
        if data.len() != size_x * size_y {
            anyhow::bail!(
                "matrix data has {} values, expected {} x {} = {}",
                data.len(), size_x, size_y, size_x * size_y
            );
        }
        Ok(ConcentrationMatrix { size_x, size_y, data })
    }

    #[inline]
    fn idx(&self, x: usize, y: usize) -> usize {
        x * self.size_y + y
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.data[self.idx(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f64) {
        let i = self.idx(x, y);
        self.data[i] = value;
    }

    pub fn min(&self) -> f64 {
        self.data.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Range of the matrix itself, not anchored at zero.
    pub fn range(&self) -> ValueRange {
        ValueRange { min: self.min(), max: self.max() }
    }

    /// Mean over x for every y, i.e. the profile along the long axis. Length `size_y`.
    pub fn mean_over_x(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.size_y];
        for x in 0..self.size_x {
            let row = &self.data[x * self.size_y..(x + 1) * self.size_y];
            for (s, v) in sums.iter_mut().zip(row) {
                *s += v;
            }
        }
        let n = self.size_x.max(1) as f64;
        sums.into_iter().map(|s| s / n).collect()
    }

    /// Mean over y for every x. Length `size_x`.
    pub fn mean_over_y(&self) -> Vec<f64> {
        let n = self.size_y.max(1) as f64;
        self.data
            .chunks(self.size_y.max(1))
            .map(|row| row.iter().sum::<f64>() / n)
            .collect()
    }

    /// Values along y at a fixed x.
    pub fn row_at_x(&self, x: usize) -> Option<&[f64]> {
        if x >= self.size_x {
            return None;
        }
        Some(&self.data[x * self.size_y..(x + 1) * self.size_y])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConcentrationMatrix {
        // x = 0: [1, 2, 3], x = 1: [3, 4, 5]
        ConcentrationMatrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 3.0, 4.0, 5.0]).unwrap()
    }

    #[test]
    fn test_indexing_is_x_major() {
        let mut m = sample();
        assert_eq!(m.get(1, 0), 3.0);
        m.set(0, 2, 9.0);
        assert_eq!(m.data[2], 9.0);
    }

    #[test]
    fn test_means() {
        let m = sample();
        assert_eq!(m.mean_over_x(), vec![2.0, 3.0, 4.0]);
        assert_eq!(m.mean_over_y(), vec![2.0, 4.0]);
        assert_eq!(m.row_at_x(1), Some(&[3.0, 4.0, 5.0][..]));
        assert!(m.row_at_x(2).is_none());
    }

    #[test]
    fn test_series_range_is_anchored_at_zero() {
        let mut range = ValueRange::default();
        for v in [0.5, 2.0, 1.0] {
            range.include(v);
        }
        assert_eq!(range, ValueRange::new(0.0, 2.0));
        let merged = range.merge(ValueRange::new(-1.0, 1.5));
        assert_eq!(merged, ValueRange::new(-1.0, 2.0));
        assert_eq!(merged.shifted(1.0), ValueRange::new(0.0, 3.0));
    }

    #[test]
    fn test_from_vec_checks_length() {
        assert!(ConcentrationMatrix::from_vec(2, 2, vec![0.0; 3]).is_err());
    }
}
