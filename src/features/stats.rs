//! Amount statistics: incremental cumulative stats and sliding-window summaries.


/// Cumulative amount statistics updated one observation at a time.
///
/// Variance uses Welford's update; `std_sample` applies the n-1 denominator
/// and is 0 below two observations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    sum: f64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        self.sum += x;
        if self.count == 1 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn std_sample(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).max(0.0).sqrt()
        }
    }
}

impl FromIterator<f64> for RunningStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut s = RunningStats::default();
        for x in iter {
            s.push(x);
        }
        s
    }
}

/// Count/sum/mean over a trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowAggregate {
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
}

/// Running window total with rows added at the front and removed at the back.
///
/// Uses Neumaier-compensated summation so that repeated add/remove cycles do not
/// accumulate rounding error; an emptied window resets to exactly zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlidingSum {
    count: u64,
    sum: f64,
    compensation: f64,
}

impl SlidingSum {
    fn accumulate(&mut self, x: f64) {
        let t = self.sum + x;
        if self.sum.abs() >= x.abs() {
            self.compensation += (self.sum - t) + x;
        } else {
            self.compensation += (x - t) + self.sum;
        }
        self.sum = t;
    }

    pub fn add(&mut self, x: f64) {
        self.count += 1;
        self.accumulate(x);
    }

    pub fn remove(&mut self, x: f64) {
        self.count = self.count.saturating_sub(1);
        if self.count == 0 {
            *self = Self::default();
        } else {
            self.accumulate(-x);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Empty windows have mean 0.
    pub fn aggregate(&self) -> WindowAggregate {
        let sum = self.sum + self.compensation;
        let mean = if self.count == 0 { 0.0 } else { sum / self.count as f64 };
        WindowAggregate {
            count: self.count,
            sum,
            mean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_observation_has_zero_std() {
        let s: RunningStats = [42.0].into_iter().collect();
        assert_eq!(s.count(), 1);
        assert_eq!(s.std_sample(), 0.0);
        assert_eq!(s.min(), 42.0);
        assert_eq!(s.max(), 42.0);
    }

    #[test]
    fn sample_std_matches_two_pass() {
        let xs = [50.0, 30.0, 20.0, 7.5];
        let s: RunningStats = xs.into_iter().collect();
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
        assert!((s.std_sample() - var.sqrt()).abs() < 1e-9);
        assert_eq!(s.sum(), 107.5);
        assert_eq!(s.min(), 7.5);
        assert_eq!(s.max(), 50.0);
    }

    #[test]
    fn empty_window_mean_is_zero() {
        let w = SlidingSum::default().aggregate();
        assert_eq!(w.count, 0);
        assert_eq!(w.mean, 0.0);
    }

    #[test]
    fn sliding_sum_tracks_fresh_sum_without_drift() {
        let amounts: Vec<f64> = (0..5_000).map(|i| 0.1 + (i % 7) as f64 * 1e6).collect();
        let width = 30;
        let mut window = SlidingSum::default();
        for (i, x) in amounts.iter().enumerate() {
            window.add(*x);
            if i >= width {
                window.remove(amounts[i - width]);
            }
            let lo = i.saturating_sub(width - 1);
            let fresh: f64 = amounts[lo..=i].iter().sum();
            let agg = window.aggregate();
            assert_eq!(agg.count as usize, i + 1 - lo);
            assert!((agg.sum - fresh).abs() <= fresh.abs() * 1e-12, "i={i} {} vs {fresh}", agg.sum);
        }
    }

    #[test]
    fn emptied_window_is_exactly_zero() {
        let mut w = SlidingSum::default();
        for x in [0.1, 0.2, 0.3] {
            w.add(x);
        }
        for x in [0.1, 0.2, 0.3] {
            w.remove(x);
        }
        assert_eq!(w.aggregate(), WindowAggregate::default());
        w.add(5.0);
        assert_eq!(w.aggregate().sum, 5.0);
    }
}
