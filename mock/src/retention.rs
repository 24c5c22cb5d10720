//! Bounds on how many received exchanges are kept.

/// `first` keeps the first K arrivals, `last` the most recent K. `None` is
/// unbounded; `Some(0)` keeps nothing on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    pub first: Option<usize>,
    pub last: Option<usize>,
}

impl RetentionPolicy {
    pub const UNBOUNDED: Self = Self {
        first: None,
        last: None,
    };

    /// From the `-1 = unlimited` convention used by configuration.
    pub fn from_bounds(first: i64, last: i64) -> Self {
        let bound = |v: i64| usize::try_from(v).ok();
        Self {
            first: bound(first),
            last: bound(last),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.first.is_none() && self.last.is_none()
    }

    /// Returns the retained list after the arrival of `item`, given the number
    /// of arrivals that came before it.
    pub fn retain<T>(&self, mut retained: Vec<T>, arrivals_before: usize, item: T) -> Vec<T> {
        let first = self.first.filter(|k| *k > 0);
        let last = self.last.filter(|k| *k > 0);
        match (self.first, self.last) {
            (Some(0), Some(0)) => {}
            (None, None) => retained.push(item),
            _ => {
                if first.is_some_and(|k| arrivals_before < k) {
                    retained.push(item);
                } else if let Some(k) = last {
                    // evict the oldest of the "last" window, never one of the first K
                    if let Some(oldest) = retained.len().checked_sub(k) {
                        if first.is_none_or(|f| f <= oldest) {
                            retained.remove(oldest);
                        }
                    }
                    retained.push(item);
                }
            }
        }
        retained
    }
}
