use std::{cmp::Ordering, fmt, time::Duration};

/// Rational presentation timestamp, `value / scale` seconds.
///
/// Mirrors the layout of a CoreMedia `CMTime` without the epoch and flag
/// fields. A time with a non-positive scale is invalid.
#[derive(Clone, Copy, Debug, Eq)]
pub struct MediaTime {
    pub value: i64,
    pub scale: i32,
}

impl MediaTime {
    pub const ZERO: Self = Self { value: 0, scale: 1 };

    pub const fn new(value: i64, scale: i32) -> Self {
        Self { value, scale }
    }

    pub const fn invalid() -> Self {
        Self { value: 0, scale: 0 }
    }

    pub fn from_duration(duration: Duration, scale: i32) -> Self {
        let value = duration.as_nanos() * scale.max(0) as u128 / 1_000_000_000;
        Self::new(value as i64, scale)
    }

    pub const fn is_valid(&self) -> bool {
        self.scale > 0
    }

    pub fn as_secs_f64(&self) -> f64 {
        if !self.is_valid() {
            return f64::NAN;
        }

        self.value as f64 / self.scale as f64
    }

    /// Converts to a non-negative duration, `None` for invalid or negative times.
    pub fn to_duration(&self) -> Option<Duration> {
        if !self.is_valid() || self.value < 0 {
            return None;
        }

        let nanos = self.value as u128 * 1_000_000_000 / self.scale as u128;
        Some(Duration::from_nanos(nanos as u64))
    }

    pub fn convert_scale(&self, scale: i32) -> Self {
        if !self.is_valid() || scale <= 0 {
            return Self::invalid();
        }

        let value = self.value as i128 * scale as i128 / self.scale as i128;
        Self::new(value as i64, scale)
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Invalid times sort before every valid time and equal each other.
impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => Ordering::Equal,
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (true, true) => {
                let lhs = self.value as i128 * other.scale as i128;
                let rhs = other.value as i128 * self.scale as i128;
                lhs.cmp(&rhs)
            }
        }
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "invalid");
        }

        write!(f, "{}/{}", self.value, self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_across_scales() {
        assert_eq!(MediaTime::new(1, 1), MediaTime::new(1_000, 1_000));
        assert!(MediaTime::new(1, 30) < MediaTime::new(2_000, 48_000));
        assert!(MediaTime::new(-1, 600) < MediaTime::ZERO);
    }

    #[test]
    fn invalid_sorts_first() {
        assert!(MediaTime::invalid() < MediaTime::new(-100, 1));
        assert_eq!(MediaTime::invalid(), MediaTime::new(5, 0));
        assert!(MediaTime::invalid().as_secs_f64().is_nan());
    }

    #[test]
    fn duration_conversions() {
        let time = MediaTime::from_duration(Duration::from_millis(1_500), 600);
        assert_eq!(time.value, 900);
        assert_eq!(time.to_duration(), Some(Duration::from_millis(1_500)));
        assert_eq!(MediaTime::new(-1, 1).to_duration(), None);
        assert_eq!(time.convert_scale(1_000).value, 1_500);
    }
}
