use std::fmt;
use std::iter::Sum;

use serde::Serialize;

/// Whole-unit point quantity.
///
/// Signed so that a corrupted negative balance coming out of a store can be
/// represented and rejected instead of silently wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Points(i64);

impl Points {
    pub const ZERO: Points = Points(0);

    pub const fn new(value: i64) -> Self {
        Points(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub fn is_multiple_of(self, unit: Points) -> bool {
        unit.0 != 0 && self.0 % unit.0 == 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Points)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Points)
    }
}

impl From<i64> for Points {
    fn from(value: i64) -> Self {
        Points(value)
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for Points {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Points(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Points {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Points(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Points {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sum for Points {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Points::ZERO, |acc, p| acc + p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_zero() {
        assert_eq!(Points::default(), Points::ZERO);
    }

    #[test]
    fn display_is_plain_integer() {
        assert_eq!(Points::new(10_000_000).to_string(), "10000000");
        assert_eq!(Points::new(-5).to_string(), "-5");
    }

    #[test]
    fn add_and_sub() {
        assert_eq!(Points::new(100) + Points::new(50), Points::new(150));
        assert_eq!(Points::new(100) - Points::new(30), Points::new(70));

        let mut p = Points::new(1);
        p += Points::new(2);
        assert_eq!(p, Points::new(3));
    }

    #[test]
    fn checked_ops_detect_overflow() {
        assert_eq!(Points::new(i64::MAX).checked_add(Points::new(1)), None);
        assert_eq!(Points::new(i64::MIN).checked_sub(Points::new(1)), None);
        assert_eq!(
            Points::new(5).checked_sub(Points::new(7)),
            Some(Points::new(-2))
        );
    }

    #[test]
    fn multiple_of_unit() {
        assert!(Points::new(200).is_multiple_of(Points::new(100)));
        assert!(!Points::new(150).is_multiple_of(Points::new(100)));
        // a zero unit never divides anything
        assert!(!Points::new(0).is_multiple_of(Points::ZERO));
    }

    #[test]
    fn sum_over_iterator() {
        let total: Points = [100, 200, 300].into_iter().map(Points::new).sum();
        assert_eq!(total, Points::new(600));
    }

    #[test]
    fn ordering() {
        assert!(Points::new(-1) < Points::ZERO);
        assert!(Points::new(100) > Points::new(99));
    }
}
