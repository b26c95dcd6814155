//! Supported arithmetic operators.

use std::fmt;
use std::str::FromStr;

/// One arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

type Apply = fn(f64, f64) -> Option<f64>;

/// Name and implementation of every operator, indexed by discriminant.
/// An implementation returns `None` when the operation is undefined.
const TABLE: [(&str, Apply); 4] = [
    ("add", add),
    ("subtract", subtract),
    ("multiply", multiply),
    ("divide", divide),
];

fn add(a: f64, b: f64) -> Option<f64> {
    Some(a + b)
}

fn subtract(a: f64, b: f64) -> Option<f64> {
    Some(a - b)
}

fn multiply(a: f64, b: f64) -> Option<f64> {
    Some(a * b)
}

fn divide(a: f64, b: f64) -> Option<f64> {
    (b != 0.0).then(|| a / b)
}

impl Operator {
    pub const ALL: [Operator; 4] = [
        Operator::Add,
        Operator::Subtract,
        Operator::Multiply,
        Operator::Divide,
    ];

    pub fn as_str(self) -> &'static str {
        TABLE[self as usize].0
    }

    /// Apply the operator. `None` means the result is undefined
    /// (division by zero).
    pub fn apply(self, a: f64, b: f64) -> Option<f64> {
        (TABLE[self as usize].1)(a, b)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operator {0:?}")]
pub struct UnknownOperator(pub String);

impl FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperator(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_variants() {
        for op in Operator::ALL {
            assert_eq!(op.as_str().parse::<Operator>().unwrap(), op);
        }
    }

    #[test]
    fn test_apply() {
        assert_eq!(Operator::Add.apply(10.0, 5.0), Some(15.0));
        assert_eq!(Operator::Subtract.apply(10.0, 5.0), Some(5.0));
        assert_eq!(Operator::Multiply.apply(10.0, 5.0), Some(50.0));
        assert_eq!(Operator::Divide.apply(10.0, 4.0), Some(2.5));
    }

    #[test]
    fn test_divide_by_zero_is_undefined() {
        assert_eq!(Operator::Divide.apply(10.0, 0.0), None);
        assert_eq!(Operator::Divide.apply(10.0, -0.0), None);
        assert_eq!(Operator::Multiply.apply(10.0, 0.0), Some(0.0));
    }

    #[test]
    fn test_unknown_operator() {
        let err = "pow".parse::<Operator>().unwrap_err();
        assert_eq!(err, UnknownOperator("pow".into()));
        assert!("Add".parse::<Operator>().is_err());
        assert!("".parse::<Operator>().is_err());
    }
}
