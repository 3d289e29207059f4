use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;
use rand_distr::uniform::Error as UniformError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    /// Two tensors that must agree on their shapes do not.
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// `ndarray` refused to view or reshape a buffer.
    Layout(String),
    /// A loss or a penalty term stopped being a finite number.
    NonFinite { what: &'static str },
    /// A value in a model specification is out of its valid range.
    InvalidSpec(String),
    /// A parameter identifier is not registered in the set.
    UnknownParam(String),
    /// A parameter identifier was registered twice in the same set.
    DuplicateParam(String),
    /// A saved state lacks a tensor the model has.
    MissingParam(String),
    /// A parameter generator ran out of values before filling a tensor.
    ExhaustedParamGen { name: String },
    /// A probability distribution could not be built.
    InvalidDistribution(String),
}

impl MlErr {
    /// Builds a `ShapeMismatch` out of two borrowed shapes.
    pub fn shape(what: &'static str, got: &[usize], expected: &[usize]) -> Self {
        Self::ShapeMismatch {
            what,
            got: got.to_vec(),
            expected: expected.to_vec(),
        }
    }
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a shape mismatch in {what}, got {got:?} and expected {expected:?}"
            ),
            MlErr::Layout(msg) => write!(f, "Invalid tensor layout: {msg}"),
            MlErr::NonFinite { what } => write!(f, "The {what} is not a finite number"),
            MlErr::InvalidSpec(msg) => write!(f, "Invalid model specification: {msg}"),
            MlErr::UnknownParam(name) => write!(f, "There's no parameter named {name}"),
            MlErr::DuplicateParam(name) => {
                write!(f, "The parameter {name} was registered more than once")
            }
            MlErr::MissingParam(name) => write!(f, "The saved state has no tensor named {name}"),
            MlErr::ExhaustedParamGen { name } => write!(
                f,
                "The parameter generator was exhausted while initializing {name}"
            ),
            MlErr::InvalidDistribution(msg) => write!(f, "Invalid distribution: {msg}"),
        }
    }
}

impl Error for MlErr {}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Layout(value.to_string())
    }
}

impl From<UniformError> for MlErr {
    fn from(value: UniformError) -> Self {
        Self::InvalidDistribution(value.to_string())
    }
}
