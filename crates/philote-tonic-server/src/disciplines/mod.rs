//! Example disciplines shipped with the `philote-server` binary.

mod paraboloid;
mod quadratic;
mod rosenbrock;

pub use paraboloid::Paraboloid;
pub use quadratic::Quadratic;
pub use rosenbrock::{Rosenbrock, rosen, rosen_der};

use crate::discipline::AnyDiscipline;

/// Selects which example discipline the binary serves.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExampleDiscipline {
    /// Explicit paraboloid `f(x, y)`.
    #[default]
    Paraboloid,
    /// Explicit n-dimensional Rosenbrock function.
    Rosenbrock,
    /// Implicit quadratic `a x^2 + b x + c = 0`.
    Quadratic,
}

impl ExampleDiscipline {
    pub fn build(self) -> AnyDiscipline {
        match self {
            Self::Paraboloid => AnyDiscipline::explicit(Paraboloid),
            Self::Rosenbrock => AnyDiscipline::explicit(Rosenbrock::default()),
            Self::Quadratic => AnyDiscipline::implicit(Quadratic),
        }
    }
}
