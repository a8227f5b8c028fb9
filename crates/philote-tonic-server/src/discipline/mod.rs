//! # Discipline Abstraction
//!
//! A discipline is the user-supplied unit of computation served over gRPC.
//! Every discipline implements [`Discipline`] for configuration and metadata
//! declaration, plus exactly one of:
//!
//! - [`ExplicitDiscipline`]: computes outputs directly from inputs.
//! - [`ImplicitDiscipline`]: defines residual equations in its outputs and
//!   supports residual evaluation, solving and linearization.
//!
//! The server owns one discipline wrapped in [`AnyDiscipline`] and drives it
//! through `initialize -> setup -> setup_partials -> evaluate`.
//!
//! Hooks that a discipline does not override return
//! [`Error::NotImplemented`], which fails the RPC without affecting the
//! process.

use philote_tonic_core::{
    ArrayMap, Error, Jacobian, Kind, Metadata, Options, Result, proto::DisciplineProperties,
};

/// Configuration and metadata hooks shared by explicit and implicit
/// disciplines.
pub trait Discipline: Send + 'static {
    /// Reads discipline-specific options. Always runs before [`Discipline::setup`],
    /// once with empty options when the server starts and again for every
    /// `SetOptions` call.
    fn initialize(&mut self, _options: &Options) -> Result<()> {
        Ok(())
    }

    /// Declares every variable through [`Metadata::add_input`] and
    /// [`Metadata::add_output`]. `meta` is empty on entry.
    fn setup(&mut self, meta: &mut Metadata) -> Result<()>;

    /// Declares partials through [`Metadata::declare_partials`]. Runs after
    /// [`Discipline::setup`] on the same registry.
    fn setup_partials(&mut self, _meta: &mut Metadata) -> Result<()> {
        Ok(())
    }

    fn properties(&self) -> DisciplineProperties {
        DisciplineProperties {
            continuous: false,
            differentiable: false,
            provides_gradients: false,
        }
    }
}

pub trait ExplicitDiscipline: Discipline {
    /// Fills `outputs` from `inputs`. Both maps hold one zero-initialized
    /// buffer per declared variable.
    fn compute(&mut self, inputs: &ArrayMap, outputs: &mut ArrayMap) -> Result<()>;

    /// Fills one block per declared partial `d(output)/d(input)`.
    fn compute_partials(&mut self, _inputs: &ArrayMap, _jac: &mut Jacobian) -> Result<()> {
        Err(Error::NotImplemented {
            hook: "compute_partials",
        })
    }
}

pub trait ImplicitDiscipline: Discipline {
    /// Evaluates the residuals for the given inputs and outputs.
    fn compute_residuals(
        &mut self,
        inputs: &ArrayMap,
        outputs: &ArrayMap,
        residuals: &mut ArrayMap,
    ) -> Result<()>;

    /// Drives the residuals to zero by updating `outputs` in place. `outputs`
    /// holds the initial guess on entry.
    fn solve_residuals(&mut self, _inputs: &ArrayMap, _outputs: &mut ArrayMap) -> Result<()> {
        Err(Error::NotImplemented {
            hook: "solve_residuals",
        })
    }

    /// Fills `d(residual)/d(input)` and `d(residual)/d(output)` blocks.
    fn residual_partials(
        &mut self,
        _inputs: &ArrayMap,
        _outputs: &ArrayMap,
        _jac: &mut Jacobian,
    ) -> Result<()> {
        Err(Error::NotImplemented {
            hook: "residual_partials",
        })
    }
}

/// The discipline hosted by a server, tagged by variant.
pub enum AnyDiscipline {
    Explicit(Box<dyn ExplicitDiscipline>),
    Implicit(Box<dyn ImplicitDiscipline>),
}

impl AnyDiscipline {
    pub fn explicit(d: impl ExplicitDiscipline) -> Self {
        Self::Explicit(Box::new(d))
    }

    pub fn implicit(d: impl ImplicitDiscipline) -> Self {
        Self::Implicit(Box::new(d))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Self::Explicit(_) => Kind::Explicit,
            Self::Implicit(_) => Kind::Implicit,
        }
    }

    /// An empty registry of the matching kind.
    pub fn new_metadata(&self) -> Metadata {
        Metadata::new(self.kind())
    }

    pub fn initialize(&mut self, options: &Options) -> Result<()> {
        match self {
            Self::Explicit(d) => d.initialize(options),
            Self::Implicit(d) => d.initialize(options),
        }
    }

    pub fn setup(&mut self, meta: &mut Metadata) -> Result<()> {
        match self {
            Self::Explicit(d) => d.setup(meta),
            Self::Implicit(d) => d.setup(meta),
        }
    }

    pub fn setup_partials(&mut self, meta: &mut Metadata) -> Result<()> {
        match self {
            Self::Explicit(d) => d.setup_partials(meta),
            Self::Implicit(d) => d.setup_partials(meta),
        }
    }

    pub fn properties(&self) -> DisciplineProperties {
        match self {
            Self::Explicit(d) => d.properties(),
            Self::Implicit(d) => d.properties(),
        }
    }

    /// The explicit discipline, or [`Error::WrongDisciplineKind`].
    pub fn as_explicit(&mut self) -> Result<&mut dyn ExplicitDiscipline> {
        match self {
            Self::Explicit(d) => Ok(d.as_mut()),
            Self::Implicit(_) => Err(Error::WrongDisciplineKind {
                expected: Kind::Explicit.as_str(),
            }),
        }
    }

    /// The implicit discipline, or [`Error::WrongDisciplineKind`].
    pub fn as_implicit(&mut self) -> Result<&mut dyn ImplicitDiscipline> {
        match self {
            Self::Implicit(d) => Ok(d.as_mut()),
            Self::Explicit(_) => Err(Error::WrongDisciplineKind {
                expected: Kind::Implicit.as_str(),
            }),
        }
    }
}

impl core::fmt::Debug for AnyDiscipline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "AnyDiscipline({})", self.kind().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use philote_tonic_core::Role;

    struct Identity;

    impl Discipline for Identity {
        fn setup(&mut self, meta: &mut Metadata) -> Result<()> {
            meta.add_input("x", &[2], "")?;
            meta.add_output("y", &[2], "")
        }
    }

    impl ExplicitDiscipline for Identity {
        fn compute(&mut self, inputs: &ArrayMap, outputs: &mut ArrayMap) -> Result<()> {
            outputs["y"].assign("y", inputs["x"].as_slice())
        }
    }

    #[test]
    fn unimplemented_hooks_report_their_name() {
        let mut d = AnyDiscipline::explicit(Identity);
        let mut meta = d.new_metadata();
        d.setup(&mut meta).unwrap();
        let inputs = meta.allocate(Role::Input);
        let mut jac = Jacobian::new();
        let err = d
            .as_explicit()
            .unwrap()
            .compute_partials(&inputs, &mut jac)
            .unwrap_err();
        assert_eq!(
            err,
            Error::NotImplemented {
                hook: "compute_partials"
            }
        );
    }

    #[test]
    fn variant_accessors_reject_the_other_kind() {
        let mut d = AnyDiscipline::explicit(Identity);
        assert_eq!(d.kind(), Kind::Explicit);
        assert!(d.as_explicit().is_ok());
        assert!(matches!(
            d.as_implicit(),
            Err(Error::WrongDisciplineKind {
                expected: "implicit"
            })
        ));
        assert!(!d.properties().provides_gradients);
    }
}
