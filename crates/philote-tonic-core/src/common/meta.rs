//! # Variable and Partials Metadata
//!
//! A discipline describes every value it exchanges with a [`Metadata`]
//! registry: inputs, outputs, the residual counterparts of implicit outputs,
//! and the `(of, wrt)` pairs for which it provides partial derivatives.
//!
//! The registry is rebuilt from scratch on every `Setup` and is read-only for
//! the duration of an evaluation. Buffers handed to the discipline are
//! allocated from it and checked against it afterwards.

use crate::{
    Error, Result,
    array::{Array, ArrayMap, Jacobian},
    types::{SCALAR_SHAPE, WILDCARD},
};
use core::fmt;

/// Role of a declared variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Input,
    Output,
    Residual,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Residual => "residual",
        })
    }
}

/// Whether a discipline maps inputs to outputs directly or defines residual
/// equations in its outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Explicit,
    Implicit,
}

impl Kind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Implicit => "implicit",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableMeta {
    pub name: String,
    pub role: Role,
    pub shape: Vec<usize>,
    pub units: String,
}

impl VariableMeta {
    /// Number of elements in the flattened array.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
}

/// A declared partial derivative `d(of)/d(wrt)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialMeta {
    pub of: String,
    pub wrt: String,
}

/// Shape of the Jacobian block `d(of)/d(wrt)`.
///
/// Concatenates both shapes, except that a `[1]` shape on either side is
/// squashed away and the block takes the other variable's shape.
pub fn block_shape(of: &[usize], wrt: &[usize]) -> Vec<usize> {
    if of == SCALAR_SHAPE {
        wrt.to_vec()
    } else if wrt == SCALAR_SHAPE {
        of.to_vec()
    } else {
        of.iter().chain(wrt).copied().collect()
    }
}

/// Registry of the variables and partials a discipline exposes.
#[derive(Clone, Debug, PartialEq)]
pub struct Metadata {
    kind: Kind,
    variables: Vec<VariableMeta>,
    partials: Vec<PartialMeta>,
}

impl Metadata {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            variables: Vec::new(),
            partials: Vec::new(),
        }
    }

    pub fn explicit() -> Self {
        Self::new(Kind::Explicit)
    }

    pub fn implicit() -> Self {
        Self::new(Kind::Implicit)
    }

    /// Rebuilds a registry from definitions fetched over the wire, without
    /// applying declaration-time expansion.
    pub fn from_definitions(
        kind: Kind,
        variables: Vec<VariableMeta>,
        partials: Vec<PartialMeta>,
    ) -> Self {
        Self {
            kind,
            variables,
            partials,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn clear(&mut self) {
        self.variables.clear();
        self.partials.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.partials.is_empty()
    }

    /// Declares an input. An empty `shape` means `[1]`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidShape`] if any dimension is zero.
    /// - [`Error::DuplicateVariable`] if `name` is already an input.
    pub fn add_input(&mut self, name: &str, shape: &[usize], units: &str) -> Result<()> {
        self.push(name, Role::Input, shape, units)
    }

    /// Declares an output. Implicit disciplines also get a residual of the
    /// same name, shape and units.
    ///
    /// # Errors
    ///
    /// Same as [`Metadata::add_input`].
    pub fn add_output(&mut self, name: &str, shape: &[usize], units: &str) -> Result<()> {
        self.push(name, Role::Output, shape, units)?;
        if self.kind == Kind::Implicit {
            self.push(name, Role::Residual, shape, units)?;
        }
        Ok(())
    }

    fn push(&mut self, name: &str, role: Role, shape: &[usize], units: &str) -> Result<()> {
        let shape = if shape.is_empty() {
            SCALAR_SHAPE.to_vec()
        } else {
            shape.to_vec()
        };
        if shape.contains(&0) {
            return Err(Error::InvalidShape {
                name: name.to_string(),
                shape,
            });
        }
        if self.variable(name, role).is_some() {
            return Err(Error::DuplicateVariable {
                name: name.to_string(),
                role,
            });
        }
        self.variables.push(VariableMeta {
            name: name.to_string(),
            role,
            shape,
            units: units.to_string(),
        });
        Ok(())
    }

    /// Declares `d(of)/d(wrt)`. `wrt == "*"` expands to one pair per input
    /// declared so far. Pairs already declared are skipped.
    ///
    /// Names are checked when the Jacobian is allocated, not here.
    pub fn declare_partials(&mut self, of: &str, wrt: &str) {
        if wrt == WILDCARD {
            let inputs: Vec<String> = self
                .with_role(Role::Input)
                .map(|v| v.name.clone())
                .collect();
            for input in inputs {
                self.push_partial(of, &input);
            }
        } else {
            self.push_partial(of, wrt);
        }
    }

    fn push_partial(&mut self, of: &str, wrt: &str) {
        if self.partials.iter().any(|p| p.of == of && p.wrt == wrt) {
            return;
        }
        self.partials.push(PartialMeta {
            of: of.to_string(),
            wrt: wrt.to_string(),
        });
    }

    /// All variables in declaration order.
    pub fn variables(&self) -> &[VariableMeta] {
        &self.variables
    }

    /// All partials in declaration order.
    pub fn partials(&self) -> &[PartialMeta] {
        &self.partials
    }

    pub fn variable(&self, name: &str, role: Role) -> Option<&VariableMeta> {
        self.variables
            .iter()
            .find(|v| v.role == role && v.name == name)
    }

    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &VariableMeta> {
        self.variables.iter().filter(move |v| v.role == role)
    }

    /// Zero-filled buffers for every variable of `role`, in declaration order.
    pub fn allocate(&self, role: Role) -> ArrayMap {
        self.with_role(role)
            .map(|v| (v.name.clone(), Array::zeros(&v.shape)))
            .collect()
    }

    /// Resolves the `of` variable of a partial. Explicit partials differentiate
    /// outputs, implicit partials differentiate residuals.
    fn partial_of(&self, p: &PartialMeta) -> Result<&VariableMeta> {
        let role = match self.kind {
            Kind::Explicit => Role::Output,
            Kind::Implicit => Role::Residual,
        };
        self.variable(&p.of, role)
            .ok_or_else(|| Error::UndeclaredPartialVariable {
                of: p.of.clone(),
                wrt: p.wrt.clone(),
                missing: p.of.clone(),
            })
    }

    /// Resolves the `wrt` variable of a partial. Implicit partials may also be
    /// taken with respect to outputs.
    fn partial_wrt(&self, p: &PartialMeta) -> Result<&VariableMeta> {
        let found = match self.kind {
            Kind::Explicit => self.variable(&p.wrt, Role::Input),
            Kind::Implicit => self
                .variable(&p.wrt, Role::Input)
                .or_else(|| self.variable(&p.wrt, Role::Output)),
        };
        found.ok_or_else(|| Error::UndeclaredPartialVariable {
            of: p.of.clone(),
            wrt: p.wrt.clone(),
            missing: p.wrt.clone(),
        })
    }

    /// Shape of the block for a declared `(of, wrt)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndeclaredPartialVariable`] if either name does not
    /// resolve to a declared variable.
    pub fn partial_shape(&self, p: &PartialMeta) -> Result<Vec<usize>> {
        let of = self.partial_of(p)?;
        let wrt = self.partial_wrt(p)?;
        Ok(block_shape(&of.shape, &wrt.shape))
    }

    /// Zero-filled Jacobian blocks for every declared partial, in declaration
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndeclaredPartialVariable`] for the first partial that
    /// names an undeclared variable.
    pub fn allocate_jacobian(&self) -> Result<Jacobian> {
        let mut jac = Jacobian::new();
        for p in &self.partials {
            let shape = self.partial_shape(p)?;
            jac.set(&p.of, &p.wrt, Array::zeros(&shape));
        }
        Ok(jac)
    }

    /// Checks that `arrays` holds exactly one correctly sized buffer for every
    /// variable of `role`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownVariable`] if a declared variable is missing.
    /// - [`Error::ShapeMismatch`] if a buffer has the wrong element count.
    pub fn check_arrays(&self, role: Role, arrays: &ArrayMap) -> Result<()> {
        for v in self.with_role(role) {
            let array = arrays.get(&v.name).ok_or_else(|| Error::UnknownVariable {
                name: v.name.clone(),
                role,
            })?;
            if array.len() != v.size() {
                return Err(Error::ShapeMismatch {
                    name: v.name.clone(),
                    expected: v.shape.clone(),
                    actual: array.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Checks every declared Jacobian block against its expected shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if a block was resized, and the errors
    /// of [`Metadata::partial_shape`].
    pub fn check_jacobian(&self, jac: &Jacobian) -> Result<()> {
        for p in &self.partials {
            let expected = self.partial_shape(p)?;
            let size: usize = expected.iter().product();
            match jac.get(&p.of, &p.wrt) {
                Some(block) if block.len() == size => {}
                Some(block) => {
                    return Err(Error::ShapeMismatch {
                        name: format!("{}/{}", p.of, p.wrt),
                        expected,
                        actual: block.shape().to_vec(),
                    });
                }
                None => {
                    return Err(Error::UndeclaredPartialVariable {
                        of: p.of.clone(),
                        wrt: p.wrt.clone(),
                        missing: p.of.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
