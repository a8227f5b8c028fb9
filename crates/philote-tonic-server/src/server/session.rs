//! Per-server discipline session.
//!
//! A [`Session`] owns the hosted discipline, its current metadata snapshot and
//! the negotiated stream options. The gRPC layer keeps it behind a single
//! async mutex so that `Setup` never runs while a discipline hook does.
//! Evaluations receive their inputs outside the lock and recheck the
//! metadata before invoking the discipline.
//!
//! State machine:
//!
//! ```text
//! Uninitialized --Setup--> Configured --Setup--> Configured
//!       ^                       |
//!       +------SetOptions-------+
//! ```
//!
//! Evaluation is only allowed in the `Configured` state.

use crate::discipline::AnyDiscipline;
use philote_tonic_core::{
    ArrayMap, Error, Jacobian, Kind, Metadata, Options, Result, Role, StreamOptions,
    proto::DisciplineProperties,
};

#[derive(Debug)]
pub struct Session {
    discipline: AnyDiscipline,
    meta: Metadata,
    stream_options: StreamOptions,
    configured: bool,
}

impl Session {
    /// Wraps `discipline` and runs its `initialize` hook with empty options.
    pub fn new(mut discipline: AnyDiscipline, stream_options: StreamOptions) -> Result<Self> {
        discipline.initialize(&Options::new())?;
        let meta = discipline.new_metadata();
        Ok(Self {
            discipline,
            meta,
            stream_options,
            configured: false,
        })
    }

    pub fn kind(&self) -> Kind {
        self.discipline.kind()
    }

    pub fn properties(&self) -> DisciplineProperties {
        self.discipline.properties()
    }

    pub fn stream_options(&self) -> StreamOptions {
        self.stream_options
    }

    pub fn set_stream_options(&mut self, options: StreamOptions) {
        self.stream_options = options;
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Re-initializes the discipline and drops all metadata. A new `Setup` is
    /// required before the next evaluation.
    pub fn set_options(&mut self, options: &Options) -> Result<()> {
        self.meta.clear();
        self.configured = false;
        self.discipline.initialize(options)
    }

    /// Rebuilds the metadata from scratch. On failure the session is left
    /// unconfigured with empty metadata.
    pub fn setup(&mut self) -> Result<()> {
        self.meta.clear();
        self.configured = false;

        let result = self
            .discipline
            .setup(&mut self.meta)
            .and_then(|()| self.discipline.setup_partials(&mut self.meta));
        match result {
            Ok(()) => {
                self.configured = true;
                Ok(())
            }
            Err(e) => {
                self.meta.clear();
                Err(e)
            }
        }
    }

    /// Current metadata. Empty until the first successful `Setup`.
    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    /// Metadata for an evaluation RPC of the given discipline kind.
    ///
    /// # Errors
    ///
    /// - [`Error::WrongDisciplineKind`] if the hosted discipline is not `kind`.
    /// - [`Error::NotConfigured`] before the first successful `Setup`.
    pub fn evaluation_metadata(&self, kind: Kind) -> Result<&Metadata> {
        if self.kind() != kind {
            return Err(Error::WrongDisciplineKind {
                expected: kind.as_str(),
            });
        }
        if !self.configured {
            return Err(Error::NotConfigured);
        }
        Ok(&self.meta)
    }

    pub fn compute_function(&mut self, inputs: &ArrayMap) -> Result<ArrayMap> {
        self.evaluation_metadata(Kind::Explicit)?;
        let mut outputs = self.meta.allocate(Role::Output);
        self.discipline
            .as_explicit()?
            .compute(inputs, &mut outputs)?;
        self.meta.check_arrays(Role::Output, &outputs)?;
        Ok(outputs)
    }

    pub fn compute_gradient(&mut self, inputs: &ArrayMap) -> Result<Jacobian> {
        self.evaluation_metadata(Kind::Explicit)?;
        let mut jac = self.meta.allocate_jacobian()?;
        self.discipline
            .as_explicit()?
            .compute_partials(inputs, &mut jac)?;
        self.meta.check_jacobian(&jac)?;
        Ok(jac)
    }

    pub fn compute_residuals(&mut self, inputs: &ArrayMap, outputs: &ArrayMap) -> Result<ArrayMap> {
        self.evaluation_metadata(Kind::Implicit)?;
        let mut residuals = self.meta.allocate(Role::Residual);
        self.discipline
            .as_implicit()?
            .compute_residuals(inputs, outputs, &mut residuals)?;
        self.meta.check_arrays(Role::Residual, &residuals)?;
        Ok(residuals)
    }

    /// Solves for the outputs, starting from `outputs` as the initial guess.
    pub fn solve_residuals(&mut self, inputs: &ArrayMap, mut outputs: ArrayMap) -> Result<ArrayMap> {
        self.evaluation_metadata(Kind::Implicit)?;
        self.discipline
            .as_implicit()?
            .solve_residuals(inputs, &mut outputs)?;
        self.meta.check_arrays(Role::Output, &outputs)?;
        Ok(outputs)
    }

    pub fn compute_residual_gradients(
        &mut self,
        inputs: &ArrayMap,
        outputs: &ArrayMap,
    ) -> Result<Jacobian> {
        self.evaluation_metadata(Kind::Implicit)?;
        let mut jac = self.meta.allocate_jacobian()?;
        self.discipline
            .as_implicit()?
            .residual_partials(inputs, outputs, &mut jac)?;
        self.meta.check_jacobian(&jac)?;
        Ok(jac)
    }
}
