use crate::discipline::{Discipline, ExplicitDiscipline};
use philote_tonic_core::{
    ArrayMap, Error, Jacobian, Metadata, Options, Result, proto::DisciplineProperties,
};

const DEFAULT_DIMENSION: usize = 2;

/// The n-dimensional Rosenbrock function of input vector `x`.
///
/// The dimension is read from the `dimension` option and defaults to 2.
#[derive(Clone, Copy, Debug)]
pub struct Rosenbrock {
    dimension: usize,
}

impl Default for Rosenbrock {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
        }
    }
}

impl Rosenbrock {
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

pub fn rosen(x: &[f64]) -> f64 {
    x.windows(2)
        .map(|w| 100.0 * (w[1] - w[0] * w[0]).powi(2) + (1.0 - w[0]).powi(2))
        .sum()
}

pub fn rosen_der(x: &[f64], der: &mut [f64]) {
    let n = x.len();
    der.fill(0.0);
    for i in 0..n.saturating_sub(1) {
        let t = x[i + 1] - x[i] * x[i];
        der[i] += -400.0 * x[i] * t - 2.0 * (1.0 - x[i]);
        der[i + 1] += 200.0 * t;
    }
}

impl Discipline for Rosenbrock {
    fn initialize(&mut self, options: &Options) -> Result<()> {
        let Some(&value) = options.get("dimension") else {
            self.dimension = DEFAULT_DIMENSION;
            return Ok(());
        };
        if value.fract() != 0.0 || value < 2.0 || value > u32::MAX as f64 {
            return Err(Error::InvalidOption {
                name: "dimension".to_string(),
                reason: format!("expected an integer >= 2, got {value}"),
            });
        }
        self.dimension = value as usize;
        Ok(())
    }

    fn setup(&mut self, meta: &mut Metadata) -> Result<()> {
        meta.add_input("x", &[self.dimension], "")?;
        meta.add_output("f", &[1], "")
    }

    fn setup_partials(&mut self, meta: &mut Metadata) -> Result<()> {
        meta.declare_partials("f", "x");
        Ok(())
    }

    fn properties(&self) -> DisciplineProperties {
        DisciplineProperties {
            continuous: true,
            differentiable: true,
            provides_gradients: true,
        }
    }
}

impl ExplicitDiscipline for Rosenbrock {
    fn compute(&mut self, inputs: &ArrayMap, outputs: &mut ArrayMap) -> Result<()> {
        outputs["f"][0] = rosen(inputs["x"].as_slice());
        Ok(())
    }

    fn compute_partials(&mut self, inputs: &ArrayMap, jac: &mut Jacobian) -> Result<()> {
        rosen_der(inputs["x"].as_slice(), jac[("f", "x")].as_mut_slice());
        Ok(())
    }
}
