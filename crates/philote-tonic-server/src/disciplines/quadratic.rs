use crate::discipline::{Discipline, ImplicitDiscipline};
use philote_tonic_core::{ArrayMap, Jacobian, Metadata, Result, proto::DisciplineProperties};

/// Implicit quadratic: residual `R(x) = a x^2 + b x + c` in output `x`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Quadratic;

impl Discipline for Quadratic {
    fn setup(&mut self, meta: &mut Metadata) -> Result<()> {
        meta.add_input("a", &[1], "")?;
        meta.add_input("b", &[1], "")?;
        meta.add_input("c", &[1], "")?;
        meta.add_output("x", &[1], "")
    }

    fn setup_partials(&mut self, meta: &mut Metadata) -> Result<()> {
        meta.declare_partials("x", "a");
        meta.declare_partials("x", "b");
        meta.declare_partials("x", "c");
        meta.declare_partials("x", "x");
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

fn coefficients(inputs: &ArrayMap) -> Result<(f64, f64, f64)> {
    Ok((inputs.scalar("a")?, inputs.scalar("b")?, inputs.scalar("c")?))
}

impl ImplicitDiscipline for Quadratic {
    fn compute_residuals(
        &mut self,
        inputs: &ArrayMap,
        outputs: &ArrayMap,
        residuals: &mut ArrayMap,
    ) -> Result<()> {
        let (a, b, c) = coefficients(inputs)?;
        let x = outputs.scalar("x")?;
        residuals["x"][0] = a * x * x + b * x + c;
        Ok(())
    }

    /// Takes the `+` root; the initial guess is ignored.
    fn solve_residuals(&mut self, inputs: &ArrayMap, outputs: &mut ArrayMap) -> Result<()> {
        let (a, b, c) = coefficients(inputs)?;
        outputs["x"][0] = (-b + (b * b - 4.0 * a * c).sqrt()) / (2.0 * a);
        Ok(())
    }

    fn residual_partials(
        &mut self,
        inputs: &ArrayMap,
        outputs: &ArrayMap,
        jac: &mut Jacobian,
    ) -> Result<()> {
        let (a, b, _) = coefficients(inputs)?;
        let x = outputs.scalar("x")?;
        jac[("x", "a")][0] = x * x;
        jac[("x", "b")][0] = x;
        jac[("x", "c")][0] = 1.0;
        jac[("x", "x")][0] = 2.0 * a * x + b;
        Ok(())
    }
}
