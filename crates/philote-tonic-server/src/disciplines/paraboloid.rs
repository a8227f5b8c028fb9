use crate::discipline::{Discipline, ExplicitDiscipline};
use philote_tonic_core::{ArrayMap, Jacobian, Metadata, Result, proto::DisciplineProperties};

/// `f = (x - 3)^2 + x y + (y + 4)^2 - 3`
#[derive(Clone, Copy, Debug, Default)]
pub struct Paraboloid;

impl Discipline for Paraboloid {
    fn setup(&mut self, meta: &mut Metadata) -> Result<()> {
        meta.add_input("x", &[1], "m")?;
        meta.add_input("y", &[1], "m")?;
        meta.add_output("f", &[1], "m**2")
    }

    fn setup_partials(&mut self, meta: &mut Metadata) -> Result<()> {
        meta.declare_partials("f", "*");
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

impl ExplicitDiscipline for Paraboloid {
    fn compute(&mut self, inputs: &ArrayMap, outputs: &mut ArrayMap) -> Result<()> {
        let x = inputs.scalar("x")?;
        let y = inputs.scalar("y")?;
        outputs["f"][0] = (x - 3.0).powi(2) + x * y + (y + 4.0).powi(2) - 3.0;
        Ok(())
    }

    fn compute_partials(&mut self, inputs: &ArrayMap, jac: &mut Jacobian) -> Result<()> {
        let x = inputs.scalar("x")?;
        let y = inputs.scalar("y")?;
        jac[("f", "x")][0] = 2.0 * x - 6.0 + y;
        jac[("f", "y")][0] = 2.0 * y + 8.0 + x;
        Ok(())
    }
}
