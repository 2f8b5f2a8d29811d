//! Levenberg-Marquardt backend.
//!
//! Residual models implement [`NllsProblem`]; [`solve`] drives them through
//! the `levenberg-marquardt` crate and maps its termination onto
//! [`CalibrationError::NotConverged`].

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::debug;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Nonlinear least-squares problem over a flat parameter vector.
pub trait NllsProblem {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64>;
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64>;
}

/// Stopping tolerances handed to the LM solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// Evaluation budget is `patience * (parameters + 1)`.
    pub patience: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
            patience: 200,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub evaluations: usize,
    /// Half the sum of squared residuals at the solution.
    pub final_cost: f64,
    pub termination: String,
}

struct LmWrapper<'a, P: NllsProblem> {
    problem: &'a P,
    params: DVector<f64>,
}

impl<P: NllsProblem> LeastSquaresProblem<f64, Dyn, Dyn> for LmWrapper<'_, P> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.problem.residuals(&self.params);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let j = self.problem.jacobian(&self.params);
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

/// Minimizes `problem` from `x0`.
///
/// Success and "no further improvement possible" are both accepted; any
/// other termination, or a non-finite solution, is an error.
pub fn solve<P: NllsProblem>(
    problem: &P,
    x0: DVector<f64>,
    opts: &SolverOptions,
) -> Result<(DVector<f64>, SolveReport), CalibrationError> {
    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_patience(opts.patience.max(1));

    let wrapper = LmWrapper { problem, params: x0 };
    let (wrapper, report) = lm.minimize(wrapper);
    let x = wrapper.params();

    let accepted = report.termination.was_successful()
        || matches!(report.termination, TerminationReason::NoImprovementPossible(_));
    let termination = format!("{:?}", report.termination);
    debug!(
        "LM finished after {} evaluations: {termination}, cost {:.6e}",
        report.number_of_evaluations, report.objective_function
    );
    if !accepted {
        return Err(CalibrationError::NotConverged {
            reason: termination,
        });
    }
    if !x.iter().all(|v| v.is_finite()) || !report.objective_function.is_finite() {
        return Err(CalibrationError::NotConverged {
            reason: "non-finite parameters".to_string(),
        });
    }

    Ok((
        x,
        SolveReport {
            evaluations: report.number_of_evaluations,
            final_cost: report.objective_function,
            termination,
        },
    ))
}

fn fd_step(v: f64) -> f64 {
    1e-6 * v.abs().max(1e-2)
}

/// Central-difference Jacobian of `f` at `x`, written into the block of `jac`
/// whose top-left entry is `at`. Row `r` of the block is `d f(x)[r] / d x`.
pub(crate) fn numeric_jacobian(
    f: impl Fn(&[f64]) -> Vec<f64>,
    x: &[f64],
    jac: &mut DMatrix<f64>,
    at: (usize, usize),
) {
    let mut shifted = x.to_vec();
    for (c, &x0) in x.iter().enumerate() {
        let h = fd_step(x0);
        shifted[c] = x0 + h;
        let plus = f(&shifted);
        shifted[c] = x0 - h;
        let minus = f(&shifted);
        shifted[c] = x0;
        for (r, (a, b)) in plus.iter().zip(&minus).enumerate() {
            jac[(at.0 + r, at.1 + c)] = (a - b) / (2.0 * h);
        }
    }
}
