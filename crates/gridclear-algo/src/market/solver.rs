//! Solver backends.
//!
//! The clearing stages only need a black-box LP solver: bounded continuous
//! variables, linear constraints, a linear objective to minimise. A backend
//! reports a termination status plus whatever primal and dual values it has.
//! Non-optimal outcomes are returned as a status, never as an error, so the
//! orchestrator can persist them.

use super::lp::{ConstraintId, LinearModel, VarId};
use super::ClearingError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Termination status of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    /// Time limit reached
    Timeout,
    IterationLimit,
    NumericalError,
    Error,
    Unknown,
}

impl SolveStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SolveStatus::Optimal)
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "optimal"),
            SolveStatus::Infeasible => write!(f, "infeasible"),
            SolveStatus::Unbounded => write!(f, "unbounded"),
            SolveStatus::Timeout => write!(f, "timeout"),
            SolveStatus::IterationLimit => write!(f, "iteration_limit"),
            SolveStatus::NumericalError => write!(f, "numerical_error"),
            SolveStatus::Error => write!(f, "error"),
            SolveStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Settings handed to every backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Wall-clock limit per solve; exceeding it yields [`SolveStatus::Timeout`]
    pub time_limit_secs: Option<f64>,
    pub verbose: bool,
}

/// Result of one solve.
#[derive(Debug, Clone)]
pub struct LpSolution {
    pub status: SolveStatus,
    pub objective: Option<f64>,
    /// One value per model variable, or empty when the solver returned none
    pub primal: Vec<f64>,
    /// Shadow prices `∂objective/∂rhs`, one per constraint, or empty
    pub duals: Vec<f64>,
    pub message: Option<String>,
    pub solve_time: Duration,
}

impl LpSolution {
    /// A solve that produced no values at all.
    pub fn without_values(status: SolveStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            objective: None,
            primal: Vec::new(),
            duals: Vec::new(),
            message: Some(message.into()),
            solve_time: Duration::ZERO,
        }
    }

    pub fn has_values(&self) -> bool {
        !self.primal.is_empty()
    }

    pub fn has_duals(&self) -> bool {
        !self.duals.is_empty()
    }

    pub fn value(&self, var: VarId) -> Option<f64> {
        self.primal.get(var.index()).copied()
    }

    pub fn dual(&self, constraint: ConstraintId) -> Option<f64> {
        self.duals.get(constraint.index()).copied()
    }
}

/// Solves a [`LinearModel`].
pub trait LpBackend: Send + Sync {
    /// Identifier used in logs (e.g. "clarabel")
    fn id(&self) -> &str;

    /// Solve the model. `Err` is reserved for models the backend cannot accept
    /// at all; solver outcomes, good or bad, are reported through the status.
    fn solve(&self, model: &LinearModel, settings: &SolverSettings)
        -> Result<LpSolution, ClearingError>;
}

#[cfg(feature = "solver-clarabel")]
pub use clarabel_backend::ClarabelBackend;

#[cfg(feature = "solver-clarabel")]
mod clarabel_backend {
    use super::*;
    use crate::market::lp::{LinearExpr, Sense};
    use good_lp::solvers::clarabel::clarabel;
    use good_lp::solvers::{DualValues, SolutionWithDual};
    use good_lp::{
        constraint, variable, Expression, ProblemVariables, ResolutionError, Solution,
        SolverModel, Variable,
    };
    use std::time::Instant;
    use tracing::debug;

    /// Interior-point LP backend through `good_lp`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ClarabelBackend;

    impl LpBackend for ClarabelBackend {
        fn id(&self) -> &str {
            "clarabel"
        }

        fn solve(
            &self,
            model: &LinearModel,
            settings: &SolverSettings,
        ) -> Result<LpSolution, ClearingError> {
            if let Some(problem) = model.find_non_finite() {
                return Err(ClearingError::Solver(problem));
            }

            let mut vars = ProblemVariables::new();
            let handles: Vec<Variable> = model
                .variables
                .iter()
                .map(|v| {
                    let mut def = variable().name(v.name.clone());
                    if v.lower.is_finite() {
                        def = def.min(v.lower);
                    }
                    if v.upper.is_finite() {
                        def = def.max(v.upper);
                    }
                    vars.add(def)
                })
                .collect();

            let to_expression = |expr: &LinearExpr| {
                let mut out = Expression::from(0.0);
                for &(var, coef) in &expr.terms {
                    out += coef * handles[var.index()];
                }
                out
            };

            let mut problem = vars
                .minimise(to_expression(&model.objective))
                .using(clarabel);
            problem.settings().verbose(settings.verbose);
            if let Some(secs) = settings.time_limit_secs {
                problem.settings().time_limit(secs);
            }

            // Duals are reported as d(objective)/d(rhs). Ge rows are handed
            // over negated, which flips their sign.
            let mut rows = Vec::with_capacity(model.constraints.len());
            for c in &model.constraints {
                let lhs = to_expression(&c.expr);
                let rhs = c.normalized_rhs();
                let (row, sign) = match c.sense {
                    Sense::Eq => (constraint::eq(lhs, rhs), 1.0),
                    Sense::Le => (constraint::leq(lhs, rhs), 1.0),
                    Sense::Ge => (constraint::geq(lhs, rhs), -1.0),
                };
                rows.push((problem.add_constraint(row), sign));
            }

            let started = Instant::now();
            let outcome = problem.solve();
            let solve_time = started.elapsed();

            match outcome {
                Ok(mut solution) => {
                    let primal: Vec<f64> =
                        handles.iter().map(|&h| solution.value(h)).collect();
                    let objective = model.objective.evaluate(&primal);
                    let dual_values = solution.compute_dual();
                    let duals = rows
                        .iter()
                        .map(|(cref, sign)| sign * dual_values.dual(cref.clone()))
                        .collect();
                    debug!(
                        vars = model.num_vars(),
                        constraints = model.num_constraints(),
                        objective,
                        elapsed_ms = solve_time.as_millis() as u64,
                        "clarabel solve finished"
                    );
                    Ok(LpSolution {
                        status: SolveStatus::Optimal,
                        objective: Some(objective),
                        primal,
                        duals,
                        message: None,
                        solve_time,
                    })
                }
                Err(err) => {
                    let status = match &err {
                        ResolutionError::Infeasible => SolveStatus::Infeasible,
                        ResolutionError::Unbounded => SolveStatus::Unbounded,
                        other if other.to_string().to_lowercase().contains("time") => {
                            SolveStatus::Timeout
                        }
                        _ => SolveStatus::Error,
                    };
                    debug!(%status, error = %err, "clarabel solve did not succeed");
                    let mut solution = LpSolution::without_values(status, err.to_string());
                    solution.solve_time = solve_time;
                    Ok(solution)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_and_success() {
        assert!(SolveStatus::Optimal.is_success());
        assert!(!SolveStatus::Timeout.is_success());
        assert_eq!(SolveStatus::IterationLimit.to_string(), "iteration_limit");
    }

    #[test]
    fn test_solution_without_values() {
        let solution = LpSolution::without_values(SolveStatus::Infeasible, "no point");
        assert!(!solution.has_values());
        assert!(!solution.has_duals());
        assert_eq!(solution.objective, None);
    }

    #[test]
    fn test_backend_is_object_safe() {
        fn _accepts_backend(_b: &dyn LpBackend) {}
    }

    #[cfg(feature = "solver-clarabel")]
    mod clarabel {
        use super::super::*;
        use crate::market::lp::{LinearExpr, LinearModel, Sense};

        #[test]
        fn test_small_lp_primal_and_objective() {
            // min 10 g1 + 30 g2  s.t.  g1 + g2 = 80, g1 ≤ 50
            let mut model = LinearModel::new();
            let g1 = model.add_nonneg("g1", 50.0);
            let g2 = model.add_nonneg("g2", 100.0);
            model.add_objective_term(g1, 10.0);
            model.add_objective_term(g2, 30.0);
            let mut balance = LinearExpr::from(g1);
            balance.add_term(g2, 1.0);
            model.add_constraint("balance", balance, Sense::Eq, 80.0);

            let solution = ClarabelBackend
                .solve(&model, &SolverSettings::default())
                .unwrap();
            assert_eq!(solution.status, SolveStatus::Optimal);
            assert!((solution.value(g1).unwrap() - 50.0).abs() < 1e-4);
            assert!((solution.value(g2).unwrap() - 30.0).abs() < 1e-4);
            assert!((solution.objective.unwrap() - 1400.0).abs() < 1e-2);
        }

        #[test]
        fn test_duals_are_objective_sensitivity_to_rhs() {
            // one more unit of demand is served by g2 at 30
            let mut model = LinearModel::new();
            let g1 = model.add_nonneg("g1", 50.0);
            let g2 = model.add_nonneg("g2", 100.0);
            model.add_objective_term(g1, 10.0);
            model.add_objective_term(g2, 30.0);
            let mut balance = LinearExpr::from(g1);
            balance.add_term(g2, 1.0);
            let row = model.add_constraint("balance", balance, Sense::Eq, 80.0);

            let solution = ClarabelBackend
                .solve(&model, &SolverSettings::default())
                .unwrap();
            let dual = solution.dual(row).unwrap();
            assert!((dual - 30.0).abs() < 1e-4, "dual {dual}");
        }

        #[test]
        fn test_ge_row_dual_has_same_convention() {
            let mut model = LinearModel::new();
            let x = model.add_nonneg("x", 100.0);
            model.add_objective_term(x, 10.0);
            let row = model.add_constraint("floor", LinearExpr::from(x), Sense::Ge, 5.0);

            let solution = ClarabelBackend
                .solve(&model, &SolverSettings::default())
                .unwrap();
            assert!((solution.value(x).unwrap() - 5.0).abs() < 1e-4);
            let dual = solution.dual(row).unwrap();
            assert!((dual - 10.0).abs() < 1e-4, "dual {dual}");
        }

        #[test]
        fn test_infeasible_lp_reports_status() {
            let mut model = LinearModel::new();
            let x = model.add_nonneg("x", 1.0);
            model.add_constraint("impossible", LinearExpr::from(x), Sense::Ge, 5.0);
            let solution = ClarabelBackend
                .solve(&model, &SolverSettings::default())
                .unwrap();
            assert!(!solution.status.is_success());
            assert!(!solution.has_values());
        }
    }
}
