//! Solver-neutral linear program.
//!
//! Stage builders describe their model here; a [`super::solver::LpBackend`]
//! translates it for a concrete solver. Keeping the model as plain data lets
//! tests inspect constraints and lets backends be swapped without touching
//! the builders.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(usize);

impl ConstraintId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Affine expression `Σ coef·var + constant`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    pub fn term(var: VarId, coef: f64) -> Self {
        Self {
            terms: vec![(var, coef)],
            constant: 0.0,
        }
    }

    pub fn add_term(&mut self, var: VarId, coef: f64) {
        if coef != 0.0 {
            self.terms.push((var, coef));
        }
    }

    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    /// `self += scale · other`
    pub fn add_scaled(&mut self, other: &LinearExpr, scale: f64) {
        if scale == 0.0 {
            return;
        }
        for &(var, coef) in &other.terms {
            self.add_term(var, coef * scale);
        }
        self.constant += other.constant * scale;
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Value under a primal solution. Variables outside `primal` read as zero.
    pub fn evaluate(&self, primal: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(var, coef)| coef * primal.get(var.0).copied().unwrap_or(0.0))
            .sum::<f64>()
            + self.constant
    }
}

impl From<VarId> for LinearExpr {
    fn from(var: VarId) -> Self {
        LinearExpr::term(var, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Eq,
    Le,
    Ge,
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sense::Eq => write!(f, "=="),
            Sense::Le => write!(f, "<="),
            Sense::Ge => write!(f, ">="),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
}

/// `expr sense rhs`
#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub expr: LinearExpr,
    pub sense: Sense,
    pub rhs: f64,
}

impl Constraint {
    /// Right-hand side with the expression's constant moved across.
    pub fn normalized_rhs(&self) -> f64 {
        self.rhs - self.expr.constant
    }
}

/// Minimisation problem over bounded continuous variables.
#[derive(Debug, Clone, Default)]
pub struct LinearModel {
    pub variables: Vec<Variable>,
    pub constraints: Vec<Constraint>,
    pub objective: LinearExpr,
}

impl LinearModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_var(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VarId {
        self.variables.push(Variable {
            name: name.into(),
            lower,
            upper,
        });
        VarId(self.variables.len() - 1)
    }

    /// Variable in `[0, upper]`.
    pub fn add_nonneg(&mut self, name: impl Into<String>, upper: f64) -> VarId {
        self.add_var(name, 0.0, upper.max(0.0))
    }

    pub fn add_free(&mut self, name: impl Into<String>) -> VarId {
        self.add_var(name, f64::NEG_INFINITY, f64::INFINITY)
    }

    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        expr: LinearExpr,
        sense: Sense,
        rhs: f64,
    ) -> ConstraintId {
        self.constraints.push(Constraint {
            name: name.into(),
            expr,
            sense,
            rhs,
        });
        ConstraintId(self.constraints.len() - 1)
    }

    /// `lower ≤ expr ≤ upper`, skipping infinite sides.
    pub fn add_range(&mut self, name: &str, expr: LinearExpr, lower: f64, upper: f64) {
        if upper.is_finite() {
            self.add_constraint(format!("{name}_max"), expr.clone(), Sense::Le, upper);
        }
        if lower.is_finite() {
            self.add_constraint(format!("{name}_min"), expr, Sense::Ge, lower);
        }
    }

    pub fn add_objective_term(&mut self, var: VarId, coef: f64) {
        self.objective.add_term(var, coef);
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.0]
    }

    pub fn constraint(&self, id: ConstraintId) -> &Constraint {
        &self.constraints[id.0]
    }

    pub fn num_vars(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// First non-finite coefficient, bound or right-hand side, if any.
    pub fn find_non_finite(&self) -> Option<String> {
        if let Some(v) = self
            .variables
            .iter()
            .find(|v| v.lower.is_nan() || v.upper.is_nan() || v.lower > v.upper)
        {
            return Some(format!(
                "variable {} has bounds [{}, {}]",
                v.name,
                v.lower,
                v.upper,
            ));
        }
        if let Some(c) = self.constraints.iter().find(|c| {
            !c.rhs.is_finite()
                || !c.expr.constant.is_finite()
                || c.expr.terms.iter().any(|(_, coef)| !coef.is_finite())
        }) {
            return Some(format!("constraint {} is not finite", c.name));
        }
        if self.objective.terms.iter().any(|(_, coef)| !coef.is_finite()) {
            return Some("objective has a non-finite coefficient".to_string());
        }
        None
    }
}
