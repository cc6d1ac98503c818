// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Named arithmetic formulas over declared variables.
//!
//! Formula rows arrive as free text. They are parsed once, when the formulas
//! domain is (re)loaded, into a [`FormulaTable`]; evaluation is a tree walk
//! with no further parsing.
//!
//! Evaluation fails closed: a declared variable missing from the bindings is
//! an [`FormulaError::InvalidBinding`], never a silent zero. Division by zero
//! and overflow surface as [`FormulaError::NonFinite`].
//!
//! ```
//! use energy_resolver::domain::FormulaRecord;
//! use energy_resolver::formula::{bindings, CompiledFormula};
//!
//! let record = FormulaRecord {
//!     name: "annual_cost".into(),
//!     formula: "annual_energy * total_price_per_kwh".into(),
//!     variables: vec!["annual_energy".into(), "total_price_per_kwh".into()],
//!     category: None,
//!     description: None,
//! };
//! let formula = CompiledFormula::compile(&record).unwrap();
//!
//! let cost = formula
//!     .evaluate(&bindings([("annual_energy", 20_000.0), ("total_price_per_kwh", 1.2)]))
//!     .unwrap();
//! assert!((cost - 24_000.0).abs() < 1e-9);
//! ```

pub mod calc;
pub mod parser;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::domain::{DomainMap, FormulaRecord};
pub use parser::{Expr, Op, ParseError};

/// Variable name → value.
pub type Bindings = HashMap<String, f64>;

/// Build [`Bindings`] from `(name, value)` pairs.
pub fn bindings<'a, I>(pairs: I) -> Bindings
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("formula '{name}' is invalid: {message}")]
    Parse { name: String, message: String },

    #[error("formula '{formula}' requires variable '{variable}'")]
    InvalidBinding { formula: String, variable: String },

    #[error("formula '{0}' produced a non-finite result")]
    NonFinite(String),
}

/// A formula parsed and checked against its declared variables.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFormula {
    pub name: String,
    pub source: String,
    pub variables: Vec<String>,
    pub category: Option<String>,
    expr: Expr,
}

impl CompiledFormula {
    pub fn compile(record: &FormulaRecord) -> Result<Self, FormulaError> {
        let expr = parser::parse(&record.formula, &record.variables).map_err(|e| FormulaError::Parse {
            name: record.name.clone(),
            message: e.to_string(),
        })?;

        Ok(Self {
            name: record.name.clone(),
            source: record.formula.clone(),
            variables: record.variables.clone(),
            category: record.category.clone(),
            expr,
        })
    }

    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate against `vars`. Every declared variable must be bound, even
    /// ones the expression does not reference.
    pub fn evaluate(&self, vars: &Bindings) -> Result<f64, FormulaError> {
        if let Some(missing) = self.variables.iter().find(|v| !vars.contains_key(v.as_str())) {
            return Err(FormulaError::InvalidBinding {
                formula: self.name.clone(),
                variable: missing.clone(),
            });
        }

        let value = self.eval(&self.expr, vars)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FormulaError::NonFinite(self.name.clone()))
        }
    }

    fn eval(&self, expr: &Expr, vars: &Bindings) -> Result<f64, FormulaError> {
        match expr {
            Expr::Literal(v) => Ok(*v),
            Expr::Var(name) => vars.get(name).copied().ok_or_else(|| FormulaError::InvalidBinding {
                formula: self.name.clone(),
                variable: name.clone(),
            }),
            Expr::BinOp(op, lhs, rhs) => {
                let l = self.eval(lhs, vars)?;
                let r = self.eval(rhs, vars)?;
                match op {
                    Op::Add => Ok(l + r),
                    Op::Sub => Ok(l - r),
                    Op::Mul => Ok(l * r),
                    Op::Div if r == 0.0 => Err(FormulaError::NonFinite(self.name.clone())),
                    Op::Div => Ok(l / r),
                }
            }
        }
    }
}

/// Every formula of one load of the formulas domain, parsed.
///
/// Rows that fail to parse (or deserialize) are kept as errors so the
/// failure is reported when someone asks for that formula.
#[derive(Debug, Clone, Default)]
pub struct FormulaTable {
    formulas: HashMap<String, Result<Arc<CompiledFormula>, FormulaError>>,
}

impl FormulaTable {
    #[must_use]
    pub fn from_domain(map: &DomainMap) -> Self {
        let mut formulas = HashMap::with_capacity(map.len());
        for (name, row) in map {
            let compiled = serde_json::from_value::<FormulaRecord>(row.clone())
                .map_err(|e| FormulaError::Parse {
                    name: name.clone(),
                    message: e.to_string(),
                })
                .and_then(|record| CompiledFormula::compile(&record))
                .map(Arc::new);

            if let Err(e) = &compiled {
                warn!(formula = %name, error = %e, "Formula rejected");
            }
            formulas.insert(name.clone(), compiled);
        }
        Self { formulas }
    }

    /// `None` when no formula of that name exists.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Result<Arc<CompiledFormula>, FormulaError>> {
        self.formulas.get(name).cloned()
    }

    /// Successfully compiled formulas in a category, sorted by name.
    #[must_use]
    pub fn in_category(&self, category: &str) -> Vec<Arc<CompiledFormula>> {
        let mut found: Vec<_> = self
            .formulas
            .values()
            .filter_map(|f| f.as_ref().ok())
            .filter(|f| f.category.as_deref() == Some(category))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }
}
