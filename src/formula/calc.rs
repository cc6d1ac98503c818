// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Derived energy figures for one building.
//!
//! Every step is a single formula evaluation through the cache. A step falls
//! back to a fixed constant only when its formula or an input constant is
//! entirely unavailable; a formula that exists but fails (missing binding,
//! division by zero) is an error, not a fallback.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use super::{bindings, Bindings};
use crate::cache::{ConfigCache, ResolveError};

/// Used when neither the input nor the building type gives an energy figure.
pub const DEFAULT_TEK_LIMIT: f64 = 115.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BuildingInputs {
    /// Gross internal area (BRA), m²
    pub bra: f64,
    pub building_type: String,
    /// Measured or declared consumption, kWh/m²·yr
    pub energy_per_m2: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvestmentBreakdown {
    pub heating: f64,
    pub lighting: f64,
    pub other: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyFigures {
    pub heated_bra: f64,
    pub total_price_per_kwh: f64,
    pub energy_per_m2: f64,
    pub tek17_limit: f64,
    pub annual_energy: f64,
    pub annual_cost: f64,
    pub tek17_percentage: f64,
    pub annual_waste: f64,
    pub waste_cost: f64,
    pub investment_room: f64,
    pub breakdown: InvestmentBreakdown,
    /// Names of constants and formulas replaced by their fallback
    pub fallbacks_used: Vec<&'static str>,
}

pub struct EnergyCalculator {
    cache: Arc<ConfigCache>,
}

impl EnergyCalculator {
    pub fn new(cache: Arc<ConfigCache>) -> Self {
        Self { cache }
    }

    #[instrument(skip(self), fields(building_type = %inputs.building_type))]
    pub async fn calculate(&self, inputs: &BuildingInputs) -> Result<EnergyFigures, ResolveError> {
        let mut used = Vec::new();

        let bra_adjustment = self.constant("bra_adjustment", 8.0, &mut used).await?;
        let investment_multiplier = self.constant("investment_multiplier", 7.0, &mut used).await?;
        let heating_pct = self.constant("heating_investment_percentage", 70.0, &mut used).await?;
        let lighting_pct = self.constant("lighting_investment_percentage", 15.0, &mut used).await?;
        let other_pct = self.constant("other_investment_percentage", 15.0, &mut used).await?;
        let electricity_price = self.constant("base_electricity_price", 2.80, &mut used).await?;
        let grid_rent = self.constant("grid_rent", 0.50, &mut used).await?;

        let tek17_limit = match unavailable_as_none(self.cache.tek_limit(&inputs.building_type).await)? {
            Some(limit) => limit,
            None => {
                used.push("tek17_limit");
                DEFAULT_TEK_LIMIT
            }
        };

        let heated_bra = self
            .step(
                "heated_bra",
                bindings([("bra", inputs.bra), ("bra_adjustment", bra_adjustment)]),
                inputs.bra * 0.92,
                &mut used,
            )
            .await?;

        let total_price_per_kwh = electricity_price + grid_rent;
        let energy_per_m2 = inputs.energy_per_m2.unwrap_or(tek17_limit);

        let annual_energy = self
            .step(
                "annual_energy",
                bindings([("heated_bra", heated_bra), ("energy_per_m2", energy_per_m2)]),
                0.0,
                &mut used,
            )
            .await?;

        let annual_cost = self
            .step(
                "annual_cost",
                bindings([("annual_energy", annual_energy), ("total_price_per_kwh", total_price_per_kwh)]),
                0.0,
                &mut used,
            )
            .await?;

        let tek17_percentage = self
            .step(
                "tek17_percentage",
                bindings([("actual_energy", energy_per_m2), ("tek17_requirement", tek17_limit)]),
                100.0,
                &mut used,
            )
            .await?;

        let annual_waste = self
            .step(
                "annual_waste",
                bindings([
                    ("annual_energy", annual_energy),
                    ("heated_bra", heated_bra),
                    ("tek17_requirement", tek17_limit),
                ]),
                0.0,
                &mut used,
            )
            .await?
            .max(0.0);

        let waste_cost = self
            .step(
                "waste_cost",
                bindings([("annual_waste", annual_waste), ("total_price_per_kwh", total_price_per_kwh)]),
                0.0,
                &mut used,
            )
            .await?
            .max(0.0);

        let investment_room = self
            .step(
                "investment_room",
                bindings([("waste_cost", waste_cost), ("investment_multiplier", investment_multiplier)]),
                0.0,
                &mut used,
            )
            .await?;

        debug!(annual_energy, annual_cost, fallbacks = used.len(), "Energy figures computed");

        Ok(EnergyFigures {
            heated_bra,
            total_price_per_kwh,
            energy_per_m2,
            tek17_limit,
            annual_energy,
            annual_cost,
            tek17_percentage,
            annual_waste,
            waste_cost,
            investment_room,
            breakdown: InvestmentBreakdown {
                heating: investment_room * heating_pct / 100.0,
                lighting: investment_room * lighting_pct / 100.0,
                other: investment_room * other_pct / 100.0,
            },
            fallbacks_used: used,
        })
    }

    async fn constant(
        &self,
        name: &'static str,
        fallback: f64,
        used: &mut Vec<&'static str>,
    ) -> Result<f64, ResolveError> {
        match unavailable_as_none(self.cache.calculation_value(name).await)? {
            Some(v) => Ok(v),
            None => {
                used.push(name);
                Ok(fallback)
            }
        }
    }

    async fn step(
        &self,
        formula: &'static str,
        vars: Bindings,
        fallback: f64,
        used: &mut Vec<&'static str>,
    ) -> Result<f64, ResolveError> {
        match unavailable_as_none(self.cache.evaluate(formula, &vars).await)? {
            Some(v) => Ok(v),
            None => {
                used.push(formula);
                Ok(fallback)
            }
        }
    }
}

/// Absent and unreachable both mean "use the fallback"; anything else is real.
fn unavailable_as_none<T>(result: Result<Option<T>, ResolveError>) -> Result<Option<T>, ResolveError> {
    match result {
        Err(ResolveError::SourceUnavailable { .. }) => Ok(None),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConfigDomain;
    use crate::formula::FormulaError;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn office(bra: f64) -> BuildingInputs {
        BuildingInputs {
            bra,
            building_type: "Kontor".into(),
            energy_per_m2: Some(200.0),
        }
    }

    fn offline_calculator() -> EnergyCalculator {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        EnergyCalculator::new(Arc::new(ConfigCache::with_ttl(Arc::new(store), Duration::from_secs(300))))
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[tokio::test]
    async fn test_chain_on_hardcoded_defaults() {
        let figures = offline_calculator().calculate(&office(1000.0)).await.unwrap();

        assert!(close(figures.heated_bra, 920.0));
        assert!(close(figures.total_price_per_kwh, 3.30));
        assert!(close(figures.tek17_limit, 115.0));
        assert!(close(figures.annual_energy, 184_000.0));
        assert!(close(figures.annual_cost, 184_000.0 * 3.30));
        assert!(close(figures.tek17_percentage, 200.0 / 115.0 * 100.0));
        assert!(close(figures.annual_waste, 184_000.0 - 920.0 * 115.0));
        assert!(close(figures.waste_cost, figures.annual_waste * 3.30));
        assert!(close(figures.investment_room, figures.waste_cost * 7.0));
        assert!(close(figures.breakdown.heating, figures.investment_room * 0.70));
        assert!(figures.fallbacks_used.is_empty());
    }

    #[tokio::test]
    async fn test_waste_clamped_for_efficient_building() {
        let inputs = BuildingInputs {
            energy_per_m2: Some(80.0),
            ..office(1000.0)
        };

        let figures = offline_calculator().calculate(&inputs).await.unwrap();

        assert_eq!(figures.annual_waste, 0.0);
        assert_eq!(figures.waste_cost, 0.0);
        assert_eq!(figures.investment_room, 0.0);
    }

    #[tokio::test]
    async fn test_missing_formulas_and_constants_use_fallbacks() {
        let store = InMemoryStore::new()
            .with_rows(ConfigDomain::Formulas, vec![])
            .with_rows(ConfigDomain::Calculations, vec![])
            .with_rows(ConfigDomain::TekRequirements, vec![]);
        let calc = EnergyCalculator::new(Arc::new(ConfigCache::with_ttl(
            Arc::new(store),
            Duration::from_secs(300),
        )));

        let figures = calc.calculate(&office(1000.0)).await.unwrap();

        assert!(close(figures.heated_bra, 920.0));
        assert_eq!(figures.annual_energy, 0.0);
        assert_eq!(figures.tek17_percentage, 100.0);
        assert!(figures.fallbacks_used.contains(&"heated_bra"));
        assert!(figures.fallbacks_used.contains(&"grid_rent"));
        assert!(figures.fallbacks_used.contains(&"tek17_limit"));
    }

    #[tokio::test]
    async fn test_broken_formula_is_an_error() {
        let store = InMemoryStore::new().with_rows(
            ConfigDomain::Formulas,
            vec![json!({"name": "heated_bra", "formula": "bra * factor", "variables": ["bra", "factor"]})],
        );
        let calc = EnergyCalculator::new(Arc::new(ConfigCache::with_ttl(
            Arc::new(store),
            Duration::from_secs(300),
        )));

        let err = calc.calculate(&office(1000.0)).await.unwrap_err();

        assert!(matches!(
            err,
            ResolveError::Formula(FormulaError::InvalidBinding { ref variable, .. }) if variable == "factor"
        ));
    }
}
