// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Compiled-in values used when a domain has never been fetched and no
//! snapshot is available. Only domains the energy calculation cannot run
//! without have them.

use serde_json::{json, Value};

use crate::domain::{ConfigDomain, DomainMap};

/// Hardcoded content of `domain`, if it has any.
#[must_use]
pub fn hardcoded(domain: ConfigDomain) -> Option<DomainMap> {
    let rows = match domain {
        ConfigDomain::Calculations => calculations(),
        ConfigDomain::Formulas => formulas(),
        ConfigDomain::TekRequirements => tek_requirements(),
        ConfigDomain::HeatSources => heat_sources(),
        ConfigDomain::Content | ConfigDomain::FeatureFlags | ConfigDomain::Municipalities => {
            return None
        }
    };
    Some(domain.keyed_map(rows))
}

fn calculations() -> Vec<Value> {
    [
        ("bra_adjustment", 8.0, "%", "Reduction from BRA to heated BRA"),
        ("investment_multiplier", 7.0, "x", "Annual waste cost multiplied by this for investment room"),
        ("heating_investment_percentage", 70.0, "%", "Share of investment for heating"),
        ("lighting_investment_percentage", 15.0, "%", "Share of investment for lighting"),
        ("other_investment_percentage", 15.0, "%", "Share of investment for other measures"),
        ("base_electricity_price", 2.80, "kr/kWh", "Base electricity price"),
        ("grid_rent", 0.50, "kr/kWh", "Grid rental cost, national average"),
    ]
    .into_iter()
    .map(|(name, value, unit, description)| {
        json!({"name": name, "value": value, "unit": unit, "description": description})
    })
    .collect()
}

fn formulas() -> Vec<Value> {
    [
        ("heated_bra", "bra * (1 - bra_adjustment / 100)", &["bra", "bra_adjustment"][..]),
        ("annual_energy", "heated_bra * energy_per_m2", &["heated_bra", "energy_per_m2"][..]),
        ("annual_cost", "annual_energy * total_price_per_kwh", &["annual_energy", "total_price_per_kwh"][..]),
        ("tek17_percentage", "actual_energy / tek17_requirement * 100", &["actual_energy", "tek17_requirement"][..]),
        (
            "annual_waste",
            "annual_energy - heated_bra * tek17_requirement",
            &["annual_energy", "heated_bra", "tek17_requirement"][..],
        ),
        ("waste_cost", "annual_waste * total_price_per_kwh", &["annual_waste", "total_price_per_kwh"][..]),
        ("investment_room", "waste_cost * investment_multiplier", &["waste_cost", "investment_multiplier"][..]),
    ]
    .into_iter()
    .map(|(name, formula, variables)| {
        json!({"name": name, "formula": formula, "variables": variables, "category": "energy"})
    })
    .collect()
}

fn tek_requirements() -> Vec<Value> {
    [
        ("Småhus", 100.0, "Eneboliger og rekkehus"),
        ("Leilighetsblokk", 95.0, "Boligblokker"),
        ("Barnehage", 135.0, "Barnehager"),
        ("Kontor", 115.0, "Kontorer og administrasjonsbygg"),
        ("Kontorbygning", 115.0, "Kontorer og administrasjonsbygg"),
        ("Skolebygg", 110.0, "Grunnskoler og videregående skoler"),
        ("Universitet", 125.0, "Høyskoler og universiteter"),
        ("Sykehus", 225.0, "Sykehus og helseinstitusjoner"),
        ("Sykehjem", 195.0, "Sykehjem og omsorgsboliger"),
        ("Hotellbygg", 170.0, "Hoteller og overnattingssteder"),
        ("Idrettsbygg", 145.0, "Idrettshaller"),
        ("Forretningsbygg", 180.0, "Butikker og kjøpesentre"),
        ("Kulturbygg", 130.0, "Kulturbygg og forsamlingslokaler"),
        ("Lett industri/verksted", 140.0, "Verksteder og lett industri"),
    ]
    .into_iter()
    .map(|(building_type, limit, description)| {
        json!({
            "building_type": building_type,
            "max_energy_kwh_m2": limit,
            "description": description,
            "source": "TEK17 § 14-2",
        })
    })
    .collect()
}

fn heat_sources() -> Vec<Value> {
    vec![
        json!({
            "name": "electric",
            "norwegian_name": "Elektrisitet",
            "annual_efficiency": 100,
            "typical_investment_kr": 0,
            "typical_savings_percent": 0,
            "description": "Direkte elektrisk oppvarming med panelovner eller varmekabler",
            "priority": 10,
        }),
        json!({
            "name": "heatpump_air_air",
            "norwegian_name": "Varmepumpe luft-luft",
            "efficiency_cop": 3.5,
            "typical_investment_kr": 25000,
            "typical_savings_percent": 67,
            "description": "Varmepumpe som varmer opp lufta direkte",
            "priority": 1,
        }),
        json!({
            "name": "heatpump_air_water",
            "norwegian_name": "Varmepumpe luft-vann",
            "efficiency_cop": 3.0,
            "typical_investment_kr": 80000,
            "typical_savings_percent": 65,
            "description": "Varmepumpe tilkoblet vannbårent system",
            "priority": 2,
        }),
        json!({
            "name": "ground_source",
            "norwegian_name": "Bergvarme",
            "efficiency_cop": 4.5,
            "typical_investment_kr": 200000,
            "typical_savings_percent": 75,
            "description": "Bergvarme med energibrønner",
            "priority": 3,
        }),
        json!({
            "name": "district_heating",
            "norwegian_name": "Fjernvarme",
            "annual_efficiency": 98,
            "typical_investment_kr": 50000,
            "typical_savings_percent": 40,
            "description": "Sentralt fjernvarmesystem",
            "priority": 4,
        }),
    ]
}
