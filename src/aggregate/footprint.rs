// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! OpenStreetMap building outlines.
//!
//! An Overpass response is a flat element list: nodes carry coordinates,
//! ways carry tags and node references. Outlines are assembled in two
//! passes (index nodes, then resolve each building way).

use std::collections::HashMap;

use serde::Deserialize;

use super::types::{Footprint, FootprintMatch};

/// Metres per degree of latitude.
const LAT_METERS: f64 = 111_000.0;
/// Metres per degree of longitude around 60°N.
const LON_METERS: f64 = 55_000.0;

#[derive(Debug, Clone, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<OsmElement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsmElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: i64,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub nodes: Vec<i64>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Overpass QL for buildings around a point.
#[must_use]
pub fn overpass_query(latitude: f64, longitude: f64, radius_m: u32) -> String {
    let around = format!("around:{radius_m},{latitude},{longitude}");
    format!(
        "[out:json][timeout:25];\
         (way[\"building\"]({around});\
         relation[\"building\"][\"type\"=\"multipolygon\"]({around}););\
         out body;>;out skel qt;"
    )
}

pub fn parse_buildings(response: &OverpassResponse) -> Vec<Footprint> {
    let nodes: HashMap<i64, [f64; 2]> = response
        .elements
        .iter()
        .filter(|e| e.kind == "node")
        .filter_map(|e| Some((e.id, [e.lat?, e.lon?])))
        .collect();

    response
        .elements
        .iter()
        .filter(|e| e.kind == "way")
        .filter_map(|way| {
            let building = way.tags.get("building")?;
            let mut coordinates: Vec<[f64; 2]> = way.nodes.iter().filter_map(|id| nodes.get(id).copied()).collect();
            if coordinates.len() < 3 {
                return None;
            }
            if coordinates.first() != coordinates.last() {
                coordinates.push(coordinates[0]);
            }

            let tags = &way.tags;
            Some(Footprint {
                id: format!("osm-{}", way.id),
                building_type: building_type(building).to_string(),
                area_m2: (coordinates.len() > 3).then(|| polygon_area(&coordinates)),
                levels: tags.get("building:levels").and_then(|v| leading_int(v)),
                height_m: tags.get("height").and_then(|v| leading_float(v)),
                name: tags.get("name").cloned(),
                address: format_address(tags),
                building_number: tags.get("ref:bygningsnr").cloned(),
                address_label: address_label(tags),
                coordinates,
            })
        })
        .collect()
}

/// OSM `building=*` value → Norwegian category.
#[must_use]
pub fn building_type(osm: &str) -> &'static str {
    match osm {
        "office" => "Kontor",
        "commercial" => "Forretning",
        "residential" => "Bolig",
        "apartments" => "Flerbolig",
        "house" => "Småhus",
        "detached" => "Enebolig",
        "industrial" => "Industri",
        "warehouse" => "Lager",
        "retail" => "Butikk",
        "school" => "Skole",
        "hospital" => "Sykehus",
        "hotel" => "Hotell",
        _ => "Bygning",
    }
}

/// Approximate area in m² of a closed `[lat, lon]` ring (shoelace).
#[must_use]
pub fn polygon_area(ring: &[[f64; 2]]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let twice: f64 = ring
        .windows(2)
        .map(|w| {
            let (x1, y1) = (w[0][1] * LON_METERS, w[0][0] * LAT_METERS);
            let (x2, y2) = (w[1][1] * LON_METERS, w[1][0] * LAT_METERS);
            x1 * y2 - x2 * y1
        })
        .sum();
    (twice / 2.0).abs()
}

fn format_address(tags: &HashMap<String, String>) -> Option<String> {
    let mut parts = Vec::new();
    if let (Some(street), Some(number)) = (tags.get("addr:street"), tags.get("addr:housenumber")) {
        parts.push(format!("{street} {number}"));
    }
    parts.extend(tags.get("addr:postcode").cloned());
    parts.extend(tags.get("addr:city").cloned());
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// "Karl Johans gate" + "1" → "KJG1"
fn address_label(tags: &HashMap<String, String>) -> Option<String> {
    let street = tags.get("addr:street")?;
    let number = tags.get("addr:housenumber")?;
    let initials: String = street
        .split_whitespace()
        .filter_map(|w| w.chars().next())
        .flat_map(char::to_uppercase)
        .collect();
    Some(format!("{initials}{number}"))
}

/// `"3"`, `"3.5"`, `"3 etasjer"` → 3
fn leading_int(raw: &str) -> Option<u32> {
    let digits: String = raw.trim().chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// `"12.5"`, `"12 m"` → 12.5 / 12.0
fn leading_float(raw: &str) -> Option<f64> {
    let number: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.parse().ok()
}

/// Closest outline (by first vertex) becomes primary, the rest alternates.
pub fn select_closest(candidates: Vec<Footprint>, latitude: f64, longitude: f64) -> Option<FootprintMatch> {
    let distance = |f: &Footprint| {
        f.coordinates
            .first()
            .map_or(f64::MAX, |[lat, lon]| ((lat - latitude).powi(2) + (lon - longitude).powi(2)).sqrt())
    };

    let index = candidates
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| distance(a).total_cmp(&distance(b)))
        .map(|(i, _)| i)?;

    let mut alternates = candidates;
    let primary = alternates.remove(index);
    Some(FootprintMatch { primary, alternates })
}
