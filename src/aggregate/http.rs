// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP-backed sources.
//!
//! - Certificates and prices: PostgREST-style table endpoints
//!   (`GET {base}/{table}?col=eq.value`)
//! - Footprints: Overpass API, endpoints tried in order

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::footprint::{overpass_query, parse_buildings, OverpassResponse};
use super::sources::{CertificateSource, FootprintSource, PricingSource};
use super::types::{Certificate, Footprint, PriceRecord, SourceError};
use crate::config::ResolverConfig;
use crate::domain::PriceZone;

pub const CERTIFICATE_TABLE: &str = "energy_certificates";
pub const PRICE_TABLE: &str = "electricity_prices_nve";

/// Client-side cap; branch timeouts normally fire first.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn client() -> Result<Client, SourceError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| SourceError::Transport(format!("failed to build HTTP client: {}", e)))
}

/// Shared PostgREST plumbing for the table-backed sources.
#[derive(Clone)]
struct Postgrest {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl Postgrest {
    fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, SourceError> {
        Ok(Self {
            client: client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn table(&self, table: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}/{}", self.base_url, table));
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    async fn rows<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Vec<T>, SourceError> {
        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, SourceError> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(SourceError::Http {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json()
        .await
        .map_err(|e| SourceError::Decode(e.to_string()))
}

/// Certificate register over PostgREST.
pub struct HttpCertificateSource {
    api: Postgrest,
}

impl HttpCertificateSource {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, SourceError> {
        Ok(Self {
            api: Postgrest::new(base_url, api_key)?,
        })
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self, SourceError> {
        let url = config
            .certificate_service_url
            .as_deref()
            .ok_or(SourceError::NotConfigured("certificate_service_url"))?;
        Self::new(url, config.service_api_key.clone())
    }
}

pub(crate) fn certificate_params(gnr: u32, bnr: u32, building_number: Option<&str>) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("select", "*".to_string()),
        ("gnr", format!("eq.{gnr}")),
        ("bnr", format!("eq.{bnr}")),
    ];
    if let Some(number) = building_number {
        params.push(("building_number", format!("eq.{number}")));
    }
    params.push(("limit", "1".to_string()));
    params
}

#[async_trait]
impl CertificateSource for HttpCertificateSource {
    async fn find(
        &self,
        gnr: u32,
        bnr: u32,
        building_number: Option<&str>,
    ) -> Result<Option<Certificate>, SourceError> {
        let request = self
            .api
            .table(CERTIFICATE_TABLE)
            .query(&certificate_params(gnr, bnr, building_number));
        let rows: Vec<Certificate> = self.api.rows(request).await?;
        debug!(gnr, bnr, found = !rows.is_empty(), "Certificate lookup");
        Ok(rows.into_iter().next())
    }
}

/// Weekly spot prices over PostgREST.
pub struct HttpPricingSource {
    api: Postgrest,
}

impl HttpPricingSource {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, SourceError> {
        Ok(Self {
            api: Postgrest::new(base_url, api_key)?,
        })
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self, SourceError> {
        let url = config
            .pricing_service_url
            .as_deref()
            .ok_or(SourceError::NotConfigured("pricing_service_url"))?;
        Self::new(url, config.service_api_key.clone())
    }
}

pub(crate) fn price_params(zone: PriceZone, limit: usize) -> Vec<(&'static str, String)> {
    vec![
        ("select", "year,week,week_number,spot_price_ore_kwh".to_string()),
        ("zone", format!("eq.{}", zone.as_str())),
        ("order", "year.desc,week_number.desc".to_string()),
        ("limit", limit.to_string()),
    ]
}

#[async_trait]
impl PricingSource for HttpPricingSource {
    async fn recent_prices(&self, zone: PriceZone, limit: usize) -> Result<Vec<PriceRecord>, SourceError> {
        let request = self.api.table(PRICE_TABLE).query(&price_params(zone, limit));
        self.api.rows(request).await
    }
}

/// Overpass building outlines with endpoint fallback.
pub struct OverpassFootprintSource {
    client: Client,
    endpoints: Vec<String>,
}

impl OverpassFootprintSource {
    pub fn new(endpoints: Vec<String>) -> Result<Self, SourceError> {
        if endpoints.is_empty() {
            return Err(SourceError::NotConfigured("footprint_endpoints"));
        }
        Ok(Self {
            client: client()?,
            endpoints,
        })
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self, SourceError> {
        Self::new(config.footprint_endpoints.clone())
    }

    async fn query(&self, endpoint: &str, query: &str) -> Result<OverpassResponse, SourceError> {
        let response = self
            .client
            .post(endpoint)
            .form(&[("data", query)])
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        decode(response).await
    }
}

#[async_trait]
impl FootprintSource for OverpassFootprintSource {
    async fn nearby(&self, latitude: f64, longitude: f64, radius_m: u32) -> Result<Vec<Footprint>, SourceError> {
        let query = overpass_query(latitude, longitude, radius_m);
        let mut last_error = SourceError::NotConfigured("footprint_endpoints");

        for endpoint in &self.endpoints {
            match self.query(endpoint, &query).await {
                Ok(response) => {
                    let buildings = parse_buildings(&response);
                    debug!(endpoint = %endpoint, buildings = buildings.len(), "Overpass query succeeded");
                    return Ok(buildings);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Overpass endpoint failed, trying next");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering every connection with `status` and `body`.
    async fn serve(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 16 * 1024];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    const OVERPASS_BODY: &str = r#"{"elements":[
        {"type":"node","id":1,"lat":60.0,"lon":10.0},
        {"type":"node","id":2,"lat":60.0001,"lon":10.0},
        {"type":"node","id":3,"lat":60.0001,"lon":10.0002},
        {"type":"way","id":7,"nodes":[1,2,3],"tags":{"building":"house"}}
    ]}"#;

    #[test]
    fn test_certificate_params() {
        let params = certificate_params(12, 34, Some("H0101"));
        assert!(params.contains(&("gnr", "eq.12".to_string())));
        assert!(params.contains(&("bnr", "eq.34".to_string())));
        assert!(params.contains(&("building_number", "eq.H0101".to_string())));

        let property_level = certificate_params(12, 34, None);
        assert!(!property_level.iter().any(|(k, _)| *k == "building_number"));
    }

    #[test]
    fn test_price_params_most_recent_first() {
        let params = price_params(PriceZone::NO3, 36);
        assert!(params.contains(&("zone", "eq.NO3".to_string())));
        assert!(params.contains(&("order", "year.desc,week_number.desc".to_string())));
        assert!(params.contains(&("limit", "36".to_string())));
    }

    #[test]
    fn test_from_config_requires_urls() {
        let config = ResolverConfig::default();
        assert!(matches!(
            HttpCertificateSource::from_config(&config),
            Err(SourceError::NotConfigured("certificate_service_url"))
        ));
        assert!(matches!(
            HttpPricingSource::from_config(&config),
            Err(SourceError::NotConfigured("pricing_service_url"))
        ));
        assert!(OverpassFootprintSource::new(Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_overpass_falls_back_to_next_endpoint() {
        let failing = serve("503 Service Unavailable", "busy").await;
        let working = serve("200 OK", OVERPASS_BODY).await;
        let source = OverpassFootprintSource::new(vec![failing, working]).unwrap();

        let buildings = source.nearby(60.0, 10.0, 25).await.unwrap();

        assert_eq!(buildings.len(), 1);
        assert_eq!(buildings[0].building_type, "Småhus");
    }

    #[tokio::test]
    async fn test_overpass_reports_last_error() {
        let a = serve("503 Service Unavailable", "busy").await;
        let b = serve("429 Too Many Requests", "slow down").await;
        let source = OverpassFootprintSource::new(vec![a, b]).unwrap();

        let err = source.nearby(60.0, 10.0, 25).await.unwrap_err();

        assert!(matches!(err, SourceError::Http { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_certificate_row_decoded() {
        let base = serve(
            "200 OK",
            r#"[{"gnr":12,"bnr":34,"building_number":null,"energy_class":"c","energy_consumption":142.5,"address":"Storgata 1"}]"#,
        )
        .await;
        let source = HttpCertificateSource::new(base, Some("key".into())).unwrap();

        let cert = source.find(12, 34, None).await.unwrap().unwrap();

        assert_eq!(cert.energy_consumption, Some(142.5));
        assert_eq!(cert.grade(), Some(crate::aggregate::types::EnergyGrade::C));
    }

    #[tokio::test]
    async fn test_empty_table_is_none() {
        let base = serve("200 OK", "[]").await;
        let source = HttpCertificateSource::new(base, None).unwrap();

        assert_eq!(source.find(1, 1, Some("x")).await.unwrap(), None);
    }
}
