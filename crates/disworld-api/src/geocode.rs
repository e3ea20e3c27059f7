use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use disworld_types::models::{Coordinate, CountryCode};

pub const DEFAULT_GEOCODER_URL: &str =
    "https://geocode-api.arcgis.com/arcgis/rest/services/World/GeocodeServer/findAddressCandidates";

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("no candidates for address")]
    NotFound,
    #[error("geocoding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("geocoder returned an unusable location: {0}")]
    Invalid(String),
}

/// Resolves free-text addresses to coordinates. Only the best candidate is used.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(
        &self,
        address: &str,
        country: Option<&CountryCode>,
    ) -> Result<Coordinate, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct CandidatesResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    address: String,
    location: CandidateLocation,
}

/// `x` is longitude, `y` latitude.
#[derive(Debug, Deserialize)]
struct CandidateLocation {
    x: f64,
    y: f64,
}

/// ArcGIS World Geocoding `findAddressCandidates` client.
pub struct ArcGisGeocoder {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl ArcGisGeocoder {
    pub fn new(url: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            api_key,
        }
    }
}

fn first_candidate(response: CandidatesResponse) -> Result<Coordinate, GeocodeError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(GeocodeError::NotFound)?;
    debug!("Geocoded to '{}'", candidate.address);
    Coordinate::new(candidate.location.y, candidate.location.x)
        .map_err(|e| GeocodeError::Invalid(e.to_string()))
}

#[async_trait]
impl Geocoder for ArcGisGeocoder {
    async fn geocode(
        &self,
        address: &str,
        country: Option<&CountryCode>,
    ) -> Result<Coordinate, GeocodeError> {
        let mut query: Vec<(&str, &str)> = vec![
            ("SingleLine", address),
            ("maxLocations", "1"),
            ("outFields", "Match_addr"),
            ("f", "json"),
        ];
        if let Some(country) = country {
            query.push(("countryCode", country.as_str()));
        }
        if let Some(key) = &self.api_key {
            query.push(("token", key.as_str()));
        }

        let response: CandidatesResponse = self
            .http
            .get(&self.url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        first_candidate(response)
    }
}
