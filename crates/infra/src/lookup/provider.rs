//! External geolocation provider (IPBase).

use std::net::IpAddr;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error};

use geoip_core::{GeoError, GeoRecord};

use crate::config::ProviderSettings;

/// Typed provider failures. Callers branch on the variant, never on message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rejected address {0}")]
    InvalidAddress(String),
    #[error("provider API key is not configured")]
    MissingApiKey,
    #[error("provider rejected credentials (status {0})")]
    Unauthorized(u16),
    #[error("provider rate limit exceeded")]
    RateLimited,
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider returned unexpected status {0}")]
    UnexpectedStatus(u16),
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Map a non-success HTTP status.
    pub fn from_status(status: StatusCode, ip: IpAddr) -> Self {
        match status.as_u16() {
            400 => ProviderError::InvalidAddress(ip.to_string()),
            401 | 403 => ProviderError::Unauthorized(status.as_u16()),
            429 => ProviderError::RateLimited,
            code if status.is_server_error() => {
                ProviderError::Unavailable(format!("provider returned {code}"))
            }
            code => ProviderError::UnexpectedStatus(code),
        }
    }

    /// Credential problems that no retry will fix.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ProviderError::MissingApiKey | ProviderError::Unauthorized(_))
    }
}

impl From<ProviderError> for GeoError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidAddress(ip) => GeoError::invalid_address(ip),
            ProviderError::RateLimited => GeoError::RateLimited,
            other => GeoError::unavailable(other.to_string()),
        }
    }
}

#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoRecord, ProviderError>;
}

/// Client for `GET {base}/v2/info?ip=...` authenticated with an `apikey` header.
#[derive(Debug, Clone)]
pub struct IpBaseClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl IpBaseClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }
}

#[async_trait]
impl GeoProvider for IpBaseClient {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoRecord, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::MissingApiKey);
        };

        let response = self
            .http
            .get(format!("{}/v2/info", self.base_url))
            .query(&[("ip", ip.to_string())])
            .header("apikey", api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let err = ProviderError::from_status(status, ip);
            if err.is_configuration() {
                error!(%ip, status = status.as_u16(), "provider rejected API key");
            } else {
                debug!(%ip, status = status.as_u16(), "provider lookup failed");
            }
            return Err(err);
        }

        let body: IpBaseResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        body.into_record(ip)
    }
}

// IPBase response body

#[derive(Debug, Deserialize)]
struct IpBaseResponse {
    data: Option<IpBaseData>,
}

#[derive(Debug, Deserialize)]
struct IpBaseData {
    location: Option<IpBaseLocation>,
    timezone: Option<IpBaseTimezone>,
}

#[derive(Debug, Deserialize)]
struct IpBaseLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
    country: Option<IpBaseCountry>,
    region: Option<IpBaseNamed>,
    city: Option<IpBaseNamed>,
}

#[derive(Debug, Deserialize)]
struct IpBaseCountry {
    alpha2: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpBaseNamed {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpBaseTimezone {
    id: Option<String>,
    code: Option<String>,
}

impl IpBaseResponse {
    fn into_record(self, ip: IpAddr) -> Result<GeoRecord, ProviderError> {
        let data = self.data.ok_or_else(|| {
            ProviderError::MalformedResponse("response carries no data".to_string())
        })?;

        // Keyed by the address that was asked for, not the provider's spelling of it.
        let mut record = GeoRecord::unknown(ip.to_string());
        if let Some(location) = data.location {
            record.latitude = location.latitude.unwrap_or_default();
            record.longitude = location.longitude.unwrap_or_default();
            if let Some(country) = location.country {
                set_known(&mut record.country_code, country.alpha2);
                set_known(&mut record.country_name, country.name);
            }
            set_known(&mut record.region, location.region.and_then(|r| r.name));
            set_known(&mut record.city, location.city.and_then(|c| c.name));
        }
        if let Some(tz) = data.timezone {
            set_known(&mut record.timezone, tz.code.or(tz.id));
        }
        Ok(record)
    }
}

fn set_known(slot: &mut String, value: Option<String>) {
    if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
        *slot = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: &str, api_key: Option<&str>) -> ProviderSettings {
        ProviderSettings {
            base_url: base_url.to_string(),
            api_key: api_key.map(str::to_string),
            timeout: Duration::from_secs(5),
            user_agent: "geoip-tests".to_string(),
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn full_body() -> serde_json::Value {
        json!({
            "data": {
                "ip": "8.8.8.8",
                "location": {
                    "latitude": 37.386,
                    "longitude": -122.0838,
                    "country": { "alpha2": "US", "name": "United States" },
                    "region": { "name": "California" },
                    "city": { "name": "Mountain View" }
                },
                "timezone": { "id": "America/Los_Angeles", "code": "PST" }
            }
        })
    }

    async fn client_for(server: &MockServer) -> IpBaseClient {
        IpBaseClient::new(&settings(&server.uri(), Some("secret"))).unwrap()
    }

    #[tokio::test]
    async fn maps_full_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/info"))
            .and(query_param("ip", "8.8.8.8"))
            .and(header("apikey", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(full_body()))
            .expect(1)
            .mount(&server)
            .await;

        let record = client_for(&server).await.lookup(ip("8.8.8.8")).await.unwrap();
        assert_eq!(record.ip_address, "8.8.8.8");
        assert_eq!(record.country_code, "US");
        assert_eq!(record.country_name, "United States");
        assert_eq!(record.region, "California");
        assert_eq!(record.city, "Mountain View");
        assert_eq!(record.timezone, "PST");
        assert!((record.latitude - 37.386).abs() < 1e-9);
        assert!(!record.is_from_cache);
    }

    #[tokio::test]
    async fn record_keeps_the_canonical_address() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("ip", "2001:db8::1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "ip": "2001:0db8:0000:0000:0000:0000:0000:0001" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let record = client_for(&server).await.lookup(ip("2001:db8::1")).await.unwrap();
        assert_eq!(record.ip_address, "2001:db8::1");
    }

    #[tokio::test]
    async fn missing_fields_become_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"ip": "10.0.0.1"}})),
            )
            .mount(&server)
            .await;

        let record = client_for(&server).await.lookup(ip("10.0.0.1")).await.unwrap();
        assert_eq!(record.country_name, "Unknown");
        assert_eq!(record.city, "Unknown");
        assert_eq!(record.latitude, 0.0);
    }

    #[tokio::test]
    async fn null_data_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": null})))
            .mount(&server)
            .await;

        let err = client_for(&server).await.lookup(ip("1.1.1.1")).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn status_codes_map_to_typed_errors() {
        let cases = [
            (400, ProviderError::InvalidAddress("1.1.1.1".into())),
            (401, ProviderError::Unauthorized(401)),
            (403, ProviderError::Unauthorized(403)),
            (429, ProviderError::RateLimited),
            (503, ProviderError::Unavailable("provider returned 503".into())),
            (404, ProviderError::UnexpectedStatus(404)),
        ];

        for (status, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let err = client_for(&server).await.lookup(ip("1.1.1.1")).await.unwrap_err();
            assert_eq!(err, expected, "status {status}");
        }
    }

    #[tokio::test]
    async fn missing_api_key_never_calls_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(full_body()))
            .expect(0)
            .mount(&server)
            .await;

        let client = IpBaseClient::new(&settings(&server.uri(), Some("  "))).unwrap();
        let err = client.lookup(ip("8.8.8.8")).await.unwrap_err();
        assert_eq!(err, ProviderError::MissingApiKey);
    }

    #[test]
    fn domain_mapping() {
        assert_eq!(GeoError::from(ProviderError::RateLimited), GeoError::RateLimited);
        assert!(matches!(
            GeoError::from(ProviderError::Unauthorized(401)),
            GeoError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            GeoError::from(ProviderError::InvalidAddress("x".into())),
            GeoError::InvalidAddress(_)
        ));
    }
}
