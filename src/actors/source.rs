//! Sample sources
//!
//! A [`SampleSource`] performs one request against a provider and turns the
//! response into a [`Sample`]. Responses are opaque until parsed: the
//! provider's [`FieldMap`] says where each reading field lives, as JSON
//! pointers into the response body.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{instrument, trace};

use crate::config::{FieldMap, HttpMethod, ProviderConfig, RequestConfig};
use crate::error::{MonitorError, MonitorResult};
use crate::registry::Provider;
use crate::sample::{NetworkReading, ProtocolReading, ProviderKind, Reading, Sample};

/// Status strings a protocol endpoint may report while operational
const OPERATIONAL_STATUSES: [&str; 4] = ["ok", "up", "healthy", "true"];

#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn fetch(&self, provider: &Provider) -> MonitorResult<Sample>;
}

/// How to query one provider
#[derive(Debug, Clone)]
struct Endpoint {
    request: RequestConfig,
    fields: FieldMap,
    headers: BTreeMap<String, String>,
    expected_status: Option<Vec<u16>>,
    body_pattern: Option<Regex>,
}

impl Endpoint {
    fn from_config(config: &ProviderConfig) -> MonitorResult<Self> {
        let body_pattern = config
            .body_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| {
                MonitorError::Config(format!("provider {}: invalid body_pattern: {e}", config.id))
            })?;

        Ok(Self {
            request: config.request.clone(),
            fields: config.fields.clone(),
            headers: config.headers.clone(),
            expected_status: config.expected_status.clone(),
            body_pattern,
        })
    }

    fn accepts(&self, status: reqwest::StatusCode) -> bool {
        match &self.expected_status {
            Some(codes) => codes.contains(&status.as_u16()),
            None => status.is_success(),
        }
    }
}

/// JSON-RPC / REST source over HTTP
pub struct HttpSource {
    client: reqwest::Client,
    endpoints: HashMap<String, Endpoint>,
}

impl HttpSource {
    /// Build a source for the given providers
    ///
    /// Per-request timeouts are enforced by the poller, the client timeout
    /// only bounds connections the poller already gave up on.
    pub fn new(providers: &[ProviderConfig], timeout: Duration) -> MonitorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::Config(format!("failed to build HTTP client: {e}")))?;

        let endpoints = providers
            .iter()
            .map(|config| Ok((config.id.clone(), Endpoint::from_config(config)?)))
            .collect::<MonitorResult<_>>()?;

        Ok(Self { client, endpoints })
    }

    fn build_request(&self, provider: &Provider, endpoint: &Endpoint) -> reqwest::RequestBuilder {
        let mut request = match &endpoint.request {
            RequestConfig::JsonRpc { method, params } => {
                let params = if params.is_null() {
                    json!([])
                } else {
                    params.clone()
                };
                self.client.post(&provider.url).json(&json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": method,
                    "params": params,
                }))
            }
            RequestConfig::Rest { method } => match method {
                HttpMethod::Get => self.client.get(&provider.url),
                HttpMethod::Post => self.client.post(&provider.url),
                HttpMethod::Head => self.client.head(&provider.url),
            },
        };

        for (name, value) in &endpoint.headers {
            request = request.header(name, value);
        }
        request
    }
}

#[async_trait]
impl SampleSource for HttpSource {
    #[instrument(skip(self, provider), fields(provider = %provider.id))]
    async fn fetch(&self, provider: &Provider) -> MonitorResult<Sample> {
        let endpoint = self
            .endpoints
            .get(&provider.id)
            .ok_or_else(|| MonitorError::UnknownProvider(provider.id.clone()))?;

        trace!("requesting {}", provider.url);
        let started = Instant::now();

        let response = self.build_request(provider, endpoint).send().await?;
        let status = response.status();
        if !endpoint.accepts(status) {
            return Err(MonitorError::Transport(format!("unexpected HTTP status {status}")));
        }

        let body = response.text().await?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        if let Some(pattern) = &endpoint.body_pattern
            && !pattern.is_match(&body)
        {
            return Err(MonitorError::Parse(format!(
                "response body does not match {}",
                pattern.as_str()
            )));
        }

        let reading = match provider.kind {
            ProviderKind::Network => Reading::Network(parse_network(&body, &endpoint.fields)?),
            ProviderKind::Protocol => Reading::Protocol(parse_protocol(&body, &endpoint.fields)?),
        };

        Ok(Sample {
            provider_id: provider.id.clone(),
            target: provider.target.clone(),
            timestamp: Utc::now(),
            latency_ms,
            reading,
        })
    }
}

fn parse_document(body: &str) -> MonitorResult<Value> {
    let document: Value = serde_json::from_str(body)?;
    if let Some(error) = document.get("error").filter(|e| !e.is_null()) {
        return Err(MonitorError::Parse(format!("provider returned error: {error}")));
    }
    Ok(document)
}

/// Parse a network reading out of a JSON-RPC or REST response
pub fn parse_network(body: &str, fields: &FieldMap) -> MonitorResult<NetworkReading> {
    let document = parse_document(body)?;

    Ok(NetworkReading {
        slot: required_u64(&document, &fields.slot)?,
        block_height: required_u64(&document, &fields.block_height)?,
        transaction_count: required_u64(&document, &fields.transaction_count)?,
        block_time: required_f64(&document, &fields.block_time)? as i64,
        supply: optional_f64(&document, fields.supply.as_deref())?,
    })
}

/// Parse a protocol reading; endpoints without mapped fields need not return JSON
pub fn parse_protocol(body: &str, fields: &FieldMap) -> MonitorResult<ProtocolReading> {
    if fields.status.is_none() && fields.account_count.is_none() {
        return Ok(ProtocolReading {
            reported_status: None,
            account_count: None,
        });
    }

    let document = parse_document(body)?;

    let reported_status = match fields.status.as_deref() {
        Some(pointer) => {
            let value = document
                .pointer(pointer)
                .ok_or_else(|| missing_field(pointer))?;
            let status = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !OPERATIONAL_STATUSES.contains(&status.to_ascii_lowercase().as_str()) {
                return Err(MonitorError::Parse(format!("endpoint reports status {status}")));
            }
            Some(status)
        }
        None => None,
    };

    let account_count = optional_f64(&document, fields.account_count.as_deref())?
        .map(|count| count as u64);

    Ok(ProtocolReading {
        reported_status,
        account_count,
    })
}

fn missing_field(pointer: &str) -> MonitorError {
    MonitorError::Parse(format!("missing field {pointer}"))
}

fn as_f64(value: &Value, pointer: &str) -> MonitorResult<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| MonitorError::Parse(format!("field {pointer} is not a number: {value}")))
}

fn required_f64(document: &Value, pointer: &str) -> MonitorResult<f64> {
    let value = document
        .pointer(pointer)
        .ok_or_else(|| missing_field(pointer))?;
    as_f64(value, pointer)
}

fn required_u64(document: &Value, pointer: &str) -> MonitorResult<u64> {
    let value = document
        .pointer(pointer)
        .ok_or_else(|| missing_field(pointer))?;
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    let n = as_f64(value, pointer)?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(MonitorError::Parse(format!(
            "field {pointer} is not an unsigned integer: {value}"
        )));
    }
    Ok(n as u64)
}

fn optional_f64(document: &Value, pointer: Option<&str>) -> MonitorResult<Option<f64>> {
    match pointer.and_then(|p| document.pointer(p).map(|v| (p, v))) {
        Some((_, Value::Null)) | None => Ok(None),
        Some((pointer, value)) => as_f64(value, pointer).map(Some),
    }
}
