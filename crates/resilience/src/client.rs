//! Breaker-guarded client for calls to remote services.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::breaker::BreakerError;
use crate::error::{ClientError, Result};
use crate::registry::BreakerRegistry;

/// Remote collaborators reached by the sales core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Customer account ledger.
    Ledger,
    /// Audit log service.
    Audit,
    /// Key service holding encryption keys.
    Keys,
}

impl Destination {
    /// Returns the destination name, also used as its breaker name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Ledger => "ledger",
            Destination::Audit => "audit",
            Destination::Keys => "keys",
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single outbound call.
///
/// Path segments are percent-encoded individually, so user-supplied values
/// such as usernames can be passed as-is.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    destination: Destination,
    method: Method,
    segments: Vec<String>,
    payload: Option<serde_json::Value>,
    headers: Vec<(String, String)>,
}

impl ServiceRequest {
    fn new<I, S>(destination: Destination, method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            destination,
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            payload: None,
            headers: Vec::new(),
        }
    }

    pub fn get<I, S>(destination: Destination, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(destination, Method::GET, segments)
    }

    pub fn post<I, S>(destination: Destination, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(destination, Method::POST, segments)
    }

    pub fn put<I, S>(destination: Destination, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(destination, Method::PUT, segments)
    }

    /// Attaches a JSON body.
    pub fn json<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        let value = serde_json::to_value(payload).map_err(|e| ClientError::Decode {
            destination: self.destination.to_string(),
            reason: e.to_string(),
        })?;
        self.payload = Some(value);
        Ok(self)
    }

    /// Adds a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    fn url(&self, base: &Url) -> Result<Url> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidDestination(self.destination.to_string()))?
            .pop_if_empty()
            .extend(&self.segments);
        Ok(url)
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    destination: Destination,
    pub status: u16,
    pub body: Vec<u8>,
}

impl ServiceResponse {
    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| ClientError::Decode {
            destination: self.destination.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Builder for [`ServiceClient`].
#[derive(Debug)]
pub struct ServiceClientBuilder {
    destinations: HashMap<Destination, String>,
    timeout: Duration,
    breakers: Option<Arc<BreakerRegistry>>,
}

impl ServiceClientBuilder {
    /// Sets the base URL for a destination.
    pub fn destination(mut self, destination: Destination, base_url: impl Into<String>) -> Self {
        self.destinations.insert(destination, base_url.into());
        self
    }

    /// Sets the per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Uses an existing breaker registry instead of a fresh default one.
    pub fn breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn build(self) -> Result<ServiceClient> {
        let mut destinations = HashMap::with_capacity(self.destinations.len());
        for (destination, base) in self.destinations {
            let url = Url::parse(&base)
                .map_err(|_| ClientError::InvalidDestination(destination.to_string()))?;
            destinations.insert(destination, url);
        }

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| ClientError::Transport {
                destination: "client".to_string(),
                reason: e.to_string(),
            })?;

        Ok(ServiceClient {
            http,
            destinations: Arc::new(destinations),
            breakers: self.breakers.unwrap_or_default(),
            timeout: self.timeout,
        })
    }
}

/// Issues requests to remote services.
///
/// Every call goes through the breaker registered for its destination and is
/// bounded by the client timeout, including the trial call of a half-open
/// breaker. There is no retry beyond what the breaker gates. Cloning is cheap
/// and clones share breakers.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    destinations: Arc<HashMap<Destination, Url>>,
    breakers: Arc<BreakerRegistry>,
    timeout: Duration,
}

impl ServiceClient {
    pub fn builder() -> ServiceClientBuilder {
        ServiceClientBuilder {
            destinations: HashMap::new(),
            timeout: Duration::from_secs(5),
            breakers: None,
        }
    }

    /// The breaker registry guarding this client's calls.
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends a request through the destination's breaker.
    ///
    /// Non-2xx responses are returned as [`ClientError::Http`]; only 5xx
    /// responses count against the breaker.
    #[tracing::instrument(
        skip(self, request),
        fields(destination = %request.destination, method = %request.method)
    )]
    pub async fn send(&self, request: ServiceRequest) -> Result<ServiceResponse> {
        let destination = request.destination;
        let base = self
            .destinations
            .get(&destination)
            .ok_or_else(|| ClientError::InvalidDestination(destination.to_string()))?;
        let url = request.url(base)?;

        let breaker = self.breakers.breaker(destination.as_str());
        let started = Instant::now();
        let result = breaker
            .call_classified(|| self.dispatch(&request, url), ClientError::is_breaker_failure)
            .await;

        metrics::histogram!("service_call_duration_seconds", "destination" => destination.as_str())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(response) => {
                tracing::debug!(status = response.status, "service call succeeded");
                Ok(response)
            }
            Err(BreakerError::Open { retry_after, .. }) => Err(ClientError::CircuitOpen {
                destination: destination.to_string(),
                retry_after,
            }),
            Err(BreakerError::Inner(err)) => {
                metrics::counter!("service_call_errors_total", "destination" => destination.as_str())
                    .increment(1);
                tracing::warn!(error = %err, "service call failed");
                Err(err)
            }
        }
    }

    async fn dispatch(&self, request: &ServiceRequest, url: Url) -> Result<ServiceResponse> {
        let name = request.destination.as_str();
        let mut builder = self.http.request(request.method.clone(), url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ClientError::Timeout {
                destination: name.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|e| ClientError::from_reqwest(name, e, self.timeout))?;

        if status.is_success() {
            Ok(ServiceResponse {
                destination: request.destination,
                status: status.as_u16(),
                body: body.to_vec(),
            })
        } else {
            Err(ClientError::Http {
                destination: name.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            })
        }
    }
}
