//! # Stream Requests
//!
//! A `StreamRequest` names one logical upstream: endpoint, HTTP method, the
//! provider query parameters, and the client-side `ErrorPolicy`. Requests are
//! immutable once built; the hub uses `StreamKey` to decide whether two
//! subscribers share a connection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::buffer::BackpressureStrategy;
use crate::core::policy::ErrorPolicy;

/// HTTP verb of a stream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// Error-scenario selector understood by the provider's `errorHandling` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorHandlingFlag {
    #[serde(rename = "onErrorReturn")]
    OnErrorReturn,
    #[serde(rename = "doOnError")]
    DoOnError,
    #[serde(rename = "onErrorResumeNext")]
    OnErrorResumeNext,
}

impl ErrorHandlingFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorHandlingFlag::OnErrorReturn => "onErrorReturn",
            ErrorHandlingFlag::DoOnError => "doOnError",
            ErrorHandlingFlag::OnErrorResumeNext => "onErrorResumeNext",
        }
    }
}

impl fmt::Display for ErrorHandlingFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorHandlingFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onErrorReturn" => Ok(ErrorHandlingFlag::OnErrorReturn),
            "doOnError" => Ok(ErrorHandlingFlag::DoOnError),
            "onErrorResumeNext" => Ok(ErrorHandlingFlag::OnErrorResumeNext),
            other => Err(format!("unknown error handling flag '{}'", other)),
        }
    }
}

/// Provider query parameters. Absent values are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StreamParams {
    pub backpressure_strategy: Option<BackpressureStrategy>,
    pub is_fast_producer: Option<bool>,
    pub data_size: Option<u32>,
    pub error_handling_flag: Option<ErrorHandlingFlag>,
    /// Free-form extra parameters, appended after the known ones.
    pub extra: Vec<(String, String)>,
}

/// Logical identity of an upstream stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub method: HttpMethod,
    pub url: String,
    pub policy: &'static str,
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.method.as_str(), self.url, self.policy)
    }
}

/// # Stream Request
///
/// Built with `get`/`post` plus the `with_*` helpers.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    endpoint: Url,
    method: HttpMethod,
    params: StreamParams,
    policy: ErrorPolicy,
}

impl StreamRequest {
    pub fn new(method: HttpMethod, endpoint: Url) -> Self {
        Self {
            endpoint,
            method,
            params: StreamParams::default(),
            policy: ErrorPolicy::Propagate,
        }
    }

    pub fn get(endpoint: Url) -> Self {
        Self::new(HttpMethod::Get, endpoint)
    }

    pub fn post(endpoint: Url) -> Self {
        Self::new(HttpMethod::Post, endpoint)
    }

    pub fn with_backpressure(mut self, strategy: BackpressureStrategy) -> Self {
        self.params.backpressure_strategy = Some(strategy);
        self
    }

    pub fn with_fast_producer(mut self, fast: bool) -> Self {
        self.params.is_fast_producer = Some(fast);
        self
    }

    pub fn with_data_size(mut self, size: u32) -> Self {
        self.params.data_size = Some(size);
        self
    }

    pub fn with_error_flag(mut self, flag: ErrorHandlingFlag) -> Self {
        self.params.error_handling_flag = Some(flag);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.extra.push((name.into(), value.into()));
        self
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn policy(&self) -> &ErrorPolicy {
        &self.policy
    }

    /// The full URL, with query parameters in a fixed order.
    pub fn url(&self) -> Url {
        let mut url = self.endpoint.clone();
        let p = &self.params;
        let has_params = p.backpressure_strategy.is_some()
            || p.is_fast_producer.is_some()
            || p.data_size.is_some()
            || p.error_handling_flag.is_some()
            || !p.extra.is_empty();
        if has_params {
            let mut query = url.query_pairs_mut();
            if let Some(s) = p.backpressure_strategy {
                query.append_pair("backpressureStrategy", s.as_str());
            }
            if let Some(fast) = p.is_fast_producer {
                query.append_pair("isFastProducer", if fast { "true" } else { "false" });
            }
            if let Some(size) = p.data_size {
                query.append_pair("dataSize", &size.to_string());
            }
            if let Some(flag) = p.error_handling_flag {
                query.append_pair("errorHandlingFlag", flag.as_str());
            }
            for (name, value) in &p.extra {
                query.append_pair(name, value);
            }
        }
        url
    }

    /// Requests with equal keys share one upstream connection.
    pub fn key(&self) -> StreamKey {
        StreamKey {
            method: self.method,
            url: self.url().to_string(),
            policy: self.policy.kind(),
        }
    }
}

/// # Sensor Endpoints
///
/// Request builders for the sensor provider's endpoint catalogue.
#[derive(Debug, Clone)]
pub struct SensorEndpoints {
    base: Url,
}

impl SensorEndpoints {
    /// `base_url` must be absolute; a trailing slash is added when missing so
    /// relative endpoint names join under it.
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    fn endpoint(&self, name: &str) -> Url {
        // Joining a plain relative segment onto a slash-terminated base cannot fail.
        self.base.join(name).unwrap_or_else(|_| self.base.clone())
    }

    /// 0..N sensor updates.
    pub fn observable(&self) -> StreamRequest {
        StreamRequest::get(self.endpoint("observable"))
    }

    /// 0..N fast sensor updates.
    pub fn flowable(&self) -> StreamRequest {
        StreamRequest::get(self.endpoint("flowable"))
    }

    /// Exactly one sensor reading.
    pub fn single(&self) -> StreamRequest {
        StreamRequest::get(self.endpoint("single"))
    }

    /// At most one reading; `flag = false` asks the provider for an empty answer.
    pub fn maybe(&self, flag: bool) -> StreamRequest {
        StreamRequest::get(self.endpoint("maybe")).with_param("flag", flag.to_string())
    }

    /// Completion-only calibration call.
    pub fn calibrate(&self) -> StreamRequest {
        StreamRequest::post(self.endpoint("calibrate"))
    }

    pub fn backpressure(&self, strategy: BackpressureStrategy, fast_producer: bool, data_size: u32) -> StreamRequest {
        StreamRequest::get(self.endpoint("backpressure"))
            .with_backpressure(strategy)
            .with_fast_producer(fast_producer)
            .with_data_size(data_size)
    }

    pub fn error_handling(&self, flag: ErrorHandlingFlag) -> StreamRequest {
        StreamRequest::get(self.endpoint("errorHandling")).with_error_flag(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SensorRecord;

    #[test]
    fn query_parameters_in_fixed_order() {
        let endpoints = SensorEndpoints::new("http://localhost:8080/api").unwrap();
        let request = endpoints.backpressure(BackpressureStrategy::Drop, true, 10);
        assert_eq!(
            request.url().as_str(),
            "http://localhost:8080/api/backpressure?backpressureStrategy=DROP&isFastProducer=true&dataSize=10"
        );
    }

    #[test]
    fn catalogue_paths_and_methods() {
        let endpoints = SensorEndpoints::new("http://localhost:8080/").unwrap();
        assert_eq!(endpoints.flowable().url().as_str(), "http://localhost:8080/flowable");
        assert_eq!(endpoints.maybe(false).url().as_str(), "http://localhost:8080/maybe?flag=false");
        assert_eq!(endpoints.calibrate().method(), HttpMethod::Post);
        assert_eq!(
            endpoints.error_handling(ErrorHandlingFlag::OnErrorResumeNext).url().as_str(),
            "http://localhost:8080/errorHandling?errorHandlingFlag=onErrorResumeNext"
        );
    }

    #[test]
    fn keys_separate_by_url_method_and_policy() {
        let endpoints = SensorEndpoints::new("http://localhost:8080/").unwrap();
        assert_eq!(endpoints.flowable().key(), endpoints.flowable().key());
        assert_ne!(endpoints.flowable().key(), endpoints.observable().key());
        let substituted = endpoints
            .flowable()
            .with_policy(ErrorPolicy::substitute(SensorRecord::new("f", "t")));
        assert_ne!(endpoints.flowable().key(), substituted.key());
    }

    #[test]
    fn error_flag_round_trips_through_its_name() {
        for flag in [
            ErrorHandlingFlag::OnErrorReturn,
            ErrorHandlingFlag::DoOnError,
            ErrorHandlingFlag::OnErrorResumeNext,
        ] {
            assert_eq!(flag.as_str().parse::<ErrorHandlingFlag>(), Ok(flag));
        }
        assert!("retry".parse::<ErrorHandlingFlag>().is_err());
    }
}
