use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, Endpoints};
use crate::error::{Error, Result, classify};
use crate::job::{JobHandle, PollFailurePolicy};
use crate::metadata::IndicatorMetadata;
use crate::transport::{HttpTransport, RawRequest, Transport};

/// Per-call overrides. `None` defers to the client's configured default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Only validate and cost the request.
    pub preflight: Option<bool>,
    /// Submit as an asynchronous job.
    pub batch: Option<bool>,
}

impl CallOptions {
    pub fn preflight(mut self, preflight: bool) -> Self {
        self.preflight = Some(preflight);
        self
    }

    pub fn batch(mut self, batch: bool) -> Self {
        self.batch = Some(batch);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,

    poll_delay: Duration,
    max_wait: Option<Duration>,
    poll_failure: PollFailurePolicy,
    progress: bool,

    transport: Arc<dyn Transport>,
}

impl Client {
    pub const DEFAULT_POLL_DELAY: Duration = Duration::from_secs(5);

    /// Creates a client from `PYPORTALL_API_KEY` and the `PYPORTALL_ENDPOINT_*`
    /// variables.
    ///
    /// This is equivalent to `Client::new(None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None)
    }

    /// Creates a client whose key is the explicit `api_key`, falling back to
    /// `PYPORTALL_API_KEY`. Fails with [`Error::Configuration`] when neither is set.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::from_config(ClientConfig::from_env(api_key)?)
    }

    /// Creates a client over the default HTTP transport.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Creates a client over a caller-supplied transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            poll_delay: Self::DEFAULT_POLL_DELAY,
            max_wait: None,
            poll_failure: PollFailurePolicy::default(),
            progress: false,
            transport,
        }
    }

    pub fn with_batch(mut self, batch: bool) -> Self {
        self.config.batch = batch;
        self
    }

    pub fn with_preflight(mut self, preflight: bool) -> Self {
        self.config.preflight = preflight;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.config.endpoints = endpoints;
        self
    }

    /// Delay between two polls of a deferred job.
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Upper bound on the time spent polling one deferred job. Unbounded by default.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn with_poll_failure(mut self, policy: PollFailurePolicy) -> Self {
        self.poll_failure = policy;
        self
    }

    /// Show a spinner on stderr while waiting for a deferred job.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn api_key(&self) -> &str {
        &self.config.api_key
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.config.endpoints
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Posts `payload` to `endpoint` and returns the final JSON result.
    ///
    /// - 200: the body is the result.
    /// - 202: the body names a job url, which is polled every `poll_delay` until
    ///   it answers 200. Any other poll status yields `Value::Null` under
    ///   [`PollFailurePolicy::ReturnNull`].
    /// - 401, 422 and everything else map through [`classify`].
    ///
    /// Blocks for the whole exchange, polling included. Nothing is retried.
    pub fn call<T>(&self, endpoint: &str, payload: &T, options: CallOptions) -> Result<Value>
    where
        T: Serialize + ?Sized,
    {
        let preflight = options.preflight.unwrap_or(self.config.preflight);
        let batch = options.batch.unwrap_or(self.config.batch);

        let mut request = RawRequest::new(Method::POST, endpoint)
            .query("apikey", self.config.api_key.as_str())
            .json(serde_json::to_value(payload)?);
        if preflight {
            request = request.query("preflight", "true");
        }
        if batch {
            request = request.query("batch", "true");
        }

        debug!(endpoint, preflight, batch, "submitting request");
        let resp = self.transport.send(&request)?;

        match resp.status {
            200 => parse_json(endpoint, &resp.body),
            202 => {
                let job = JobHandle::from_accepted(&resp.body)?;
                info!(endpoint, job = job.url(), "request deferred");
                self.wait_for(&job, preflight)
            }
            status => Err(classify(status, &resp.body, preflight)),
        }
    }

    /// Downloads the indicator metadata catalog. The endpoint is public, so no key
    /// is sent; any status but 200 is an [`Error::UnknownApi`].
    pub fn fetch_metadata_catalog(&self) -> Result<Vec<IndicatorMetadata>> {
        let url = self.config.endpoints.metadata.as_str();
        let resp = self.transport.send(&RawRequest::get(url))?;
        if resp.status != 200 {
            return Err(Error::unknown_api(resp.status, &resp.body));
        }

        serde_json::from_str(&resp.body).map_err(|e| {
            Error::UnexpectedResponse(format!("failed to parse metadata catalog (url={url}): {e}"))
        })
    }

    /// Authenticated request without job handling. Any 2xx is a success; an empty
    /// body reads as `Value::Null`.
    pub(crate) fn request_json(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let mut request =
            RawRequest::new(method, url).query("apikey", self.config.api_key.as_str());
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(method = %request.method, url, "sending request");
        let resp = self.transport.send(&request)?;
        match resp.status {
            200..=299 if resp.body.trim().is_empty() => Ok(Value::Null),
            200..=299 => parse_json(url, &resp.body),
            status => Err(classify(status, &resp.body, false)),
        }
    }

    fn wait_for(&self, job: &JobHandle, preflight: bool) -> Result<Value> {
        let spinner = self.progress.then(|| job_spinner(job));
        let outcome = self.poll_job(job, preflight, spinner.as_ref());
        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        outcome
    }

    fn poll_job(
        &self,
        job: &JobHandle,
        preflight: bool,
        spinner: Option<&ProgressBar>,
    ) -> Result<Value> {
        let started = Instant::now();
        let mut polls: u32 = 0;

        loop {
            let request = RawRequest::get(job.url()).query("apikey", self.config.api_key.as_str());
            let resp = self.transport.send(&request)?;
            polls += 1;
            if let Some(pb) = spinner {
                pb.set_message(format!("waiting for job ({polls} poll(s))"));
                pb.tick();
            }

            match resp.status {
                200 => {
                    debug!(job = job.url(), polls, "job completed");
                    return parse_json(job.url(), &resp.body);
                }
                202 => {
                    if let Some(budget) = self.max_wait {
                        let waited = started.elapsed();
                        if waited.saturating_add(self.poll_delay) > budget {
                            return Err(Error::DeadlineExceeded {
                                job: job.url().to_string(),
                                waited,
                            });
                        }
                    }
                    debug!(job = job.url(), polls, "job pending");
                    thread::sleep(self.poll_delay);
                }
                status => {
                    return match self.poll_failure {
                        PollFailurePolicy::ReturnNull => {
                            warn!(job = job.url(), status, "job poll failed, returning an empty result");
                            Ok(Value::Null)
                        }
                        PollFailurePolicy::Raise => Err(classify(status, &resp.body, preflight)),
                    };
                }
            }
        }
    }
}

fn parse_json(url: &str, body: &str) -> Result<Value> {
    serde_json::from_str(body).map_err(|e| {
        Error::UnexpectedResponse(format!("failed to parse API JSON (url={url}): {e}"))
    })
}

fn job_spinner(job: &JobHandle) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(format!("waiting for {}", job.url()));
    pb
}
