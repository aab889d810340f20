use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

pub const API_KEY_VAR: &str = "PYPORTALL_API_KEY";

const DEFAULT_HOST: &str = "https://portall-api.inspide.com";

/// Absolute URLs of every remote operation.
///
/// Resolved once when the configuration is built; changing the environment
/// afterwards has no effect on an existing client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub metadata: String,
    pub geocoding: String,
    pub isovists: String,
    pub isolines: String,
    pub aggregated_indicators: String,
    pub disaggregated_indicators: String,
    pub dataframes: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            metadata: format!("{DEFAULT_HOST}/v0/metadata/indicators/"),
            geocoding: format!("{DEFAULT_HOST}/v0/pyportall/geocoding.geojson"),
            isovists: format!("{DEFAULT_HOST}/v0/pyportall/isovists.geojson"),
            isolines: format!("{DEFAULT_HOST}/v0/pyportall/isolines.geojson"),
            aggregated_indicators: format!("{DEFAULT_HOST}/v0/pyportall/indicators.geojson"),
            disaggregated_indicators: format!("{DEFAULT_HOST}/v0/pyportall/indicator.geojson"),
            dataframes: format!("{DEFAULT_HOST}/v0/dataframes/"),
        }
    }
}

impl Endpoints {
    /// Defaults overridden by any `PYPORTALL_ENDPOINT_*` value `lookup` yields.
    pub fn resolve<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut endpoints = Self::default();
        let slots: [(&str, &mut String); 7] = [
            ("PYPORTALL_ENDPOINT_METADATA", &mut endpoints.metadata),
            ("PYPORTALL_ENDPOINT_GEOCODING", &mut endpoints.geocoding),
            ("PYPORTALL_ENDPOINT_RESOLVE_ISOVISTS", &mut endpoints.isovists),
            ("PYPORTALL_ENDPOINT_RESOLVE_ISOLINES", &mut endpoints.isolines),
            (
                "PYPORTALL_ENDPOINT_AGGREGATED_INDICATORS",
                &mut endpoints.aggregated_indicators,
            ),
            (
                "PYPORTALL_ENDPOINT_DISAGGREGATED_INDICATORS",
                &mut endpoints.disaggregated_indicators,
            ),
            ("PYPORTALL_ENDPOINT_DATAFRAMES", &mut endpoints.dataframes),
        ];
        for (var, slot) in slots {
            if let Some(url) = non_blank(lookup(var)) {
                *slot = url;
            }
        }
        endpoints
    }

    /// Points every endpoint at `base`, keeping the default paths. Handy for
    /// staging servers and local mocks.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let rebase = |url: String| url.replacen(DEFAULT_HOST, base, 1);
        let d = Self::default();
        Self {
            metadata: rebase(d.metadata),
            geocoding: rebase(d.geocoding),
            isovists: rebase(d.isovists),
            isolines: rebase(d.isolines),
            aggregated_indicators: rebase(d.aggregated_indicators),
            disaggregated_indicators: rebase(d.disaggregated_indicators),
            dataframes: rebase(d.dataframes),
        }
    }
}

/// Client settings.
///
/// The `Debug` implementation never prints the API key.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub endpoints: Endpoints,
    /// Submit every call as a batch job unless the call says otherwise.
    pub batch: bool,
    /// Ask for a cost estimate only, unless the call says otherwise.
    pub preflight: bool,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"***REDACTED***")
            .field("endpoints", &self.endpoints)
            .field("batch", &self.batch)
            .field("preflight", &self.preflight)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClientConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Resolves the configuration from the process environment.
    pub fn from_env(api_key: Option<String>) -> Result<Self> {
        Self::resolve(api_key, |var| std::env::var(var).ok())
    }

    /// Resolves the configuration using (in order of precedence):
    /// - the explicit `api_key`
    /// - `PYPORTALL_API_KEY` as returned by `lookup`
    ///
    /// Endpoints come from `PYPORTALL_ENDPOINT_*` or their production defaults.
    pub fn resolve<F>(api_key: Option<String>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = non_blank(api_key)
            .or_else(|| non_blank(lookup(API_KEY_VAR)))
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "API key is required to use Portall's API (pass one explicitly or set {API_KEY_VAR})"
                ))
            })?;

        Ok(Self {
            api_key,
            endpoints: Endpoints::resolve(&lookup),
            batch: false,
            preflight: false,
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
