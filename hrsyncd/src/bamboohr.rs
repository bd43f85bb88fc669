use std::time::Duration;

use azdo_core::{RemoteError, RetryPolicy, send_with_retry};
use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BAMBOO_BASE_URL: &str = "https://api.bamboohr.com/api/gateway.php";

#[derive(Debug, Error)]
pub enum BambooError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct BambooConfig {
    pub base_url: String,
    pub subdomain: String,
    pub api_key: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl BambooConfig {
    pub fn new(subdomain: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BAMBOO_BASE_URL.to_string(),
            subdomain: subdomain.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEmployee {
    /// BambooHR sends numeric ids as strings.
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub work_email: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Directory {
    #[serde(default)]
    employees: Vec<DirectoryEmployee>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimeOffStatus {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimeOffType {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimeOffAmount {
    #[serde(default)]
    pub unit: Option<String>,
    /// Decimal text, e.g. `"1.5"`.
    #[serde(default)]
    pub amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeOffRequest {
    pub id: String,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub status: Option<TimeOffStatus>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<TimeOffType>,
    #[serde(default)]
    pub amount: Option<TimeOffAmount>,
}

#[derive(Clone)]
pub struct BambooClient {
    http: Client,
    root: Url,
    api_key: String,
    retry: RetryPolicy,
}

impl BambooClient {
    pub fn new(config: BambooConfig) -> Result<Self, BambooError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()?;
        let mut root = Url::parse(&config.base_url)?;
        root.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend([config.subdomain.as_str(), "v1"]);
        Ok(Self {
            http,
            root,
            api_key: config.api_key,
            retry: config.retry,
        })
    }

    pub async fn employee_directory(&self) -> Result<Vec<DirectoryEmployee>, BambooError> {
        let url = self.endpoint(&["employees", "directory"])?;
        let directory: Directory = self.get_json(url).await?;
        Ok(directory.employees)
    }

    /// Requests overlapping `start..=end` (`YYYY-MM-DD`).
    pub async fn time_off_requests(
        &self,
        start: &str,
        end: &str,
    ) -> Result<Vec<TimeOffRequest>, BambooError> {
        let mut url = self.endpoint(&["time_off", "requests", ""])?;
        url.query_pairs_mut()
            .append_pair("start", start)
            .append_pair("end", end);
        self.get_json(url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, BambooError> {
        let response = send_with_retry(&self.retry, || self.authorized(self.http.get(url.clone())))
            .await?;
        let body = response.text().await.map_err(RemoteError::from)?;
        Ok(serde_json::from_str(&body).map_err(RemoteError::from)?)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.api_key, Some("x"))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BambooError> {
        let mut url = self.root.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .extend(segments);
        Ok(url)
    }
}
