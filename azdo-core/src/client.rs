use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::backoff::RetryPolicy;
use crate::cache::{CacheKey, MemoryCache, ResponseCache};
use crate::models::{
    ClassificationNode, GraphUser, ListEnvelope, TeamProject, TeamSettingsIteration, WebApiTeam,
    WiqlResponse, WorkItem,
};
use crate::retry::{RemoteError, send_with_retry};
use crate::wiql::chunk_ids;

const DEFAULT_BASE_URL: &str = "https://dev.azure.com";
const DEFAULT_GRAPH_BASE_URL: &str = "https://vssps.dev.azure.com";
const API_VERSION: &str = "7.1";
const TEAMS_API_VERSION: &str = "7.1-preview.3";
const GRAPH_API_VERSION: &str = "7.1-preview.1";
const CONTINUATION_HEADER: &str = "x-ms-continuationtoken";
const PAGE_SIZE: usize = 100;
const MAX_BATCH_SIZE: usize = 200;
const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Iterations,
    Areas,
}

impl NodeKind {
    fn as_segment(&self) -> &'static str {
        match self {
            NodeKind::Iterations => "Iterations",
            NodeKind::Areas => "Areas",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    #[default]
    All,
    /// Stop after the first chunk; used for smoke runs.
    FirstBatchOnly,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub graph_base_url: String,
    pub organization: String,
    pub pat: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub cache_ttl: Duration,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl ClientConfig {
    pub fn new(organization: impl Into<String>, pat: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            organization: organization.into(),
            pat: pat.into(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_millis(50),
        }
    }

    /// Points both the core and graph endpoints at one host (used by tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self.graph_base_url = base_url.to_string();
        self
    }
}

#[derive(Clone)]
pub struct DevOpsClient {
    http: Client,
    org_url: Url,
    graph_url: Url,
    pat: String,
    retry: RetryPolicy,
    cache: Arc<dyn ResponseCache>,
    batch_size: usize,
    batch_delay: Duration,
}

impl DevOpsClient {
    pub fn new(organization: &str, pat: impl Into<String>) -> Result<Self, RemoteError> {
        Self::with_config(ClientConfig::new(organization, pat))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            org_url: organization_root(&config.base_url, &config.organization)?,
            graph_url: organization_root(&config.graph_base_url, &config.organization)?,
            pat: config.pat,
            retry: config.retry,
            cache: Arc::new(MemoryCache::new(config.cache_ttl)),
            batch_size: config.batch_size.clamp(1, MAX_BATCH_SIZE),
            batch_delay: config.batch_delay,
        })
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Drops every cached response. Returns how many were removed.
    pub async fn clear_cache(&self) -> usize {
        self.cache.clear().await
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.len().await
    }

    pub async fn list_projects(&self) -> Result<Vec<TeamProject>, RemoteError> {
        let key = CacheKey::new("projects", self.org_url.as_str());
        self.cached(key, || {
            self.list_paged(&["_apis", "projects"], API_VERSION, &[])
        })
        .await
    }

    /// Every team in the organization, each tagged with its owning project.
    pub async fn list_teams(&self) -> Result<Vec<WebApiTeam>, RemoteError> {
        let key = CacheKey::new("teams", self.org_url.as_str());
        self.cached(key, || {
            self.list_paged(&["_apis", "teams"], TEAMS_API_VERSION, &[("$mine", "false")])
        })
        .await
    }

    pub async fn list_users(&self) -> Result<Vec<GraphUser>, RemoteError> {
        let key = CacheKey::new("users", self.graph_url.as_str());
        self.cached(key, || async {
            let mut users = Vec::new();
            let mut continuation: Option<String> = None;
            loop {
                let mut url = endpoint(&self.graph_url, &["_apis", "graph", "users"])?;
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("api-version", GRAPH_API_VERSION);
                    if let Some(token) = &continuation {
                        query.append_pair("continuationToken", token);
                    }
                }
                let response = self.get(&url).await?;
                let next = response
                    .headers()
                    .get(CONTINUATION_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
                    .filter(|token| !token.is_empty());
                let page: ListEnvelope<GraphUser> = decode(response).await?;
                users.extend(page.value);
                match next {
                    Some(token) if continuation.as_ref() != Some(&token) => {
                        continuation = Some(token)
                    }
                    _ => break,
                }
            }
            Ok::<_, RemoteError>(users)
        })
        .await
    }

    pub async fn get_classification_tree(
        &self,
        project: &str,
        kind: NodeKind,
        depth: u32,
    ) -> Result<ClassificationNode, RemoteError> {
        let mut url = self.org_endpoint(&[
            project,
            "_apis",
            "wit",
            "classificationnodes",
            kind.as_segment(),
        ])?;
        url.query_pairs_mut()
            .append_pair("$depth", &depth.to_string())
            .append_pair("api-version", API_VERSION);
        let key = CacheKey::new("classification-nodes", url.as_str());
        self.cached(key, || async { decode(self.get(&url).await?).await })
            .await
    }

    /// Iterations selected in a team's sprint configuration.
    pub async fn list_team_iterations(
        &self,
        project: &str,
        team: &str,
    ) -> Result<Vec<TeamSettingsIteration>, RemoteError> {
        let mut url = self.org_endpoint(&[
            project,
            team,
            "_apis",
            "work",
            "teamsettings",
            "iterations",
        ])?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        let key = CacheKey::new("team-iterations", url.as_str());
        self.cached(key, || async {
            let page: ListEnvelope<TeamSettingsIteration> = decode(self.get(&url).await?).await?;
            Ok::<_, RemoteError>(page.value)
        })
        .await
    }

    /// Runs a WIQL query and returns matching ids in server order.
    pub async fn query_work_item_ids(
        &self,
        project: &str,
        wiql: &str,
        top: usize,
    ) -> Result<Vec<i64>, RemoteError> {
        let mut url = self.org_endpoint(&[project, "_apis", "wit", "wiql"])?;
        url.query_pairs_mut()
            .append_pair("$top", &top.to_string())
            .append_pair("timePrecision", "true")
            .append_pair("api-version", API_VERSION);
        let body = json!({ "query": wiql });
        let response = send_with_retry(&self.retry, || {
            self.authorized(self.http.post(url.clone())).json(&body)
        })
        .await?;
        let result: WiqlResponse = decode(response).await?;
        Ok(result.work_items.into_iter().map(|item| item.id).collect())
    }

    pub fn work_item_batches<'a>(
        &'a self,
        ids: &[i64],
        project: &'a str,
        mode: BatchMode,
    ) -> WorkItemBatches<'a> {
        WorkItemBatches {
            client: self,
            project,
            chunks: chunk_ids(ids, self.batch_size).into_iter(),
            mode,
            fetched: 0,
        }
    }

    /// Fetches full work items for `ids`, one chunk per request.
    pub async fn get_work_items_batch(
        &self,
        ids: &[i64],
        project: &str,
        mode: BatchMode,
    ) -> Result<Vec<WorkItem>, RemoteError> {
        let mut batches = self.work_item_batches(ids, project, mode);
        let mut items = Vec::with_capacity(ids.len());
        while let Some(batch) = batches.next().await {
            items.extend(batch?);
        }
        Ok(items)
    }

    async fn fetch_work_items_chunk(
        &self,
        ids: &[i64],
        project: &str,
    ) -> Result<Vec<WorkItem>, RemoteError> {
        let mut url = self.org_endpoint(&[project, "_apis", "wit", "workitemsbatch"])?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        let body = json!({
            "ids": ids,
            "$expand": "relations",
            "errorPolicy": "omit",
        });
        let response = send_with_retry(&self.retry, || {
            self.authorized(self.http.post(url.clone())).json(&body)
        })
        .await?;
        // Omitted (deleted or forbidden) ids come back as nulls.
        let page: ListEnvelope<Option<WorkItem>> = decode(response).await?;
        Ok(page.value.into_iter().flatten().collect())
    }

    async fn list_paged<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        api_version: &str,
        extra: &[(&str, &str)],
    ) -> Result<Vec<T>, RemoteError> {
        let mut items = Vec::new();
        let mut skip = 0usize;
        loop {
            let mut url = self.org_endpoint(segments)?;
            {
                let mut query = url.query_pairs_mut();
                for (name, value) in extra {
                    query.append_pair(name, value);
                }
                query
                    .append_pair("$top", &PAGE_SIZE.to_string())
                    .append_pair("$skip", &skip.to_string())
                    .append_pair("api-version", api_version);
            }
            let page: ListEnvelope<T> = decode(self.get(&url).await?).await?;
            let received = page.value.len();
            items.extend(page.value);
            if received < PAGE_SIZE {
                break;
            }
            skip += received;
        }
        Ok(items)
    }

    async fn cached<T, F, Fut>(&self, key: CacheKey, load: F) -> Result<T, RemoteError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        if let Some(body) = self.cache.get(&key).await {
            match serde_json::from_str(&body) {
                Ok(value) => {
                    debug!(resource = key.resource(), "serving response from cache");
                    return Ok(value);
                }
                Err(err) => warn!(resource = key.resource(), %err, "discarding unreadable cache entry"),
            }
        }
        let value = load().await?;
        self.cache.put(key, serde_json::to_string(&value)?).await;
        Ok(value)
    }

    async fn get(&self, url: &Url) -> Result<Response, RemoteError> {
        send_with_retry(&self.retry, || self.authorized(self.http.get(url.clone()))).await
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth("", Some(&self.pat))
    }

    fn org_endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        endpoint(&self.org_url, segments)
    }
}

pub struct WorkItemBatches<'a> {
    client: &'a DevOpsClient,
    project: &'a str,
    chunks: std::vec::IntoIter<Vec<i64>>,
    mode: BatchMode,
    fetched: usize,
}

impl WorkItemBatches<'_> {
    /// Number of requests still to be made.
    pub fn remaining(&self) -> usize {
        match self.mode {
            BatchMode::All => self.chunks.len(),
            BatchMode::FirstBatchOnly if self.fetched > 0 => 0,
            BatchMode::FirstBatchOnly => self.chunks.len().min(1),
        }
    }

    pub async fn next(&mut self) -> Option<Result<Vec<WorkItem>, RemoteError>> {
        if self.remaining() == 0 {
            return None;
        }
        let chunk = self.chunks.next()?;
        if self.fetched > 0 && !self.client.batch_delay.is_zero() {
            tokio::time::sleep(self.client.batch_delay).await;
        }
        self.fetched += 1;
        Some(
            self.client
                .fetch_work_items_chunk(&chunk, self.project)
                .await,
        )
    }
}

fn organization_root(base_url: &str, organization: &str) -> Result<Url, RemoteError> {
    let mut url = Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .push(organization);
    Ok(url)
}

fn endpoint(root: &Url, segments: &[&str]) -> Result<Url, RemoteError> {
    let mut url = root.clone();
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organization_root_appends_org_segment() {
        let url = organization_root("https://dev.azure.com", "contoso").unwrap();
        assert_eq!(url.as_str(), "https://dev.azure.com/contoso");
        let url = organization_root("http://127.0.0.1:8080/", "contoso").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/contoso");
    }

    #[test]
    fn endpoint_encodes_segments() {
        let root = organization_root("https://dev.azure.com", "contoso").unwrap();
        let url = endpoint(&root, &["My Project", "_apis", "wit", "wiql"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://dev.azure.com/contoso/My%20Project/_apis/wit/wiql"
        );
    }

    #[test]
    fn batch_size_is_clamped() {
        let mut config = ClientConfig::new("contoso", "pat");
        config.batch_size = 10_000;
        let client = DevOpsClient::with_config(config).unwrap();
        assert_eq!(client.batch_size(), MAX_BATCH_SIZE);
    }
}
