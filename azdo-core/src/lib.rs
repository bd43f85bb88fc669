mod backoff;
mod cache;
mod client;
mod models;
mod retry;
pub mod wiql;

pub use backoff::{Backoff, DEFAULT_RETRY_AFTER, RetryPolicy, parse_retry_after};
pub use cache::{CacheKey, MemoryCache, ResponseCache};
pub use client::{BatchMode, ClientConfig, DevOpsClient, NodeKind, WorkItemBatches};
pub use models::{
    ClassificationNode, GraphUser, IdentityRef, IterationAttributes, NodeAttributes,
    ProjectState, TeamProject, TeamSettingsIteration, WebApiTeam, WorkItem, WorkItemFields,
    WorkItemReference, WorkItemRelation,
};
pub use retry::{ApiErrorClass, RemoteError, send_with_retry};
