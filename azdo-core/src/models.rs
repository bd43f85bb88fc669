use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const PARENT_LINK: &str = "System.LinkTypes.Hierarchy-Reverse";

#[derive(Debug, Deserialize)]
pub(crate) struct ListEnvelope<T> {
    pub value: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProjectState {
    WellFormed,
    CreatePending,
    Deleting,
    New,
    Unchanged,
    #[default]
    Unknown,
    Other(String),
}

impl ProjectState {
    pub fn as_str(&self) -> &str {
        match self {
            ProjectState::WellFormed => "wellFormed",
            ProjectState::CreatePending => "createPending",
            ProjectState::Deleting => "deleting",
            ProjectState::New => "new",
            ProjectState::Unchanged => "unchanged",
            ProjectState::Unknown => "unknown",
            ProjectState::Other(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "wellFormed" => ProjectState::WellFormed,
            "createPending" => ProjectState::CreatePending,
            "deleting" => ProjectState::Deleting,
            "new" => ProjectState::New,
            "unchanged" => ProjectState::Unchanged,
            "" | "unknown" => ProjectState::Unknown,
            other => ProjectState::Other(other.to_string()),
        }
    }

    pub fn is_well_formed(&self) -> bool {
        matches!(self, ProjectState::WellFormed)
    }
}

impl From<String> for ProjectState {
    fn from(value: String) -> Self {
        ProjectState::parse(&value)
    }
}

impl From<ProjectState> for String {
    fn from(value: ProjectState) -> Self {
        value.as_str().to_string()
    }
}

impl Serialize for ProjectState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProjectState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(ProjectState::parse(&value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamProject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: ProjectState,
    #[serde(default)]
    pub last_update_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebApiTeam {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphUser {
    pub descriptor: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mail_address: Option<String>,
    #[serde(default)]
    pub principal_name: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub origin_id: Option<String>,
    #[serde(default)]
    pub subject_kind: Option<String>,
    #[serde(default)]
    pub is_deleted_in_origin: bool,
}

/// Optional scheduling attributes of a classification node; anything else the
/// server sends is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_frame: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationNode {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub structure_type: Option<String>,
    #[serde(default)]
    pub has_children: bool,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub attributes: Option<NodeAttributes>,
    #[serde(default)]
    pub children: Vec<ClassificationNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationAttributes {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub finish_date: Option<String>,
    #[serde(default)]
    pub time_frame: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSettingsIteration {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub attributes: IterationAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkItemReference {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WiqlResponse {
    #[serde(default)]
    pub work_items: Vec<WorkItemReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub unique_name: Option<String>,
    #[serde(default)]
    pub descriptor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WorkItemFields {
    #[serde(rename = "System.TeamProject", default)]
    pub team_project: Option<String>,
    #[serde(rename = "System.WorkItemType", default)]
    pub work_item_type: Option<String>,
    #[serde(rename = "System.Title", default)]
    pub title: Option<String>,
    #[serde(rename = "System.State", default)]
    pub state: Option<String>,
    #[serde(rename = "System.Reason", default)]
    pub reason: Option<String>,
    #[serde(rename = "Microsoft.VSTS.Scheduling.StoryPoints", default)]
    pub story_points: Option<f64>,
    #[serde(rename = "Microsoft.VSTS.Scheduling.Effort", default)]
    pub effort: Option<f64>,
    #[serde(rename = "Microsoft.VSTS.Scheduling.RemainingWork", default)]
    pub remaining_work: Option<f64>,
    #[serde(rename = "Microsoft.VSTS.Scheduling.CompletedWork", default)]
    pub completed_work: Option<f64>,
    #[serde(rename = "Microsoft.VSTS.Scheduling.OriginalEstimate", default)]
    pub original_estimate: Option<f64>,
    #[serde(rename = "System.AssignedTo", default)]
    pub assigned_to: Option<IdentityRef>,
    #[serde(rename = "System.ChangedBy", default)]
    pub changed_by: Option<IdentityRef>,
    #[serde(rename = "System.CreatedBy", default)]
    pub created_by: Option<IdentityRef>,
    #[serde(rename = "System.IterationPath", default)]
    pub iteration_path: Option<String>,
    #[serde(rename = "System.IterationId", default)]
    pub iteration_id: Option<i64>,
    #[serde(rename = "System.AreaPath", default)]
    pub area_path: Option<String>,
    #[serde(rename = "System.Tags", default)]
    pub tags: Option<String>,
    #[serde(rename = "System.CreatedDate", default)]
    pub created_date: Option<String>,
    #[serde(rename = "System.ChangedDate", default)]
    pub changed_date: Option<String>,
    #[serde(rename = "System.Parent", default)]
    pub parent: Option<i64>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl WorkItemFields {
    /// Process-specific extension fields (`Custom.*`).
    pub fn custom_fields(&self) -> Map<String, Value> {
        self.other
            .iter()
            .filter(|(name, _)| name.starts_with("Custom."))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkItemRelation {
    pub rel: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkItem {
    pub id: i64,
    #[serde(default)]
    pub rev: Option<i64>,
    #[serde(default)]
    pub fields: WorkItemFields,
    #[serde(default)]
    pub relations: Vec<WorkItemRelation>,
}

impl WorkItem {
    /// Parent id from `System.Parent`, falling back to the reverse hierarchy link.
    pub fn parent_id(&self) -> Option<i64> {
        self.fields.parent.or_else(|| {
            self.relations
                .iter()
                .find(|relation| relation.rel == PARENT_LINK)
                .and_then(|relation| relation.url.rsplit('/').next())
                .and_then(|id| id.parse().ok())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn project_state_round_trips_unknown_values() {
        let state: ProjectState = serde_json::from_value(json!("wellFormed")).unwrap();
        assert!(state.is_well_formed());
        let state: ProjectState = serde_json::from_value(json!("archived")).unwrap();
        assert_eq!(state, ProjectState::Other("archived".into()));
        assert_eq!(serde_json::to_value(&state).unwrap(), json!("archived"));
    }

    #[test]
    fn work_item_decodes_typed_and_custom_fields() {
        let item: WorkItem = serde_json::from_value(json!({
            "id": 42,
            "rev": 3,
            "fields": {
                "System.Title": "Fix login",
                "System.IterationPath": "Fabrikam\\Sprint 1",
                "Microsoft.VSTS.Scheduling.StoryPoints": 5.0,
                "System.AssignedTo": {"displayName": "Jane", "descriptor": "aad.jane"},
                "Custom.Billable": true,
                "System.History": "ignored"
            }
        }))
        .unwrap();

        assert_eq!(item.fields.title.as_deref(), Some("Fix login"));
        assert_eq!(item.fields.story_points, Some(5.0));
        assert_eq!(
            item.fields
                .assigned_to
                .as_ref()
                .and_then(|r| r.descriptor.as_deref()),
            Some("aad.jane")
        );
        let custom = item.fields.custom_fields();
        assert_eq!(custom.len(), 1);
        assert_eq!(custom.get("Custom.Billable"), Some(&json!(true)));
    }

    #[test]
    fn parent_id_falls_back_to_relation() {
        let item: WorkItem = serde_json::from_value(json!({
            "id": 7,
            "fields": {},
            "relations": [
                {"rel": "System.LinkTypes.Related", "url": "https://x/_apis/wit/workItems/1"},
                {"rel": "System.LinkTypes.Hierarchy-Reverse", "url": "https://x/_apis/wit/workItems/3"}
            ]
        }))
        .unwrap();
        assert_eq!(item.parent_id(), Some(3));
    }

    #[test]
    fn classification_node_tolerates_missing_fields() {
        let node: ClassificationNode = serde_json::from_value(json!({
            "children": [{"name": "Sprint 1", "identifier": "i-1"}]
        }))
        .unwrap();
        assert!(node.name.is_none());
        assert_eq!(node.children.len(), 1);
    }
}
