//! Classification tree to flat iteration records.

use azdo_core::{ClassificationNode, NodeAttributes};

use super::{RecordError, parse_timestamp};
use crate::store::IterationInput;

/// One node of the iteration tree with its computed path. Fields the source
/// may omit stay optional until [`validate_iteration`].
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIteration {
    pub identifier: Option<String>,
    pub node_id: Option<i64>,
    pub name: Option<String>,
    pub path: String,
    pub attributes: Option<NodeAttributes>,
}

/// Walks `root` in pre-order, joining ancestor names with `\`.
///
/// A node with neither identifier nor name is not emitted and adds no path
/// segment, but its children are still visited under the parent's path.
pub fn flatten_tree(root: &ClassificationNode) -> Vec<FlatIteration> {
    let mut out = Vec::new();
    visit(root, "", &mut out);
    out
}

fn visit(node: &ClassificationNode, parent_path: &str, out: &mut Vec<FlatIteration>) {
    let identifier = non_blank(node.identifier.as_deref());
    let name = non_blank(node.name.as_deref());

    let path = if identifier.is_none() && name.is_none() {
        parent_path.to_string()
    } else {
        let path = match name {
            Some(name) if parent_path.is_empty() => name.to_string(),
            Some(name) => format!("{parent_path}\\{name}"),
            None => parent_path.to_string(),
        };
        out.push(FlatIteration {
            identifier: identifier.map(str::to_string),
            node_id: node.id,
            name: name.map(str::to_string),
            path: path.clone(),
            attributes: node.attributes.clone(),
        });
        path
    };

    for child in &node.children {
        visit(child, &path, out);
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

/// Classifies a date range relative to `now` (unix seconds).
pub fn derive_time_frame(start: Option<i64>, finish: Option<i64>, now: i64) -> Option<&'static str> {
    match (start, finish) {
        (None, None) => None,
        (Some(start), _) if now < start => Some("future"),
        (_, Some(finish)) if now > finish => Some("past"),
        _ => Some("current"),
    }
}

/// Turns a flattened node into a storable iteration, or says why it cannot be.
pub fn validate_iteration(
    node: &FlatIteration,
    project_id: &str,
    now: i64,
) -> Result<IterationInput, RecordError> {
    let identifier = node
        .identifier
        .clone()
        .ok_or(RecordError::MissingField("identifier"))?;
    let name = node.name.clone().ok_or(RecordError::MissingField("name"))?;
    if project_id.trim().is_empty() {
        return Err(RecordError::MissingField("project_id"));
    }

    let attributes = node.attributes.as_ref();
    let start_date = parse_timestamp(
        "startDate",
        attributes.and_then(|a| a.start_date.as_deref()),
    )?;
    let finish_date = parse_timestamp(
        "finishDate",
        attributes.and_then(|a| a.finish_date.as_deref()),
    )?;
    let time_frame = attributes
        .and_then(|a| a.time_frame.clone())
        .or_else(|| derive_time_frame(start_date, finish_date, now).map(str::to_string));

    Ok(IterationInput {
        identifier,
        node_id: node.node_id,
        name,
        path: node.path.clone(),
        start_date,
        finish_date,
        time_frame,
        attributes: attributes.and_then(|a| serde_json::to_string(a).ok()),
        project_id: project_id.to_string(),
    })
}
