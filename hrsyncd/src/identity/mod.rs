//! Cross-system employee matching: fuzzy suggestions for unmapped roster
//! employees and one-to-one mapping creation.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{InatechEmployee, MappingRecord, NewMapping, Store, StoreError};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("unknown employee {0}")]
    UnknownEmployee(i64),
}

/// Scores are percentages. A name match needs `name_min`; an email-derived
/// match needs `email_min` and is then multiplied by `email_boost`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    pub name_min: f64,
    pub email_min: f64,
    pub email_boost: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            name_min: 50.0,
            email_min: 70.0,
            email_boost: 1.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySpace {
    Bamboo,
    DevOps,
}

impl IdentitySpace {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bamboo" | "bamboohr" => Some(IdentitySpace::Bamboo),
            "devops" | "azdo" => Some(IdentitySpace::DevOps),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub space: IdentitySpace,
    /// Bamboo employee id as text, or the DevOps user descriptor.
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    Name,
    Email,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub candidate: Candidate,
    pub score: f64,
    pub reason: MatchReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingFailure {
    pub index: usize,
    pub request: NewMapping,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkMappingReport {
    pub created: Vec<MappingRecord>,
    pub failures: Vec<MappingFailure>,
}

/// Lower-cases and collapses runs of whitespace.
pub fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `100 * (max_len - edit_distance) / max_len` over normalized strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 100.0;
    }
    let distance = strsim::levenshtein(&a, &b).min(max_len);
    100.0 * (max_len - distance) as f64 / max_len as f64
}

/// `jane.doe@corp.test` becomes `jane doe`. Digits are dropped.
pub fn name_from_email(email: &str) -> Option<String> {
    let local = email.split('@').next()?;
    let name: String = local
        .chars()
        .filter(|ch| !ch.is_ascii_digit())
        .map(|ch| if matches!(ch, '.' | '_' | '-' | '+') { ' ' } else { ch })
        .collect();
    let name = normalize(&name);
    (!name.is_empty()).then_some(name)
}

/// Best score of `candidate` against the given roster name and email, or
/// `None` when neither threshold is met.
fn score_candidate(
    name: &str,
    email: Option<&str>,
    candidate: &Candidate,
    thresholds: &MatchThresholds,
) -> Option<(f64, MatchReason)> {
    let name_score = similarity(name, &candidate.name);

    let email_score = [
        email
            .and_then(name_from_email)
            .map(|derived| similarity(&derived, &candidate.name)),
        candidate
            .email
            .as_deref()
            .and_then(name_from_email)
            .map(|derived| similarity(name, &derived)),
    ]
    .into_iter()
    .flatten()
    .fold(None, |best: Option<f64>, score| {
        Some(best.map_or(score, |best| best.max(score)))
    });

    let boosted = email_score
        .filter(|score| *score >= thresholds.email_min)
        .map(|score| (score * thresholds.email_boost).min(100.0));
    match boosted {
        Some(boosted) if boosted >= name_score => Some((boosted, MatchReason::Email)),
        _ if name_score >= thresholds.name_min => Some((name_score, MatchReason::Name)),
        _ => None,
    }
}

/// Scores every candidate and returns those above threshold, best first.
/// Equal scores keep their input order.
pub fn rank_candidates(
    name: &str,
    email: Option<&str>,
    candidates: Vec<Candidate>,
    thresholds: &MatchThresholds,
) -> Vec<Suggestion> {
    let mut suggestions: Vec<Suggestion> = candidates
        .into_iter()
        .filter_map(|candidate| {
            score_candidate(name, email, &candidate, thresholds).map(|(score, reason)| Suggestion {
                candidate,
                score,
                reason,
            })
        })
        .collect();
    suggestions.sort_by(|a, b| b.score.total_cmp(&a.score));
    suggestions
}

#[derive(Clone)]
pub struct Reconciler {
    store: Store,
    thresholds: MatchThresholds,
}

impl Reconciler {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            thresholds: MatchThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: MatchThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn register_employee(&self, employee: &InatechEmployee) -> Result<(), IdentityError> {
        self.store.upsert_inatech_employee(employee).await?;
        Ok(())
    }

    /// Ranked candidates in `space` for roster employee `inatech_id`. Empty
    /// when the employee is already linked in that space; candidates linked
    /// to anyone never appear.
    pub async fn suggest_matches(
        &self,
        inatech_id: i64,
        space: IdentitySpace,
    ) -> Result<Vec<Suggestion>, IdentityError> {
        let employee = self
            .store
            .get_inatech_employee(inatech_id)
            .await?
            .ok_or(IdentityError::UnknownEmployee(inatech_id))?;
        let existing = self.store.mapping_for_inatech(inatech_id).await?;
        if existing.as_ref().is_some_and(|mapping| mapping.is_linked(space)) {
            debug!(inatech_id, ?space, "employee already mapped in this space");
            return Ok(Vec::new());
        }

        let mappings = self.store.list_mappings().await?;
        let candidates = match space {
            IdentitySpace::Bamboo => {
                let mapped: HashSet<i64> = mappings
                    .iter()
                    .filter_map(|mapping| mapping.bamboo_employee_id)
                    .collect();
                self.store
                    .list_bamboo_employees()
                    .await?
                    .into_iter()
                    .filter(|employee| !mapped.contains(&employee.id))
                    .map(|employee| Candidate {
                        space,
                        id: employee.id.to_string(),
                        name: employee.full_name(),
                        email: employee.work_email,
                    })
                    .collect::<Vec<_>>()
            }
            IdentitySpace::DevOps => {
                let mapped: HashSet<&str> = mappings
                    .iter()
                    .filter_map(|mapping| mapping.devops_descriptor.as_deref())
                    .collect();
                self.store
                    .list_users()
                    .await?
                    .into_iter()
                    .filter(|user| user.is_active && !mapped.contains(user.descriptor.as_str()))
                    .map(|user| Candidate {
                        space,
                        name: user.display_name.unwrap_or_default(),
                        email: user.mail_address.or(user.principal_name),
                        id: user.descriptor,
                    })
                    .collect::<Vec<_>>()
            }
        };

        let suggestions = rank_candidates(
            &employee.name,
            employee.email.as_deref(),
            candidates,
            &self.thresholds,
        );
        debug!(inatech_id, count = suggestions.len(), "ranked identity candidates");
        Ok(suggestions)
    }

    /// Links each requested pair unless a requested column is already set for
    /// the employee or its target is linked to someone else. An employee
    /// linked in one space can still be linked in the other. Collisions are
    /// reported per request and do not stop the rest of the batch.
    pub async fn create_mappings(
        &self,
        requests: &[NewMapping],
    ) -> Result<BulkMappingReport, IdentityError> {
        let mut report = BulkMappingReport::default();
        for (index, request) in requests.iter().enumerate() {
            let request = &NewMapping {
                devops_descriptor: request
                    .devops_descriptor
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string),
                ..request.clone()
            };
            match self.conflict(request).await? {
                Some(reason) => {
                    warn!(index, reason = %reason, "mapping rejected");
                    report.failures.push(MappingFailure {
                        index,
                        request: request.clone(),
                        reason,
                    });
                }
                None => report.created.push(self.store.link_mapping(request).await?),
            }
        }
        info!(
            created = report.created.len(),
            failed = report.failures.len(),
            "mappings processed"
        );
        Ok(report)
    }

    async fn conflict(&self, request: &NewMapping) -> Result<Option<String>, IdentityError> {
        let inatech_id = request.inatech_employee_id;
        let descriptor = request.devops_descriptor.as_deref();
        if request.bamboo_employee_id.is_none() && descriptor.is_none() {
            return Ok(Some("nothing to map".to_string()));
        }
        if self.store.get_inatech_employee(inatech_id).await?.is_none() {
            return Ok(Some(format!("unknown employee {inatech_id}")));
        }
        let existing = self.store.mapping_for_inatech(inatech_id).await?;
        let linked = |space: IdentitySpace| existing.as_ref().is_some_and(|m| m.is_linked(space));
        if let Some(bamboo_id) = request.bamboo_employee_id {
            if linked(IdentitySpace::Bamboo) {
                return Ok(Some(format!(
                    "employee {inatech_id} is already mapped to a bamboo employee"
                )));
            }
            if self.store.mapping_for_bamboo(bamboo_id).await?.is_some() {
                return Ok(Some(format!("bamboo employee {bamboo_id} is already mapped")));
            }
        }
        if let Some(descriptor) = descriptor {
            if linked(IdentitySpace::DevOps) {
                return Ok(Some(format!(
                    "employee {inatech_id} is already mapped to a devops user"
                )));
            }
            if self.store.mapping_for_descriptor(descriptor).await?.is_some() {
                return Ok(Some(format!("devops user {descriptor} is already mapped")));
            }
        }
        Ok(None)
    }
}

impl MappingRecord {
    pub fn is_linked(&self, space: IdentitySpace) -> bool {
        match space {
            IdentitySpace::Bamboo => self.bamboo_employee_id.is_some(),
            IdentitySpace::DevOps => self.devops_descriptor.is_some(),
        }
    }
}
