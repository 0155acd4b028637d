use std::collections::HashSet;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use super::error::{DedupeError, Result};
use super::models::{
    collections, from_document, to_value, unordered_pair_key, DedupeDecision, EntityType,
};
use crate::store::{DocumentStore, WriteOp};

/// The durable operator suppression list, loaded once per detection run and
/// passed into every detection call as a plain value.
#[derive(Debug, Clone, Default)]
pub struct SuppressionSet {
    keys: HashSet<String>,
}

impl SuppressionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every persisted "not a duplicate" decision.
    pub async fn load(store: &dyn DocumentStore) -> Result<Self> {
        let mut keys = HashSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = store
                .list_page(collections::DEDUPE_DECISIONS, 500, cursor.as_deref())
                .await?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|doc| doc.id.clone());
            for doc in &page {
                let decision: DedupeDecision = from_document(doc)?;
                keys.insert(Self::scoped_key(decision.entity_type, &decision.pair_key));
            }
        }
        info!(suppressed = keys.len(), "loaded dedupe decision suppressions");
        Ok(Self { keys })
    }

    fn scoped_key(entity_type: EntityType, pair_key: &str) -> String {
        format!("{}:{}", entity_type.as_str(), pair_key)
    }

    pub fn insert(&mut self, entity_type: EntityType, id_a: &str, id_b: &str) {
        self.keys
            .insert(Self::scoped_key(entity_type, &unordered_pair_key(id_a, id_b)));
    }

    pub fn contains(&self, entity_type: EntityType, id_a: &str, id_b: &str) -> bool {
        self.keys
            .contains(&Self::scoped_key(entity_type, &unordered_pair_key(id_a, id_b)))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotDuplicateRequest {
    pub entity_type: EntityType,
    pub id_a: String,
    pub id_b: String,
    #[serde(default)]
    pub reason: String,
}

fn decision_doc_id(entity_type: EntityType, pair_key: &str) -> String {
    let sanitized: String = pair_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("dedup_{}_{}", entity_type.as_str(), sanitized)
}

/// Persist an operator "not a duplicate" decision. The decision is durable:
/// every future detection pass drops the pair until the decision is revoked.
pub async fn mark_not_duplicate(
    store: &dyn DocumentStore,
    request: NotDuplicateRequest,
) -> Result<DedupeDecision> {
    if request.id_a.trim().is_empty() || request.id_b.trim().is_empty() {
        return Err(DedupeError::Validation(
            "both record ids are required".into(),
        ));
    }
    if request.id_a == request.id_b {
        return Err(DedupeError::Validation(format!(
            "cannot mark a record as a non-duplicate of itself: {}",
            request.id_a
        )));
    }

    let pair_key = unordered_pair_key(&request.id_a, &request.id_b);
    let decision = DedupeDecision {
        id: decision_doc_id(request.entity_type, &pair_key),
        entity_type: request.entity_type,
        pair_key,
        decision: "not_duplicate".into(),
        reason: request.reason,
        decided_at: Utc::now(),
    };

    store
        .apply(vec![WriteOp::set(
            collections::DEDUPE_DECISIONS,
            &decision.id,
            to_value(&decision)?,
        )])
        .await?;
    info!(
        entity = decision.entity_type.as_str(),
        pair = %decision.pair_key,
        "recorded not-a-duplicate decision"
    );
    Ok(decision)
}

/// Delete a persisted decision so the pair can be flagged again.
pub async fn revoke_decision(
    store: &dyn DocumentStore,
    entity_type: EntityType,
    id_a: &str,
    id_b: &str,
) -> Result<()> {
    let pair_key = unordered_pair_key(id_a, id_b);
    let doc_id = decision_doc_id(entity_type, &pair_key);
    if store
        .get(collections::DEDUPE_DECISIONS, &doc_id)
        .await?
        .is_none()
    {
        return Err(DedupeError::NotFound {
            collection: collections::DEDUPE_DECISIONS.into(),
            id: doc_id,
        });
    }
    store
        .apply(vec![WriteOp::delete(collections::DEDUPE_DECISIONS, &doc_id)])
        .await?;
    Ok(())
}
