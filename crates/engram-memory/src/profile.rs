//! User profiles over the episodic tier
//!
//! Profile attributes are individual episodic records tagged with
//! their name and kind, so they share the tier's indexing and
//! lifecycle instead of needing a separate document.

use crate::episodic::EpisodicMemory;
use engram_core::{MemoryRecord, MemoryType, Result, Tier, Timestamp, Value};
use std::sync::Arc;
use tracing::debug;

/// Kind of profile attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Preference,
    Setting,
    Demographic,
    Behavior,
    Custom,
}

impl AttributeKind {
    /// Name used in tags
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKind::Preference => "preference",
            AttributeKind::Setting => "setting",
            AttributeKind::Demographic => "demographic",
            AttributeKind::Behavior => "behavior",
            AttributeKind::Custom => "custom",
        }
    }
}

/// Metadata keys on attribute records
mod attr_meta {
    pub const NAME: &str = "attr_name";
    pub const KIND: &str = "attr_kind";
    pub const VALUE: &str = "attr_value";
}

fn name_tag(name: &str) -> String {
    format!("attr:{}", name)
}

fn kind_tag(kind: AttributeKind) -> String {
    format!("kind:{}", kind.as_str())
}

/// A single profile attribute
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileAttribute {
    pub name: String,
    pub kind: AttributeKind,
    pub value: Value,
    pub confidence: f64,
    pub updated_at: Timestamp,
}

/// Manages per-user profile attributes
pub struct UserProfileManager {
    episodic: Arc<EpisodicMemory>,
}

impl UserProfileManager {
    /// Create a profile manager over the episodic tier
    pub fn new(episodic: Arc<EpisodicMemory>) -> Self {
        Self { episodic }
    }

    /// Set an attribute, upserting by (name, kind)
    pub async fn set_attribute(
        &self,
        user_id: &str,
        name: &str,
        kind: AttributeKind,
        value: Value,
        confidence: f64,
    ) -> Result<MemoryRecord> {
        if let Some(mut existing) = self.find_record(user_id, name, kind).await? {
            existing.content = render_content(name, &value);
            existing.metadata.set(attr_meta::VALUE, value.clone());
            existing.set_confidence(confidence);
            if let Some(updated) = self.episodic.update(existing.clone()).await? {
                debug!("Updated profile attribute {} for {}", name, user_id);
                return Ok(updated);
            }
            // The record vanished between lookup and update; fall
            // through and store a fresh one
        }

        let mut record = MemoryRecord::new(
            Tier::Episodic,
            MemoryType::Preference,
            &render_content(name, &value),
        );
        record.confidence = engram_core::clamp_unit(confidence);
        record.add_tag(name_tag(name));
        record.add_tag(kind_tag(kind));
        record.metadata.set(attr_meta::NAME, name);
        record.metadata.set(attr_meta::KIND, kind.as_str());
        record.metadata.set(attr_meta::VALUE, value);
        // Profile attributes outlive ordinary episodic records
        record.expires_at = Some(
            record
                .created_at
                .plus(std::time::Duration::from_secs(10 * 365 * 24 * 60 * 60)),
        );

        let stored = self.episodic.store(record, Some(user_id), None).await?;
        debug!("Created profile attribute {} for {}", name, user_id);
        Ok(stored)
    }

    /// Get an attribute by name and kind
    pub async fn get_attribute(
        &self,
        user_id: &str,
        name: &str,
        kind: AttributeKind,
    ) -> Result<Option<ProfileAttribute>> {
        Ok(self
            .find_record(user_id, name, kind)
            .await?
            .and_then(|r| to_attribute(&r)))
    }

    /// All attributes of a user
    pub async fn get_profile(&self, user_id: &str) -> Result<Vec<ProfileAttribute>> {
        let records = self.episodic.get_by_user(user_id).await?;
        Ok(records.iter().filter_map(to_attribute).collect())
    }

    /// Merge one user's attributes into another's
    ///
    /// Attributes absent in the target are copied; present ones are
    /// overwritten only when the source confidence is strictly higher
    /// or `overwrite` is set. Returns the number of attributes
    /// written.
    pub async fn merge_profiles(
        &self,
        target_user: &str,
        source_user: &str,
        overwrite: bool,
    ) -> Result<usize> {
        let source = self.get_profile(source_user).await?;
        let mut written = 0;

        for attribute in source {
            let existing = self
                .get_attribute(target_user, &attribute.name, attribute.kind)
                .await?;
            let should_write = match &existing {
                None => true,
                Some(current) => overwrite || attribute.confidence > current.confidence,
            };
            if should_write {
                self.set_attribute(
                    target_user,
                    &attribute.name,
                    attribute.kind,
                    attribute.value.clone(),
                    attribute.confidence,
                )
                .await?;
                written += 1;
            }
        }
        debug!(
            "Merged {} attributes from {} into {}",
            written, source_user, target_user
        );
        Ok(written)
    }

    async fn find_record(
        &self,
        user_id: &str,
        name: &str,
        kind: AttributeKind,
    ) -> Result<Option<MemoryRecord>> {
        let records = self.episodic.get_by_user(user_id).await?;
        Ok(records.into_iter().find(|r| {
            r.has_tag(&name_tag(name)) && r.has_tag(&kind_tag(kind))
        }))
    }
}

fn render_content(name: &str, value: &Value) -> String {
    format!("{} = {}", name, value.to_json())
}

fn to_attribute(record: &MemoryRecord) -> Option<ProfileAttribute> {
    let name = record.metadata.get_str(attr_meta::NAME)?.to_string();
    let kind = match record.metadata.get_str(attr_meta::KIND)? {
        "preference" => AttributeKind::Preference,
        "setting" => AttributeKind::Setting,
        "demographic" => AttributeKind::Demographic,
        "behavior" => AttributeKind::Behavior,
        "custom" => AttributeKind::Custom,
        _ => return None,
    };
    Some(ProfileAttribute {
        name,
        kind,
        value: record.metadata.get(attr_meta::VALUE)?.clone(),
        confidence: record.confidence,
        updated_at: record.updated_at,
    })
}
