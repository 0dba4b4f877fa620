//! Adapter layer: Convert MusicBrainz relation lists to [`Credits`]
//!
//! This is the ONLY place where relation types are interpreted.

use super::dto;
use crate::enrichment::domain::{Credits, push_unique};

const COMPOSER_ROLES: &[&str] = &["composer", "writer", "lyricist"];
const PRODUCER_ROLES: &[&str] = &["producer"];
const ENGINEER_ROLES: &[&str] = &["engineer", "mix", "mastering"];

fn role(relation: &dto::Relation) -> String {
    relation
        .relation_type
        .as_deref()
        .unwrap_or_default()
        .to_lowercase()
}

fn artist_name(relation: &dto::Relation) -> Option<String> {
    relation
        .artist
        .as_ref()
        .and_then(|a| a.name.clone())
        .filter(|n| !n.trim().is_empty())
}

/// Credits from a recording's artist relations.
pub fn credits_from_recording(response: &dto::RelationsResponse) -> Credits {
    let mut credits = Credits::default();
    for relation in &response.relations {
        let Some(name) = artist_name(relation) else {
            continue;
        };
        let role = role(relation);
        if COMPOSER_ROLES.contains(&role.as_str()) {
            push_unique(&mut credits.composers, [name]);
        } else if PRODUCER_ROLES.contains(&role.as_str()) {
            push_unique(&mut credits.producers, [name]);
        } else if ENGINEER_ROLES.contains(&role.as_str()) {
            push_unique(&mut credits.engineers, [name]);
        }
    }
    credits
}

/// Work IDs the recording is a performance of.
pub fn performed_work_ids(response: &dto::RelationsResponse) -> Vec<String> {
    response
        .relations
        .iter()
        .filter(|r| role(r) == "performance")
        .filter_map(|r| r.work.as_ref().and_then(|w| w.id.clone()))
        .collect()
}

/// Composer-type names from a work's artist relations.
pub fn composers_from_work(response: &dto::RelationsResponse) -> Vec<String> {
    let mut composers = Vec::new();
    for relation in &response.relations {
        if COMPOSER_ROLES.contains(&role(relation).as_str())
            && let Some(name) = artist_name(relation)
        {
            push_unique(&mut composers, [name]);
        }
    }
    composers
}
