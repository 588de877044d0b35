//! Diff engine: compares the last snapshot of the source dictionary, the
//! currently required phrases and each language's dictionary, and plans
//! which keys to add, remove and re-translate.

use std::collections::BTreeSet;

use crate::worker_result::{ChangeKind, Dictionary, PhraseChange, TranslationRequest};

/// Add/remove/update key sets for one language. The three sets are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPlan {
    pub language_code: String,
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
    pub to_update: BTreeSet<String>,
}

impl DiffPlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }

    pub fn total(&self) -> usize {
        self.to_add.len() + self.to_remove.len() + self.to_update.len()
    }

    /// Keys that need a translation call, adds first.
    pub fn keys_to_translate(&self) -> impl Iterator<Item = &String> {
        self.to_add.iter().chain(self.to_update.iter())
    }

    /// Re-translate keys left unapplied by an earlier cycle. Keys no longer
    /// required, or already planned as adds, are skipped.
    pub fn requeue<'a>(&mut self, keys: impl IntoIterator<Item = &'a String>, required: &Dictionary) {
        for key in keys {
            if required.contains_key(key) && !self.to_add.contains(key) {
                self.to_update.insert(key.clone());
            }
        }
    }

    pub fn to_request(&self) -> TranslationRequest {
        let item = |key: &String, kind| PhraseChange {
            language_code: self.language_code.clone(),
            key: key.clone(),
            kind,
        };
        let items = self
            .to_add
            .iter()
            .map(|k| item(k, ChangeKind::Add))
            .chain(self.to_remove.iter().map(|k| item(k, ChangeKind::Remove)))
            .chain(self.to_update.iter().map(|k| item(k, ChangeKind::Update)))
            .collect();
        TranslationRequest {
            language_code: self.language_code.clone(),
            to_add: self.to_add.len(),
            to_remove: self.to_remove.len(),
            to_update: self.to_update.len(),
            items,
        }
    }
}

/// Structural diff between the old snapshot and the required set.
pub fn diff(old: &Dictionary, required: &Dictionary) -> DiffPlan {
    let to_add = required
        .keys()
        .filter(|k| !old.contains_key(*k))
        .cloned()
        .collect();
    let to_remove = old
        .keys()
        .filter(|k| !required.contains_key(*k))
        .cloned()
        .collect();
    let to_update = changed_keys(old, required).cloned().collect();
    DiffPlan {
        language_code: String::new(),
        to_add,
        to_remove,
        to_update,
    }
}

/// Plan for one target language.
///
/// `existing` is the language's current dictionary (None when no locale file is
/// present, in which case every required key is added). Without a `snapshot`
/// changed source values cannot be detected and nothing is re-translated.
pub fn plan_language(
    language_code: &str,
    snapshot: Option<&Dictionary>,
    required: &Dictionary,
    existing: Option<&Dictionary>,
) -> DiffPlan {
    let Some(existing) = existing else {
        return DiffPlan {
            language_code: language_code.to_string(),
            to_add: required.keys().cloned().collect(),
            ..Default::default()
        };
    };

    let to_add = required
        .keys()
        .filter(|k| !existing.contains_key(*k))
        .cloned()
        .collect();
    let to_remove = existing
        .keys()
        .filter(|k| !required.contains_key(*k))
        .cloned()
        .collect();
    let to_update = match snapshot {
        Some(old) => changed_keys(old, required)
            .filter(|k| existing.contains_key(*k))
            .cloned()
            .collect(),
        None => BTreeSet::new(),
    };

    DiffPlan {
        language_code: language_code.to_string(),
        to_add,
        to_remove,
        to_update,
    }
}

/// Keys present in both maps whose source value differs byte-for-byte.
fn changed_keys<'a>(
    old: &'a Dictionary,
    required: &'a Dictionary,
) -> impl Iterator<Item = &'a String> + 'a {
    required
        .iter()
        .filter(move |(k, v)| old.get(*k).is_some_and(|prev| prev != *v))
        .map(|(k, _)| k)
}
