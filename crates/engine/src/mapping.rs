use log::warn;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedRecord {
    pub object_type: String,
    pub target_id: String,
    /// Step that loaded the record.
    pub step: String,
}

/// Source record id to the target record it became, for one run.
///
/// A source id is mapped at most once; the first successful load wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RecordMapping {
    entries: BTreeMap<String, MappedRecord>,
}

impl RecordMapping {
    /// Returns false when `source_id` was already mapped; the existing entry is kept.
    pub fn insert(&mut self, source_id: impl Into<String>, record: MappedRecord) -> bool {
        let source_id = source_id.into();
        if let Some(existing) = self.entries.get(&source_id) {
            if existing.target_id != record.target_id {
                warn!(
                    "source={source_id} already mapped to {} by step={}, ignoring {} from step={}",
                    existing.target_id, existing.step, record.target_id, record.step
                );
            }
            return false;
        }
        self.entries.insert(source_id, record);
        true
    }

    pub fn get(&self, source_id: &str) -> Option<&MappedRecord> {
        self.entries.get(source_id)
    }

    pub fn target_id(&self, source_id: &str) -> Option<&str> {
        self.get(source_id).map(|r| r.target_id.as_str())
    }

    /// Source ids loaded by `step`, sorted.
    pub fn source_ids_for_step(&self, step: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, r)| r.step == step)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MappedRecord)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped(target: &str, step: &str) -> MappedRecord {
        MappedRecord {
            object_type: "Account".into(),
            target_id: target.into(),
            step: step.into(),
        }
    }

    #[test]
    fn first_mapping_wins() {
        let mut mapping = RecordMapping::default();
        assert!(mapping.insert("001S1", mapped("001T1", "accounts")));
        assert!(!mapping.insert("001S1", mapped("001T9", "partners")));
        assert_eq!(mapping.target_id("001S1"), Some("001T1"));
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn lists_sources_per_step() {
        let mut mapping = RecordMapping::default();
        mapping.insert("001S2", mapped("001T2", "accounts"));
        mapping.insert("001S1", mapped("001T1", "accounts"));
        mapping.insert("003S1", mapped("003T1", "contacts"));
        assert_eq!(mapping.source_ids_for_step("accounts"), vec!["001S1", "001S2"]);
        assert!(mapping.source_ids_for_step("tasks").is_empty());
    }
}
