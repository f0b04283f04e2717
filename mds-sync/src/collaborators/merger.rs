use std::collections::HashSet;

use mds_core::common::error::Result;
use mds_core::contracts::Merger;
use mds_core::domain::{EntityRecord, ValueChange};

/// Field-by-field three-way merge. A field the source did not change
/// since the previous snapshot keeps its destination value; a changed
/// (or new) source field overwrites the trunk and is reported as a
/// change. Protected fields (typically the destination identifier) are
/// never touched.
pub struct LastWriteMerger {
    protected: HashSet<String>,
}

impl LastWriteMerger {
    pub fn new() -> Self {
        LastWriteMerger {
            protected: HashSet::new(),
        }
    }

    pub fn protecting<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LastWriteMerger {
            protected: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for LastWriteMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl Merger for LastWriteMerger {
    fn merge(
        &self,
        trunk: &mut EntityRecord,
        previous: Option<&EntityRecord>,
        current: &EntityRecord,
    ) -> Result<Vec<ValueChange>> {
        let mut changes = Vec::new();
        for (field, incoming) in current.fields() {
            if self.protected.contains(field) {
                continue;
            }
            // Unchanged since the last snapshot: the destination value
            // stands, whatever it is.
            if let Some(previous) = previous {
                if previous.get(field) == Some(incoming) {
                    continue;
                }
            }
            let existing = trunk.get(field).cloned();
            if existing.as_ref() != Some(incoming) {
                changes.push(ValueChange::new(
                    field.clone(),
                    existing,
                    Some(incoming.clone()),
                ));
                trunk.set(field.clone(), incoming.clone());
            }
        }
        Ok(changes)
    }
}
