use serde::{Deserialize, Serialize};

/// A weak, lazily resolved link to another record.
///
/// References are addressed by lab id. The upload and entry ids are filled in once a search
/// resolves the lab id; until then the reference stays dangling and only the lab id is kept.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lab_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl EntityReference {
    pub fn from_lab_id(lab_id: impl Into<String>) -> Self {
        Self {
            lab_id: Some(lab_id.into()),
            ..Self::default()
        }
    }

    pub fn to_entry(upload_id: impl Into<String>, entry_id: impl Into<String>) -> Self {
        Self {
            upload_id: Some(upload_id.into()),
            entry_id: Some(entry_id.into()),
            ..Self::default()
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.upload_id.is_some() && self.entry_id.is_some()
    }

    /// The archive path the host understands, e.g. `../uploads/<upload>/archive/<entry>#data`.
    pub fn archive_path(&self) -> Option<String> {
        match (&self.upload_id, &self.entry_id) {
            (Some(upload), Some(entry)) => Some(format!("../uploads/{upload}/archive/{entry}#data")),
            _ => None,
        }
    }

    /// True when both references point at the same entry, or share a lab id if unresolved.
    pub fn same_target(&self, other: &EntityReference) -> bool {
        if self.is_resolved() && other.is_resolved() {
            return self.upload_id == other.upload_id && self.entry_id == other.entry_id;
        }
        self.lab_id.is_some() && self.lab_id == other.lab_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangling_reference() {
        let reference = EntityReference::from_lab_id("CE-NOME_AbCd_230314_0001");
        assert!(!reference.is_resolved());
        assert!(reference.archive_path().is_none());
    }

    #[test]
    fn test_resolved_reference_path() {
        let reference = EntityReference::to_entry("up1", "entry9");
        assert_eq!(
            reference.archive_path().as_deref(),
            Some("../uploads/up1/archive/entry9#data")
        );
        assert!(reference.same_target(&EntityReference::to_entry("up1", "entry9")));
    }
}
