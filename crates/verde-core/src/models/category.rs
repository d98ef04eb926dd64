//! Incident category catalog

use serde::{Deserialize, Serialize};

/// A selectable subcategory of an incident category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subcategory {
    pub id: String,
    pub name: String,
}

/// Incident category as published by the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "subs")]
    pub subcategories: Vec<Subcategory>,
}

impl Category {
    /// Look up a subcategory by id or case-insensitive name.
    pub fn subcategory(&self, needle: &str) -> Option<&Subcategory> {
        let needle = needle.trim();
        self.subcategories
            .iter()
            .find(|sub| sub.id == needle || sub.name.eq_ignore_ascii_case(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_short_subcategory_field() {
        let json = r#"{"id":"vias","name":"Vías","subs":[{"id":"baches","name":"Baches"}]}"#;
        let category: Category = serde_json::from_str(json).unwrap();
        assert_eq!(category.subcategories.len(), 1);
        assert_eq!(category.subcategory("BACHES").map(|s| s.id.as_str()), Some("baches"));
        assert!(category.subcategory("semaforos").is_none());
    }

    #[test]
    fn subcategories_default_to_empty() {
        let category: Category = serde_json::from_str(r#"{"id":"otros","name":"Otros"}"#).unwrap();
        assert!(category.subcategories.is_empty());
    }
}
