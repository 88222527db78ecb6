//! Field registry and per-session template resolution.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{ScrapeError, ScrapeResult};

/// How a value is read from a matched element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueRule {
    /// `img` → `src`, `a` → `href`, anything else → first line of text.
    #[default]
    Auto,
    /// First line of the trimmed visible text.
    Text,
    /// The named attribute, e.g. `attribute:src`.
    Attribute(String),
}

impl TryFrom<String> for ValueRule {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "auto" => Ok(Self::Auto),
            "text" => Ok(Self::Text),
            other => match other.strip_prefix("attribute:") {
                Some(name) if !name.is_empty() => Ok(Self::Attribute(name.to_string())),
                _ => Err(format!(
                    "unknown value rule '{other}' (expected auto, text, or attribute:<name>)"
                )),
            },
        }
    }
}

impl From<ValueRule> for String {
    fn from(rule: ValueRule) -> Self {
        match rule {
            ValueRule::Auto => "auto".to_string(),
            ValueRule::Text => "text".to_string(),
            ValueRule::Attribute(name) => format!("attribute:{name}"),
        }
    }
}

/// Extractor descriptor for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(skip)]
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub rule: ValueRule,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            rule: ValueRule::Auto,
        }
    }

    pub fn with_rule(mut self, rule: ValueRule) -> Self {
        self.rule = rule;
        self
    }
}

/// Externally configured mapping of field name to extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, FieldSpec>", into = "BTreeMap<String, FieldSpec>")]
pub struct FieldRegistry {
    fields: BTreeMap<String, FieldSpec>,
}

impl From<BTreeMap<String, FieldSpec>> for FieldRegistry {
    fn from(mut fields: BTreeMap<String, FieldSpec>) -> Self {
        for (name, spec) in fields.iter_mut() {
            spec.name = name.clone();
        }
        Self { fields }
    }
}

impl From<FieldRegistry> for BTreeMap<String, FieldSpec> {
    fn from(registry: FieldRegistry) -> Self {
        registry.fields
    }
}

impl FromIterator<FieldSpec> for FieldRegistry {
    fn from_iter<I: IntoIterator<Item = FieldSpec>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }
}

impl FieldRegistry {
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build the template for a request.
    ///
    /// Unknown names are dropped, duplicates keep their first position.
    /// Fails only when nothing at all is left to extract.
    pub fn resolve<S: AsRef<str>>(&self, requested: &[S]) -> ScrapeResult<Template> {
        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        let mut ignored = Vec::new();

        for name in requested {
            let name = name.as_ref();
            match self.fields.get(name) {
                Some(spec) if seen.insert(name) => fields.push(spec.clone()),
                Some(_) => {}
                None => ignored.push(name.to_string()),
            }
        }

        if !ignored.is_empty() {
            tracing::debug!("Ignoring unknown fields: {}", ignored.join(", "));
        }

        if fields.is_empty() {
            return Err(ScrapeError::EmptyTemplate(
                requested.iter().map(|s| s.as_ref().to_string()).collect(),
            ));
        }

        Ok(Template { fields })
    }
}

/// Ordered set of fields extracted for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    fields: Vec<FieldSpec>,
}

impl Template {
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FieldRegistry {
        [
            FieldSpec::new("Name", "a.name span"),
            FieldSpec::new("Profile", "a.name"),
            FieldSpec::new("Photo", "img.photo").with_rule(ValueRule::Attribute("src".into())),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_resolve_keeps_request_order() {
        let template = registry().resolve(&["Photo", "Name"]).unwrap();
        let names: Vec<_> = template.names().collect();
        assert_eq!(names, vec!["Photo", "Name"]);
    }

    #[test]
    fn test_resolve_drops_unknown_and_duplicates() {
        let template = registry()
            .resolve(&["Name", "Company", "Name", "Profile"])
            .unwrap();
        let names: Vec<_> = template.names().collect();
        assert_eq!(names, vec!["Name", "Profile"]);
    }

    #[test]
    fn test_resolve_all_unknown_is_empty_template() {
        let err = registry().resolve(&["Company", "Salary"]).unwrap_err();
        assert!(matches!(err, ScrapeError::EmptyTemplate(ref names) if names.len() == 2));
    }

    #[test]
    fn test_registry_from_json_names_fields() {
        let json = r#"{
            "Name": { "selector": "span.name" },
            "Photo": { "selector": "img", "rule": "attribute:src" }
        }"#;
        let registry: FieldRegistry = serde_json::from_str(json).unwrap();
        assert_eq!(registry.get("Name").unwrap().name, "Name");
        assert_eq!(registry.get("Name").unwrap().rule, ValueRule::Auto);
        assert_eq!(
            registry.get("Photo").unwrap().rule,
            ValueRule::Attribute("src".into())
        );
    }

    #[test]
    fn test_value_rule_rejects_garbage() {
        assert!(ValueRule::try_from("attribute:".to_string()).is_err());
        assert!(ValueRule::try_from("html".to_string()).is_err());
    }
}
