//! Extraction step: turns one page snapshot into records.
//!
//! The step is a pure function of the snapshot, the session template, and
//! the [`ExtractionConfig`]. Where the result items live on the page is
//! decided by an [`ItemLocator`], supplied as data by the site profile so
//! layout churn never touches the orchestration code.

use std::fmt;
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::template::{Template, ValueRule};
use crate::types::{DriverError, Record, ScrapeError, ScrapeResult};

/// The queryable state of a loaded page at one point in time.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub url: Option<String>,
    pub html: String,
}

impl PageSnapshot {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            url: None,
            html: html.into(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Strategy for finding item elements inside the results container.
pub trait ItemLocator: Send + Sync + fmt::Debug {
    /// Identifies the layout revision this strategy targets.
    fn version(&self) -> &str;

    fn locate<'a>(&self, container: ElementRef<'a>) -> Vec<ElementRef<'a>>;
}

/// Serializable description of an item locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LocatorSpec {
    /// Items are all elements matching `selector` under the container.
    Selector {
        selector: String,
        #[serde(default = "default_version")]
        version: String,
    },
    /// Pick the `index`-th `scope` match, its first `list` match, then
    /// every `item` under that list.
    NthScope {
        scope: String,
        index: usize,
        list: String,
        item: String,
        #[serde(default = "default_version")]
        version: String,
    },
}

fn default_version() -> String {
    "1".to_string()
}

impl LocatorSpec {
    pub fn selector(selector: impl Into<String>) -> Self {
        Self::Selector {
            selector: selector.into(),
            version: default_version(),
        }
    }

    /// Compile the selectors into a ready-to-use locator.
    pub fn build(&self) -> ScrapeResult<Arc<dyn ItemLocator>> {
        match self {
            Self::Selector { selector, version } => Ok(Arc::new(SelectorLocator {
                items: parse_selector(selector)?,
                version: version.clone(),
            })),
            Self::NthScope {
                scope,
                index,
                list,
                item,
                version,
            } => Ok(Arc::new(NthScopeLocator {
                scope: parse_selector(scope)?,
                index: *index,
                list: parse_selector(list)?,
                item: parse_selector(item)?,
                version: version.clone(),
            })),
        }
    }
}

#[derive(Debug)]
struct SelectorLocator {
    items: Selector,
    version: String,
}

impl ItemLocator for SelectorLocator {
    fn version(&self) -> &str {
        &self.version
    }

    fn locate<'a>(&self, container: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        container.select(&self.items).collect()
    }
}

#[derive(Debug)]
struct NthScopeLocator {
    scope: Selector,
    index: usize,
    list: Selector,
    item: Selector,
    version: String,
}

impl ItemLocator for NthScopeLocator {
    fn version(&self) -> &str {
        &self.version
    }

    fn locate<'a>(&self, container: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        let Some(scope) = container.select(&self.scope).nth(self.index) else {
            tracing::debug!("Locator v{}: scope #{} not present", self.version, self.index);
            return Vec::new();
        };
        let Some(list) = scope.select(&self.list).next() else {
            tracing::debug!("Locator v{}: list element not present", self.version);
            return Vec::new();
        };
        list.select(&self.item).collect()
    }
}

/// Which candidate records are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InclusionPredicate {
    /// At least one field was extracted.
    #[default]
    AnyField,
    /// At least one of the listed fields was extracted.
    RequireAny { fields: Vec<String> },
    /// Every listed field was extracted.
    RequireAll { fields: Vec<String> },
}

impl InclusionPredicate {
    pub fn require(field: impl Into<String>) -> Self {
        Self::RequireAny {
            fields: vec![field.into()],
        }
    }

    /// Whether a record built from `fields` could ever be accepted.
    pub fn satisfiable_by(&self, fields: &[String]) -> bool {
        match self {
            Self::AnyField => !fields.is_empty(),
            Self::RequireAny { fields: required } => required.iter().any(|f| fields.contains(f)),
            Self::RequireAll { fields: required } => required.iter().all(|f| fields.contains(f)),
        }
    }

    pub fn accepts(&self, record: &Record) -> bool {
        match self {
            Self::AnyField => !record.is_empty(),
            Self::RequireAny { fields } => fields.iter().any(|f| record.contains(f)),
            Self::RequireAll { fields } => fields.iter().all(|f| record.contains(f)),
        }
    }
}

/// Site-specific extraction settings.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub container: String,
    pub locator: Arc<dyn ItemLocator>,
    pub inclusion: InclusionPredicate,
}

/// A template compiled against an extraction config, reusable across pages.
#[derive(Debug)]
pub struct ExtractionStep {
    container: Selector,
    container_source: String,
    locator: Arc<dyn ItemLocator>,
    inclusion: InclusionPredicate,
    fields: Vec<CompiledField>,
}

#[derive(Debug)]
struct CompiledField {
    name: String,
    selector: Selector,
    rule: ValueRule,
}

impl ExtractionStep {
    pub fn new(template: &Template, config: &ExtractionConfig) -> ScrapeResult<Self> {
        let fields = template
            .fields()
            .iter()
            .map(|f| {
                Ok(CompiledField {
                    name: f.name.clone(),
                    selector: parse_selector(&f.selector)?,
                    rule: f.rule.clone(),
                })
            })
            .collect::<ScrapeResult<Vec<_>>>()?;

        Ok(Self {
            container: parse_selector(&config.container)?,
            container_source: config.container.clone(),
            locator: Arc::clone(&config.locator),
            inclusion: config.inclusion.clone(),
            fields,
        })
    }

    /// Extract the records of one page.
    ///
    /// A missing results container is a driver-level `NotFound`; a
    /// container without items is an empty, valid page.
    pub fn run(&self, snapshot: &PageSnapshot) -> Result<Vec<Record>, DriverError> {
        let document = Html::parse_document(&snapshot.html);
        let container = document
            .select(&self.container)
            .next()
            .ok_or_else(|| DriverError::NotFound(self.container_source.clone()))?;

        let items = self.locator.locate(container);
        let matched = items.len();
        let records: Vec<Record> = items
            .into_iter()
            .map(|item| self.read_item(item))
            .filter(|record| self.inclusion.accepts(record))
            .collect();

        tracing::debug!(
            "Extracted {} of {} items (locator v{})",
            records.len(),
            matched,
            self.locator.version()
        );
        Ok(records)
    }

    fn read_item(&self, item: ElementRef<'_>) -> Record {
        let mut record = Record::new();
        for field in &self.fields {
            let Some(element) = item.select(&field.selector).next() else {
                continue;
            };
            if let Some(value) = read_value(element, &field.rule) {
                record.insert(field.name.clone(), value);
            }
        }
        record
    }
}

fn read_value(element: ElementRef<'_>, rule: &ValueRule) -> Option<String> {
    let value = match rule {
        ValueRule::Attribute(name) => element.value().attr(name).map(str::to_string),
        ValueRule::Text => Some(first_line(element)),
        ValueRule::Auto => match element.value().name() {
            "img" => element.value().attr("src").map(str::to_string),
            "a" => element.value().attr("href").map(str::to_string),
            _ => Some(first_line(element)),
        },
    };
    value.filter(|v| !v.is_empty())
}

/// First line of the element's trimmed text content.
fn first_line(element: ElementRef<'_>) -> String {
    let text: String = element.text().collect();
    text.trim().lines().next().unwrap_or_default().trim().to_string()
}

fn parse_selector(source: &str) -> ScrapeResult<Selector> {
    Selector::parse(source)
        .map_err(|e| ScrapeError::Validation(format!("invalid selector '{source}': {e}")))
}
