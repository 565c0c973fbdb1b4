//! Advertised capability tree.
//!
//! Every key is optional; an absent key means "not supported". Flags such as
//! `logging` carry an empty object when present.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::methods::Capability;

/// `{ "listChanged": bool }` sub-capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChanged {
    /// Whether list-changed notifications are emitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// `resources` sub-capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    /// Whether `resources/subscribe` is supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    /// Whether list-changed notifications are emitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Capabilities advertised by either side during `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Server: tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChanged>,
    /// Server: prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChanged>,
    /// Server: resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    /// Server: logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Map<String, Value>>,
    /// Server: argument completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completions: Option<Map<String, Value>>,
    /// Client: sampling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Map<String, Value>>,
    /// Client: roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<ListChanged>,
    /// Non-standard extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Map<String, Value>>,
}

impl Capabilities {
    /// Advertise `tools`.
    #[must_use]
    pub fn with_tools(mut self, list_changed: bool) -> Self {
        self.tools = Some(ListChanged {
            list_changed: Some(list_changed),
        });
        self
    }

    /// Advertise `prompts`.
    #[must_use]
    pub fn with_prompts(mut self, list_changed: bool) -> Self {
        self.prompts = Some(ListChanged {
            list_changed: Some(list_changed),
        });
        self
    }

    /// Advertise `resources`.
    #[must_use]
    pub fn with_resources(mut self, subscribe: bool, list_changed: bool) -> Self {
        self.resources = Some(ResourcesCapability {
            subscribe: Some(subscribe),
            list_changed: Some(list_changed),
        });
        self
    }

    /// Advertise `logging`.
    #[must_use]
    pub fn with_logging(mut self) -> Self {
        self.logging = Some(Map::new());
        self
    }

    /// Advertise `completions`.
    #[must_use]
    pub fn with_completions(mut self) -> Self {
        self.completions = Some(Map::new());
        self
    }

    /// Advertise `sampling`.
    #[must_use]
    pub fn with_sampling(mut self) -> Self {
        self.sampling = Some(Map::new());
        self
    }

    /// Advertise `roots`.
    #[must_use]
    pub fn with_roots(mut self, list_changed: bool) -> Self {
        self.roots = Some(ListChanged {
            list_changed: Some(list_changed),
        });
        self
    }

    /// The capability path that is missing for `required`, if any.
    ///
    /// For [`Capability::ResourcesSubscribe`] the top-level `resources` key
    /// is reported first, then the nested `resources.subscribe` flag.
    #[must_use]
    pub fn missing(&self, required: Capability) -> Option<&'static str> {
        let present = match required {
            Capability::Tools => self.tools.is_some(),
            Capability::Prompts => self.prompts.is_some(),
            Capability::Resources => self.resources.is_some(),
            Capability::ResourcesSubscribe => match &self.resources {
                None => return Some(Capability::Resources.as_str()),
                Some(res) => res.subscribe == Some(true),
            },
            Capability::Logging => self.logging.is_some(),
            Capability::Sampling => self.sampling.is_some(),
            Capability::Completions => self.completions.is_some(),
            Capability::Roots => self.roots.is_some(),
        };
        if present {
            None
        } else {
            Some(required.as_str())
        }
    }

    /// Whether `required` is advertised.
    #[must_use]
    pub fn supports(&self, required: Capability) -> bool {
        self.missing(required).is_none()
    }

    /// Combine two capability sets; keys present in `other` win.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            tools: other.tools.clone().or_else(|| self.tools.clone()),
            prompts: other.prompts.clone().or_else(|| self.prompts.clone()),
            resources: other.resources.clone().or_else(|| self.resources.clone()),
            logging: other.logging.clone().or_else(|| self.logging.clone()),
            completions: other.completions.clone().or_else(|| self.completions.clone()),
            sampling: other.sampling.clone().or_else(|| self.sampling.clone()),
            roots: other.roots.clone().or_else(|| self.roots.clone()),
            experimental: match (&self.experimental, &other.experimental) {
                (Some(base), Some(over)) => {
                    let mut merged = base.clone();
                    merged.extend(over.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Some(merged)
                }
                (base, over) => over.clone().or_else(|| base.clone()),
            },
        }
    }
}
