//! Protocol verbs understood by the engine
//!
//! Method names are resolved into [`Method`] once, through a [`MethodTable`] built
//! when the engine is constructed; dispatch afterwards matches on the enum.

use std::collections::HashMap;

use crate::registry::CapabilityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Initialize,
    Ping,
    ListCapabilities,
    Invoke,
    ListTools,
    CallTool,
    ListResources,
    ReadResource,
    ListPrompts,
    GetPrompt,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::Initialize,
        Method::Ping,
        Method::ListCapabilities,
        Method::Invoke,
        Method::ListTools,
        Method::CallTool,
        Method::ListResources,
        Method::ReadResource,
        Method::ListPrompts,
        Method::GetPrompt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Ping => "ping",
            Self::ListCapabilities => "capabilities/list",
            Self::Invoke => "invoke",
            Self::ListTools => "tools/list",
            Self::CallTool => "tools/call",
            Self::ListResources => "resources/list",
            Self::ReadResource => "resources/read",
            Self::ListPrompts => "prompts/list",
            Self::GetPrompt => "prompts/get",
        }
    }

    /// The capability kind a verb is restricted to. `invoke` accepts any kind.
    pub fn capability_kind(self) -> Option<CapabilityKind> {
        match self {
            Self::ListTools | Self::CallTool => Some(CapabilityKind::Tool),
            Self::ListResources | Self::ReadResource => Some(CapabilityKind::Resource),
            Self::ListPrompts | Self::GetPrompt => Some(CapabilityKind::Prompt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MethodTable {
    methods: HashMap<&'static str, Method>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self {
            methods: Method::ALL
                .iter()
                .map(|method| (method.name(), *method))
                .collect(),
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Method> {
        self.methods.get(name).copied()
    }
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Client notifications that carry no work for a stateless server.
pub fn is_lifecycle_notification(name: &str) -> bool {
    name.starts_with("notifications/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_every_known_verb() {
        let table = MethodTable::new();
        for method in Method::ALL {
            assert_eq!(table.resolve(method.name()), Some(method));
        }
    }

    #[test]
    fn unknown_names_do_not_resolve() {
        let table = MethodTable::new();
        assert_eq!(table.resolve("tools/delete"), None);
        assert_eq!(table.resolve("Invoke"), None);
    }

    #[test]
    fn call_verbs_are_bound_to_a_kind() {
        assert_eq!(Method::CallTool.capability_kind(), Some(CapabilityKind::Tool));
        assert_eq!(
            Method::ReadResource.capability_kind(),
            Some(CapabilityKind::Resource)
        );
        assert_eq!(Method::Invoke.capability_kind(), None);
    }
}
