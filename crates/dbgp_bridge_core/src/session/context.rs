use serde::Serialize;

use crate::dbgp::{ContextName, Property};
use crate::format::ValueFormatter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

/// One variable namespace of the innermost frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scope {
    pub id: String,
    pub name: String,
    #[serde(skip)]
    pub resolved: bool,
    #[serde(rename = "values")]
    pub variables: Vec<Variable>,
}

/// The aggregate published to viewers once every scope is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextView {
    pub depth: Option<u32>,
    pub contexts: Vec<Scope>,
}

/// True when every scope of the enumeration has its variables.
pub fn all_resolved(scopes: &[Scope]) -> bool {
    scopes.iter().all(|scope| scope.resolved)
}

/// Drives the two-phase scope/variable fetch for the current break.
///
/// Each `context_names` reply starts a new enumeration generation; the scope
/// set is replaced wholesale, and `context_get` replies tagged with an older
/// generation are dropped.
#[derive(Debug, Default)]
pub struct ContextResolver {
    generation: u64,
    depth: Option<u32>,
    scopes: Vec<Scope>,
    published: ContextView,
}

impl ContextResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the enumeration. Returns the new generation to tag each
    /// follow-up variable fetch with.
    pub fn begin(&mut self, depth: u32, names: &[ContextName]) -> u64 {
        self.generation += 1;
        self.depth = Some(depth);
        self.scopes = names
            .iter()
            .map(|n| Scope {
                id: n.id.clone(),
                name: n.name.clone(),
                resolved: false,
                variables: Vec::new(),
            })
            .collect();
        self.generation
    }

    /// Applies one variable-fetch reply. Returns the aggregate when this reply
    /// completed the enumeration, `None` while scopes are still outstanding.
    pub fn resolve(
        &mut self,
        generation: u64,
        context_id: &str,
        properties: &[Property],
        formatter: &ValueFormatter,
    ) -> Option<ContextView> {
        if generation != self.generation {
            tracing::debug!(
                "Dropping context_get for superseded enumeration {} (current {})",
                generation,
                self.generation
            );
            return None;
        }

        let scope = self
            .scopes
            .iter_mut()
            .find(|s| s.id == context_id && !s.resolved)?;

        scope.variables = properties
            .iter()
            .filter_map(|property| match formatter.format(property) {
                Ok(value) => Some(Variable {
                    name: property.display_name().to_string(),
                    value,
                }),
                Err(e) => {
                    tracing::warn!(
                        "Skipping variable {} in scope {}: {}",
                        property.display_name(),
                        context_id,
                        e
                    );
                    None
                }
            })
            .collect();
        scope.resolved = true;

        self.publish_if_complete()
    }

    /// Scans the whole enumeration and, when nothing is outstanding, records
    /// and returns the aggregate. An empty enumeration is complete at once.
    pub fn publish_if_complete(&mut self) -> Option<ContextView> {
        if !all_resolved(&self.scopes) {
            return None;
        }

        self.published = ContextView {
            depth: self.depth,
            contexts: self.scopes.clone(),
        };
        Some(self.published.clone())
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Last complete aggregate; never a partial enumeration.
    pub fn published(&self) -> &ContextView {
        &self.published
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.depth = None;
        self.scopes.clear();
        self.published = ContextView::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(ids: &[&str]) -> Vec<ContextName> {
        ids.iter()
            .map(|id| ContextName {
                id: id.to_string(),
                name: format!("scope-{id}"),
            })
            .collect()
    }

    fn int(name: &str, value: &str) -> Property {
        Property {
            name: Some(name.to_string()),
            kind: Some("int".to_string()),
            value: value.to_string(),
            ..Property::default()
        }
    }

    #[test]
    fn test_publishes_only_after_last_scope() {
        let formatter = ValueFormatter::default();
        let mut resolver = ContextResolver::new();
        let generation = resolver.begin(0, &names(&["0", "1", "2"]));

        assert!(resolver.resolve(generation, "0", &[int("$a", "1")], &formatter).is_none());
        assert!(resolver.resolve(generation, "2", &[], &formatter).is_none());
        assert_eq!(resolver.published(), &ContextView::default());

        let view = resolver
            .resolve(generation, "1", &[int("$b", "2")], &formatter)
            .expect("last scope completes the aggregate");
        assert_eq!(view.depth, Some(0));
        assert_eq!(view.contexts.len(), 3);
        assert_eq!(
            view.contexts[1].variables,
            vec![Variable { name: "$b".to_string(), value: "2".to_string() }]
        );
        assert_eq!(resolver.published(), &view);
    }

    #[test]
    fn test_new_enumeration_discards_partial_set() {
        let formatter = ValueFormatter::default();
        let mut resolver = ContextResolver::new();
        let first = resolver.begin(0, &names(&["0", "1"]));
        assert!(resolver.resolve(first, "0", &[int("$stale", "1")], &formatter).is_none());

        let second = resolver.begin(0, &names(&["0"]));
        assert!(resolver.resolve(first, "1", &[], &formatter).is_none());

        let view = resolver
            .resolve(second, "0", &[int("$fresh", "2")], &formatter)
            .expect("single scope completes");
        assert_eq!(view.contexts.len(), 1);
        assert_eq!(view.contexts[0].variables[0].name, "$fresh");
    }

    #[test]
    fn test_duplicate_reply_does_not_republish() {
        let formatter = ValueFormatter::default();
        let mut resolver = ContextResolver::new();
        let generation = resolver.begin(0, &names(&["0"]));
        assert!(resolver.resolve(generation, "0", &[], &formatter).is_some());
        assert!(resolver.resolve(generation, "0", &[], &formatter).is_none());
    }

    #[test]
    fn test_bad_variable_is_skipped() {
        let formatter = ValueFormatter::default();
        let mut resolver = ContextResolver::new();
        let generation = resolver.begin(0, &names(&["0"]));
        let broken = Property {
            name: Some("$broken".to_string()),
            ..Property::default()
        };
        let view = resolver
            .resolve(generation, "0", &[broken, int("$ok", "5")], &formatter)
            .unwrap();
        assert_eq!(
            view.contexts[0].variables,
            vec![Variable { name: "$ok".to_string(), value: "5".to_string() }]
        );
    }

    #[test]
    fn test_all_resolved_is_pure_over_scope_set() {
        let mut scopes = vec![Scope {
            id: "0".to_string(),
            name: "Locals".to_string(),
            resolved: false,
            variables: Vec::new(),
        }];
        assert!(!all_resolved(&scopes));
        scopes[0].resolved = true;
        assert!(all_resolved(&scopes));
        assert!(all_resolved(&[]));
    }

    #[test]
    fn test_empty_enumeration_is_complete() {
        let mut resolver = ContextResolver::new();
        resolver.begin(0, &[]);
        let view = resolver.publish_if_complete().expect("nothing outstanding");
        assert_eq!(view.depth, Some(0));
        assert!(view.contexts.is_empty());
    }

    #[test]
    fn test_clear_invalidates_generation() {
        let formatter = ValueFormatter::default();
        let mut resolver = ContextResolver::new();
        let generation = resolver.begin(0, &names(&["0"]));
        resolver.clear();
        assert!(resolver.resolve(generation, "0", &[], &formatter).is_none());
        assert!(resolver.scopes().is_empty());
    }
}
