//! Request-path to module resolution.
//!
//! Dispatch walks a [`RegistrySnapshot`] in a fixed order: modules by name
//! ascending, then each module's routes in declaration order. Under
//! [`MatchPolicy::FirstMatch`] the first rule whose prefix and method accept
//! the request wins, even when a later rule has a longer, more specific prefix
//! (`/fees` registered by `accounts` shadows `/fees/invoices` registered by
//! `fees`). [`MatchPolicy::LongestPrefix`] instead picks the longest matching
//! prefix and falls back to the same walk order on ties.
//!
//! Matching is pure and synchronous; it never touches the store.
use std::sync::Arc;

use http::Method;
use serde::{Deserialize, Serialize};

use crate::core::{
    module::{ModuleDescriptor, RouteRule},
    snapshot::RegistrySnapshot,
};

/// Tie-break policy between overlapping route prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    #[default]
    FirstMatch,
    LongestPrefix,
}

/// A selected `(module, route)` pair.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub module: Arc<ModuleDescriptor>,
    rule_index: usize,
}

impl RouteMatch {
    /// The route rule that accepted the request.
    pub fn rule(&self) -> &RouteRule {
        &self.module.routes[self.rule_index]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    policy: MatchPolicy,
}

impl Dispatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    /// Select at most one route for `path` (already stripped of the API prefix).
    /// `None` means unhandled: the caller decides on fallbacks or a 404.
    pub fn dispatch(
        &self,
        snapshot: &RegistrySnapshot,
        path: &str,
        method: &Method,
    ) -> Option<RouteMatch> {
        let mut candidates = snapshot.modules().flat_map(|module| {
            module
                .routes
                .iter()
                .enumerate()
                .filter(move |(_, rule)| rule.matches(path, method))
                .map(move |(index, rule)| (module, index, rule.path.len()))
        });

        let selected = match self.policy {
            MatchPolicy::FirstMatch => candidates.next(),
            // Strict `>` keeps the earliest candidate among equal lengths.
            MatchPolicy::LongestPrefix => candidates.fold(None, |best, candidate| match best {
                Some((_, _, best_len)) if candidate.2 <= best_len => best,
                _ => Some(candidate),
            }),
        };

        selected.map(|(module, rule_index, _)| RouteMatch {
            module: Arc::clone(module),
            rule_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::core::module::{ModuleStatus, RouteMethod};

    fn module(name: &str, routes: Vec<RouteRule>) -> ModuleDescriptor {
        ModuleDescriptor {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            url: format!("http://{name}:4000"),
            routes,
            manifest: json!({}),
            status: ModuleStatus::Active,
            updated_at: Utc::now(),
        }
    }

    fn overlapping_snapshot() -> RegistrySnapshot {
        RegistrySnapshot::build(
            1,
            vec![
                module("fees", vec![RouteRule::any("/fees/invoices")]),
                module(
                    "accounts",
                    vec![
                        RouteRule::new("/ledger", RouteMethod::Only(Method::GET)),
                        RouteRule::any("/fees"),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn test_first_match_follows_name_then_declaration_order() {
        let snapshot = overlapping_snapshot();
        let hit = Dispatcher::new(MatchPolicy::FirstMatch)
            .dispatch(&snapshot, "/fees/invoices/7", &Method::GET)
            .unwrap();
        assert_eq!(hit.module.name, "accounts");
        assert_eq!(hit.rule().path, "/fees");
    }

    #[test]
    fn test_longest_prefix_prefers_specific_rule() {
        let snapshot = overlapping_snapshot();
        let hit = Dispatcher::new(MatchPolicy::LongestPrefix)
            .dispatch(&snapshot, "/fees/invoices/7", &Method::GET)
            .unwrap();
        assert_eq!(hit.module.name, "fees");
        assert_eq!(hit.rule().path, "/fees/invoices");
    }

    #[test]
    fn test_longest_prefix_ties_keep_walk_order() {
        let snapshot = RegistrySnapshot::build(
            1,
            vec![
                module("beta", vec![RouteRule::any("/shared")]),
                module("alpha", vec![RouteRule::any("/shared")]),
            ],
        );
        let hit = Dispatcher::new(MatchPolicy::LongestPrefix)
            .dispatch(&snapshot, "/shared/x", &Method::GET)
            .unwrap();
        assert_eq!(hit.module.name, "alpha");
    }

    #[test]
    fn test_method_mismatch_is_skipped() {
        let snapshot = overlapping_snapshot();
        let dispatcher = Dispatcher::default();
        assert!(
            dispatcher
                .dispatch(&snapshot, "/ledger/2024", &Method::POST)
                .is_none()
        );
        let hit = dispatcher
            .dispatch(&snapshot, "/ledger/2024", &Method::GET)
            .unwrap();
        assert_eq!(hit.module.name, "accounts");
    }

    #[test]
    fn test_unmatched_path() {
        let snapshot = overlapping_snapshot();
        assert!(
            Dispatcher::default()
                .dispatch(&snapshot, "/attendance/records", &Method::GET)
                .is_none()
        );
        assert!(
            Dispatcher::default()
                .dispatch(&RegistrySnapshot::empty(), "/fees", &Method::GET)
                .is_none()
        );
    }

    #[test]
    fn test_dispatch_is_deterministic() {
        let snapshot = overlapping_snapshot();
        let dispatcher = Dispatcher::default();
        let first = dispatcher
            .dispatch(&snapshot, "/fees/invoices", &Method::GET)
            .unwrap();
        for _ in 0..32 {
            let again = dispatcher
                .dispatch(&snapshot, "/fees/invoices", &Method::GET)
                .unwrap();
            assert_eq!(again.module.name, first.module.name);
            assert_eq!(again.rule(), first.rule());
        }
    }
}
