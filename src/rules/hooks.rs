//! Runtime extension points fired while a rule set is built.
//!
//! Two ordered callback lists:
//! - `headers` (deprecated): returns per-route header patches
//! - `route_rules`: receives the complete merged mapping for rewriting
//!
//! Callbacks run synchronously, in registration order, `headers` first.
//! Removal is explicit through the [`HookHandle`] returned on registration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use indexmap::IndexMap;

use crate::headers::SecurityHeaders;
use crate::rules::SecurityRules;

/// Header overrides for one route pattern, returned by a `headers` hook.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadersPatch {
    pub route: String,
    pub headers: SecurityHeaders,
}

impl HeadersPatch {
    pub fn new(route: impl Into<String>, headers: SecurityHeaders) -> Self {
        Self {
            route: route.into(),
            headers,
        }
    }
}

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(u64);

type HeadersHook = Box<dyn Fn() -> Vec<HeadersPatch> + Send + Sync>;
type RouteRulesHook = Box<dyn Fn(&mut IndexMap<String, SecurityRules>) + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    next_id: AtomicU64,
    headers: Mutex<Vec<(HookHandle, HeadersHook)>>,
    route_rules: Mutex<Vec<(HookHandle, RouteRulesHook)>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("headers", &lock(&self.headers).len())
            .field("route_rules", &lock(&self.route_rules).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&self) -> HookHandle {
        HookHandle(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a deprecated `headers` hook.
    pub fn on_headers<F>(&self, hook: F) -> HookHandle
    where
        F: Fn() -> Vec<HeadersPatch> + Send + Sync + 'static,
    {
        let handle = self.next_handle();
        lock(&self.headers).push((handle, Box::new(hook)));
        tracing::warn!(
            hook = ?handle,
            "`headers` hook is deprecated, register a `route_rules` hook instead"
        );
        handle
    }

    pub fn on_route_rules<F>(&self, hook: F) -> HookHandle
    where
        F: Fn(&mut IndexMap<String, SecurityRules>) + Send + Sync + 'static,
    {
        let handle = self.next_handle();
        lock(&self.route_rules).push((handle, Box::new(hook)));
        handle
    }

    /// Removes a hook. Returns false if the handle was not registered.
    pub fn unregister(&self, handle: HookHandle) -> bool {
        let mut headers = lock(&self.headers);
        let before = headers.len();
        headers.retain(|(h, _)| *h != handle);
        if headers.len() != before {
            return true;
        }
        drop(headers);

        let mut route_rules = lock(&self.route_rules);
        let before = route_rules.len();
        route_rules.retain(|(h, _)| *h != handle);
        route_rules.len() != before
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.headers).is_empty() && lock(&self.route_rules).is_empty()
    }

    /// Patches from every `headers` hook, in registration order.
    pub(crate) fn collect_header_patches(&self) -> Vec<HeadersPatch> {
        lock(&self.headers).iter().flat_map(|(_, hook)| hook()).collect()
    }

    pub(crate) fn rewrite_route_rules(&self, routes: &mut IndexMap<String, SecurityRules>) {
        for (_, hook) in lock(&self.route_rules).iter() {
            hook(routes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_route_rules_hooks_run_in_registration_order() {
        let registry = HookRegistry::new();
        registry.on_route_rules(|routes| {
            routes.insert("/first".into(), SecurityRules::default());
        });
        registry.on_route_rules(|routes| {
            routes.insert("/second".into(), SecurityRules::default());
        });

        let mut routes = IndexMap::new();
        registry.rewrite_route_rules(&mut routes);
        let keys: Vec<&str> = routes.keys().map(String::as_str).collect();
        assert_eq!(keys, ["/first", "/second"]);
    }

    #[test]
    fn test_unregister_removes_only_that_hook() {
        let registry = HookRegistry::new();
        let calls = Arc::new(AtomicU64::new(0));

        let counter = calls.clone();
        let first = registry.on_headers(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        });
        let counter = calls.clone();
        registry.on_headers(move || {
            counter.fetch_add(10, Ordering::SeqCst);
            Vec::new()
        });

        assert!(registry.unregister(first));
        assert!(!registry.unregister(first));
        registry.collect_header_patches();
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_empty_registry() {
        let registry = HookRegistry::new();
        assert!(registry.is_empty());
        let handle = registry.on_route_rules(|_| {});
        assert!(!registry.is_empty());
        registry.unregister(handle);
        assert!(registry.is_empty());
    }
}
