use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};

/// An interned operation name.
///
/// Two `MetricName`s compare equal iff they were interned from the same
/// text, and that comparison is a pointer check, never a string compare.
/// This is what lets [`crate::trace_metric::TraceMetric`] key its children
/// map by identity on the hot path.
#[derive(Clone)]
pub struct MetricName(Arc<str>);

impl MetricName {
    /// Intern `name`, returning the single shared instance for this text.
    ///
    /// Calling this twice with the same text returns values for which
    /// `Arc::ptr_eq` holds.
    pub fn intern(name: &str) -> Self {
        registry().intern(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for MetricName {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for MetricName {}

impl Hash for MetricName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Hash the pointer, not the text: consistent with identity equality.
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MetricName").field(&self.0.as_ref()).finish()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Interns metric names by identity: two calls with equal strings return
/// `MetricName`s that compare equal via `Arc::ptr_eq`, not just string
/// equality. [`MetricName::intern`] is the process-wide default instance
/// of this registry, modeled as an explicitly constructed object rather
/// than hidden module state so tests can build isolated registries.
pub struct MetricNameRegistry {
    names: Mutex<HashMap<Box<str>, MetricName>>,
}

impl MetricNameRegistry {
    pub fn new() -> Self {
        Self {
            names: Mutex::new(HashMap::new()),
        }
    }

    pub fn intern(&self, name: &str) -> MetricName {
        let mut names = self.names.lock().unwrap();
        if let Some(existing) = names.get(name) {
            return existing.clone();
        }
        let interned = MetricName(Arc::from(name));
        names.insert(name.into(), interned.clone());
        interned
    }
}

impl Default for MetricNameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn registry() -> &'static MetricNameRegistry {
    static REGISTRY: OnceLock<MetricNameRegistry> = OnceLock::new();
    REGISTRY.get_or_init(MetricNameRegistry::new)
}
