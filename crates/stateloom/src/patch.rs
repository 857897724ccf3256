//! Shallow merge used by `patch`.

use std::collections::HashMap;
use std::hash::Hash;

/// A state type that can absorb a partial update of type `P`.
///
/// Implementations perform a shallow merge: fields present in `partial`
/// replace the current ones, everything else is kept.
pub trait Patch<P> {
    fn patched(&self, partial: P) -> Self;
}

/// Object-level merge. A non-object on either side replaces the current
/// value wholesale.
impl Patch<serde_json::Value> for serde_json::Value {
    fn patched(&self, partial: serde_json::Value) -> Self {
        match (self, partial) {
            (serde_json::Value::Object(current), serde_json::Value::Object(partial)) => {
                let mut merged = current.clone();
                merged.extend(partial);
                serde_json::Value::Object(merged)
            }
            (_, partial) => partial,
        }
    }
}

impl<K, V> Patch<HashMap<K, V>> for HashMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn patched(&self, partial: HashMap<K, V>) -> Self {
        let mut merged = self.clone();
        merged.extend(partial);
        merged
    }
}
