//! Comparison helpers: noisy-field pruning and field-level diff summaries.

use keel_core::ManagedKind;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool { self.adds == 0 && self.updates == 0 && self.removes == 0 }
}

/// Drop server-populated fields plus the kind's `unmanaged` JSON pointers.
pub fn strip_noisy(mut v: Json, unmanaged: &[&str]) -> Json {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
            obj.remove("resourceVersion");
            obj.remove("generation");
            obj.remove("creationTimestamp");
            obj.remove("uid");
            obj.remove("selfLink");
        }
    }
    // Status is server-populated; ignore it during diffs
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    for ptr in unmanaged {
        remove_pointer(&mut v, ptr);
    }
    v
}

/// Remove the value at RFC 6901 pointer `ptr`, if present. Only object
/// members are removed; array indices are left alone.
fn remove_pointer(v: &mut Json, ptr: &str) {
    let Some((parent, last)) = ptr.rsplit_once('/') else { return };
    let last = last.replace("~1", "/").replace("~0", "~");
    if let Some(obj) = v.pointer_mut(parent).and_then(Json::as_object_mut) {
        obj.remove(&last);
    }
}

/// JSON projection of `obj` used for semantic equality.
pub fn managed_view<K: ManagedKind>(obj: &K) -> Result<Json, serde_json::Error> {
    Ok(strip_noisy(serde_json::to_value(obj)?, K::UNMANAGED))
}

pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, s: &mut DiffSummary) {
        use serde_json::Value as V;
        match (a, b) {
            (V::Object(ao), V::Object(bo)) => {
                for (k, av) in ao.iter() {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, s),
                        None => s.adds += 1,
                    }
                }
                s.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (V::Array(aa), V::Array(bb)) => {
                s.updates += aa.iter().zip(bb.iter()).filter(|(x, y)| x != y).count();
                s.adds += aa.len().saturating_sub(bb.len());
                s.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv {
                    s.updates += 1;
                }
            }
        }
    }
    let mut s = DiffSummary::default();
    walk(target, base, &mut s);
    s
}
