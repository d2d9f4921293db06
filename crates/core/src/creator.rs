//! Creators, named registries and composition wrappers.
//!
//! A [`Creator`] maps the stored object (or the kind's empty value) to the
//! desired object. Creators capture all of their inputs when they are built,
//! so running one twice on the same input yields structurally equal output.

use std::fmt;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::{CreatorError, ManagedKind};

pub type Creator<K> = Arc<dyn Fn(K) -> Result<K, CreatorError> + Send + Sync>;

/// Registry entry: the logical object name plus the creator computing it.
pub struct NamedCreator<K> {
    name: String,
    creator: Creator<K>,
    control_plane: bool,
}

impl<K> Clone for NamedCreator<K> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), creator: Arc::clone(&self.creator), control_plane: self.control_plane }
    }
}

impl<K> fmt::Debug for NamedCreator<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedCreator").field("name", &self.name).field("control_plane", &self.control_plane).finish()
    }
}

impl<K: ManagedKind> NamedCreator<K> {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(K) -> Result<K, CreatorError> + Send + Sync + 'static,
    {
        Self::from_creator(name, Arc::new(f))
    }

    pub fn from_creator(name: impl Into<String>, creator: Creator<K>) -> Self {
        Self { name: name.into(), creator, control_plane: false }
    }

    /// Marks the entry as part of the tenant control plane. Such entries are
    /// dropped for tenants whose control plane is managed elsewhere.
    pub fn control_plane(mut self) -> Self {
        self.control_plane = true;
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn is_control_plane(&self) -> bool { self.control_plane }
    pub fn creator(&self) -> &Creator<K> { &self.creator }

    /// Run the creator against `existing`.
    pub fn create(&self, existing: K) -> Result<K, CreatorError> {
        (self.creator)(existing)
    }

    /// Replace the creator with `wrapper(creator)`, keeping name and tags.
    pub fn map(self, wrapper: impl FnOnce(Creator<K>) -> Creator<K>) -> Self {
        Self { name: self.name, creator: wrapper(self.creator), control_plane: self.control_plane }
    }
}

/// Ordered name → creator mapping for one kind.
///
/// Entries reconcile in registration order. Pushing a name that is already
/// present replaces that entry in place.
pub struct Registry<K> {
    entries: Vec<NamedCreator<K>>,
}

impl<K> Default for Registry<K> {
    fn default() -> Self { Self { entries: Vec::new() } }
}

impl<K> Clone for Registry<K> {
    fn clone(&self) -> Self { Self { entries: self.entries.clone() } }
}

impl<K> fmt::Debug for Registry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

impl<K: ManagedKind> Registry<K> {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, entry: NamedCreator<K>) -> Self {
        self.push(entry);
        self
    }

    pub fn push(&mut self, entry: NamedCreator<K>) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, NamedCreator<K>> { self.entries.iter() }
    pub fn names(&self) -> Vec<&str> { self.entries.iter().map(|e| e.name()).collect() }

    pub fn get(&self, name: &str) -> Option<&NamedCreator<K>> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn retain(mut self, keep: impl Fn(&NamedCreator<K>) -> bool) -> Self {
        self.entries.retain(|e| keep(e));
        self
    }

    /// Drop every entry tagged as control plane.
    pub fn without_control_plane(self) -> Self {
        self.retain(|e| !e.is_control_plane())
    }

    /// Apply `wrapper` to every creator.
    pub fn wrap_all(self, wrapper: impl Fn(Creator<K>) -> Creator<K>) -> Self {
        Self { entries: self.entries.into_iter().map(|e| e.map(&wrapper)).collect() }
    }
}

impl<K: ManagedKind> FromIterator<NamedCreator<K>> for Registry<K> {
    fn from_iter<I: IntoIterator<Item = NamedCreator<K>>>(iter: I) -> Self {
        let mut reg = Registry::new();
        for entry in iter {
            reg.push(entry);
        }
        reg
    }
}

impl<'a, K> IntoIterator for &'a Registry<K> {
    type Item = &'a NamedCreator<K>;
    type IntoIter = std::slice::Iter<'a, NamedCreator<K>>;
    fn into_iter(self) -> Self::IntoIter { self.entries.iter() }
}

/// Post-process a creator's output. Errors from `inner` are returned as is.
pub fn wrap<K, P>(inner: Creator<K>, post: P) -> Creator<K>
where
    K: ManagedKind,
    P: Fn(K) -> K + Send + Sync + 'static,
{
    Arc::new(move |existing| inner(existing).map(&post))
}

/// Wrapper stamping `owner` as the single controller reference.
pub fn owner_ref_wrapper<K: ManagedKind>(owner: OwnerReference) -> impl Fn(Creator<K>) -> Creator<K> + Clone {
    move |inner| {
        let owner = owner.clone();
        wrap(inner, move |mut obj: K| {
            set_controller_ref(obj.meta_mut(), &owner);
            obj
        })
    }
}

/// Make `owner` the only controller reference on `meta`.
///
/// Other controller references and stale references to the same owner UID
/// are removed; non-controller references held by other actors stay.
pub fn set_controller_ref(meta: &mut ObjectMeta, owner: &OwnerReference) {
    let mut refs = meta.owner_references.take().unwrap_or_default();
    refs.retain(|r| r.controller != Some(true) && r.uid != owner.uid);
    refs.push(OwnerReference { controller: Some(true), block_owner_deletion: Some(true), ..owner.clone() });
    meta.owner_references = Some(refs);
}
