//! The inconsistent-object record and the ordered set of them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_metadata::MetadataObjId;

/// A declared object that failed to compile or lost a dependency.
///
/// Excluded from the serving surface but kept, with its raw definition, so
/// that administrators can see what went wrong.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InconsistentObject {
    /// The object.
    pub id: MetadataObjId,
    /// Human-readable reasons, each prefixed with the object's path.
    pub reasons: Vec<String>,
    /// The object's definition as declared in the metadata document.
    pub definition: Value,
}

impl InconsistentObject {
    /// Creates an inconsistency with a single reason.
    pub fn new(id: MetadataObjId, reason: impl Into<String>, definition: Value) -> Self {
        Self {
            id,
            reasons: vec![reason.into()],
            definition,
        }
    }

    /// Adds another reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    /// All reasons joined into one line.
    pub fn reason(&self) -> String {
        self.reasons.join("; ")
    }
}

/// The inconsistent objects of a build, keyed and ordered by identifier.
///
/// Serialized as a list in identifier order, since identifiers are not
/// string keys.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<InconsistentObject>", into = "Vec<InconsistentObject>")]
pub struct Inconsistencies(BTreeMap<MetadataObjId, InconsistentObject>);

impl Inconsistencies {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an inconsistency. Reasons for an already present object are
    /// merged, skipping duplicates.
    pub fn insert(&mut self, object: InconsistentObject) {
        match self.0.get_mut(&object.id) {
            Some(existing) => {
                for reason in object.reasons {
                    if !existing.reasons.contains(&reason) {
                        existing.reasons.push(reason);
                    }
                }
            }
            None => {
                self.0.insert(object.id.clone(), object);
            }
        }
    }

    /// Returns `true` if the object is inconsistent.
    pub fn contains(&self, id: &MetadataObjId) -> bool {
        self.0.contains_key(id)
    }

    /// Returns the record for an object.
    pub fn get(&self, id: &MetadataObjId) -> Option<&InconsistentObject> {
        self.0.get(id)
    }

    /// Identifiers of all inconsistent objects, in order.
    pub fn ids(&self) -> impl Iterator<Item = &MetadataObjId> {
        self.0.keys()
    }

    /// All records, in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &InconsistentObject> {
        self.0.values()
    }

    /// Number of inconsistent objects.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if everything is consistent.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Records present here but absent from `earlier`.
    pub fn new_since<'a>(
        &'a self,
        earlier: &'a Inconsistencies,
    ) -> impl Iterator<Item = &'a InconsistentObject> {
        self.0.values().filter(move |o| !earlier.contains(&o.id))
    }
}

impl Extend<InconsistentObject> for Inconsistencies {
    fn extend<I: IntoIterator<Item = InconsistentObject>>(&mut self, iter: I) {
        for object in iter {
            self.insert(object);
        }
    }
}

impl FromIterator<InconsistentObject> for Inconsistencies {
    fn from_iter<I: IntoIterator<Item = InconsistentObject>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl From<Vec<InconsistentObject>> for Inconsistencies {
    fn from(objects: Vec<InconsistentObject>) -> Self {
        objects.into_iter().collect()
    }
}

impl From<Inconsistencies> for Vec<InconsistentObject> {
    fn from(set: Inconsistencies) -> Self {
        set.0.into_values().collect()
    }
}

impl IntoIterator for Inconsistencies {
    type Item = InconsistentObject;
    type IntoIter = std::collections::btree_map::IntoValues<MetadataObjId, InconsistentObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}
