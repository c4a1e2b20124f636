//! Owned object trees.
//!
//! Every object may name one owner when it is created. Destroying an owner
//! destroys everything it owns, deepest first, before the owner itself goes.
//! Objects live in a generational arena and are addressed by [`ObjectId`], so
//! an id held across a cascade simply stops resolving instead of dangling.
//!
//! ```
//! use arbor::object::ObjectTree;
//!
//! let mut tree = ObjectTree::new();
//! let parent = tree.create("parent", None, ()).unwrap();
//! let child = tree.create("child", Some(parent), ()).unwrap();
//!
//! let teardown = tree.destroy(parent).unwrap();
//! assert_eq!(teardown.names().collect::<Vec<_>>(), ["child", "parent"]);
//! assert!(!tree.is_alive(child));
//! ```

mod scoped;
mod tree;

pub use scoped::{Handle, TreeScope, with_tree};
pub use tree::{DestroyHook, FindChild, ObjectTree};

use core::fmt;

use thiserror::Error;

/// Stable identifier of an object inside one [`ObjectTree`].
///
/// Copyable and cheap; it never keeps the object alive. Once the object is
/// destroyed (directly or through its owner) every copy of the id is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    index: u32,
    generation: u32,
    tree: u32,
}

impl ObjectId {
    #[inline]
    pub(crate) const fn new(index: u32, generation: u32, tree: u32) -> Self {
        Self {
            index,
            generation,
            tree,
        }
    }

    #[inline]
    pub(crate) const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }

    #[inline]
    pub(crate) const fn tree(self) -> u32 {
        self.tree
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Errors reported by [`ObjectTree`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ObjectError {
    /// The object was already destroyed, directly or by its owner.
    #[error("object {0} has been destroyed")]
    Stale(ObjectId),
    /// The id was issued by a different tree.
    #[error("object {0} belongs to another tree")]
    ForeignTree(ObjectId),
    /// The arena cannot address more objects.
    #[error("object arena exhausted")]
    Exhausted,
}

/// Record of one destroyed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyedObject {
    pub id: ObjectId,
    pub name: String,
}

/// Everything a single [`ObjectTree::destroy`] call took down, in destruction order.
///
/// Descendants always appear before their owners; siblings keep creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Teardown {
    destroyed: Vec<DestroyedObject>,
}

impl Teardown {
    pub(crate) fn push(&mut self, object: DestroyedObject) {
        self.destroyed.push(object);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.destroyed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.destroyed.is_empty()
    }

    /// Returns true if `id` was destroyed by this call.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.destroyed.iter().any(|d| d.id == id)
    }

    /// Names of the destroyed objects, in destruction order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.destroyed.iter().map(|d| d.name.as_str())
    }

    pub fn iter(&self) -> core::slice::Iter<'_, DestroyedObject> {
        self.destroyed.iter()
    }
}

impl IntoIterator for Teardown {
    type Item = DestroyedObject;
    type IntoIter = std::vec::IntoIter<DestroyedObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.destroyed.into_iter()
    }
}

impl<'a> IntoIterator for &'a Teardown {
    type Item = &'a DestroyedObject;
    type IntoIter = core::slice::Iter<'a, DestroyedObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.destroyed.iter()
    }
}
