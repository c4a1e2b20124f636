//! Scoped object tree whose handles carry a generativity brand.
//!
//! A [`Handle`] minted by one scope cannot be handed to another scope: the
//! mismatch is a type error rather than an [`ObjectError::ForeignTree`] at
//! runtime. Staleness after destruction is still checked by generation.
//!
//! ```compile_fail
//! use arbor::object::with_tree;
//!
//! with_tree::<(), _>(|left| {
//!     let stray = left.create("stray", None, ()).unwrap();
//!     with_tree::<(), _>(|right| {
//!         let _ = right.destroy(stray);
//!     });
//! });
//! ```

use core::marker::PhantomData;

use generativity::Id;

use crate::object::{ObjectError, ObjectId, ObjectTree, Teardown};

/// Runs `f` with a fresh branded tree; its handles cannot escape the closure.
///
/// ```
/// use arbor::object::with_tree;
///
/// let destroyed = with_tree::<(), _>(|tree| {
///     let parent = tree.create("parent", None, ()).unwrap();
///     tree.create("child", Some(parent), ()).unwrap();
///     tree.destroy(parent).unwrap().len()
/// });
/// assert_eq!(destroyed, 2);
/// ```
pub fn with_tree<T, R>(f: impl for<'id> FnOnce(&mut TreeScope<'id, T>) -> R) -> R {
    generativity::make_guard!(guard);
    let mut scope = TreeScope {
        _brand: guard.into(),
        inner: ObjectTree::new(),
    };
    f(&mut scope)
}

/// Object id branded with the scope that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle<'id> {
    id: ObjectId,
    _brand: PhantomData<Id<'id>>,
}

impl Handle<'_> {
    /// The unbranded id, for logging or for comparing with a [`Teardown`].
    #[must_use]
    pub const fn id(self) -> ObjectId {
        self.id
    }
}

/// Wrapper around an [`ObjectTree`] that only accepts its own handles.
pub struct TreeScope<'id, T> {
    _brand: Id<'id>,
    inner: ObjectTree<T>,
}

impl<'id, T> TreeScope<'id, T> {
    const fn brand(&self, id: ObjectId) -> Handle<'id> {
        Handle {
            id,
            _brand: PhantomData,
        }
    }

    /// Creates an object, optionally owned by `owner`.
    pub fn create(
        &mut self,
        name: impl Into<String>,
        owner: Option<Handle<'id>>,
        data: T,
    ) -> Result<Handle<'id>, ObjectError> {
        let id = self.inner.create(name, owner.map(Handle::id), data)?;
        Ok(self.brand(id))
    }

    /// Destroys `handle` and everything it owns.
    pub fn destroy(&mut self, handle: Handle<'id>) -> Result<Teardown, ObjectError> {
        self.inner.destroy(handle.id)
    }

    pub fn set_name(
        &mut self,
        handle: Handle<'id>,
        name: impl Into<String>,
    ) -> Result<(), ObjectError> {
        self.inner.set_name(handle.id, name)
    }

    #[must_use]
    pub fn is_alive(&self, handle: Handle<'id>) -> bool {
        self.inner.is_alive(handle.id)
    }

    pub fn name(&self, handle: Handle<'id>) -> Result<&str, ObjectError> {
        self.inner.name(handle.id)
    }

    pub fn owner(&self, handle: Handle<'id>) -> Result<Option<Handle<'id>>, ObjectError> {
        Ok(self.inner.owner(handle.id)?.map(|id| self.brand(id)))
    }

    pub fn children(&self, handle: Handle<'id>) -> Result<Vec<Handle<'id>>, ObjectError> {
        Ok(self
            .inner
            .children(handle.id)?
            .iter()
            .map(|&id| self.brand(id))
            .collect())
    }

    /// Read-only view of the underlying tree.
    #[must_use]
    pub const fn tree(&self) -> &ObjectTree<T> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_cascade_matches_tree() {
        with_tree::<(), _>(|scope| {
            let root = scope.create("root", None, ()).unwrap();
            let p = scope.create("p", Some(root), ()).unwrap();
            let c = scope.create("c", Some(p), ()).unwrap();

            assert_eq!(scope.owner(c).unwrap(), Some(p));
            assert_eq!(scope.children(root).unwrap(), vec![p]);

            let teardown = scope.destroy(p).unwrap();
            assert!(teardown.contains(c.id()));
            assert!(!scope.is_alive(c));
            assert!(scope.children(root).unwrap().is_empty());
            assert_eq!(scope.tree().len(), 1);
        });
    }

    #[test]
    fn stale_handle_is_reported() {
        with_tree::<(), _>(|scope| {
            let p = scope.create("p", None, ()).unwrap();
            scope.destroy(p).unwrap();
            assert_eq!(scope.destroy(p), Err(ObjectError::Stale(p.id())));
            assert!(scope.set_name(p, "again").is_err());
        });
    }
}
