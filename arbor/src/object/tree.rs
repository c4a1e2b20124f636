//! Arena-backed object tree with post-order cascading destruction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::object::{DestroyedObject, ObjectError, ObjectId, Teardown};
use crate::slab::{Slab, SlabKey};
use crate::trace::{debug, trace};

/// Callback run once when its object is destroyed.
pub type DestroyHook = Box<dyn FnOnce(&DestroyedObject)>;

/// Source of process-unique tree tags.
static NEXT_TREE: AtomicU32 = AtomicU32::new(1);

/// How far [`ObjectTree::find_child`] searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FindChild {
    /// Only the object's direct children.
    Direct,
    /// The whole subtree, breadth-first, so the shallowest match wins.
    #[default]
    Recursive,
}

struct ObjectNode<T> {
    name: String,
    /// Fixed at construction.
    owner: Option<ObjectId>,
    /// Creation order.
    children: Vec<ObjectId>,
    data: T,
    hooks: Vec<DestroyHook>,
}

/// A forest of named objects where owners destroy what they own.
///
/// `T` is per-object user data, dropped when the object is destroyed.
pub struct ObjectTree<T = ()> {
    tag: u32,
    nodes: Slab<ObjectNode<T>>,
}

impl<T> Default for ObjectTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObjectTree<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a tree with room for `cap` objects before the arena grows.
    #[must_use]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            tag: NEXT_TREE.fetch_add(1, Ordering::Relaxed),
            nodes: Slab::with_capacity(cap),
        }
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn key(&self, id: ObjectId) -> Result<SlabKey<ObjectNode<T>>, ObjectError> {
        if id.tree() == self.tag {
            Ok(SlabKey::new(id.index(), id.generation()))
        } else {
            Err(ObjectError::ForeignTree(id))
        }
    }

    fn id_for(&self, key: SlabKey<ObjectNode<T>>) -> ObjectId {
        ObjectId::new(key.index(), key.generation(), self.tag)
    }

    fn node(&self, id: ObjectId) -> Result<&ObjectNode<T>, ObjectError> {
        let key = self.key(id)?;
        self.nodes.get(key).ok_or(ObjectError::Stale(id))
    }

    fn node_mut(&mut self, id: ObjectId) -> Result<&mut ObjectNode<T>, ObjectError> {
        let key = self.key(id)?;
        self.nodes.get_mut(key).ok_or(ObjectError::Stale(id))
    }

    /// Creates an object, registering it with `owner` when one is given.
    ///
    /// The owner cannot be changed afterwards.
    ///
    /// # Errors
    ///
    /// [`ObjectError::Stale`] or [`ObjectError::ForeignTree`] if `owner` does
    /// not name a live object of this tree; [`ObjectError::Exhausted`] if the
    /// arena cannot grow any further.
    pub fn create(
        &mut self,
        name: impl Into<String>,
        owner: Option<ObjectId>,
        data: T,
    ) -> Result<ObjectId, ObjectError> {
        if let Some(owner) = owner {
            self.node(owner)?;
        }

        let name = name.into();
        let key = self
            .nodes
            .insert(ObjectNode {
                name,
                owner,
                children: Vec::new(),
                data,
                hooks: Vec::new(),
            })
            .ok_or(ObjectError::Exhausted)?;
        let id = self.id_for(key);

        if let Some(owner) = owner {
            self.node_mut(owner)?.children.push(id);
        }

        debug!(
            object = %id,
            name = self.node(id).map(|n| n.name.as_str()).unwrap_or_default(),
            owner = ?owner.map(|o| o.to_string()),
            "object created"
        );
        Ok(id)
    }

    /// Destroys `id` and everything it transitively owns.
    ///
    /// The subtree is collected, detached from its owner and every slot in it
    /// freed before any user code runs. Teardown then goes in post-order:
    /// each object's children (in creation order) go before the object
    /// itself, dropping its data and running its destroy hooks.
    ///
    /// A panicking hook or `Drop` leaves the tree consistent: the whole
    /// subtree is already gone.
    ///
    /// # Errors
    ///
    /// [`ObjectError::Stale`] if the object is already gone (nothing happens),
    /// [`ObjectError::ForeignTree`] if the id belongs to another tree.
    pub fn destroy(&mut self, id: ObjectId) -> Result<Teardown, ObjectError> {
        let order = self.post_order(id)?;
        if let Some(owner) = self.node(id)?.owner {
            // Owners outlive what they own, so this only misses if the tree is corrupt.
            if let Ok(node) = self.node_mut(owner) {
                node.children.retain(|c| *c != id);
            }
        }

        let mut removed = Vec::with_capacity(order.len());
        for victim in order {
            let key = self.key(victim)?;
            if let Some(node) = self.nodes.remove(key) {
                removed.push((victim, node));
            }
        }

        let mut teardown = Teardown::default();
        for (victim, node) in removed {
            let ObjectNode {
                name, data, hooks, ..
            } = node;
            drop(data);

            let record = DestroyedObject { id: victim, name };
            for hook in hooks {
                hook(&record);
            }
            debug!(object = %victim, name = %record.name, "object destroyed");
            teardown.push(record);
        }
        Ok(teardown)
    }

    /// Subtree of `id` in post-order, collected without mutating anything.
    fn post_order(&self, id: ObjectId) -> Result<Vec<ObjectId>, ObjectError> {
        let mut order = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            stack.push((current, true));
            let node = self.node(current)?;
            stack.extend(node.children.iter().rev().map(|&child| (child, false)));
        }
        Ok(order)
    }

    /// Renames an object.
    ///
    /// # Errors
    ///
    /// Fails if the object is not live in this tree.
    pub fn set_name(&mut self, id: ObjectId, name: impl Into<String>) -> Result<(), ObjectError> {
        let node = self.node_mut(id)?;
        node.name = name.into();
        trace!(object = %id, name = %node.name, "object renamed");
        Ok(())
    }

    /// Registers `hook` to run when `id` is destroyed.
    ///
    /// # Errors
    ///
    /// Fails if the object is not live in this tree.
    pub fn on_destroyed(
        &mut self,
        id: ObjectId,
        hook: impl FnOnce(&DestroyedObject) + 'static,
    ) -> Result<(), ObjectError> {
        self.node_mut(id)?.hooks.push(Box::new(hook));
        Ok(())
    }

    /// Returns true while `id` names a live object of this tree.
    #[must_use]
    pub fn is_alive(&self, id: ObjectId) -> bool {
        self.node(id).is_ok()
    }

    pub fn name(&self, id: ObjectId) -> Result<&str, ObjectError> {
        self.node(id).map(|n| n.name.as_str())
    }

    pub fn owner(&self, id: ObjectId) -> Result<Option<ObjectId>, ObjectError> {
        self.node(id).map(|n| n.owner)
    }

    /// Direct children, in creation order.
    pub fn children(&self, id: ObjectId) -> Result<&[ObjectId], ObjectError> {
        self.node(id).map(|n| n.children.as_slice())
    }

    pub fn data(&self, id: ObjectId) -> Result<&T, ObjectError> {
        self.node(id).map(|n| &n.data)
    }

    pub fn data_mut(&mut self, id: ObjectId) -> Result<&mut T, ObjectError> {
        self.node_mut(id).map(|n| &mut n.data)
    }

    /// Live objects without an owner.
    pub fn roots(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, node)| node.owner.is_none())
            .map(|(key, _)| self.id_for(key))
    }

    /// Everything `id` transitively owns, in pre-order, excluding `id`.
    pub fn descendants(&self, id: ObjectId) -> Result<Vec<ObjectId>, ObjectError> {
        let mut out = Vec::new();
        let mut stack: Vec<ObjectId> = self.node(id)?.children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.node(current)?.children.iter().rev().copied());
        }
        Ok(out)
    }

    /// Finds an object named `name` below `id`.
    ///
    /// With [`FindChild::Recursive`] the search is breadth-first: a match at
    /// a shallower depth beats any deeper one, whichever branch it is on.
    pub fn find_child(
        &self,
        id: ObjectId,
        name: &str,
        mode: FindChild,
    ) -> Result<Option<ObjectId>, ObjectError> {
        let mut queue: VecDeque<ObjectId> = self.node(id)?.children.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            let node = self.node(current)?;
            if node.name == name {
                return Ok(Some(current));
            }
            if mode == FindChild::Recursive {
                queue.extend(node.children.iter().copied());
            }
        }
        Ok(None)
    }
}
