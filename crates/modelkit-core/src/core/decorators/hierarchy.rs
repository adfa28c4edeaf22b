use super::{Decorator, ensure_absent, impl_decorator, required};
use crate::core::error::{ModelError, describe};
use crate::core::keys::{ParticleKey, ParticlesKey};
use crate::core::models::ids::ParticleIndex;
use crate::core::models::store::ParticleStore;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;

/// A node of a particle tree: an ordered child list plus an optional parent.
///
/// Roots carry no parent attribute. Traversals skip children that have been
/// removed from the store since they were added.
pub struct Hierarchy<P> {
    store: P,
    index: ParticleIndex,
}

fn parent_key() -> ParticleKey {
    static KEY: OnceLock<ParticleKey> = OnceLock::new();
    *KEY.get_or_init(|| ParticleKey::new("hierarchy parent"))
}

fn children_key() -> ParticlesKey {
    static KEY: OnceLock<ParticlesKey> = OnceLock::new();
    *KEY.get_or_init(|| ParticlesKey::new("hierarchy children"))
}

fn is_hierarchy(store: &ParticleStore, index: ParticleIndex) -> bool {
    store.has_attribute(index, children_key())
}

impl_decorator!(Hierarchy, "Hierarchy", "particles attribute 'hierarchy children'", is_hierarchy);

impl<'a> Hierarchy<&'a mut ParticleStore> {
    /// Makes the particle a childless root.
    pub fn setup_particle(store: &'a mut ParticleStore, index: ParticleIndex) -> Result<Self, ModelError> {
        ensure_absent(store, index, "Hierarchy", is_hierarchy(store, index), &[children_key()])?;
        ensure_absent(store, index, "Hierarchy", false, &[parent_key()])?;
        store.add_attribute(index, children_key(), Vec::new())?;
        Ok(Self { store, index })
    }
}

impl<P: Deref<Target = ParticleStore>> Hierarchy<P> {
    /// The parent particle, or `None` at a root.
    pub fn parent(&self) -> Option<ParticleIndex> {
        self.store.get_value(self.index, parent_key()).ok()
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    /// The children in insertion order.
    pub fn children(&self) -> &[ParticleIndex] {
        required(self.store.value_ref(self.index, children_key()).map(Vec::as_slice))
    }

    pub fn number_of_children(&self) -> usize {
        self.children().len()
    }

    pub fn child(&self, i: usize) -> Option<ParticleIndex> {
        self.children().get(i).copied()
    }

    /// Position of `child` among this particle's children.
    pub fn child_index(&self, child: ParticleIndex) -> Option<usize> {
        self.children().iter().position(|c| *c == child)
    }

    /// Follows parent links up to the root. A removed ancestor ends the walk,
    /// so the result is always a live particle.
    pub fn root(&self) -> ParticleIndex {
        let mut current = self.index;
        while let Ok(parent) = self.store.get_value(current, parent_key()) {
            if !self.store.contains(parent) {
                break;
            }
            current = parent;
        }
        current
    }

    fn live_children(&self, node: ParticleIndex) -> impl Iterator<Item = ParticleIndex> + '_ {
        self.store
            .value_ref(node, children_key())
            .map(|list| list.as_slice())
            .unwrap_or_default()
            .iter()
            .copied()
            .filter(|child| self.store.contains(*child))
    }

    /// Pre-order traversal starting at (and including) this node.
    pub fn depth_first(&self) -> Vec<ParticleIndex> {
        let mut order = Vec::new();
        let mut stack = vec![self.index];
        while let Some(node) = stack.pop() {
            order.push(node);
            let children: Vec<_> = self.live_children(node).collect();
            stack.extend(children.into_iter().rev());
        }
        order
    }

    /// Level-order traversal starting at (and including) this node.
    pub fn breadth_first(&self) -> Vec<ParticleIndex> {
        let mut order = Vec::new();
        let mut queue = VecDeque::from([self.index]);
        while let Some(node) = queue.pop_front() {
            order.push(node);
            queue.extend(self.live_children(node));
        }
        order
    }

    /// Every descendant without children, depth first. A leaf returns itself.
    pub fn leaves(&self) -> Vec<ParticleIndex> {
        self.depth_first()
            .into_iter()
            .filter(|node| self.live_children(*node).next().is_none())
            .collect()
    }
}

impl<P: DerefMut<Target = ParticleStore>> Hierarchy<P> {
    /// Appends `child` to this node's children and returns its position.
    ///
    /// # Errors
    ///
    /// `NotDecorated` if `child` is not a `Hierarchy`; `InvalidValue` if it
    /// already has a parent or is this node or one of its ancestors.
    pub fn add_child(&mut self, child: ParticleIndex) -> Result<usize, ModelError> {
        let child_view = Hierarchy::decorate(&*self.store, child)?;
        if let Some(parent) = child_view.parent() {
            return Err(ModelError::invalid(
                "Hierarchy::add_child",
                format!(
                    "particle {} already has parent {:?}",
                    describe(child_view.name(), child),
                    parent
                ),
            ));
        }
        let mut ancestor = Some(self.index);
        while let Some(node) = ancestor {
            if node == child {
                return Err(ModelError::invalid(
                    "Hierarchy::add_child",
                    format!("adding {:?} under {:?} would create a cycle", child, self.index),
                ));
            }
            ancestor = self.store.get_value(node, parent_key()).ok();
        }

        self.store.add_attribute(child, parent_key(), self.index)?;
        let position = required(self.store.particle_mut(self.index).and_then(|mut p| {
            p.value_mut(children_key()).map(|list| {
                list.push(child);
                list.len() - 1
            })
        }));
        Ok(position)
    }

    /// Detaches `child`, which becomes a root.
    pub fn remove_child(&mut self, child: ParticleIndex) -> Result<(), ModelError> {
        let Some(position) = self.child_index(child) else {
            return Err(ModelError::invalid(
                "Hierarchy::remove_child",
                format!("{:?} is not a child of {:?}", child, self.index),
            ));
        };
        required(self.store.particle_mut(self.index).and_then(|mut p| {
            p.value_mut(children_key()).map(|list| {
                list.remove(position);
            })
        }));
        if self.store.contains(child) {
            self.store.remove_attribute(child, parent_key())?;
        }
        Ok(())
    }
}
