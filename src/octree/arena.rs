//! Pooled storage for octants
//!
//! Octants live in one `Vec` and refer to each other by `OctantId`. Pruned
//! octants go onto a free stack and are reset to creation defaults before
//! they are handed out again.

use crate::math::Aabb;

use super::types::{Octant, OctantId};

#[derive(Debug, Clone)]
pub(crate) struct Arena<K> {
    slots: Vec<Octant<K>>,
    free: Vec<OctantId>,
}

impl<K> Arena<K> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn alloc(
        &mut self,
        bounds: Aabb,
        parent: Option<OctantId>,
        depth: u32,
    ) -> OctantId {
        if let Some(id) = self.free.pop() {
            self.slots[id.index()].reset(bounds, parent, depth);
            return id;
        }
        let id = OctantId(self.slots.len() as u32);
        self.slots.push(Octant::new(bounds, parent, depth));
        id
    }

    /// Return an octant to the pool. The caller detaches it from its parent.
    pub(crate) fn release(&mut self, id: OctantId) {
        let octant = &mut self.slots[id.index()];
        let bounds = octant.bounds;
        octant.reset(bounds, None, 0);
        octant.in_pool = true;
        self.free.push(id);
    }

    pub(crate) fn get(&self, id: OctantId) -> &Octant<K> {
        &self.slots[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: OctantId) -> &mut Octant<K> {
        &mut self.slots[id.index()]
    }

    pub(crate) fn is_live(&self, id: OctantId) -> bool {
        self.slots.get(id.index()).is_some_and(|octant| !octant.in_pool)
    }

    pub(crate) fn pooled(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }
}
