//! Shape id and material id allocation

use std::collections::BTreeMap;

use rz_core::component::ComponentId;
use rz_core::stage::StageItemId;
use serde::Serialize;

/// Where a shape id came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdEntry {
    /// Stage items from the root down to the item holding the component
    pub hierarchy: Vec<StageItemId>,
    pub component: ComponentId,
}

/// Hands out one shape id per emitted component
#[derive(Debug, Clone)]
pub struct IdAllocator {
    start: u32,
    next: u32,
    entries: BTreeMap<u32, IdEntry>,
}

impl IdAllocator {
    pub fn new(start: u32) -> Self {
        Self {
            start,
            next: start,
            entries: BTreeMap::new(),
        }
    }

    /// Allocate the next id
    ///
    /// Components emitted outside any stage item (an empty hierarchy) still
    /// consume an id but are not recorded.
    pub fn allocate(&mut self, hierarchy: &[StageItemId], component: ComponentId) -> u32 {
        let id = self.next;
        self.next += 1;
        if !hierarchy.is_empty() {
            self.entries.insert(
                id,
                IdEntry {
                    hierarchy: hierarchy.to_vec(),
                    component,
                },
            );
        }
        id
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    /// The id the next allocation returns
    pub fn next_id(&self) -> u32 {
        self.next
    }

    pub fn get(&self, id: u32) -> Option<&IdEntry> {
        self.entries.get(&id)
    }

    pub fn entries(&self) -> &BTreeMap<u32, IdEntry> {
        &self.entries
    }

    pub fn into_entries(self) -> BTreeMap<u32, IdEntry> {
        self.entries
    }
}

/// Stack-scoped material ids
///
/// The active material is the top of the stack, or the fallback id (the
/// stream's start id) when no material is pushed.
#[derive(Debug, Clone)]
pub struct MaterialStack {
    next: u32,
    fallback: u32,
    stack: Vec<u32>,
    owners: BTreeMap<u32, StageItemId>,
}

impl MaterialStack {
    pub fn new(start: u32) -> Self {
        Self {
            next: start,
            fallback: start,
            stack: Vec::new(),
            owners: BTreeMap::new(),
        }
    }

    /// Allocate a material id and make it active
    pub fn push(&mut self, owner: StageItemId) -> u32 {
        let id = self.claim(Some(owner));
        self.stack.push(id);
        id
    }

    /// Allocate a material id without activating it
    pub fn claim(&mut self, owner: Option<StageItemId>) -> u32 {
        let id = self.next;
        self.next += 1;
        if let Some(owner) = owner {
            self.owners.insert(id, owner);
        }
        id
    }

    /// Deactivate the top material and return the one active again
    ///
    /// # Panics
    ///
    /// Panics when nothing is pushed; a pull without a matching push
    /// desynchronizes every later material id.
    pub fn pop(&mut self) -> u32 {
        assert!(
            self.stack.pop().is_some(),
            "material stack underflow: pull without a matching push"
        );
        self.current()
    }

    pub fn current(&self) -> u32 {
        self.stack.last().copied().unwrap_or(self.fallback)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn next_id(&self) -> u32 {
        self.next
    }

    /// Stage item that declared a material id
    pub fn owner(&self, id: u32) -> Option<StageItemId> {
        self.owners.get(&id).copied()
    }

    pub fn owners(&self) -> &BTreeMap<u32, StageItemId> {
        &self.owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_from_start() {
        let mut ids = IdAllocator::new(5);
        let root = [StageItemId(1)];
        assert_eq!(ids.allocate(&root, ComponentId(10)), 5);
        assert_eq!(ids.allocate(&root, ComponentId(11)), 6);
        assert_eq!(ids.next_id(), 7);
        assert_eq!(ids.get(6).map(|e| e.component), Some(ComponentId(11)));
    }

    #[test]
    fn test_unparented_ids_are_not_recorded() {
        let mut ids = IdAllocator::new(0);
        assert_eq!(ids.allocate(&[], ComponentId(1)), 0);
        assert_eq!(ids.allocate(&[StageItemId(2)], ComponentId(1)), 1);
        assert_eq!(ids.entries().keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_material_stack_restores_parent() {
        let mut stack = MaterialStack::new(3);
        assert_eq!(stack.current(), 3);
        let outer = stack.push(StageItemId(1));
        let inner = stack.push(StageItemId(2));
        assert_eq!((outer, inner), (3, 4));
        assert_eq!(stack.pop(), outer);
        assert_eq!(stack.pop(), 3);
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.owner(4), Some(StageItemId(2)));
    }

    #[test]
    fn test_claim_does_not_activate() {
        let mut stack = MaterialStack::new(0);
        assert_eq!(stack.claim(None), 0);
        assert_eq!(stack.current(), 0);
        assert_eq!(stack.push(StageItemId(9)), 1);
        assert_eq!(stack.current(), 1);
    }

    #[test]
    #[should_panic(expected = "material stack underflow")]
    fn test_pop_on_empty_stack_panics() {
        let mut stack = MaterialStack::new(0);
        stack.pop();
    }
}
