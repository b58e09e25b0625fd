// SPDX-License-Identifier: GPL-3.0-only

//! Generational arena for textures shared between GPU contexts
//!
//! Every entry records which context roles still hold it. The renderer holds
//! the textures it creates; the encoder takes a hold on the texture it is
//! reading from. An entry is dropped only after every holder released it, and
//! its handle goes stale the moment that happens, so a late lookup from the
//! other context resolves to `None` instead of a recycled resource.

use tracing::debug;

/// Which context holds a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextRole {
    /// The display-bound renderer context
    Display,
    /// The encoder sidecar context
    Encoder,
}

impl ContextRole {
    fn bit(self) -> u8 {
        match self {
            ContextRole::Display => 0b01,
            ContextRole::Encoder => 0b10,
        }
    }
}

/// Opaque handle to a shared texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId {
    namespace: u32,
    index: u32,
    generation: u32,
}

impl std::fmt::Display for TextureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tex{}:{}v{}", self.namespace, self.index, self.generation)
    }
}

struct Entry<T> {
    resource: T,
    holders: u8,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// Texture storage for one shared namespace
pub struct TextureArena<T> {
    namespace: u32,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> TextureArena<T> {
    pub fn new(namespace: u32) -> Self {
        Self {
            namespace,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Store a resource held by `owner`
    pub fn insert(&mut self, resource: T, owner: ContextRole) -> TextureId {
        let entry = Entry {
            resource,
            holders: owner.bit(),
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (self.slots.len() - 1) as u32
            }
        };
        TextureId {
            namespace: self.namespace,
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn entry(&self, id: TextureId) -> Option<&Entry<T>> {
        if id.namespace != self.namespace {
            return None;
        }
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, id: TextureId) -> Option<&mut Entry<T>> {
        if id.namespace != self.namespace {
            return None;
        }
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Resolve a handle; stale or foreign handles yield `None`
    pub fn get(&self, id: TextureId) -> Option<&T> {
        self.entry(id).map(|entry| &entry.resource)
    }

    /// Add `role` as a holder of a live entry
    pub fn retain(&mut self, id: TextureId, role: ContextRole) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.holders |= role.bit();
                true
            }
            None => false,
        }
    }

    /// Drop `role`'s hold; returns the resource once nobody holds it
    pub fn release(&mut self, id: TextureId, role: ContextRole) -> Option<T> {
        let entry = self.entry_mut(id)?;
        entry.holders &= !role.bit();
        if entry.holders != 0 {
            return None;
        }

        let slot = &mut self.slots[id.index as usize];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        debug!(texture = %id, "Released shared texture");
        Some(entry.resource)
    }

    /// Whether `role` currently holds the entry
    pub fn is_held_by(&self, id: TextureId, role: ContextRole) -> bool {
        self.entry(id)
            .map(|entry| entry.holders & role.bit() != 0)
            .unwrap_or(false)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_survives_until_both_roles_release() {
        let mut arena = TextureArena::new(1);
        let id = arena.insert("frame", ContextRole::Display);
        assert!(arena.retain(id, ContextRole::Encoder));

        assert_eq!(arena.release(id, ContextRole::Display), None);
        assert_eq!(arena.get(id), Some(&"frame"));

        assert_eq!(arena.release(id, ContextRole::Encoder), Some("frame"));
        assert_eq!(arena.get(id), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn stale_handle_does_not_resolve_recycled_slot() {
        let mut arena = TextureArena::new(1);
        let old = arena.insert(1u32, ContextRole::Display);
        arena.release(old, ContextRole::Display);
        let new = arena.insert(2u32, ContextRole::Display);

        assert_ne!(old, new);
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get(new), Some(&2));
        assert!(!arena.retain(old, ContextRole::Encoder));
    }

    #[test]
    fn foreign_namespace_is_rejected() {
        let mut first = TextureArena::new(1);
        let second: TextureArena<u32> = TextureArena::new(2);
        let id = first.insert(7u32, ContextRole::Display);
        assert_eq!(second.get(id), None);
    }

    #[test]
    fn releasing_without_hold_keeps_entry() {
        let mut arena = TextureArena::new(3);
        let id = arena.insert((), ContextRole::Display);
        assert_eq!(arena.release(id, ContextRole::Encoder), None);
        assert!(arena.is_held_by(id, ContextRole::Display));
        assert_eq!(arena.len(), 1);
    }
}
