use crate::object::{Holder, ObjectRef};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// A process's view of kernel objects: `u32` tokens naming [`ObjectRef`]s.
///
/// Each entry is one reference held by [`Holder::Token`] and one unit of the
/// object's token count.
#[derive(Debug)]
pub(crate) struct TokenTable {
    next: u32,
    entries: BTreeMap<u32, ObjectRef>,
}

impl TokenTable {
    pub(crate) const fn new() -> Self {
        Self {
            next: 1,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, object: &ObjectRef) -> u32 {
        let token = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        let entry = object.clone_as(Holder::Token(token));
        entry.header().add_token();
        self.entries.insert(token, entry);
        token
    }

    pub(crate) fn get(&self, token: u32, holder: Holder) -> Option<ObjectRef> {
        self.entries.get(&token).map(|o| o.clone_as(holder))
    }

    /// Detaches an entry; the caller drops it outside the table lock.
    pub(crate) fn remove(&mut self, token: u32) -> Option<ObjectRef> {
        let entry = self.entries.remove(&token)?;
        entry.header().remove_token();
        Some(entry)
    }

    pub(crate) fn drain(&mut self) -> Vec<ObjectRef> {
        let entries = core::mem::take(&mut self.entries);
        entries
            .into_values()
            .inspect(|e| e.header().remove_token())
            .collect()
    }

    pub(crate) fn objects(&self, holder: Holder) -> Vec<ObjectRef> {
        self.entries.values().map(|o| o.clone_as(holder)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
