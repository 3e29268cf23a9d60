//! Object ownership handles.
//!
//! An [`Item`] exclusively owns one registered object. It is move-only;
//! dropping it queues the object's release on the storage's channel, which
//! the storage drains on its next `alloc` / `commit`. An empty item owns
//! nothing and every storage call taking it is a no-op.

use flume::Sender;

/// Non-owning reference to an object slot. The generation tells a reused
/// slot apart from the object that held it before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemRef {
    pub slot: u32,
    pub generation: u32,
}

#[derive(Debug)]
pub struct Item {
    target: Option<ItemRef>,
    release: Option<Sender<ItemRef>>,
}

impl Item {
    /// Handle owning nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            target: None,
            release: None,
        }
    }

    pub(crate) fn new(target: ItemRef, release: Sender<ItemRef>) -> Self {
        Self {
            target: Some(target),
            release: Some(release),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.target.is_none()
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<ItemRef> {
        self.target
    }

    /// Disarms the handle and returns what it owned.
    pub(crate) fn take(&mut self) -> Option<ItemRef> {
        self.release = None;
        self.target.take()
    }
}

impl Default for Item {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for Item {
    fn drop(&mut self) {
        if let (Some(target), Some(release)) = (self.target.take(), self.release.take()) {
            // The storage may already be gone; nothing left to release then.
            let _ = release.send(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_sends_release_exactly_once() {
        let (tx, rx) = flume::unbounded();
        let r = ItemRef { slot: 3, generation: 9 };
        drop(Item::new(r, tx));
        assert_eq!(rx.try_recv().ok(), Some(r));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn taken_item_does_not_release_on_drop() {
        let (tx, rx) = flume::unbounded();
        let mut item = Item::new(ItemRef { slot: 0, generation: 0 }, tx);
        assert!(item.take().is_some());
        assert!(item.is_empty());
        drop(item);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_item_is_inert() {
        let item = Item::empty();
        assert!(item.is_empty());
        assert_eq!(item.id(), None);
    }
}
