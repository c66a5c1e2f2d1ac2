use heapless::Vec;
use serde::{Deserialize, Serialize};

use super::{Error, Protocol, Result, SocketEntry};

/// A handle, identifying a socket in a set.
///
/// The handle value doubles as the module-side connect id, so it is valid
/// for the lifetime of the slot and must not be reused until `close`
/// returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handle(pub u8);

/// A fixed-capacity set of sockets.
pub struct Set<C, const N: usize, const L: usize> {
    sockets: Vec<Option<SocketEntry<C, L>>, N>,
}

impl<C, const N: usize, const L: usize> Default for Set<C, N, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, const N: usize, const L: usize> Set<C, N, L> {
    /// Create an empty socket set.
    pub fn new() -> Self {
        let mut sockets = Vec::new();
        while sockets.len() < N {
            sockets.push(None).ok();
        }
        Set { sockets }
    }

    /// Get the maximum number of sockets the set can hold.
    pub fn capacity(&self) -> usize {
        N
    }

    /// Get the current number of occupied slots.
    pub fn len(&self) -> usize {
        self.sockets.iter().filter(|a| a.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupy the first free slot and return its handle.
    pub fn add(&mut self, protocol: Protocol) -> Result<Handle> {
        for (index, slot) in self.sockets.iter_mut().enumerate() {
            if slot.is_none() {
                let handle = Handle(index as u8);
                *slot = Some(SocketEntry::new(handle, protocol));
                return Ok(handle);
            }
        }
        Err(Error::SocketSetFull)
    }

    /// Get a socket from the set by its handle, as mutable.
    pub(crate) fn get(&mut self, handle: Handle) -> Result<&mut SocketEntry<C, L>> {
        self.sockets
            .get_mut(handle.0 as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(Error::InvalidSocket)
    }

    /// Remove a socket from the set, returning it by value.
    pub(crate) fn remove(&mut self, handle: Handle) -> Result<SocketEntry<C, L>> {
        self.sockets
            .get_mut(handle.0 as usize)
            .and_then(|slot| slot.take())
            .ok_or(Error::InvalidSocket)
    }

    /// Iterate every occupied slot, as mutable.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut SocketEntry<C, L>> {
        self.sockets.iter_mut().filter_map(|slot| slot.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestSet = Set<fn(Handle, crate::socket::SocketEvent), 2, 64>;

    #[test]
    fn add_until_full_then_reuse_freed_slot() {
        let mut set: TestSet = Set::new();
        let a = set.add(Protocol::Udp).unwrap();
        let b = set.add(Protocol::Udp).unwrap();
        assert_eq!((a, b), (Handle(0), Handle(1)));
        assert_eq!(set.add(Protocol::Udp), Err(Error::SocketSetFull));

        set.remove(a).unwrap();
        assert_eq!(set.add(Protocol::Tcp).unwrap(), Handle(0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn get_after_remove_is_invalid() {
        let mut set: TestSet = Set::new();
        let a = set.add(Protocol::Tcp).unwrap();
        set.remove(a).unwrap();
        assert!(matches!(set.get(a), Err(Error::InvalidSocket)));
        assert!(matches!(set.remove(a), Err(Error::InvalidSocket)));
    }
}
