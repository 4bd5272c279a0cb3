//! Protocol objects map
//!
//! The id namespace is split in two ranges: ids in `[1, 0xFEFFFFFF]` are minted by the client,
//! ids in `[0xFF000000, 0xFFFFFFFF]` are minted by the server. Each range has its own backing
//! store, indexed by the offset of the id from the start of its range.

use crate::protocol::Interface;

use std::cmp::Ordering;

/// First id of the client-created range
pub const CLIENT_ID_BASE: u32 = 1;

/// Last id of the client-created range
pub const CLIENT_ID_MAX: u32 = 0xFEFF_FFFF;

/// Limit separating server-created from client-created objects IDs in the namespace
pub const SERVER_ID_LIMIT: u32 = 0xFF00_0000;

/// The representation of a protocol object
#[derive(Debug, Clone)]
pub struct Object<Data> {
    /// Interface of this object
    pub interface: &'static Interface,
    /// Version of this object
    pub version: u32,
    /// Data associated to this object (its dispatching state client side)
    pub data: Data,
}

/// Error generated by invalid operations on the [`ObjectMap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The null id was used
    NullId,
    /// The id belongs to the server range, which the client cannot allocate or release
    ServerRange(u32),
    /// The id does not correspond to an allocated slot
    OutOfRange(u32),
    /// The slot of this id is already taken
    Occupied(u32),
    /// The id is already on the free list
    AlreadyFree(u32),
}

impl std::error::Error for MapError {}

impl std::fmt::Display for MapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::NullId => f.write_str("The null id does not designate any object."),
            Self::ServerRange(id) => write!(f, "Id {id} is in the server range."),
            Self::OutOfRange(id) => write!(f, "Id {id} was never allocated."),
            Self::Occupied(id) => write!(f, "Id {id} is already in use."),
            Self::AlreadyFree(id) => write!(f, "Id {id} is already free."),
        }
    }
}

#[derive(Debug, Clone)]
enum Slot<Data> {
    /// Unused, and on the free list for client slots
    Vacant,
    /// Allocated but not populated yet
    Reserved,
    Occupied(Object<Data>),
}

impl<Data> Slot<Data> {
    fn object(&self) -> Option<&Object<Data>> {
        match self {
            Self::Occupied(obj) => Some(obj),
            _ => None,
        }
    }
}

/// A holder for the object store of a connection
///
/// Keeps track of which object id is associated to which
/// interface object, and which is currently unused.
#[derive(Debug)]
pub struct ObjectMap<Data> {
    client_objects: Vec<Slot<Data>>,
    server_objects: Vec<Slot<Data>>,
    client_free: Vec<u32>,
}

impl<Data> Default for ObjectMap<Data> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Data> ObjectMap<Data> {
    /// Create a new empty object map
    pub fn new() -> Self {
        Self { client_objects: Vec::new(), server_objects: Vec::new(), client_free: Vec::new() }
    }

    /// Reserve a new id in the client range
    ///
    /// The most recently released id is reused first, otherwise the client store grows by one
    /// slot. The slot stays empty until [`insert_at()`](Self::insert_at) populates it.
    pub fn allocate(&mut self) -> u32 {
        if let Some(index) = self.client_free.pop() {
            self.client_objects[index as usize] = Slot::Reserved;
            index + CLIENT_ID_BASE
        } else {
            self.client_objects.push(Slot::Reserved);
            (self.client_objects.len() - 1) as u32 + CLIENT_ID_BASE
        }
    }

    /// Release an id of the client range, making it available for [`allocate()`](Self::allocate)
    ///
    /// Any object stored at this id is dropped. Releasing the null id, a server id or an id that
    /// is not currently allocated is an error and leaves the map untouched.
    pub fn deallocate(&mut self, id: u32) -> Result<Option<Object<Data>>, MapError> {
        let index = client_index(id)?;
        match self.client_objects.get_mut(index) {
            None => Err(MapError::OutOfRange(id)),
            Some(Slot::Vacant) => Err(MapError::AlreadyFree(id)),
            Some(slot) => {
                let previous = std::mem::replace(slot, Slot::Vacant);
                self.client_free.push(index as u32);
                Ok(match previous {
                    Slot::Occupied(obj) => Some(obj),
                    _ => None,
                })
            }
        }
    }

    /// Find an object in the store
    pub fn find(&self, id: u32) -> Option<&Object<Data>> {
        self.slot(id).and_then(Slot::object)
    }

    /// Check whether an id is reserved by [`allocate()`](Self::allocate) and not yet populated
    pub fn is_reserved(&self, id: u32) -> bool {
        matches!(self.slot(id), Some(Slot::Reserved))
    }

    /// Remove an object from the store
    ///
    /// Client ids are returned to the free list, server ids are simply cleared. Does nothing if
    /// the slot was not in use.
    pub fn remove(&mut self, id: u32) -> Option<Object<Data>> {
        if id >= SERVER_ID_LIMIT {
            let slot = self.server_objects.get_mut((id - SERVER_ID_LIMIT) as usize)?;
            match std::mem::replace(slot, Slot::Vacant) {
                Slot::Occupied(obj) => Some(obj),
                _ => None,
            }
        } else {
            self.deallocate(id).ok().flatten()
        }
    }

    /// Insert given object for given id
    ///
    /// Client ids must have been reserved with [`allocate()`](Self::allocate). Server ids must
    /// either be vacant or directly follow the last slot of the server store, which grows on
    /// demand; anything else is a protocol error of the server.
    pub fn insert_at(&mut self, id: u32, object: Object<Data>) -> Result<(), MapError> {
        if id == 0 {
            Err(MapError::NullId)
        } else if id >= SERVER_ID_LIMIT {
            let index = (id - SERVER_ID_LIMIT) as usize;
            match index.cmp(&self.server_objects.len()) {
                Ordering::Greater => Err(MapError::OutOfRange(id)),
                Ordering::Equal => {
                    self.server_objects.push(Slot::Occupied(object));
                    Ok(())
                }
                Ordering::Less => {
                    let slot = &mut self.server_objects[index];
                    if let Slot::Occupied(_) = slot {
                        return Err(MapError::Occupied(id));
                    }
                    *slot = Slot::Occupied(object);
                    Ok(())
                }
            }
        } else {
            let index = client_index(id)?;
            match self.client_objects.get_mut(index) {
                Some(slot @ Slot::Reserved) => {
                    *slot = Slot::Occupied(object);
                    Ok(())
                }
                Some(Slot::Occupied(_)) => Err(MapError::Occupied(id)),
                _ => Err(MapError::OutOfRange(id)),
            }
        }
    }

    /// Allocate a new id for an object in the client namespace and store it
    pub fn client_insert_new(&mut self, object: Object<Data>) -> u32 {
        let id = self.allocate();
        let index = (id - CLIENT_ID_BASE) as usize;
        self.client_objects[index] = Slot::Occupied(object);
        id
    }

    /// Mutably access an object of the map
    pub fn with<T, F: FnOnce(&mut Object<Data>) -> T>(&mut self, id: u32, f: F) -> Option<T> {
        let slot = if id == 0 {
            None
        } else if id >= SERVER_ID_LIMIT {
            self.server_objects.get_mut((id - SERVER_ID_LIMIT) as usize)
        } else {
            self.client_objects.get_mut((id - CLIENT_ID_BASE) as usize)
        };
        match slot {
            Some(Slot::Occupied(obj)) => Some(f(obj)),
            _ => None,
        }
    }

    /// Iterate over all the objects currently stored in the map
    pub fn all_objects(&self) -> impl Iterator<Item = (u32, &Object<Data>)> {
        let client_side_iter = self
            .client_objects
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.object().map(|obj| (idx as u32 + CLIENT_ID_BASE, obj)));

        let server_side_iter = self
            .server_objects
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.object().map(|obj| (idx as u32 + SERVER_ID_LIMIT, obj)));

        client_side_iter.chain(server_side_iter)
    }

    fn slot(&self, id: u32) -> Option<&Slot<Data>> {
        if id == 0 {
            None
        } else if id >= SERVER_ID_LIMIT {
            self.server_objects.get((id - SERVER_ID_LIMIT) as usize)
        } else {
            self.client_objects.get((id - CLIENT_ID_BASE) as usize)
        }
    }
}

// offset of a client id in the client store
fn client_index(id: u32) -> Result<usize, MapError> {
    match id {
        0 => Err(MapError::NullId),
        CLIENT_ID_BASE..=CLIENT_ID_MAX => Ok((id - CLIENT_ID_BASE) as usize),
        _ => Err(MapError::ServerRange(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ANONYMOUS_INTERFACE;

    fn obj(data: u32) -> Object<u32> {
        Object { interface: &ANONYMOUS_INTERFACE, version: 1, data }
    }

    #[test]
    fn allocate_in_client_range() {
        let mut map = ObjectMap::<u32>::new();
        for expected in 1..=10 {
            let id = map.allocate();
            assert_eq!(id, expected);
            assert!((CLIENT_ID_BASE..=CLIENT_ID_MAX).contains(&id));
            assert!(map.is_reserved(id));
            assert!(map.find(id).is_none());
        }
    }

    #[test]
    fn insert_and_find() {
        let mut map = ObjectMap::new();
        let id = map.allocate();
        map.insert_at(id, obj(7)).unwrap();
        assert_eq!(map.find(id).unwrap().data, 7);
        assert!(!map.is_reserved(id));
        assert_eq!(map.insert_at(id, obj(8)), Err(MapError::Occupied(id)));
        // not reserved
        assert_eq!(map.insert_at(id + 1, obj(8)), Err(MapError::OutOfRange(id + 1)));
        assert_eq!(map.insert_at(0, obj(8)), Err(MapError::NullId));
        assert_eq!(map.with(id, |o| { o.data += 1; o.data }), Some(8));
        assert_eq!(map.with(id + 5, |o| o.data), None);
    }

    #[test]
    fn free_list_is_lifo() {
        let mut map = ObjectMap::new();
        let a = map.client_insert_new(obj(1));
        let b = map.client_insert_new(obj(2));
        let c = map.client_insert_new(obj(3));
        assert_eq!((a, b, c), (1, 2, 3));

        assert_eq!(map.deallocate(a).unwrap().unwrap().data, 1);
        assert_eq!(map.deallocate(c).unwrap().unwrap().data, 3);
        assert!(map.find(a).is_none());

        // most recently released first
        assert_eq!(map.allocate(), c);
        assert_eq!(map.allocate(), a);
        assert_eq!(map.allocate(), 4);
        assert_eq!(map.find(b).unwrap().data, 2);
    }

    #[test]
    fn invalid_deallocations() {
        let mut map = ObjectMap::new();
        let id = map.client_insert_new(obj(1));
        assert!(matches!(map.deallocate(0), Err(MapError::NullId)));
        assert!(matches!(map.deallocate(SERVER_ID_LIMIT), Err(MapError::ServerRange(SERVER_ID_LIMIT))));
        assert!(matches!(map.deallocate(u32::MAX), Err(MapError::ServerRange(u32::MAX))));
        assert!(matches!(map.deallocate(id + 1), Err(MapError::OutOfRange(i)) if i == id + 1));
        assert!(map.deallocate(id).is_ok());
        // releasing twice would put the id twice on the free list
        assert!(matches!(map.deallocate(id), Err(MapError::AlreadyFree(i)) if i == id));
        assert_eq!(map.allocate(), id);
        assert_eq!(map.allocate(), id + 1);
    }

    #[test]
    fn server_range_grows_on_demand() {
        let mut map = ObjectMap::new();
        map.insert_at(SERVER_ID_LIMIT, obj(10)).unwrap();
        map.insert_at(SERVER_ID_LIMIT + 1, obj(11)).unwrap();
        // ids must be contiguous
        assert_eq!(
            map.insert_at(SERVER_ID_LIMIT + 5, obj(15)),
            Err(MapError::OutOfRange(SERVER_ID_LIMIT + 5))
        );
        assert_eq!(map.find(SERVER_ID_LIMIT + 1).unwrap().data, 11);

        // server ids never go through the client free list
        assert_eq!(map.remove(SERVER_ID_LIMIT).unwrap().data, 10);
        assert!(map.find(SERVER_ID_LIMIT).is_none());
        assert_eq!(map.allocate(), 1);
        map.insert_at(SERVER_ID_LIMIT, obj(12)).unwrap();
        assert_eq!(map.find(SERVER_ID_LIMIT).unwrap().data, 12);
    }

    #[test]
    fn iterate_objects() {
        let mut map = ObjectMap::new();
        map.client_insert_new(obj(1));
        let reserved = map.allocate();
        map.insert_at(SERVER_ID_LIMIT, obj(2)).unwrap();
        let ids: Vec<u32> = map.all_objects().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, SERVER_ID_LIMIT]);
        assert!(map.is_reserved(reserved));
    }
}
