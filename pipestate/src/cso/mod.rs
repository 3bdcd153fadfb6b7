//! Constant state objects.
//!
//! A constant state object (CSO) is created once from an API-level description of a group of
//! pipeline state. At creation it is encoded into the packet fragments the group contributes to
//! the batch, along with the few scalar fields other groups read at draw time. Binding one only
//! swaps a [`Handle`]; encoding a draw only copies, and sometimes [merges], the precomputed
//! words.
//!
//! CSOs live in per-kind [`SlotTable`]s owned by the context. Nothing counts references to them:
//! the caller must not delete a CSO that is bound or still used by a pending batch.
//!
//! [merges]: crate::packet::merge

use std::{cmp::Ordering, fmt, hash::Hash, marker::PhantomData, ops::Index};

pub mod blend;
pub mod depth_stencil;
pub mod rasterizer;
pub mod sampler;
pub mod stream_output;
pub mod vertex;

/// Refers to a CSO of type `T` in a [`SlotTable`].
///
/// A handle stays unique for the lifetime of its table: once the CSO is removed, the slot's
/// generation moves on and the handle no longer resolves.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[inline]
    const fn new(index: u32, generation: u32) -> Self {
        Handle {
            index,
            generation,
            marker: PhantomData,
        }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> PartialEq for Handle<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> PartialOrd for Handle<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

/// A generational arena of CSOs.
///
/// # Algorithm
///
/// Slots are kept in a vector that never shrinks. Vacant slots are linked into a free-list and
/// reused by later insertions. Each slot carries a generation that is bumped on every insertion
/// and removal, odd while the slot is occupied, so a handle only resolves while the generation it
/// captured is current.
///
/// # Efficiency
///
/// Insertion, lookup and removal are *O*(1).
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    free_list_head: Option<u32>,
    len: u32,
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

impl<T> Default for SlotTable<T> {
    #[inline]
    fn default() -> Self {
        SlotTable::new()
    }
}

impl<T> SlotTable<T> {
    #[inline]
    pub const fn new() -> Self {
        SlotTable {
            slots: Vec::new(),
            free_list_head: None,
            len: 0,
        }
    }

    /// Returns the number of CSOs in the table.
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.len += 1;

        if let Some(index) = self.free_list_head {
            let slot = &mut self.slots[index as usize];

            let (generation, next_free) = match *slot {
                Slot::Vacant {
                    generation,
                    next_free,
                } => (generation.wrapping_add(1), next_free),
                Slot::Occupied { .. } => unreachable!("occupied slot {index} in the free-list"),
            };

            self.free_list_head = next_free;
            *slot = Slot::Occupied { generation, value };

            Handle::new(index, generation)
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| capacity_overflow());
            self.slots.push(Slot::Occupied {
                generation: 1,
                value,
            });

            Handle::new(index, 1)
        }
    }

    /// Removes the CSO `handle` refers to, returning it, or `None` if the handle is stale.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        self.get(handle)?;

        let vacant = Slot::Vacant {
            generation: handle.generation.wrapping_add(1),
            next_free: self.free_list_head,
        };

        match std::mem::replace(&mut self.slots[handle.index as usize], vacant) {
            Slot::Occupied { value, .. } => {
                self.free_list_head = Some(handle.index);
                self.len -= 1;

                Some(value)
            }
            Slot::Vacant { .. } => unreachable!(),
        }
    }

    #[inline]
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    #[inline]
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Returns an iterator over the handles and CSOs in the table, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((Handle::new(index as u32, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }
}

impl<T: fmt::Debug> fmt::Debug for SlotTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<T> Index<Handle<T>> for SlotTable<T> {
    type Output = T;

    /// # Panics
    ///
    /// - Panics if `handle` is stale.
    #[inline]
    #[track_caller]
    fn index(&self, handle: Handle<T>) -> &Self::Output {
        self.get(handle).unwrap_or_else(|| stale_handle(handle))
    }
}

#[cold]
#[track_caller]
fn stale_handle<T>(handle: Handle<T>) -> ! {
    panic!(
        "stale CSO handle (index {}, generation {})",
        handle.index, handle.generation,
    );
}

#[cold]
fn capacity_overflow() -> ! {
    panic!("capacity overflow");
}

/// A comparison function, for depth, stencil, alpha and shadow tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    #[default]
    Always,
}

impl CompareFunc {
    /// Returns the hardware encoding, in which `Always` is 0.
    #[inline]
    pub const fn to_hw(self) -> u32 {
        match self {
            CompareFunc::Always => 0,
            CompareFunc::Never => 1,
            CompareFunc::Less => 2,
            CompareFunc::Equal => 3,
            CompareFunc::LessEqual => 4,
            CompareFunc::Greater => 5,
            CompareFunc::NotEqual => 6,
            CompareFunc::GreaterEqual => 7,
        }
    }
}
