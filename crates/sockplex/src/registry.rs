//! Connection registry
//!
//! Owns every live connection. Lookups go through a slot table indexed by
//! [`ConnId::index`]; dispatch order is a doubly-linked list threaded
//! through the same slots by index.
//!
//! Freed slots go to the back of a FIFO free list and fresh slots are used
//! first, so an index is reused as late as possible. Each reuse bumps the
//! slot generation, which makes older ids unresolvable.

use std::collections::VecDeque;

use sockplex_core::{ConnId, Error, Result};
use tracing::warn;

use crate::connection::Connection;

#[derive(Default)]
struct Slot {
    generation: u32,
    conn: Option<Box<Connection>>,
    linked: bool,
    prev: Option<u32>,
    next: Option<u32>,
}

pub struct Registry {
    slots: Vec<Slot>,
    free: VecDeque<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    count: usize,
    max: usize,
}

impl Registry {
    pub fn new(max: usize) -> Self {
        Registry {
            slots: Vec::new(),
            free: VecDeque::new(),
            head: None,
            tail: None,
            count: 0,
            max,
        }
    }

    /// Connections currently linked
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.max
    }

    /// Register `conn` and append it to the dispatch list.
    pub fn enqueue(&mut self, mut conn: Connection) -> Result<ConnId> {
        if conn.is_enqueued() {
            return Err(Error::DuplicateId(conn.id()));
        }
        if !conn.transport().is_valid() {
            return Err(Error::InvalidHandle);
        }
        let index = if self.slots.len() < self.max {
            self.slots.push(Slot::default());
            (self.slots.len() - 1) as u32
        } else {
            match self.free.pop_front() {
                Some(index) => index,
                None => return Err(Error::TableFull(self.max)),
            }
        };

        let slot = &mut self.slots[index as usize];
        if slot.linked || slot.conn.is_some() {
            warn!(index, "free list handed out an occupied slot");
            return Err(Error::DuplicateId(ConnId::new(index, slot.generation)));
        }
        slot.generation = slot.generation.wrapping_add(1);
        let id = ConnId::new(index, slot.generation);
        conn.set_id(id);
        slot.conn = Some(Box::new(conn));
        self.link_tail(index);
        self.count += 1;
        Ok(id)
    }

    /// Unregister `id`, handing the connection back. A connection checked
    /// out for a callback stays registered.
    pub(crate) fn dequeue(&mut self, id: ConnId) -> Option<Connection> {
        if !self.is_current(id) {
            warn!(conn = %id, "dequeue of a connection that is not enqueued");
            return None;
        }
        let index = id.index();
        let Some(mut conn) = self.slots[index as usize].conn.take() else {
            warn!(conn = %id, "dequeue of a checked out connection");
            return None;
        };
        self.unlink(index);
        self.count -= 1;
        self.free.push_back(index);
        conn.set_id(ConnId::NONE);
        Some(*conn)
    }

    /// True while `id` is registered, checked out or not.
    pub fn contains(&self, id: ConnId) -> bool {
        self.is_current(id)
    }

    pub fn find(&self, id: ConnId) -> Option<&Connection> {
        if !self.is_current(id) {
            return None;
        }
        self.slots[id.as_usize()].conn.as_deref()
    }

    pub fn find_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        if !self.is_current(id) {
            return None;
        }
        self.slots[id.as_usize()].conn.as_deref_mut()
    }

    /// Resolve a bare slot index to the connection occupying it now.
    pub fn find_index(&mut self, index: u32) -> Option<&mut Connection> {
        let slot = self.slots.get_mut(index as usize)?;
        if !slot.linked {
            return None;
        }
        slot.conn.as_deref_mut()
    }

    /// Schedule `id` for shutdown. False if it is not registered.
    pub fn shutdown(&mut self, id: ConnId) -> bool {
        match self.find_mut(id) {
            Some(conn) => {
                conn.shutdown();
                true
            }
            None => false,
        }
    }

    /// Ids in dispatch order, including connections checked out.
    pub fn ids(&self) -> Vec<ConnId> {
        let mut ids = Vec::with_capacity(self.count);
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let slot = &self.slots[index as usize];
            ids.push(ConnId::new(index, slot.generation));
            cursor = slot.next;
        }
        ids
    }

    /// Connections in dispatch order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            registry: self,
            cursor: self.head,
        }
    }

    pub fn foreach<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Connection),
    {
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let slot = &mut self.slots[index as usize];
            cursor = slot.next;
            if let Some(conn) = slot.conn.as_deref_mut() {
                f(conn);
            }
        }
    }

    pub fn foreach_listener<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Connection),
    {
        self.foreach(|conn| {
            if conn.is_listening() {
                f(conn)
            }
        });
    }

    /// Take a connection out of its slot while its callbacks run. The slot
    /// stays linked; `find` misses it until [`checkin`](Self::checkin).
    pub(crate) fn checkout(&mut self, id: ConnId) -> Option<Box<Connection>> {
        if !self.is_current(id) {
            return None;
        }
        self.slots[id.as_usize()].conn.take()
    }

    pub(crate) fn checkin(&mut self, conn: Box<Connection>) {
        let id = conn.id();
        match self.slots.get_mut(id.as_usize()) {
            Some(slot) if slot.linked && slot.generation == id.generation() && slot.conn.is_none() => {
                slot.conn = Some(conn);
            }
            _ => warn!(conn = %id, "checkin into a slot that does not expect it"),
        }
    }

    /// Walk the dispatch list and check it against the slot table.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = 0usize;
        let mut prev: Option<u32> = None;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let slot = self
                .slots
                .get(index as usize)
                .ok_or_else(|| format!("list points at missing slot {}", index))?;
            if !slot.linked {
                return Err(format!("slot {} in list but not marked linked", index));
            }
            if slot.conn.is_none() {
                return Err(format!("slot {} linked without a connection", index));
            }
            if slot.prev != prev {
                return Err(format!(
                    "slot {} prev is {:?}, expected {:?}",
                    index, slot.prev, prev
                ));
            }
            seen += 1;
            if seen > self.slots.len() {
                return Err("dispatch list has a cycle".to_string());
            }
            prev = Some(index);
            cursor = slot.next;
        }
        if self.tail != prev {
            return Err(format!("tail is {:?}, list ends at {:?}", self.tail, prev));
        }
        let linked = self.slots.iter().filter(|s| s.linked).count();
        if seen != linked || seen != self.count {
            return Err(format!(
                "list holds {}, table marks {} linked, count is {}",
                seen, linked, self.count
            ));
        }
        Ok(())
    }

    #[inline]
    fn is_current(&self, id: ConnId) -> bool {
        match self.slots.get(id.as_usize()) {
            Some(slot) => slot.linked && slot.generation == id.generation(),
            None => false,
        }
    }

    fn link_tail(&mut self, index: u32) {
        {
            let slot = &mut self.slots[index as usize];
            slot.linked = true;
            slot.prev = self.tail;
            slot.next = None;
        }
        match self.tail {
            Some(tail) => self.slots[tail as usize].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    fn unlink(&mut self, index: u32) {
        let (prev, next) = {
            let slot = &mut self.slots[index as usize];
            slot.linked = false;
            (slot.prev.take(), slot.next.take())
        };
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].prev = prev,
            None => self.tail = prev,
        }
    }
}

pub struct Iter<'a> {
    registry: &'a Registry,
    cursor: Option<u32>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Connection;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let index = self.cursor?;
            let slot = &self.registry.slots[index as usize];
            self.cursor = slot.next;
            if let Some(conn) = slot.conn.as_deref() {
                return Some(conn);
            }
        }
    }
}
