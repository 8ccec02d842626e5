//! Request records and the arena that owns them.
//!
//! Every live compile request is a [`Descriptor`] stored in a
//! [`DescriptorPool`] slot and addressed by a generation-checked
//! [`Handle`]. Queues and workers only ever hold handles. All fields are
//! mutated under the scheduler monitor; the per-descriptor
//! [`Rendezvous`] is the only part touched without it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tiercomp_core::{
    CompileMode, CompileResult, EntryPoint, ErrorCode, OptimizationPlan, Priority, RequestKind,
    UnitRef, UnitShape,
};

/// Stable reference to a pool slot. A handle outlives its descriptor
/// harmlessly: once the slot is reused the generation no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// Where a descriptor currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    MainQueue,
    LowPriority,
    /// Being serviced by the worker with this id.
    InFlight(usize),
    /// Finished; kept alive only for synchronous waiters.
    Retired,
}

/// Blocking handshake between a synchronous submitter and the worker
/// that finishes its request.
#[derive(Debug, Default)]
pub struct Rendezvous {
    result: Mutex<Option<CompileResult>>,
    cv: Condvar,
    notifications: AtomicU32,
}

impl Rendezvous {
    /// Store the final result and wake every waiter.
    pub fn publish(&self, result: CompileResult) {
        let mut slot = self.result.lock();
        *slot = Some(result);
        self.notifications.fetch_add(1, Ordering::Relaxed);
        self.cv.notify_all();
    }

    /// Block until a result has been published.
    pub fn wait(&self) -> CompileResult {
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.cv.wait(&mut slot);
        }
    }

    pub fn is_published(&self) -> bool {
        self.result.lock().is_some()
    }

    /// Number of times `publish` ran.
    pub fn notifications(&self) -> u32 {
        self.notifications.load(Ordering::Relaxed)
    }
}

/// One compile request and its scheduling state.
#[derive(Debug)]
pub struct Descriptor {
    pub unit: UnitRef,
    pub kind: RequestKind,
    pub source_pc: Option<EntryPoint>,
    pub priority: Priority,
    pub mode: CompileMode,
    pub plan: OptimizationPlan,
    pub shape: UnitShape,
    pub weight: u8,
    pub artifact_eligible: bool,
    pub attempts_left: u32,
    pub error_code: ErrorCode,
    /// Set when the last attempt failed and the request went back to the queue.
    pub retry_requested: bool,
    pub unloaded: bool,
    /// Low-priority follow-up produced by the scheduler itself.
    pub upgrade: bool,
    pub location: Location,
    pub waiters: u32,
    pub rendezvous: Arc<Rendezvous>,
    pub submitted_at: Instant,
}

impl Descriptor {
    pub fn is_first_time(&self) -> bool {
        self.source_pc.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.location == Location::Retired
    }

    /// Still competing for a worker or running on one.
    pub fn is_live(&self) -> bool {
        !self.is_finished() && !self.unloaded
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("descriptor pool exhausted (capacity {capacity})")]
    Exhausted { capacity: usize },

    #[error("stale descriptor handle {0:?}")]
    Stale(Handle),

    #[error("descriptor still has {waiters} waiter(s)")]
    HasWaiters { waiters: u32 },
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Descriptor>,
}

/// Arena of descriptor slots with a free list.
#[derive(Debug)]
pub struct DescriptorPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    capacity: usize,
}

impl DescriptorPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn alloc(&mut self, descriptor: Descriptor) -> Result<Handle, PoolError> {
        if self.live >= self.capacity {
            return Err(PoolError::Exhausted {
                capacity: self.capacity,
            });
        }
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(descriptor);
        self.live += 1;
        Ok(Handle {
            index,
            generation: slot.generation,
        })
    }

    pub fn get(&self, handle: Handle) -> Option<&Descriptor> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Descriptor> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Return a descriptor's slot to the free list.
    ///
    /// Refuses while a synchronous submitter still waits on it.
    pub fn release(&mut self, handle: Handle) -> Result<Descriptor, PoolError> {
        let slot = self
            .slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(PoolError::Stale(handle))?;
        let waiters = slot.entry.as_ref().map_or(0, |d| d.waiters);
        if waiters > 0 {
            return Err(PoolError::HasWaiters { waiters });
        }
        let descriptor = slot.entry.take().ok_or(PoolError::Stale(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Ok(descriptor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &Descriptor)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.entry.as_ref().map(|d| {
                (
                    Handle {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    d,
                )
            })
        })
    }
}

#[cfg(test)]
pub(crate) fn test_descriptor(unit: UnitRef, priority: Priority, weight: u8) -> Descriptor {
    use tiercomp_core::OptLevel;
    Descriptor {
        unit,
        kind: RequestKind::Ordinary,
        source_pc: None,
        priority,
        mode: if priority.is_sync() {
            CompileMode::Sync
        } else {
            CompileMode::Async
        },
        plan: OptimizationPlan::new(OptLevel::Warm),
        shape: UnitShape::default(),
        weight,
        artifact_eligible: false,
        attempts_left: 3,
        error_code: ErrorCode::InProgress,
        retry_requested: false,
        unloaded: false,
        upgrade: false,
        location: Location::MainQueue,
        waiters: 0,
        rendezvous: Arc::new(Rendezvous::default()),
        submitted_at: Instant::now(),
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn desc(method: u64) -> Descriptor {
        test_descriptor(UnitRef::new(method, 1), Priority::NormalAsync, 6)
    }

    #[test]
    fn alloc_respects_capacity() {
        let mut pool = DescriptorPool::new(2);
        pool.alloc(desc(1)).unwrap();
        pool.alloc(desc(2)).unwrap();
        assert_eq!(
            pool.alloc(desc(3)).unwrap_err(),
            PoolError::Exhausted { capacity: 2 }
        );
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn stale_handle_after_reuse() {
        let mut pool = DescriptorPool::new(4);
        let first = pool.alloc(desc(1)).unwrap();
        pool.release(first).unwrap();
        let second = pool.alloc(desc(2)).unwrap();
        assert_eq!(first.index(), second.index());
        assert!(pool.get(first).is_none());
        assert_eq!(pool.get(second).map(|d| d.unit.method.0), Some(2));
        assert_eq!(pool.release(first).unwrap_err(), PoolError::Stale(first));
    }

    #[test]
    fn release_refused_while_waiting() {
        let mut pool = DescriptorPool::new(4);
        let h = pool.alloc(desc(1)).unwrap();
        pool.get_mut(h).unwrap().waiters = 1;
        assert_eq!(
            pool.release(h).unwrap_err(),
            PoolError::HasWaiters { waiters: 1 }
        );
        pool.get_mut(h).unwrap().waiters = 0;
        assert!(pool.release(h).is_ok());
        assert!(pool.is_empty());
    }

    #[test]
    fn rendezvous_wakes_waiter() {
        let rv = Arc::new(Rendezvous::default());
        let waiter = {
            let rv = Arc::clone(&rv);
            thread::spawn(move || rv.wait())
        };
        thread::sleep(Duration::from_millis(10));
        rv.publish(CompileResult::failed(ErrorCode::NotNeeded));
        let result = waiter.join().unwrap();
        assert_eq!(result.code, ErrorCode::NotNeeded);
        assert_eq!(rv.notifications(), 1);
    }

    #[test]
    fn rendezvous_published_before_wait() {
        let rv = Rendezvous::default();
        rv.publish(CompileResult::failed(ErrorCode::Suspended));
        assert!(rv.is_published());
        assert_eq!(rv.wait().code, ErrorCode::Suspended);
    }
}
