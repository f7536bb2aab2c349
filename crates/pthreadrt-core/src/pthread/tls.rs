//! Thread-specific data keys.
//!
//! ## Design
//!
//! - **Key table**: a fixed array of `PTHREAD_KEYS_MAX` slots behind one
//!   lock. A slot tracks whether it is allocated, its optional destructor,
//!   and how many threads currently hold a non-zero value for it.
//! - **Per-thread values**: each TCB owns a `[usize; PTHREAD_KEYS_MAX]`
//!   array. Zero means "no value"; the runtime never dereferences values.
//! - **Teardown**: destructors run in passes, since a destructor may store
//!   a fresh value under another key, up to `PTHREAD_DESTRUCTOR_ITERATIONS`.
//!
//! Lock order: key table, then a TCB's `specific` lock.

use parking_lot::Mutex;

use crate::error::{PthreadError, PthreadResult};
use crate::pthread::tcb::{self, Tcb};

/// Number of keys a process can hold at once.
pub const PTHREAD_KEYS_MAX: usize = 48;

/// Passes over the key table on thread exit.
pub const PTHREAD_DESTRUCTOR_ITERATIONS: usize = 4;

/// Destructor invoked with a thread's non-zero value when it exits.
pub type KeyDestructor = fn(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PthreadKey(u32);

impl PthreadKey {
    /// Index into the key table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy)]
struct KeySlot {
    in_use: bool,
    /// Threads currently holding a non-zero value.
    refs: usize,
    destructor: Option<KeyDestructor>,
}

const EMPTY_SLOT: KeySlot = KeySlot {
    in_use: false,
    refs: 0,
    destructor: None,
};

static KEYS: Mutex<[KeySlot; PTHREAD_KEYS_MAX]> =
    parking_lot::const_mutex([EMPTY_SLOT; PTHREAD_KEYS_MAX]);

/// Allocates a key. `ResourceExhausted` once every slot is taken.
pub fn key_create(destructor: Option<KeyDestructor>) -> PthreadResult<PthreadKey> {
    let mut keys = KEYS.lock();
    let Some(index) = keys.iter().position(|slot| !slot.in_use) else {
        tracing::debug!(capacity = PTHREAD_KEYS_MAX, "key table full");
        return Err(PthreadError::ResourceExhausted);
    };
    keys[index] = KeySlot {
        in_use: true,
        refs: 0,
        destructor,
    };
    Ok(PthreadKey(index as u32))
}

/// Frees a key. Values threads still hold for it are dropped without
/// calling the destructor.
pub fn key_delete(key: PthreadKey) -> PthreadResult<()> {
    let mut keys = KEYS.lock();
    let slot = keys.get_mut(key.index()).ok_or(PthreadError::Invalid)?;
    if !slot.in_use {
        return Err(PthreadError::Invalid);
    }
    if slot.refs > 0 {
        for tcb in tcb::snapshot() {
            let mut specific = tcb.specific.lock();
            if specific.values[key.index()] != 0 {
                specific.values[key.index()] = 0;
                specific.live -= 1;
            }
        }
    }
    *slot = EMPTY_SLOT;
    Ok(())
}

/// Stores `value` for `key` on the calling thread. Zero clears it.
pub fn setspecific(key: PthreadKey, value: usize) -> PthreadResult<()> {
    let me = tcb::current();
    let mut keys = KEYS.lock();
    let slot = keys.get_mut(key.index()).ok_or(PthreadError::Invalid)?;
    if !slot.in_use {
        return Err(PthreadError::Invalid);
    }
    let mut specific = me.specific.lock();
    let old = std::mem::replace(&mut specific.values[key.index()], value);
    match (old != 0, value != 0) {
        (false, true) => {
            specific.live += 1;
            slot.refs += 1;
        }
        (true, false) => {
            specific.live -= 1;
            slot.refs = slot.refs.saturating_sub(1);
        }
        _ => {}
    }
    Ok(())
}

/// Value stored for `key` on the calling thread; zero when unset or the
/// key is not allocated.
#[must_use]
pub fn getspecific(key: PthreadKey) -> usize {
    if key.index() >= PTHREAD_KEYS_MAX {
        return 0;
    }
    tcb::current().specific.lock().values[key.index()]
}

/// Number of keys currently allocated.
#[must_use]
pub fn keys_in_use() -> usize {
    KEYS.lock().iter().filter(|slot| slot.in_use).count()
}

/// Runs destructors for every value `tcb` still holds, then clears what
/// is left after the last pass.
pub(crate) fn run_destructors(tcb: &Tcb) {
    for _pass in 0..PTHREAD_DESTRUCTOR_ITERATIONS {
        let mut calls: Vec<(KeyDestructor, usize)> = Vec::new();
        {
            let mut keys = KEYS.lock();
            let mut specific = tcb.specific.lock();
            if specific.live == 0 {
                return;
            }
            for (index, slot) in keys.iter_mut().enumerate() {
                let value = specific.values[index];
                if value == 0 {
                    continue;
                }
                specific.values[index] = 0;
                specific.live -= 1;
                slot.refs = slot.refs.saturating_sub(1);
                if let Some(destructor) = slot.destructor {
                    calls.push((destructor, value));
                }
            }
        }
        // Destructors may touch the key table themselves.
        for (destructor, value) in calls {
            destructor(value);
        }
    }

    let mut keys = KEYS.lock();
    let mut specific = tcb.specific.lock();
    if specific.live > 0 {
        tracing::debug!(
            thread = tcb.native_raw(),
            left = specific.live,
            "values remain after the last destructor pass"
        );
        for (index, slot) in keys.iter_mut().enumerate() {
            if specific.values[index] != 0 {
                specific.values[index] = 0;
                slot.refs = slot.refs.saturating_sub(1);
            }
        }
        specific.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear_tracks_refs() {
        let key = key_create(None).unwrap();
        std::thread::spawn(move || {
            assert_eq!(getspecific(key), 0);
            setspecific(key, 42).unwrap();
            assert_eq!(getspecific(key), 42);
            assert_eq!(KEYS.lock()[key.index()].refs, 1);
            setspecific(key, 7).unwrap();
            assert_eq!(KEYS.lock()[key.index()].refs, 1);
            setspecific(key, 0).unwrap();
            assert_eq!(KEYS.lock()[key.index()].refs, 0);
        })
        .join()
        .unwrap();
        key_delete(key).unwrap();
        assert_eq!(key_delete(key), Err(PthreadError::Invalid));
    }

    #[test]
    fn unallocated_key_is_rejected() {
        let bogus = PthreadKey(PTHREAD_KEYS_MAX as u32);
        assert_eq!(setspecific(bogus, 1), Err(PthreadError::Invalid));
        assert_eq!(getspecific(bogus), 0);
        assert_eq!(key_delete(bogus), Err(PthreadError::Invalid));
    }

    #[test]
    fn delete_clears_live_values_without_destructor() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn count(_: usize) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let key = key_create(Some(count)).unwrap();
        std::thread::spawn(move || {
            setspecific(key, 9).unwrap();
            key_delete(key).unwrap();
            assert_eq!(getspecific(key), 0);
            assert_eq!(tcb::current().specific.lock().live, 0);
        })
        .join()
        .unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn destructors_clear_values() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        fn record(value: usize) {
            SEEN.store(value, Ordering::SeqCst);
        }

        let key = key_create(Some(record)).unwrap();
        let tcb = Tcb::new();
        {
            let mut keys = KEYS.lock();
            keys[key.index()].refs += 1;
            let mut specific = tcb.specific.lock();
            specific.values[key.index()] = 31;
            specific.live = 1;
        }
        run_destructors(&tcb);
        assert_eq!(SEEN.load(Ordering::SeqCst), 31);
        assert_eq!(tcb.specific.lock().live, 0);
        assert_eq!(KEYS.lock()[key.index()].refs, 0);
        key_delete(key).unwrap();
    }
}
