//! Reader/writer lock exclusion and writer preference.

use std::sync::{Arc, Barrier, mpsc};
use std::time::{Duration, Instant};

use pthreadrt_core::PthreadError;
use pthreadrt_core::pthread::rwlock::RwlockContractState;
use pthreadrt_core::pthread::{self, ExitStatus, PthreadRwlock};
use pthreadrt_core::time::Timespec;

fn wait_until(label: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {label}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn writer_excludes_everyone() {
    let lock = Arc::new(PthreadRwlock::new(None).unwrap());
    lock.wrlock().unwrap();
    assert_eq!(lock.contract_state(), RwlockContractState::WriteLocked);

    let probes: Vec<_> = (0..3)
        .map(|_| {
            let l = Arc::clone(&lock);
            pthread::create(None, move || {
                let rd = l.try_rdlock() == Err(PthreadError::Busy);
                let wr = l.try_wrlock() == Err(PthreadError::Busy);
                usize::from(rd && wr)
            })
            .unwrap()
        })
        .collect();
    for p in &probes {
        assert_eq!(pthread::join(p), Ok(ExitStatus::Value(1)));
    }
    lock.unlock().unwrap();
    assert_eq!(lock.contract_state(), RwlockContractState::Unlocked);
}

#[test]
fn readers_hold_concurrently() {
    const READERS: usize = 3;
    let lock = Arc::new(PthreadRwlock::new(None).unwrap());
    let together = Arc::new(Barrier::new(READERS));
    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let l = Arc::clone(&lock);
            let together = Arc::clone(&together);
            pthread::create(None, move || {
                l.rdlock().unwrap();
                // Only passes if every reader holds the lock at once.
                together.wait();
                l.unlock().unwrap();
                0
            })
            .unwrap()
        })
        .collect();
    for r in &readers {
        assert_eq!(pthread::join(r), Ok(ExitStatus::Value(0)));
    }
    assert_eq!(lock.contract_state(), RwlockContractState::Unlocked);
}

#[test]
fn queued_writer_blocks_new_readers() {
    let lock = Arc::new(PthreadRwlock::new(None).unwrap());
    lock.rdlock().unwrap();

    let (got_tx, got_rx) = mpsc::channel();
    let l = Arc::clone(&lock);
    let writer = pthread::create(None, move || {
        l.wrlock().unwrap();
        got_tx.send(()).unwrap();
        l.unlock().unwrap();
        0
    })
    .unwrap();

    wait_until("writer queued", || lock.waiting() == 1);
    assert_eq!(lock.try_rdlock(), Err(PthreadError::Busy));
    let deadline = Timespec::after(Duration::from_millis(20));
    assert_eq!(lock.timed_rdlock(&deadline), Err(PthreadError::TimedOut));
    assert!(got_rx.try_recv().is_err());

    lock.unlock().unwrap();
    got_rx.recv().unwrap();
    assert_eq!(pthread::join(&writer), Ok(ExitStatus::Value(0)));
    assert_eq!(lock.try_rdlock(), Ok(()));
    lock.unlock().unwrap();
}

#[test]
fn writer_release_admits_all_queued_readers() {
    const READERS: usize = 3;
    let lock = Arc::new(PthreadRwlock::new(None).unwrap());
    lock.wrlock().unwrap();

    let together = Arc::new(Barrier::new(READERS));
    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let l = Arc::clone(&lock);
            let together = Arc::clone(&together);
            pthread::create(None, move || {
                l.rdlock().unwrap();
                together.wait();
                l.unlock().unwrap();
                0
            })
            .unwrap()
        })
        .collect();

    wait_until("readers queued", || lock.waiting() == READERS);
    lock.unlock().unwrap();
    for r in &readers {
        assert_eq!(pthread::join(r), Ok(ExitStatus::Value(0)));
    }
}

#[test]
fn timed_wrlock_gives_up_under_readers() {
    let lock = PthreadRwlock::new(None).unwrap();
    lock.rdlock().unwrap();
    lock.rdlock().unwrap();
    assert_eq!(lock.contract_state(), RwlockContractState::ReadLocked);

    let deadline = Timespec::after(Duration::from_millis(20));
    assert_eq!(lock.timed_wrlock(&deadline), Err(PthreadError::TimedOut));
    assert_eq!(lock.waiting(), 0);
    assert_eq!(
        lock.timed_rdlock(&Timespec::new(0, -5)),
        Err(PthreadError::Invalid)
    );

    lock.unlock().unwrap();
    lock.unlock().unwrap();
    assert_eq!(lock.unlock(), Err(PthreadError::Permission));
}

#[test]
fn destroy_and_reinit() {
    let lock = PthreadRwlock::new(None).unwrap();
    lock.rdlock().unwrap();
    assert_eq!(lock.destroy(), Err(PthreadError::Busy));
    lock.unlock().unwrap();
    lock.destroy().unwrap();
    assert_eq!(lock.contract_state(), RwlockContractState::Destroyed);
    assert_eq!(lock.rdlock(), Err(PthreadError::Invalid));
    lock.init(None).unwrap();
    lock.wrlock().unwrap();
    lock.unlock().unwrap();
}

static STATIC_RWLOCK: PthreadRwlock = PthreadRwlock::initializer();

#[test]
fn static_rwlock_builds_on_first_use() {
    assert_eq!(STATIC_RWLOCK.contract_state(), RwlockContractState::Unlocked);
    STATIC_RWLOCK.rdlock().unwrap();
    assert_eq!(STATIC_RWLOCK.contract_state(), RwlockContractState::ReadLocked);
    STATIC_RWLOCK.unlock().unwrap();
}
