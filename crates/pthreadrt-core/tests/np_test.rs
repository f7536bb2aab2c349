//! Non-portable extensions: event flags, message pipes and sleeping.

use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use pthreadrt_core::np::{
    self, ClearMode, EventFlagAttr, MsgPipeAttr, MsgPipeWaitMode, PthreadEventFlag,
    PthreadMsgPipe, WaitMode,
};
use pthreadrt_core::pthread::{self, ExitStatus};
use pthreadrt_core::time::Timespec;
use pthreadrt_core::PthreadError;

fn wait_until(label: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {label}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn and_wait_needs_every_bit() {
    let flag = Arc::new(PthreadEventFlag::new(None, 0));
    let f = Arc::clone(&flag);
    let waiter = pthread::create(None, move || {
        f.wait(0b11, WaitMode::And, ClearMode::Pattern).unwrap() as usize
    })
    .unwrap();

    wait_until("waiter parked", || waiter.is_waiting());
    flag.set(0b01).unwrap();
    std::thread::sleep(Duration::from_millis(10));
    assert!(!waiter.is_terminated());
    flag.set(0b110).unwrap();

    assert_eq!(pthread::join(&waiter), Ok(ExitStatus::Value(0b111)));
    assert_eq!(flag.bits(), 0b100);
}

#[test]
fn or_wait_with_clear_all() {
    let flag = PthreadEventFlag::new(None, 0b1000);
    assert_eq!(flag.wait(0b1010, WaitMode::Or, ClearMode::All), Ok(0b1000));
    assert_eq!(flag.bits(), 0);
    flag.set(0b1).unwrap();
    flag.clear(0b1).unwrap();
    assert_eq!(flag.bits(), 0);
}

#[test]
fn timed_wait_expires() {
    let flag = PthreadEventFlag::new(None, 0);
    let deadline = Timespec::after(Duration::from_millis(20));
    assert_eq!(
        flag.timed_wait(1, WaitMode::Or, ClearMode::Keep, &deadline),
        Err(PthreadError::TimedOut)
    );
    assert_eq!(
        flag.wait(0, WaitMode::Or, ClearMode::Keep),
        Err(PthreadError::Invalid)
    );
}

#[test]
fn second_waiter_refused_unless_allowed() {
    let flag = Arc::new(PthreadEventFlag::new(None, 0));
    let f = Arc::clone(&flag);
    let first = pthread::create(None, move || {
        f.wait(1, WaitMode::Or, ClearMode::Keep).unwrap() as usize
    })
    .unwrap();
    wait_until("first waiter", || first.is_waiting());
    // Give it time to register with the flag itself.
    std::thread::sleep(Duration::from_millis(20));
    let deadline = Timespec::after(Duration::from_millis(50));
    assert_eq!(
        flag.timed_wait(2, WaitMode::Or, ClearMode::Keep, &deadline),
        Err(PthreadError::Busy)
    );
    flag.set(1).unwrap();
    assert_eq!(pthread::join(&first), Ok(ExitStatus::Value(1)));

    let mut attr = EventFlagAttr::new();
    attr.set_multiple_waiters(true);
    let shared = Arc::new(PthreadEventFlag::new(Some(&attr), 0));
    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let f = Arc::clone(&shared);
            pthread::create(None, move || {
                f.wait(4, WaitMode::Or, ClearMode::Keep).unwrap() as usize
            })
            .unwrap()
        })
        .collect();
    wait_until("both waiting", || waiters.iter().all(pthread::Pthread::is_waiting));
    shared.set(4).unwrap();
    for w in &waiters {
        assert_eq!(pthread::join(w), Ok(ExitStatus::Value(4)));
    }
}

#[test]
fn cancel_reaches_flag_waiter() {
    let flag = Arc::new(PthreadEventFlag::new(None, 0));
    let f = Arc::clone(&flag);
    let waiter = pthread::create(None, move || {
        let _ = f.wait(1, WaitMode::Or, ClearMode::Keep);
        1
    })
    .unwrap();
    wait_until("waiter parked", || waiter.is_waiting());
    pthread::cancel(&waiter).unwrap();
    assert_eq!(pthread::join(&waiter), Ok(ExitStatus::Canceled));
    assert_eq!(flag.bits(), 0);
}

#[test]
fn destroy_wakes_waiter_with_invalid() {
    let flag = Arc::new(PthreadEventFlag::new(None, 0));
    let (tx, rx) = mpsc::channel();
    let f = Arc::clone(&flag);
    let waiter = pthread::create(None, move || {
        tx.send(f.wait(1, WaitMode::Or, ClearMode::Keep)).unwrap();
        0
    })
    .unwrap();
    wait_until("waiter parked", || waiter.is_waiting());
    flag.destroy().unwrap();
    assert_eq!(rx.recv(), Ok(Err(PthreadError::Invalid)));
    pthread::join(&waiter).unwrap();
}

#[test]
fn message_pipes_are_unsupported() {
    assert_eq!(MsgPipeAttr::new().map(drop), Err(PthreadError::NotSupported));
    assert_eq!(
        PthreadMsgPipe::new(None).map(drop),
        Err(PthreadError::NotSupported)
    );
    assert_eq!(MsgPipeWaitMode::from_raw(MsgPipeWaitMode::RAW_FULL), Ok(MsgPipeWaitMode::Full));
}

#[test]
fn sleep_until_deadline() {
    let start = Instant::now();
    let deadline = Timespec::after(Duration::from_millis(15));
    assert!(deadline > np::getsystemtime_np());
    np::delay_until_np(&deadline).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(10));
    assert_eq!(np::num_processors_np(), 1);
}
