//! Thread lifecycle, cleanup handlers and cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use pthreadrt_core::pthread::{
    self, CancelState, CancelType, DetachState, ExitStatus, ThreadAttr, ThreadStorage,
};
use pthreadrt_core::{PthreadError, np};
use pthreadrt_kernel::{self as kernel, ThreadUid};

fn wait_until(label: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {label}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Spawns a thread that parks until the returned sender fires.
fn spawn_parked(attr: Option<&ThreadAttr>) -> (pthread::Pthread, mpsc::Sender<()>) {
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let t = pthread::create(attr, move || {
        go_rx.recv().unwrap();
        0
    })
    .unwrap();
    (t, go_tx)
}

#[test]
fn join_returns_start_routine_value() {
    let t = pthread::create(None, || 42).unwrap();
    assert_eq!(pthread::join(&t), Ok(ExitStatus::Value(42)));
    assert!(t.is_terminated());
    assert_eq!(pthread::join(&t), Err(PthreadError::NoSuchThread));
}

fn descend(depth: usize) -> usize {
    if depth == 0 {
        pthread::exit(7);
    }
    descend(depth - 1) + 1
}

#[test]
fn exit_from_nested_call_runs_cleanup_in_reverse() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let o = Arc::clone(&order);
    let t = pthread::create(None, move || {
        for tag in 1..=3 {
            let o = Arc::clone(&o);
            pthread::cleanup_push(move || o.lock().unwrap().push(tag));
        }
        descend(5)
    })
    .unwrap();
    assert_eq!(pthread::join(&t), Ok(ExitStatus::Value(7)));
    assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
}

#[test]
fn exit_on_adopted_thread_cleans_up_then_panics() {
    static CLEANED: AtomicBool = AtomicBool::new(false);
    let outcome = std::thread::spawn(|| -> usize {
        pthread::cleanup_push(|| CLEANED.store(true, Ordering::Release));
        pthread::exit(3)
    })
    .join();
    let payload = outcome.unwrap_err();
    let message = payload.downcast_ref::<String>().unwrap();
    assert!(message.contains("without a start routine"), "{message}");
    assert!(CLEANED.load(Ordering::Acquire));
}

#[test]
fn cleanup_pop_runs_only_when_asked() {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let t = pthread::create(None, move || {
        let first = Arc::clone(&h);
        pthread::cleanup_push(move || {
            first.fetch_add(1, Ordering::Relaxed);
        });
        let second = Arc::clone(&h);
        pthread::cleanup_push(move || {
            second.fetch_add(10, Ordering::Relaxed);
        });
        assert!(pthread::cleanup_pop(false));
        assert!(pthread::cleanup_pop(true));
        usize::from(pthread::cleanup_pop(true))
    })
    .unwrap();
    assert_eq!(pthread::join(&t), Ok(ExitStatus::Value(0)));
    assert_eq!(hits.load(Ordering::Relaxed), 1);
}

#[test]
fn detached_threads_cannot_be_joined() {
    let (t, go) = spawn_parked(None);
    pthread::detach(&t).unwrap();
    assert_eq!(pthread::detach(&t), Err(PthreadError::Invalid));
    assert_eq!(pthread::join(&t), Err(PthreadError::Invalid));
    go.send(()).unwrap();

    let mut attr = ThreadAttr::new();
    attr.set_detach_state(DetachState::Detached);
    let (d, go) = spawn_parked(Some(&attr));
    assert_eq!(pthread::join(&d), Err(PthreadError::Invalid));
    go.send(()).unwrap();
    wait_until("detached thread ends", || d.is_terminated());
}

#[test]
fn joining_self_is_a_deadlock() {
    assert_eq!(
        pthread::join(&pthread::self_thread()),
        Err(PthreadError::Deadlock)
    );
    let t = pthread::create(None, || {
        usize::from(pthread::join(&pthread::self_thread()) == Err(PthreadError::Deadlock))
    })
    .unwrap();
    assert_eq!(pthread::join(&t), Ok(ExitStatus::Value(1)));
}

#[test]
fn self_handle_matches_creator_handle() {
    let (tx, rx) = mpsc::channel();
    let t = pthread::create(None, move || {
        tx.send(pthread::self_thread()).unwrap();
        0
    })
    .unwrap();
    let seen = rx.recv().unwrap();
    assert!(pthread::equal(&t, &seen));
    assert!(!pthread::equal(&t, &pthread::self_thread()));
    pthread::join(&t).unwrap();
}

#[test]
fn panicking_start_routine_is_reported() {
    let t = pthread::create(None, || panic!("boom")).unwrap();
    assert_eq!(pthread::join(&t), Ok(ExitStatus::Panicked));
}

#[test]
fn deferred_cancel_lands_at_testcancel() {
    let stop = Arc::new(AtomicBool::new(false));
    let s = Arc::clone(&stop);
    let spinner = pthread::create(None, move || {
        while !s.load(Ordering::Relaxed) {
            pthread::testcancel();
            pthread::sched_yield();
        }
        0
    })
    .unwrap();
    pthread::cancel(&spinner).unwrap();
    assert_eq!(pthread::join(&spinner), Ok(ExitStatus::Canceled));
    stop.store(true, Ordering::Relaxed);
}

#[test]
fn cancel_interrupts_sleep() {
    let sleeper = pthread::create(None, || {
        let _ = np::sleep_np(30_000_000);
        0
    })
    .unwrap();
    wait_until("sleeper waiting", || sleeper.is_waiting());
    let start = Instant::now();
    pthread::cancel(&sleeper).unwrap();
    assert_eq!(pthread::join(&sleeper), Ok(ExitStatus::Canceled));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn disabled_cancel_stays_pending_until_enabled() {
    let survived = Arc::new(AtomicBool::new(false));
    let (ready_tx, ready_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let s = Arc::clone(&survived);
    let t = pthread::create(None, move || {
        let old = pthread::setcancelstate(CancelState::Disable).unwrap();
        assert_eq!(old, CancelState::Enable);
        ready_tx.send(()).unwrap();
        go_rx.recv().unwrap();
        pthread::testcancel();
        np::sleep_np(1_000).unwrap();
        s.store(true, Ordering::Release);
        pthread::setcancelstate(CancelState::Enable).unwrap();
        pthread::testcancel();
        0
    })
    .unwrap();

    ready_rx.recv().unwrap();
    pthread::cancel(&t).unwrap();
    go_tx.send(()).unwrap();
    assert_eq!(pthread::join(&t), Ok(ExitStatus::Canceled));
    assert!(survived.load(Ordering::Acquire));
}

#[test]
fn async_self_cancel_acts_immediately() {
    let reached = Arc::new(AtomicBool::new(false));
    let r = Arc::clone(&reached);
    let t = pthread::create(None, move || {
        assert_eq!(
            pthread::setcanceltype(CancelType::Asynchronous),
            Ok(CancelType::Deferred)
        );
        let _ = pthread::cancel(&pthread::self_thread());
        r.store(true, Ordering::Release);
        0
    })
    .unwrap();
    assert_eq!(pthread::join(&t), Ok(ExitStatus::Canceled));
    assert!(!reached.load(Ordering::Acquire));
}

#[test]
fn cancel_of_blocked_joiner_leaves_target_joinable() {
    let (target, go) = spawn_parked(None);
    let watched = target.clone();
    let joiner = pthread::create(None, move || {
        let _ = pthread::join(&watched);
        1
    })
    .unwrap();
    wait_until("joiner waiting", || joiner.is_waiting());
    pthread::cancel(&joiner).unwrap();
    assert_eq!(pthread::join(&joiner), Ok(ExitStatus::Canceled));

    go.send(()).unwrap();
    assert_eq!(pthread::join(&target), Ok(ExitStatus::Value(0)));
}

#[test]
fn names_reach_the_kernel() {
    let mut attr = ThreadAttr::new();
    attr.set_name("worker-a");
    let (t, go) = spawn_parked(Some(&attr));
    let uid = pthread::getthreadid_np(&t).unwrap();
    assert_eq!(t.name(), "worker-a");
    assert_eq!(kernel::thread::name(uid).as_deref(), Ok("worker-a"));
    go.send(()).unwrap();
    pthread::join(&t).unwrap();
    assert_eq!(
        pthread::getthreadid_np(&t),
        Err(PthreadError::NoSuchThread)
    );
}

#[test]
fn schedprio_changes_kernel_priority() {
    let (t, go) = spawn_parked(None);
    pthread::setschedprio(&t, 30).unwrap();
    assert_eq!(pthread::getschedparam(&t), Ok(30));
    let uid = pthread::getthreadid_np(&t).unwrap();
    assert_eq!(kernel::thread::priority(uid), Ok(30));
    assert_eq!(pthread::setschedprio(&t, 200), Err(PthreadError::Invalid));
    go.send(()).unwrap();
    pthread::join(&t).unwrap();
}

#[test]
fn attr_setters_validate() {
    let mut attr = ThreadAttr::new();
    assert_eq!(
        attr.set_stack_size(pthreadrt_core::pthread::thread::PTHREAD_STACK_MIN - 1),
        Err(PthreadError::Invalid)
    );
    assert_eq!(attr.set_priority(200), Err(PthreadError::Invalid));
    let long = "x".repeat(64);
    attr.set_name(&long);
    assert_eq!(
        attr.name().len(),
        pthreadrt_core::pthread::thread::THREAD_NAME_MAX
    );
}

#[test]
fn storage_serves_one_thread_at_a_time() {
    let storage = ThreadStorage::new();
    let mut attr = ThreadAttr::new();
    attr.set_storage(Some(storage.clone()));

    let (first, go) = spawn_parked(Some(&attr));
    assert!(storage.in_use());
    assert_eq!(
        pthread::create(Some(&attr), || 0).map(|_| ()),
        Err(PthreadError::Busy)
    );
    go.send(()).unwrap();
    pthread::join(&first).unwrap();
    assert!(!storage.in_use());

    let second = pthread::create(Some(&attr), || 5).unwrap();
    assert_eq!(pthread::join(&second), Ok(ExitStatus::Value(5)));
}

static ADDED: Mutex<Vec<ThreadUid>> = Mutex::new(Vec::new());
static DELETED: Mutex<Vec<ThreadUid>> = Mutex::new(Vec::new());

fn record_added(uid: ThreadUid) {
    ADDED.lock().unwrap().push(uid);
}

fn record_deleted(uid: ThreadUid) {
    DELETED.lock().unwrap().push(uid);
}

#[test]
fn hooks_see_thread_start_and_end() {
    let prev_add = pthreadrt_core::set_add_thread_callback(Some(record_added));
    let prev_del = pthreadrt_core::set_delete_thread_callback(Some(record_deleted));

    let (tx, rx) = mpsc::channel();
    let t = pthread::create(None, move || {
        tx.send(kernel::thread::current_uid()).unwrap();
        0
    })
    .unwrap();
    let uid = rx.recv().unwrap();
    pthread::join(&t).unwrap();

    pthreadrt_core::set_add_thread_callback(prev_add);
    pthreadrt_core::set_delete_thread_callback(prev_del);
    assert!(ADDED.lock().unwrap().contains(&uid));
    assert!(DELETED.lock().unwrap().contains(&uid));
}
