use crate::executor::ExecutorHandle;
use crate::task::Task;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{RawWaker, RawWakerVTable, Waker};

/// Wakes a task to resume execution.
///
/// When a task is suspended on I/O or a deadline, its waker is the sole mechanism that
/// makes it runnable again: waking pushes the task back onto the scheduler's run queue.

/* --- 1. TASK WAKER (for spawned tasks) --- */

pub struct WakerData {
    task: Arc<Task>,
    handle: Arc<ExecutorHandle>,
}

pub fn task_waker(task: Arc<Task>, handle: Arc<ExecutorHandle>) -> Waker {
    let data = Box::new(WakerData { task, handle });
    let ptr = Box::into_raw(data) as *const ();
    unsafe { Waker::from_raw(RawWaker::new(ptr, &VTABLE)) }
}

unsafe fn clone(data: *const ()) -> RawWaker {
    // Cast the pointer back to a reference (do not take ownership!)
    let data = unsafe { &*(data as *const WakerData) };
    let cloned = Box::new(WakerData {
        task: data.task.clone(),
        handle: data.handle.clone(),
    });
    RawWaker::new(Box::into_raw(cloned) as *const (), &VTABLE)
}

unsafe fn wake(data: *const ()) {
    // Take ownership of the Box so it drops at the end of this function
    let data = unsafe { Box::from_raw(data as *mut WakerData) };
    data.handle.enqueue(data.task);
}

unsafe fn wake_by_ref(data: *const ()) {
    // Cast the pointer back to a reference (do not take ownership!)
    let data = unsafe { &*(data as *const WakerData) };
    data.handle.enqueue(data.task.clone());
}

unsafe fn drop_waker(data: *const ()) {
    // reclaim the Box and let it drop naturally
    let _ = unsafe { Box::from_raw(data as *mut WakerData) };
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_waker);

/* --- 2. ROOT WAKER (for the future driven by block_on) --- */

struct RootWakerData {
    woken: Arc<AtomicBool>,
    handle: Arc<ExecutorHandle>,
}

/// Creates the waker for the root future of `block_on`.
///
/// Waking sets the flag the scheduler loop checks before re-polling the root future,
/// then interrupts the event-poll in case the wake came from another thread while the
/// loop was blocked waiting for readiness.
pub fn root_waker(woken: Arc<AtomicBool>, handle: Arc<ExecutorHandle>) -> Waker {
    let data = Box::new(RootWakerData { woken, handle });
    let ptr = Box::into_raw(data) as *const ();
    unsafe { Waker::from_raw(RawWaker::new(ptr, &ROOT_VTABLE)) }
}

unsafe fn clone_root(ptr: *const ()) -> RawWaker {
    let data = unsafe { &*(ptr as *const RootWakerData) };
    let cloned = Box::new(RootWakerData {
        woken: data.woken.clone(),
        handle: data.handle.clone(),
    });
    RawWaker::new(Box::into_raw(cloned) as *const (), &ROOT_VTABLE)
}

unsafe fn wake_root(ptr: *const ()) {
    let data = unsafe { Box::from_raw(ptr as *mut RootWakerData) };
    data.woken.store(true, Ordering::Release);
    data.handle.interrupt();
}

unsafe fn wake_root_by_ref(ptr: *const ()) {
    let data = unsafe { &*(ptr as *const RootWakerData) };
    data.woken.store(true, Ordering::Release);
    data.handle.interrupt();
}

unsafe fn drop_root(ptr: *const ()) {
    let _ = unsafe { Box::from_raw(ptr as *mut RootWakerData) };
}

static ROOT_VTABLE: RawWakerVTable =
    RawWakerVTable::new(clone_root, wake_root, wake_root_by_ref, drop_root);
