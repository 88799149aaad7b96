//! Test doubles shared by the unit tests

use parking_lot::Mutex;
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

use crate::bridge::{AnalysisEvent, AnalysisPayload, EventSink, SinkError};

/// Sink that keeps every event it receives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AnalysisPayload>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<AnalysisPayload> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &AnalysisEvent<'_>) -> Result<(), SinkError> {
        self.events.lock().push(event.to_payload());
        Ok(())
    }
}

thread_local! {
    static COUNTING: Cell<bool> = const { Cell::new(false) };
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

/// System allocator that counts allocations on threads inside
/// [`count_allocations`]
struct CountingAllocator;

fn record_allocation() {
    let _ = COUNTING.try_with(|counting| {
        if counting.get() {
            let _ = ALLOCATIONS.try_with(|n| n.set(n.get() + 1));
        }
    });
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        record_allocation();
        System.alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        record_allocation();
        System.alloc_zeroed(layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        record_allocation();
        System.realloc(ptr, layout, new_size)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

/// Run `f` and return its result with the number of heap allocations it made
/// on the calling thread
pub fn count_allocations<R>(f: impl FnOnce() -> R) -> (R, usize) {
    ALLOCATIONS.with(|n| n.set(0));
    COUNTING.with(|counting| counting.set(true));
    let result = f();
    COUNTING.with(|counting| counting.set(false));
    (result, ALLOCATIONS.with(|n| n.get()))
}
