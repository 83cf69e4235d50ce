//! Deferred deallocation for shared sample content
//!
//! Sample content referenced by several events is wrapped in
//! `basedrop::Shared<AudioBuffer>`. Dropping the last reference on the
//! render thread only enqueues the pointer; the memory is released by a
//! background collector thread ("cadence-gc") that polls periodically.
//!
//! ```ignore
//! use basedrop::Shared;
//! use cadence_core::gc::gc_handle;
//!
//! let content = Shared::new(&gc_handle(), AudioBuffer::new(2, 44100));
//! let again = content.clone();
//! drop(content);
//! drop(again); // queued for the collector, not freed here
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Collection interval of the background thread
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name("cadence-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, it has to live on this thread
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }
            log::info!("Sample GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        });

    match spawned.map_err(|e| e.to_string()).and_then(|_| rx.recv().map_err(|e| e.to_string())) {
        Ok(handle) => handle,
        Err(e) => {
            // Without a collector thread shared content is simply never
            // reclaimed, which leaks but keeps the render path safe
            log::error!("Failed to start sample GC thread: {}", e);
            let collector = Box::leak(Box::new(Collector::new()));
            collector.handle()
        }
    }
}

/// Handle for creating `Shared<T>` allocations
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Shared;

    #[test]
    fn test_shared_allocation_and_drop() {
        let value = Shared::new(&gc_handle(), vec![1.0f32; 128]);
        let clone = Shared::clone(&value);
        assert_eq!(clone.len(), 128);
        drop(value);
        assert_eq!(clone[0], 1.0);
    }
}
