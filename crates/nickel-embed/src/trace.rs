//! Routing of `std.trace` output to host writers
//!
//! The engine delivers trace messages through a C callback carrying an
//! opaque `user_data` word. Each context is given a numeric token, passed
//! as that word, and the token maps to the context's sink in a process-wide
//! registry. The callbacks resolve the token on every call, so a message
//! for a context whose sink is gone is dropped instead of reaching freed
//! memory.
//!
//! A failing or panicking sink never fails the evaluation: the message is
//! reported as consumed and the failure is logged at debug level.

use std::ffi::c_void;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use dashmap::DashMap;

type SharedSink = Arc<Mutex<Box<dyn Write + Send>>>;

fn registry() -> &'static DashMap<usize, SharedSink> {
    static REGISTRY: OnceLock<DashMap<usize, SharedSink>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

/// A fresh token. Tokens are never reused within a process.
pub(crate) fn next_token() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Install or replace the sink for a token.
pub(crate) fn register(token: usize, sink: Box<dyn Write + Send>) {
    let replaced = registry()
        .insert(token, Arc::new(Mutex::new(sink)))
        .is_some();
    tracing::debug!(token, replaced, "registered trace sink");
}

/// Remove the sink for a token. Returns whether one was installed.
pub(crate) fn unregister(token: usize) -> bool {
    let removed = registry().remove(&token).is_some();
    if removed {
        tracing::debug!(token, "unregistered trace sink");
    }
    removed
}

/// Number of installed sinks.
pub fn registered_sinks() -> usize {
    registry().len()
}

fn lookup(user_data: *const c_void) -> Option<SharedSink> {
    let token = user_data as usize;
    // Clone out so the shard guard is released before the sink is used.
    registry().get(&token).map(|entry| Arc::clone(entry.value()))
}

/// Write callback handed to the engine.
pub(crate) unsafe extern "C" fn write_callback(
    user_data: *mut c_void,
    buf: *const u8,
    len: usize,
) -> usize {
    let Some(sink) = lookup(user_data) else {
        tracing::trace!(token = user_data as usize, "no trace sink; dropping message");
        return len;
    };
    let bytes: &[u8] = if buf.is_null() || len == 0 {
        &[]
    } else {
        slice::from_raw_parts(buf, len)
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_all(bytes)
    }));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::debug!(token = user_data as usize, error = %err, "trace sink write failed");
        }
        Err(_) => {
            tracing::debug!(token = user_data as usize, "trace sink panicked");
        }
    }
    len
}

/// Flush callback handed to the engine.
pub(crate) unsafe extern "C" fn flush_callback(user_data: *const c_void) {
    let Some(sink) = lookup(user_data) else {
        return;
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        sink.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }));
    if !matches!(outcome, Ok(Ok(()))) {
        tracing::debug!(token = user_data as usize, "trace sink flush failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            panic!("flush on a broken sink")
        }
    }

    fn call(token: usize, text: &str) -> usize {
        unsafe {
            let written = write_callback(token as *mut c_void, text.as_ptr(), text.len());
            flush_callback(token as *const c_void);
            written
        }
    }

    #[test]
    fn test_routes_by_token() {
        let (a, b) = (next_token(), next_token());
        let (sink_a, sink_b) = (Shared::default(), Shared::default());
        register(a, Box::new(sink_a.clone()));
        register(b, Box::new(sink_b.clone()));

        assert_eq!(call(a, "one"), 3);
        assert_eq!(call(b, "two"), 3);
        assert_eq!(call(a, "three"), 5);

        assert_eq!(sink_a.0.lock().unwrap().as_slice(), b"onethree");
        assert_eq!(sink_b.0.lock().unwrap().as_slice(), b"two");
        assert!(unregister(a));
        assert!(unregister(b));
    }

    #[test]
    fn test_unknown_token_is_dropped() {
        let token = next_token();
        assert_eq!(call(token, "lost"), 4);
        assert!(!unregister(token));
    }

    #[test]
    fn test_failing_sink_is_swallowed() {
        let token = next_token();
        register(token, Box::new(Broken));
        assert_eq!(call(token, "ignored"), 7);
        assert!(unregister(token));
    }

    #[test]
    fn test_replacing_a_sink() {
        let token = next_token();
        let (first, second) = (Shared::default(), Shared::default());
        register(token, Box::new(first.clone()));
        register(token, Box::new(second.clone()));
        call(token, "x");
        assert!(first.0.lock().unwrap().is_empty());
        assert_eq!(second.0.lock().unwrap().as_slice(), b"x");
        unregister(token);
    }
}
