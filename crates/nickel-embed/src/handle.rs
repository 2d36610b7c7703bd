//! Ownership of foreign handles
//!
//! Every object the engine allocates is held by exactly one [`Owned`],
//! which frees it exactly once when dropped. Pointers the engine lends out
//! of an expression (records, arrays, numbers) are wrapped in [`Borrowed`],
//! whose lifetime is tied to the owning value so they cannot outlive it or
//! survive an in-place overwrite of its slot.
//!
//! Live handles are counted per kind; [`live_handles`] reports the counts.

use std::ffi::c_char;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};

use nickel_lang_sys as sys;

/// The kinds of engine-owned object this crate allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// `nickel_context`
    Context,
    /// `nickel_expr`
    Expr,
    /// `nickel_error`
    Error,
    /// `nickel_string`
    String,
    /// `nickel_virtual_machine`
    VirtualMachine,
}

impl HandleKind {
    fn index(self) -> usize {
        match self {
            HandleKind::Context => 0,
            HandleKind::Expr => 1,
            HandleKind::Error => 2,
            HandleKind::String => 3,
            HandleKind::VirtualMachine => 4,
        }
    }

    /// The ABI type name.
    pub fn name(self) -> &'static str {
        match self {
            HandleKind::Context => "nickel_context",
            HandleKind::Expr => "nickel_expr",
            HandleKind::Error => "nickel_error",
            HandleKind::String => "nickel_string",
            HandleKind::VirtualMachine => "nickel_virtual_machine",
        }
    }
}

static LIVE: [AtomicUsize; 5] = [
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
];

/// Process-wide counts of live engine handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleStats {
    /// Live contexts
    pub contexts: usize,
    /// Live expression slots
    pub exprs: usize,
    /// Live error slots
    pub errors: usize,
    /// Live string slots
    pub strings: usize,
    /// Live virtual machines
    pub virtual_machines: usize,
}

impl HandleStats {
    /// Sum over all kinds.
    pub fn total(&self) -> usize {
        self.contexts + self.exprs + self.errors + self.strings + self.virtual_machines
    }
}

impl fmt::Display for HandleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} contexts, {} exprs, {} errors, {} strings, {} virtual machines",
            self.contexts, self.exprs, self.errors, self.strings, self.virtual_machines
        )
    }
}

/// Snapshot of the live handle counters.
///
/// # Example
///
/// ```
/// use nickel_embed::{live_handles, Context};
///
/// let before = live_handles();
/// {
///     let ctx = Context::new();
///     let _value = ctx.eval_deep("[1, 2]").unwrap();
/// }
/// assert_eq!(live_handles(), before);
/// ```
pub fn live_handles() -> HandleStats {
    let load = |kind: HandleKind| LIVE[kind.index()].load(Ordering::SeqCst);
    HandleStats {
        contexts: load(HandleKind::Context),
        exprs: load(HandleKind::Expr),
        errors: load(HandleKind::Error),
        strings: load(HandleKind::String),
        virtual_machines: load(HandleKind::VirtualMachine),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Resources
// ═══════════════════════════════════════════════════════════════════════

/// An engine object type with a paired allocator and deallocator.
pub(crate) trait Resource {
    /// The opaque ABI type
    type Raw;

    /// Which counter to maintain
    const KIND: HandleKind;

    /// Allocate a fresh object.
    ///
    /// # Safety
    ///
    /// Calls into the engine.
    unsafe fn alloc() -> *mut Self::Raw;

    /// Free an object returned by [`Resource::alloc`].
    ///
    /// # Safety
    ///
    /// `raw` must come from `alloc` and must not be used afterwards.
    unsafe fn free(raw: *mut Self::Raw);
}

macro_rules! resource {
    ($name:ident, $raw:ty, $kind:expr, $alloc:path, $free:path) => {
        pub(crate) struct $name;

        impl Resource for $name {
            type Raw = $raw;
            const KIND: HandleKind = $kind;

            unsafe fn alloc() -> *mut $raw {
                $alloc()
            }

            unsafe fn free(raw: *mut $raw) {
                $free(raw)
            }
        }
    };
}

resource!(
    ContextRes,
    sys::nickel_context,
    HandleKind::Context,
    sys::nickel_context_alloc,
    sys::nickel_context_free
);
resource!(
    ExprRes,
    sys::nickel_expr,
    HandleKind::Expr,
    sys::nickel_expr_alloc,
    sys::nickel_expr_free
);
resource!(
    ErrorRes,
    sys::nickel_error,
    HandleKind::Error,
    sys::nickel_error_alloc,
    sys::nickel_error_free
);
resource!(
    StringRes,
    sys::nickel_string,
    HandleKind::String,
    sys::nickel_string_alloc,
    sys::nickel_string_free
);
resource!(
    VmRes,
    sys::nickel_virtual_machine,
    HandleKind::VirtualMachine,
    sys::nickel_virtual_machine_alloc,
    sys::nickel_virtual_machine_free
);

/// The single owner of an engine object.
pub(crate) struct Owned<R: Resource> {
    ptr: NonNull<R::Raw>,
    _resource: PhantomData<R>,
}

impl<R: Resource> Owned<R> {
    /// Allocate a new object.
    ///
    /// Panics if the engine returns null, as `Box::new` aborts when out of
    /// memory.
    pub(crate) fn new() -> Self {
        // SAFETY: allocation has no preconditions.
        let raw = unsafe { R::alloc() };
        let Some(ptr) = NonNull::new(raw) else {
            panic!("{}_alloc returned null", R::KIND.name());
        };
        let live = LIVE[R::KIND.index()].fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(kind = R::KIND.name(), live, "allocated handle");
        Self {
            ptr,
            _resource: PhantomData,
        }
    }

    /// The raw pointer, valid for as long as `self` lives.
    pub(crate) fn as_ptr(&self) -> *mut R::Raw {
        self.ptr.as_ptr()
    }

    /// The raw pointer, for read-only ABI calls.
    pub(crate) fn as_const(&self) -> *const R::Raw {
        self.ptr.as_ptr()
    }
}

impl<R: Resource> Drop for Owned<R> {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `R::alloc` and this is the only owner.
        unsafe { R::free(self.ptr.as_ptr()) };
        let live = LIVE[R::KIND.index()].fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::trace!(kind = R::KIND.name(), live, "freed handle");
    }
}

impl<R: Resource> fmt::Debug for Owned<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", R::KIND.name(), self.ptr)
    }
}

/// A pointer the engine lends out of a value that lives for `'a`.
pub(crate) struct Borrowed<'a, T> {
    ptr: NonNull<T>,
    _owner: PhantomData<&'a T>,
}

impl<'a, T> Borrowed<'a, T> {
    /// Wrap a pointer borrowed from an owner that lives for `'a`.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for `'a`.
    pub(crate) unsafe fn new(ptr: *const T) -> Option<Self> {
        NonNull::new(ptr.cast_mut()).map(|ptr| Self {
            ptr,
            _owner: PhantomData,
        })
    }

    pub(crate) fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Copying Out
// ═══════════════════════════════════════════════════════════════════════

/// Copy a `(pointer, length)` pair returned by the engine into a `String`.
///
/// # Safety
///
/// `ptr` must point to `len` readable bytes, or be null with `len == 0`.
pub(crate) unsafe fn copy_str(ptr: *const c_char, len: usize) -> String {
    if ptr.is_null() || len == 0 {
        return String::new();
    }
    let bytes = slice::from_raw_parts(ptr.cast::<u8>(), len);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Owned<StringRes> {
    /// Copy the slot's contents.
    pub(crate) fn to_string_lossy(&self) -> String {
        let mut data = std::ptr::null();
        let mut len = 0;
        // SAFETY: the slot is live; the data stays valid until the next
        // write into it, and is copied before returning.
        unsafe {
            sys::nickel_string_data(self.as_const(), &mut data, &mut len);
            copy_str(data, len)
        }
    }
}
