//! Reference-counted handles to host-managed objects.
//!
//! A `VmRef` is a tagged pointer: the object pointer, its type descriptor and
//! a count live in one heap header shared by every owner. There is no `Clone`:
//! duplication goes through [`VmRef::retain`], transfer through
//! [`VmRef::take`], and release is `Drop`. The registered destructor runs
//! exactly once, when the last owner goes away.
//!
//! Layout:
//!
//! ```text
//! VmRef ──> RefHeader { count, descriptor, ptr } ──> object
//!                           │
//!                           └──> RefTypeDescriptor { id, name, destructor }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroU32;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU32, Ordering};

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use tracing::debug;

use ivm_common_core::{VmError, VmResult};

/// Destroys the object behind a ref once its count reaches zero.
pub type Destructor = unsafe fn(*mut ());

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RefTypeId(NonZeroU32);

impl RefTypeId {
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// Registration of a ref-able host type. Lives for the whole process.
pub struct RefTypeDescriptor {
    id: RefTypeId,
    name: &'static str,
    destructor: Destructor,
}

impl RefTypeDescriptor {
    #[inline]
    pub fn id(&self) -> RefTypeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for RefTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefTypeDescriptor")
            .field("id", &self.id.get())
            .field("name", &self.name)
            .finish()
    }
}

// =============================================================================
// Type registry
// =============================================================================

static TYPES: Lazy<RwLock<Vec<&'static RefTypeDescriptor>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Registers a host type. Ids are assigned in registration order.
pub fn register_type(name: &'static str, destructor: Destructor) -> &'static RefTypeDescriptor {
    let mut types = TYPES.write();
    let id = RefTypeId(NonZeroU32::MIN.saturating_add(types.len() as u32));
    let descriptor: &'static RefTypeDescriptor = Box::leak(Box::new(RefTypeDescriptor {
        id,
        name,
        destructor,
    }));
    types.push(descriptor);
    debug!(type_id = id.get(), name, "registered ref type");
    descriptor
}

pub fn lookup_type(id: RefTypeId) -> Option<&'static RefTypeDescriptor> {
    TYPES.read().get(id.get() as usize - 1).copied()
}

pub fn lookup_type_by_name(name: &str) -> Option<&'static RefTypeDescriptor> {
    TYPES.read().iter().find(|d| d.name == name).copied()
}

unsafe fn drop_boxed<T>(ptr: *mut ()) {
    drop(Box::from_raw(ptr as *mut T));
}

/// A Rust type usable as a VM ref. Implement with [`ref_object!`](crate::ref_object).
pub trait RefObject: Send + Sync + Sized + 'static {
    const TYPE_NAME: &'static str;

    #[doc(hidden)]
    fn descriptor_cell() -> &'static OnceCell<&'static RefTypeDescriptor>;

    /// Descriptor for this type, registered on first use.
    fn descriptor() -> &'static RefTypeDescriptor {
        Self::descriptor_cell().get_or_init(|| register_type(Self::TYPE_NAME, drop_boxed::<Self>))
    }
}

/// Implements [`RefObject`] for a type under a display name.
///
/// ```ignore
/// struct Buffer { .. }
/// ivm_runtime::ref_object!(Buffer, "hal.buffer");
/// ```
#[macro_export]
macro_rules! ref_object {
    ($ty:ty, $name:expr) => {
        impl $crate::vm_ref::RefObject for $ty {
            const TYPE_NAME: &'static str = $name;

            fn descriptor_cell(
            ) -> &'static $crate::once_cell::sync::OnceCell<&'static $crate::vm_ref::RefTypeDescriptor>
            {
                static CELL: $crate::once_cell::sync::OnceCell<
                    &'static $crate::vm_ref::RefTypeDescriptor,
                > = $crate::once_cell::sync::OnceCell::new();
                &CELL
            }
        }
    };
}

// =============================================================================
// VmRef
// =============================================================================

struct RefHeader {
    count: AtomicU32,
    descriptor: &'static RefTypeDescriptor,
    ptr: NonNull<()>,
}

/// Opaque ref: null, or one owning count on a host object.
#[derive(Default)]
pub struct VmRef {
    header: Option<NonNull<RefHeader>>,
}

// SAFETY: objects are only wrapped through `Ref::new` (which requires
// `Send + Sync`) or the unsafe `wrap`, whose callers guarantee the same.
// Counting is atomic.
unsafe impl Send for VmRef {}
unsafe impl Sync for VmRef {}

impl VmRef {
    #[inline]
    pub const fn null() -> Self {
        Self { header: None }
    }

    /// Wraps a raw object pointer with count 1.
    ///
    /// # Safety
    /// `ptr` must be valid until `descriptor`'s destructor is called on it,
    /// the destructor must accept it, and the object must be safe to share
    /// and drop across threads.
    pub unsafe fn wrap(ptr: NonNull<()>, descriptor: &'static RefTypeDescriptor) -> Self {
        let header = Box::new(RefHeader {
            count: AtomicU32::new(1),
            descriptor,
            ptr,
        });
        Self {
            header: Some(NonNull::from(Box::leak(header))),
        }
    }

    #[inline]
    fn header(&self) -> Option<&RefHeader> {
        // SAFETY: the header outlives every owner holding a count on it.
        self.header.map(|h| unsafe { &*h.as_ptr() })
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.header.is_none()
    }

    /// New owning handle to the same object; count + 1. Null retains to null.
    pub fn retain(&self) -> VmRef {
        if let Some(header) = self.header() {
            header.count.fetch_add(1, Ordering::Relaxed);
        }
        VmRef { header: self.header }
    }

    /// Moves the value out, leaving null behind. The count is unchanged.
    #[inline]
    pub fn take(&mut self) -> VmRef {
        VmRef {
            header: self.header.take(),
        }
    }

    /// Retain-assigns `other` into this slot, releasing the previous value.
    pub fn assign(&mut self, other: &VmRef) {
        *self = other.retain();
    }

    /// Releases the held value (if any) and leaves null.
    #[inline]
    pub fn reset(&mut self) {
        drop(self.take());
    }

    pub fn descriptor(&self) -> Option<&'static RefTypeDescriptor> {
        self.header().map(|h| h.descriptor)
    }

    /// Display name of the stored type; `null` for a null ref.
    pub fn type_name(&self) -> &'static str {
        self.descriptor().map_or("null", |d| d.name)
    }

    /// Type check against an expected descriptor. Null never matches.
    #[inline]
    pub fn is_type(&self, expected: &RefTypeDescriptor) -> bool {
        self.header().map_or(false, |h| h.descriptor.id == expected.id)
    }

    /// Current count; 0 for null.
    pub fn count(&self) -> u32 {
        self.header().map_or(0, |h| h.count.load(Ordering::Acquire))
    }

    pub fn as_ptr(&self) -> Option<NonNull<()>> {
        self.header().map(|h| h.ptr)
    }

    /// Whether both refs point at the same object (both null counts as equal).
    pub fn ptr_eq(&self, other: &VmRef) -> bool {
        self.header == other.header
    }

    pub fn downcast<T: RefObject>(&self) -> Option<&T> {
        let header = self.header()?;
        if header.descriptor.id != T::descriptor().id {
            return None;
        }
        // SAFETY: the type id matches, so `ptr` came from `Ref::<T>::new`.
        Some(unsafe { &*(header.ptr.as_ptr() as *const T) })
    }
}

impl Drop for VmRef {
    fn drop(&mut self) {
        let Some(header) = self.header.take() else {
            return;
        };
        // SAFETY: we hold one count, so the header is alive.
        let h = unsafe { &*header.as_ptr() };
        if h.count.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);
        // SAFETY: count reached zero; no other owner can observe the object.
        unsafe {
            (h.descriptor.destructor)(h.ptr.as_ptr());
            drop(Box::from_raw(header.as_ptr()));
        }
    }
}

impl fmt::Debug for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.header() {
            None => f.write_str("VmRef(null)"),
            Some(h) => write!(
                f,
                "VmRef({}@{:p}, count={})",
                h.descriptor.name,
                h.ptr.as_ptr(),
                h.count.load(Ordering::Relaxed)
            ),
        }
    }
}

// =============================================================================
// Ref<T>
// =============================================================================

/// Typed ref: null, or a ref whose stored type is `T`.
pub struct Ref<T: RefObject> {
    inner: VmRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T: RefObject> Ref<T> {
    pub fn new(value: T) -> Self {
        let ptr = NonNull::from(Box::leak(Box::new(value))).cast::<()>();
        // SAFETY: `ptr` is a leaked `Box<T>` and the descriptor drops `Box<T>`.
        let inner = unsafe { VmRef::wrap(ptr, T::descriptor()) };
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn null() -> Self {
        Self {
            inner: VmRef::null(),
            _marker: PhantomData,
        }
    }

    /// Checks the stored type. Null is accepted.
    pub fn from_vm_ref(r: VmRef) -> VmResult<Self> {
        if r.is_null() || r.is_type(T::descriptor()) {
            Ok(Self {
                inner: r,
                _marker: PhantomData,
            })
        } else {
            Err(VmError::type_mismatch(T::TYPE_NAME, r.type_name()))
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.inner.is_null()
    }

    pub fn get(&self) -> Option<&T> {
        self.inner.downcast::<T>()
    }

    /// Like `get`, reporting a null ref as `InvalidArgument`.
    pub fn deref_non_null(&self) -> VmResult<&T> {
        self.get()
            .ok_or_else(|| VmError::invalid_argument(format!("null {} reference", T::TYPE_NAME)))
    }

    pub fn retain(&self) -> Self {
        Self {
            inner: self.inner.retain(),
            _marker: PhantomData,
        }
    }

    pub fn count(&self) -> u32 {
        self.inner.count()
    }

    pub fn as_vm_ref(&self) -> &VmRef {
        &self.inner
    }

    pub fn into_vm_ref(self) -> VmRef {
        self.inner
    }
}

impl<T: RefObject> Default for Ref<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: RefObject> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}
