//! Heap object model.
//!
//! Every object the language can allocate lives behind one untyped handle,
//! [`GcRef`], pointing at a [`Obj`] that carries a GC header plus a payload
//! enum. The collector is non-moving (mark-and-sweep, not evacuating), so a
//! `GcRef` stays valid for as long as the object is reachable; nothing ever
//! needs to update a `GcRef` after the fact.

use std::cell::Cell;
use std::fmt;
use std::ptr::NonNull;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

/// An untyped, non-owning handle to a heap object.
///
/// Equality is pointer identity: two `GcRef`s are equal iff they name the
/// same allocation, which is exactly the equality semantics interned
/// strings need.
#[derive(Clone, Copy)]
pub struct GcRef(pub(crate) NonNull<Obj>);

impl GcRef {
    /// # Safety
    ///
    /// `ptr` must point at a live `Obj` for as long as the returned handle
    /// is used.
    #[must_use]
    pub(crate) const unsafe fn from_raw(ptr: NonNull<Obj>) -> Self {
        Self(ptr)
    }

    /// Dereferences the handle.
    ///
    /// Returns a `'static` reference rather than one tied to `self`'s own
    /// borrow: `GcRef` is `Copy`, so call sites routinely pass around
    /// short-lived copies (`frame.closure.as_closure()`), and a heap object
    /// behind a non-moving collector genuinely does live independently of
    /// any particular handle copy. The real lifetime constraint — "don't
    /// use this past a GC cycle that could have collected it" — is an
    /// invariant the VM's single-threaded, root-tracing design upholds,
    /// not one the borrow checker can express here.
    #[must_use]
    pub fn obj(self) -> &'static Obj {
        // SAFETY: a `GcRef` only ever points at an object kept alive by the
        // heap's allocation list; the collector does not free reachable
        // objects, and no collection runs while a `GcRef` derived from a
        // root is being dereferenced.
        unsafe { self.0.as_ref() }
    }

    #[must_use]
    pub fn as_string(self) -> Option<&'static ObjString> {
        match &self.obj().data {
            ObjData::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_function(self) -> Option<&'static ObjFunction> {
        match &self.obj().data {
            ObjData::Function(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_closure(self) -> Option<&'static ObjClosure> {
        match &self.obj().data {
            ObjData::Closure(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_class(self) -> Option<&'static ObjClass> {
        match &self.obj().data {
            ObjData::Class(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_instance(self) -> Option<&'static ObjInstance> {
        match &self.obj().data {
            ObjData::Instance(i) => Some(i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_native(self) -> Option<&'static ObjNative> {
        match &self.obj().data {
            ObjData::Native(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_marked(self) -> bool {
        self.obj().marked.get()
    }

    pub fn set_marked(self, marked: bool) {
        self.obj().marked.set(marked);
    }

    /// Mutable access to an upvalue's state. Upvalues are the only object
    /// kind mutated in place after allocation (closing over a stack slot).
    ///
    /// # Safety
    ///
    /// The caller must not alias this mutable reference with another live
    /// reference to the same object. The VM upholds this by only ever
    /// closing an upvalue once, from a single call site, with no other
    /// borrows of the heap outstanding.
    #[must_use]
    pub unsafe fn upvalue_mut(self) -> &'static mut ObjUpvalue {
        // SAFETY: see function contract above.
        let obj = unsafe { &mut *self.0.as_ptr() };
        match &mut obj.data {
            ObjData::Upvalue(u) => u,
            _ => unreachable!("GcRef::upvalue_mut called on non-upvalue object"),
        }
    }

    #[must_use]
    pub unsafe fn instance_fields_mut(self) -> &'static mut Table {
        // SAFETY: instance field tables are only ever mutated through the
        // VM's single-threaded, single-owner execution loop.
        let obj = unsafe { &mut *self.0.as_ptr() };
        match &mut obj.data {
            ObjData::Instance(i) => &mut i.fields,
            _ => unreachable!("GcRef::instance_fields_mut called on non-instance object"),
        }
    }
}

impl PartialEq for GcRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0.as_ptr(), other.0.as_ptr())
    }
}
impl Eq for GcRef {}

impl fmt::Debug for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcRef({:p})", self.0.as_ptr())
    }
}

/// Heap object kinds, used by the collector and by `Display`/`type_name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
    Class,
    Instance,
}

pub struct Obj {
    pub(crate) marked: Cell<bool>,
    pub(crate) next: Option<GcRef>,
    pub data: ObjData,
}

pub enum ObjData {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
}

impl Obj {
    #[must_use]
    pub const fn kind(&self) -> ObjKind {
        match &self.data {
            ObjData::String(_) => ObjKind::String,
            ObjData::Function(_) => ObjKind::Function,
            ObjData::Native(_) => ObjKind::Native,
            ObjData::Closure(_) => ObjKind::Closure,
            ObjData::Upvalue(_) => ObjKind::Upvalue,
            ObjData::Class(_) => ObjKind::Class,
            ObjData::Instance(_) => ObjKind::Instance,
        }
    }

    /// Approximate heap footprint, used to drive the GC's byte-counting
    /// allocation threshold.
    #[must_use]
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>()
            + match &self.data {
                ObjData::String(s) => s.bytes.len(),
                ObjData::Function(f) => f.chunk.approx_bytes(),
                ObjData::Closure(c) => c.upvalues.len() * std::mem::size_of::<GcRef>(),
                ObjData::Instance(i) => i.fields.approx_bytes(),
                ObjData::Native(_) | ObjData::Upvalue(_) | ObjData::Class(_) => 0,
            }
    }

    pub(crate) fn next(&self) -> Option<GcRef> {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: Option<GcRef>) {
        self.next = next;
    }
}

pub struct ObjString {
    pub bytes: Box<str>,
    pub hash: u32,
}

pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: Option<GcRef>,
}

impl ObjFunction {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.and_then(GcRef::as_string).map_or("script", |s| &s.bytes)
    }
}

pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

pub struct ObjNative {
    pub function: NativeFn,
    pub name: &'static str,
    pub arity: u8,
}

pub struct ObjClosure {
    pub function: GcRef,
    pub upvalues: Vec<GcRef>,
}

/// The state of a captured variable.
///
/// `Open` names a live stack slot by absolute index into the VM stack
/// rather than by raw pointer: the VM stack is a growable `Vec`, and a raw
/// pointer into it would dangle across a reallocation. Indexing is the
/// safe equivalent of the pointer-swing the distilled design describes.
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

pub struct ObjUpvalue {
    pub state: UpvalueState,
}

pub struct ObjClass {
    pub name: GcRef,
}

pub struct ObjInstance {
    pub class: GcRef,
    pub fields: Table,
}
