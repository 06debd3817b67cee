//! Tri-color mark-and-sweep collector.
//!
//! Collection is stop-the-world: nothing runs between marking and sweeping,
//! so no write barrier is needed. Colors are tracked with `Obj::marked`
//! (white = unmarked, black = marked and off the gray worklist) plus an
//! explicit gray worklist (`Gc::gray`) for objects that are marked but not
//! yet traced.

use std::cell::Cell;
use std::ptr::NonNull;

use crate::object::{
    GcRef, NativeFn, Obj, ObjClass, ObjClosure, ObjData, ObjFunction, ObjInstance, ObjNative,
    ObjString, ObjUpvalue, UpvalueState,
};
use crate::table::{Table, fnv1a};
use crate::value::Value;

/// Initial collection threshold, matching the classic "start at one
/// megabyte, then double" heap-growth schedule.
pub const INITIAL_GC_THRESHOLD: usize = 1024 * 1024;
const HEAP_GROWTH_FACTOR: usize = 2;

/// Implemented by whatever owns the current set of GC roots: the VM while
/// running, and the compiler (chained through its enclosing compilers)
/// while compiling. Collection can be triggered from either context.
pub trait GcRoots {
    fn mark_roots(&self, gc: &mut Gc);
}

/// The heap: allocation list, interner, byte-accounting, and the gray
/// worklist used while tracing.
pub struct Gc {
    head: Option<GcRef>,
    strings: Table,
    gray: Vec<GcRef>,
    bytes_allocated: usize,
    next_gc: usize,
    pub stress_test: bool,
    pub log_collections: bool,
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

impl Gc {
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: None,
            strings: Table::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_GC_THRESHOLD,
            stress_test: std::env::var_os("BRAID_GC_STRESS").is_some(),
            log_collections: false,
        }
    }

    #[must_use]
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    #[must_use]
    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    #[must_use]
    pub fn should_collect(&self) -> bool {
        self.stress_test || self.bytes_allocated > self.next_gc
    }

    fn push(&mut self, obj: Obj) -> GcRef {
        let mut boxed = Box::new(obj);
        boxed.set_next(self.head);
        let size = boxed.size();
        self.bytes_allocated += size;
        let ptr = NonNull::from(Box::leak(boxed));
        // SAFETY: `ptr` was just derived from a live `Box` we leaked into
        // the allocation list; it stays valid until the sweep phase frees
        // it.
        let handle = unsafe { GcRef::from_raw(ptr) };
        self.head = Some(handle);
        handle
    }

    /// Allocates a fresh, uninterned string. Prefer [`Gc::intern`] for
    /// language-level string values.
    pub fn alloc_raw_string(&mut self, bytes: &str) -> GcRef {
        let hash = fnv1a(bytes.as_bytes());
        self.push(Obj {
            marked: Cell::new(false),
            next: None,
            data: ObjData::String(ObjString { bytes: bytes.into(), hash }),
        })
    }

    /// Returns the canonical `GcRef` for `bytes`, allocating and interning a
    /// new string only on a miss.
    pub fn intern(&mut self, bytes: &str) -> GcRef {
        let hash = fnv1a(bytes.as_bytes());
        if let Some(existing) = self.strings.find_string(bytes, hash) {
            return existing;
        }
        let handle = self.alloc_raw_string(bytes);
        self.strings.set(handle, Value::Nil);
        handle
    }

    pub fn alloc_function(&mut self, function: ObjFunction) -> GcRef {
        self.push(Obj { marked: Cell::new(false), next: None, data: ObjData::Function(function) })
    }

    pub fn alloc_native(&mut self, name: &'static str, arity: u8, function: NativeFn) -> GcRef {
        self.push(Obj {
            marked: Cell::new(false),
            next: None,
            data: ObjData::Native(ObjNative { function, name, arity }),
        })
    }

    pub fn alloc_closure(&mut self, closure: ObjClosure) -> GcRef {
        self.push(Obj { marked: Cell::new(false), next: None, data: ObjData::Closure(closure) })
    }

    pub fn alloc_upvalue(&mut self, slot: usize) -> GcRef {
        self.push(Obj {
            marked: Cell::new(false),
            next: None,
            data: ObjData::Upvalue(ObjUpvalue { state: UpvalueState::Open(slot) }),
        })
    }

    pub fn alloc_class(&mut self, name: GcRef) -> GcRef {
        self.push(Obj { marked: Cell::new(false), next: None, data: ObjData::Class(ObjClass { name }) })
    }

    pub fn alloc_instance(&mut self, class: GcRef) -> GcRef {
        self.push(Obj {
            marked: Cell::new(false),
            next: None,
            data: ObjData::Instance(ObjInstance { class, fields: Table::new() }),
        })
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(o) = value {
            self.mark_object(o);
        }
    }

    pub fn mark_object(&mut self, obj: GcRef) {
        if obj.is_marked() {
            return;
        }
        obj.set_marked(true);
        self.gray.push(obj);
    }

    /// Traces the gray worklist to exhaustion ("blackening" each object by
    /// marking everything it points to).
    fn trace_references(&mut self) {
        while let Some(obj) = self.gray.pop() {
            match &obj.obj().data {
                ObjData::String(_) | ObjData::Native(_) => {}
                ObjData::Function(f) => {
                    if let Some(name) = f.name {
                        self.mark_object(name);
                    }
                    for constant in &f.chunk.constants {
                        self.mark_value(*constant);
                    }
                }
                ObjData::Closure(c) => {
                    self.mark_object(c.function);
                    for upvalue in c.upvalues.clone() {
                        self.mark_object(upvalue);
                    }
                }
                ObjData::Upvalue(u) => {
                    if let UpvalueState::Closed(v) = u.state {
                        self.mark_value(v);
                    }
                }
                ObjData::Class(c) => self.mark_object(c.name),
                ObjData::Instance(i) => {
                    self.mark_object(i.class);
                    for (key, value) in i.fields.iter() {
                        self.mark_object(key);
                        self.mark_value(value);
                    }
                }
            }
        }
    }

    /// Frees every unmarked object on the allocation list, resetting
    /// survivors back to white for the next cycle.
    fn sweep(&mut self) {
        let mut previous: Option<GcRef> = None;
        let mut current = self.head;
        while let Some(obj) = current {
            let next = obj.obj().next();
            if obj.is_marked() {
                obj.set_marked(false);
                previous = Some(obj);
                current = next;
            } else {
                let size = obj.obj().size();
                self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
                match previous {
                    Some(prev) => {
                        // SAFETY: `prev` is a live, uniquely-reachable-by-us
                        // list node; no other reference to it is held
                        // during sweep.
                        unsafe { &mut *prev.raw_mut() }.set_next(next);
                    }
                    None => self.head = next,
                }
                // SAFETY: `obj` was just unlinked from the allocation list
                // and nothing else references a white (unreachable)
                // object, so it is safe to reclaim.
                unsafe {
                    drop(Box::from_raw(obj.raw_mut()));
                }
                current = next;
            }
        }
    }

    /// Runs a full collection cycle: mark roots, trace, sweep the string
    /// interner's weak references, then sweep the heap.
    pub fn collect_garbage(&mut self, roots: &impl GcRoots) {
        let before = self.bytes_allocated;
        roots.mark_roots(self);
        self.trace_references();
        self.strings.remove_unmarked();
        self.sweep();
        self.next_gc = self.bytes_allocated.saturating_mul(HEAP_GROWTH_FACTOR).max(INITIAL_GC_THRESHOLD);
        if self.log_collections {
            tracing::debug!(before, after = self.bytes_allocated, next_gc = self.next_gc, "gc cycle");
        }
    }

    pub fn collect_if_needed(&mut self, roots: &impl GcRoots) {
        if self.should_collect() {
            self.collect_garbage(roots);
        }
    }
}

impl GcRef {
    /// # Safety
    ///
    /// Only the collector's own sweep/relink code may use this; it yields a
    /// raw, unchecked mutable pointer into heap state.
    unsafe fn raw_mut(self) -> *mut Obj {
        self.0.as_ptr()
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        let mut current = self.head;
        while let Some(obj) = current {
            let next = obj.obj().next();
            // SAFETY: dropping the whole heap at VM shutdown; nothing else
            // can observe these objects afterward.
            unsafe {
                drop(Box::from_raw(obj.raw_mut()));
            }
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_bytes_returns_identical_handle() {
        let mut gc = Gc::new();
        let a = gc.intern("hello");
        let b = gc.intern("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn interning_distinct_bytes_returns_distinct_handles() {
        let mut gc = Gc::new();
        let a = gc.intern("hello");
        let b = gc.intern("world");
        assert_ne!(a, b);
    }

    struct NoRoots;
    impl GcRoots for NoRoots {
        fn mark_roots(&self, _gc: &mut Gc) {}
    }

    #[test]
    fn collecting_with_no_roots_frees_everything() {
        let mut gc = Gc::new();
        gc.intern("unreachable");
        assert!(gc.bytes_allocated() > 0);
        gc.collect_garbage(&NoRoots);
        assert_eq!(gc.bytes_allocated(), 0);
    }

    #[test]
    fn marked_roots_survive_collection() {
        let mut gc = Gc::new();
        let s = gc.intern("kept");

        struct KeepString(GcRef);
        impl GcRoots for KeepString {
            fn mark_roots(&self, gc: &mut Gc) {
                gc.mark_object(self.0);
            }
        }

        gc.collect_garbage(&KeepString(s));
        assert!(gc.bytes_allocated() > 0);
        assert_eq!(gc.intern("kept"), s);
    }
}
