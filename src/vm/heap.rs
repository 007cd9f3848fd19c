//! Object storage for the VM.
//!
//! Every string and function lives in one arena owned by the VM, addressed
//! by `ObjRef` index handles. Nothing is freed while the VM is alive; the
//! whole arena is released in one pass when the VM is dropped. The heap also
//! owns the string intern set, so each distinct byte sequence is stored
//! exactly once and string equality collapses to handle identity.

use super::object::{hash_string, FunObj, Obj, ObjRef, StrObj};
use super::table::Table;
use super::value::Value;

#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Obj>,
    strings: Table,
}

impl Heap {
    pub fn new() -> Self {
        Heap::default()
    }

    pub fn get(&self, r: ObjRef) -> &Obj {
        &self.objects[r.index()]
    }

    /// The backing object slice, for table operations that need to read key
    /// hashes.
    pub fn objects(&self) -> &[Obj] {
        &self.objects
    }

    /// Intern `chars`: return the canonical handle for this byte sequence,
    /// allocating it on first sight.
    pub fn intern(&mut self, chars: &str) -> ObjRef {
        let hash = hash_string(chars.as_bytes());
        if let Some(existing) = self.strings.find_string(&self.objects, chars, hash) {
            return existing;
        }
        let r = ObjRef::new(self.objects.len());
        self.objects.push(Obj::Str(StrObj {
            chars: chars.into(),
            hash,
        }));
        self.strings.set(&self.objects, r, Value::Nil);
        r
    }

    pub fn alloc_function(&mut self, function: FunObj) -> ObjRef {
        let r = ObjRef::new(self.objects.len());
        self.objects.push(Obj::Fun(function));
        r
    }

    pub fn string(&self, r: ObjRef) -> &StrObj {
        match &self.objects[r.index()] {
            Obj::Str(s) => s,
            Obj::Fun(_) => unreachable!("handle does not refer to a string"),
        }
    }

    pub fn function(&self, r: ObjRef) -> &FunObj {
        match &self.objects[r.index()] {
            Obj::Fun(f) => f,
            Obj::Str(_) => unreachable!("handle does not refer to a function"),
        }
    }
}
