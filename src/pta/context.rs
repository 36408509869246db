//! Calling contexts and context selection.
//!
//! A context is an interned call string (a sequence of call-site handles),
//! canonicalized in a [`ContextTable`] so that equality is handle equality
//! and the empty context is always handle zero. The [`ContextSelector`]
//! trait decides which contexts the solver creates; the engine ships the
//! insensitive selector (everything runs in the empty context) and a
//! k-limited call-site-sensitive selector.

use rustc_hash::FxHashMap;

use crate::ir::{MethodId, StmtId};

use super::elements::CSObjId;
use super::heap::ObjId;

/// Handle of an interned context. Contexts are totally ordered by handle;
/// the empty context is [`ContextId::EMPTY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u32);

impl ContextId {
    /// The distinguished empty context.
    pub const EMPTY: ContextId = ContextId(0);

    /// Index into the owning table.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interning table for call-string contexts.
#[derive(Debug)]
pub struct ContextTable {
    elems: Vec<Vec<StmtId>>,
    map: FxHashMap<Vec<StmtId>, ContextId>,
}

impl Default for ContextTable {
    fn default() -> Self {
        let mut map = FxHashMap::default();
        map.insert(Vec::new(), ContextId::EMPTY);
        Self {
            elems: vec![Vec::new()],
            map,
        }
    }
}

impl ContextTable {
    /// Create a table containing only the empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The call string of a context.
    #[must_use]
    pub fn elems(&self, ctx: ContextId) -> &[StmtId] {
        &self.elems[ctx.index()]
    }

    /// Intern an explicit call string.
    pub fn intern(&mut self, elems: Vec<StmtId>) -> ContextId {
        if let Some(id) = self.map.get(&elems) {
            return *id;
        }
        let id = ContextId(self.elems.len() as u32);
        self.map.insert(elems.clone(), id);
        self.elems.push(elems);
        id
    }

    /// Append a call site to a context, keeping only the last `k` sites.
    pub fn append(&mut self, ctx: ContextId, site: StmtId, k: usize) -> ContextId {
        let mut elems = self.elems[ctx.index()].clone();
        elems.push(site);
        if elems.len() > k {
            let drop = elems.len() - k;
            elems.drain(..drop);
        }
        self.intern(elems)
    }

    /// Number of interned contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Whether only the empty context exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elems.len() == 1
    }
}

/// Chooses contexts for methods and heap objects during the solve.
///
/// Both `select_context` (static calls) and `select_context_with_recv`
/// (dynamic calls) must be supplied; the solver picks the variant by the
/// presence of a receiver object.
pub trait ContextSelector {
    /// The context the analysis starts in.
    fn empty_context(&self) -> ContextId {
        ContextId::EMPTY
    }

    /// Heap context for an object allocated while analyzing a method in
    /// `method_ctx`.
    fn select_heap_context(
        &self,
        contexts: &mut ContextTable,
        method_ctx: ContextId,
        obj: ObjId,
    ) -> ContextId;

    /// Callee context for a static call.
    fn select_context(
        &self,
        contexts: &mut ContextTable,
        caller_ctx: ContextId,
        call_site: StmtId,
        callee: MethodId,
    ) -> ContextId;

    /// Callee context for a dynamic call with the given receiver object.
    fn select_context_with_recv(
        &self,
        contexts: &mut ContextTable,
        caller_ctx: ContextId,
        call_site: StmtId,
        recv: CSObjId,
        callee: MethodId,
    ) -> ContextId;
}

/// Selector of the context-insensitive analysis: one context for everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextInsensitiveSelector;

impl ContextSelector for ContextInsensitiveSelector {
    fn select_heap_context(
        &self,
        _contexts: &mut ContextTable,
        _method_ctx: ContextId,
        _obj: ObjId,
    ) -> ContextId {
        ContextId::EMPTY
    }

    fn select_context(
        &self,
        _contexts: &mut ContextTable,
        _caller_ctx: ContextId,
        _call_site: StmtId,
        _callee: MethodId,
    ) -> ContextId {
        ContextId::EMPTY
    }

    fn select_context_with_recv(
        &self,
        _contexts: &mut ContextTable,
        _caller_ctx: ContextId,
        _call_site: StmtId,
        _recv: CSObjId,
        _callee: MethodId,
    ) -> ContextId {
        ContextId::EMPTY
    }
}

/// k-limited call-site sensitivity with empty heap contexts.
#[derive(Debug, Clone, Copy)]
pub struct KCallSelector {
    k: usize,
}

impl KCallSelector {
    /// Create a selector keeping the most recent `k` call sites.
    #[must_use]
    pub fn new(k: usize) -> Self {
        assert!(k > 0, "context depth must be positive");
        Self { k }
    }
}

impl ContextSelector for KCallSelector {
    fn select_heap_context(
        &self,
        _contexts: &mut ContextTable,
        _method_ctx: ContextId,
        _obj: ObjId,
    ) -> ContextId {
        ContextId::EMPTY
    }

    fn select_context(
        &self,
        contexts: &mut ContextTable,
        caller_ctx: ContextId,
        call_site: StmtId,
        _callee: MethodId,
    ) -> ContextId {
        contexts.append(caller_ctx, call_site, self.k)
    }

    fn select_context_with_recv(
        &self,
        contexts: &mut ContextTable,
        caller_ctx: ContextId,
        call_site: StmtId,
        _recv: CSObjId,
        _callee: MethodId,
    ) -> ContextId {
        contexts.append(caller_ctx, call_site, self.k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_context_is_zero() {
        let table = ContextTable::new();
        assert_eq!(table.len(), 1);
        assert!(table.elems(ContextId::EMPTY).is_empty());
    }

    #[test]
    fn test_append_interns_canonically() {
        let mut table = ContextTable::new();
        let s1 = StmtId(10);
        let c1 = table.append(ContextId::EMPTY, s1, 2);
        let c1_again = table.append(ContextId::EMPTY, s1, 2);
        assert_eq!(c1, c1_again);
        assert_eq!(table.elems(c1), &[s1]);
    }

    #[test]
    fn test_append_truncates_to_k() {
        let mut table = ContextTable::new();
        let c1 = table.append(ContextId::EMPTY, StmtId(1), 1);
        let c2 = table.append(c1, StmtId(2), 1);
        assert_eq!(table.elems(c2), &[StmtId(2)]);
    }

    #[test]
    fn test_k_call_selector_distinguishes_sites() {
        let mut table = ContextTable::new();
        let sel = KCallSelector::new(1);
        let a = sel.select_context(&mut table, ContextId::EMPTY, StmtId(1), MethodId(0));
        let b = sel.select_context(&mut table, ContextId::EMPTY, StmtId(2), MethodId(0));
        assert_ne!(a, b);
    }
}
