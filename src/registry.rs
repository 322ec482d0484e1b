//! Downcall Table
//!
//! Declares a fixed set of named downcalls up front and binds them all in
//! one explicit initialization step. The bound set lives in the table
//! rather than in statics; `init` is idempotent and hands back the same
//! handles every time.

use std::collections::HashMap;
use std::fmt;

use log::debug;
use once_cell::sync::OnceCell;

use crate::error::DowncallResult;
use crate::invoke::{CallHandle, Linker};
use crate::layout::{c, LayoutDescriptor};
use crate::library::Library;
use crate::signature::{parse_signature, CallDescriptor, FunctionDescriptor, ManagedSignature};

/// One declared downcall
#[derive(Debug, Clone)]
pub struct DowncallDecl {
    /// Name the handle is registered under
    pub name: String,
    /// Exported symbol to resolve
    pub symbol: String,
    pub descriptor: CallDescriptor,
}

/// Builder for a [`DowncallTable`]
#[derive(Debug, Default)]
pub struct DowncallTableBuilder {
    decls: Vec<(String, String, ManagedSignature, FunctionDescriptor)>,
}

impl DowncallTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name` with the default carriers for `function`
    pub fn function(self, name: &str, function: FunctionDescriptor) -> Self {
        let managed = ManagedSignature::for_function(&function);
        self.declare(name, name, managed, function)
    }

    /// Declare `name` bound to `symbol` with an explicit managed signature
    pub fn declare(
        mut self,
        name: &str,
        symbol: &str,
        managed: ManagedSignature,
        function: FunctionDescriptor,
    ) -> Self {
        // A repeated name replaces the earlier declaration.
        self.decls.retain(|(n, ..)| n != name);
        self.decls
            .push((name.to_string(), symbol.to_string(), managed, function));
        self
    }

    /// Declare from C-style signature text; the function name is the symbol
    pub fn signature(self, text: &str) -> DowncallResult<Self> {
        let parsed = parse_signature(text)?;
        Ok(self.function(&parsed.name, parsed.function))
    }

    /// Validate every declaration
    pub fn build(self) -> DowncallResult<DowncallTable> {
        let decls = self
            .decls
            .into_iter()
            .map(|(name, symbol, managed, function)| {
                let descriptor = CallDescriptor::bind(&managed, &function)
                    .map_err(|e| e.in_declaration(&name))?;
                Ok(DowncallDecl {
                    name,
                    symbol,
                    descriptor,
                })
            })
            .collect::<DowncallResult<Vec<_>>>()?;
        Ok(DowncallTable {
            decls,
            bound: OnceCell::new(),
        })
    }
}

/// A declared set of downcalls, bound at most once
pub struct DowncallTable {
    decls: Vec<DowncallDecl>,
    bound: OnceCell<BoundHandles>,
}

impl DowncallTable {
    pub fn builder() -> DowncallTableBuilder {
        DowncallTableBuilder::new()
    }

    pub fn declarations(&self) -> &[DowncallDecl] {
        &self.decls
    }

    /// Resolve and bind every declaration against `library`.
    ///
    /// The first successful call wins; later calls return the same handles
    /// and ignore their arguments. A failed call binds nothing and may be
    /// retried.
    pub fn init(&self, library: &Library, linker: &Linker) -> DowncallResult<&BoundHandles> {
        self.bound.get_or_try_init(|| {
            let mut handles = HashMap::with_capacity(self.decls.len());
            for decl in &self.decls {
                let address = library
                    .lookup(&decl.symbol)
                    .map_err(|e| e.in_declaration(&decl.name))?;
                handles.insert(decl.name.clone(), linker.downcall(address, &decl.descriptor));
            }
            debug!(
                "bound {} downcalls from {}",
                handles.len(),
                library.path().display()
            );
            Ok(BoundHandles {
                order: self.decls.iter().map(|d| d.name.clone()).collect(),
                handles,
            })
        })
    }

    /// Handles from a previous successful `init`
    pub fn bound(&self) -> Option<&BoundHandles> {
        self.bound.get()
    }
}

impl fmt::Debug for DowncallTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DowncallTable")
            .field("decls", &self.decls.iter().map(|d| &d.name).collect::<Vec<_>>())
            .field("bound", &self.bound.get().is_some())
            .finish()
    }
}

/// The bound handles of a [`DowncallTable`]
#[derive(Debug)]
pub struct BoundHandles {
    order: Vec<String>,
    handles: HashMap<String, CallHandle>,
}

impl BoundHandles {
    pub fn get(&self, name: &str) -> Option<&CallHandle> {
        self.handles.get(name)
    }

    /// Handles in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CallHandle)> {
        self.order
            .iter()
            .filter_map(|name| self.handles.get(name).map(|h| (name.as_str(), h)))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// `struct { long long x; long long y; }`
pub fn point_layout() -> DowncallResult<LayoutDescriptor> {
    LayoutDescriptor::of_struct([c::long_long(), c::long_long()])
}

fn args_alternating(count: usize) -> Vec<LayoutDescriptor> {
    (0..count)
        .map(|i| if i % 2 == 0 { c::long_long() } else { c::double() })
        .collect()
}

/// The call-overhead benchmark's downcalls
pub fn call_overhead_table() -> DowncallResult<DowncallTable> {
    let point = point_layout()?;
    DowncallTable::builder()
        .function("func", FunctionDescriptor::of_void([]))
        .function("identity", FunctionDescriptor::of(c::int(), [c::int()]))
        .function(
            "identity_struct",
            FunctionDescriptor::of(point.clone(), [point]),
        )
        .function(
            "identity_memory_address",
            FunctionDescriptor::of(c::pointer(), [c::pointer()]),
        )
        .function("args5", FunctionDescriptor::of_void(args_alternating(5)))
        .function("args10", FunctionDescriptor::of_void(args_alternating(10)))
        .build()
}
