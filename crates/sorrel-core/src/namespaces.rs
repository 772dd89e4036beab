use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::error::Error;
use crate::value::Value;

/// A mutable cell with a stable identity, owned by a namespace.
///
/// Identity is the `Arc` allocation; two vars are the same var iff they are
/// the same allocation. The root value and the macro flag are the only
/// mutable parts.
pub struct Var {
    ns: Arc<str>,
    name: Arc<str>,
    root: RwLock<Value>,
    macro_flag: AtomicBool,
}

impl Var {
    fn new(ns: Arc<str>, name: Arc<str>) -> Self {
        Self {
            ns,
            name,
            root: RwLock::new(Value::Nil),
            macro_flag: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.ns
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.ns, self.name)
    }

    pub fn deref(&self) -> Value {
        self.root.read().unwrap().clone()
    }

    pub fn set_root(&self, value: Value) {
        *self.root.write().unwrap() = value;
    }

    pub fn is_macro(&self) -> bool {
        self.macro_flag.load(Ordering::Acquire)
    }

    pub fn set_macro(&self) {
        self.macro_flag.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#'{}", self.qualified_name())
    }
}

/// A named mapping from short symbol to Var. The var set only grows.
pub struct Namespace {
    name: Arc<str>,
    bindings: RwLock<HashMap<String, Arc<Var>>>,
    refers: RwLock<Vec<Arc<Namespace>>>,
}

impl Namespace {
    pub fn new(name: impl AsRef<str>) -> Arc<Self> {
        Arc::new(Self {
            name: Arc::from(name.as_ref()),
            bindings: RwLock::new(HashMap::new()),
            refers: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the var named `name`, creating it with a nil root on first use.
    /// Re-interning never replaces the existing cell.
    pub fn intern(&self, name: &str) -> Arc<Var> {
        let mut bindings = self.bindings.write().unwrap();
        bindings
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Var::new(self.name.clone(), Arc::from(name))))
            .clone()
    }

    /// Define or redefine `name`, returning its var.
    pub fn def(&self, name: &str, value: Value) -> Arc<Var> {
        let var = self.intern(name);
        var.set_root(value);
        var
    }

    /// Define `name` as a macro function.
    pub fn def_macro(&self, name: &str, func: Value) -> Arc<Var> {
        let var = self.def(name, func);
        var.set_macro();
        var
    }

    /// Resolve `name` in this namespace, falling back to referred
    /// namespaces in order.
    pub fn lookup(&self, name: &str) -> Option<Arc<Var>> {
        if let Some(var) = self.bindings.read().unwrap().get(name) {
            return Some(var.clone());
        }
        for referred in self.refers.read().unwrap().iter() {
            if let Some(var) = referred.bindings.read().unwrap().get(name) {
                return Some(var.clone());
            }
        }
        None
    }

    /// Make every var of `other` visible to unqualified lookups here.
    pub fn refer(&self, other: Arc<Namespace>) {
        self.refers.write().unwrap().push(other);
    }

    pub fn var_count(&self) -> usize {
        self.bindings.read().unwrap().len()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("vars", &self.var_count())
            .finish()
    }
}

/// Process-wide namespace registry. Cheap to clone; an explicit registry can
/// be threaded through embedding code, while [`Registry::global`] serves the
/// REPL.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

pub const LANG_NS: &str = "lang";

impl Registry {
    /// An empty registry with no namespaces. Most callers want
    /// [`Registry::bootstrapped`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                namespaces: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// A registry with the `lang` namespace seeded: primitives plus the
    /// embedded core library.
    pub fn bootstrapped() -> Result<Self, Error> {
        let registry = Registry::new();
        crate::builtins::install_lang(&registry);
        crate::builtins::load_core(&registry)?;
        Ok(registry)
    }

    /// The shared default registry used by the REPL and `eval_source`.
    pub fn global() -> Registry {
        static GLOBAL: Lazy<Registry> = Lazy::new(|| {
            Registry::bootstrapped()
                .unwrap_or_else(|e| panic!("lang namespace bootstrap failed: {}", e))
        });
        GLOBAL.clone()
    }

    pub fn register(&self, ns: Arc<Namespace>) -> Arc<Namespace> {
        self.inner
            .namespaces
            .write()
            .unwrap()
            .insert(ns.name().to_string(), ns.clone());
        ns
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Namespace>> {
        self.inner.namespaces.read().unwrap().get(name).cloned()
    }

    /// Fetch or create a namespace. Fresh namespaces refer `lang` so the
    /// primitives resolve unqualified.
    pub fn ensure(&self, name: &str) -> Arc<Namespace> {
        if let Some(ns) = self.lookup(name) {
            return ns;
        }
        let ns = Namespace::new(name);
        if name != LANG_NS {
            if let Some(lang) = self.lookup(LANG_NS) {
                ns.refer(lang);
            }
        }
        self.register(ns)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
