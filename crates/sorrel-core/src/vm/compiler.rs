use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use im::Vector;

use crate::error::Error;
use crate::namespaces::{Namespace, Registry, Var};
use crate::reader;
use crate::value::{Symbol, Value};
use crate::vm::bytecode::{Chunk, Func, Op};
use crate::vm::frame::invoke;

/// Compiles value trees into chunks against a namespace.
///
/// The registry is an explicit context so embedders can isolate worlds;
/// [`Compiler::new`] wires the shared global registry for REPL use.
pub struct Compiler {
    ns: Arc<Namespace>,
    registry: Registry,
}

impl Compiler {
    pub fn new(ns: Arc<Namespace>) -> Self {
        Self::with_registry(ns, Registry::global())
    }

    pub fn with_registry(ns: Arc<Namespace>, registry: Registry) -> Self {
        Self { ns, registry }
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.ns
    }

    /// Read and compile `source`. A single form compiles directly; several
    /// top-level forms compile as an implicit `do`.
    pub fn compile(&self, source: &str) -> Result<Chunk, Error> {
        let forms = reader::read_many(source)?;
        if forms.is_empty() {
            return Err(Error::read("at least one form is required", 1, 1));
        }
        self.compile_program(&forms)
    }

    /// Compile one already-read form.
    pub fn compile_form(&self, form: &Value) -> Result<Chunk, Error> {
        self.compile_program(std::slice::from_ref(form))
    }

    fn compile_program(&self, forms: &[Value]) -> Result<Chunk, Error> {
        let mut fc = FnCompiler::top_level(self);
        fc.compile_body(forms)?;
        fc.finish(0)
    }

    fn resolve_var(&self, sym: &Symbol) -> Option<Arc<Var>> {
        match &sym.ns {
            Some(ns_name) => self.registry.lookup(ns_name)?.lookup(&sym.name),
            None => self.ns.lookup(&sym.name),
        }
    }
}

/// How a lexical name reaches the operand stack.
#[derive(Clone, Copy, Debug)]
enum Binding {
    /// slot in the frame's argument vector
    Argument(usize),
    /// `let` value at an absolute position on the simulated stack
    Local(usize),
}

/// Per-chunk compilation state: bytecode buffer, constant pool with
/// equality dedup, lexical scopes, closure captures and the simulated
/// operand-stack depth that becomes the chunk's max.
struct FnCompiler<'a> {
    ctx: &'a Compiler,
    chunk: Chunk,
    const_ids: HashMap<Value, usize>,
    scopes: Vec<HashMap<String, Binding>>,
    captures: Vec<Symbol>,
    capture_ids: HashMap<String, usize>,
    enclosing_names: HashSet<String>,
    depth: usize,
    max_depth: usize,
    fn_name_hint: Option<Arc<str>>,
}

impl<'a> FnCompiler<'a> {
    fn top_level(ctx: &'a Compiler) -> Self {
        Self {
            ctx,
            chunk: Chunk::new(),
            const_ids: HashMap::new(),
            scopes: Vec::new(),
            captures: Vec::new(),
            capture_ids: HashMap::new(),
            enclosing_names: HashSet::new(),
            depth: 0,
            max_depth: 0,
            fn_name_hint: None,
        }
    }

    fn function(ctx: &'a Compiler, enclosing_names: HashSet<String>, params: &[String]) -> Self {
        let mut args = HashMap::new();
        for (i, name) in params.iter().enumerate() {
            args.insert(name.clone(), Binding::Argument(i));
        }
        Self {
            ctx,
            chunk: Chunk::new(),
            const_ids: HashMap::new(),
            scopes: vec![args],
            captures: Vec::new(),
            capture_ids: HashMap::new(),
            enclosing_names,
            depth: 0,
            max_depth: 0,
            fn_name_hint: None,
        }
    }

    fn finish(mut self, params: usize) -> Result<Chunk, Error> {
        self.chunk.emit(Op::Ret);
        self.chunk.set_max_stack(self.max_depth);
        self.chunk.set_params(params);
        Ok(self.chunk)
    }

    fn grow(&mut self, n: usize) {
        self.depth += n;
        if self.depth > self.max_depth {
            self.max_depth = self.depth;
        }
    }

    fn shrink(&mut self, n: usize) -> Result<(), Error> {
        self.depth = self
            .depth
            .checked_sub(n)
            .ok_or_else(|| Error::compile("operand stack imbalance"))?;
        Ok(())
    }

    fn add_const(&mut self, value: Value) -> usize {
        if let Some(idx) = self.const_ids.get(&value) {
            return *idx;
        }
        let idx = self.chunk.add_const(value.clone());
        self.const_ids.insert(value, idx);
        idx
    }

    fn emit_const(&mut self, value: Value) {
        let idx = self.add_const(value);
        self.chunk.emit_with(Op::Ldc, idx as u32);
        self.grow(1);
    }

    /// Compile one form; always nets exactly one value on the stack.
    fn compile_form(&mut self, form: &Value) -> Result<(), Error> {
        match form {
            Value::Symbol(sym) => self.compile_symbol(sym),
            Value::Vector(items) => self.compile_builtin_call("vector", items.iter()),
            Value::Map(entries) => {
                let flat: Vec<Value> = entries
                    .iter()
                    .flat_map(|(k, v)| [k.clone(), v.clone()])
                    .collect();
                self.compile_builtin_call("hash-map", flat.iter())
            }
            Value::List(items) if !items.is_empty() => self.compile_list(items),
            // remaining atoms (and the empty list) evaluate to themselves
            other => {
                self.emit_const(other.clone());
                Ok(())
            }
        }
    }

    fn lexical_binding(&self, name: &str) -> Option<Binding> {
        for scope in self.scopes.iter().rev() {
            if let Some(binding) = scope.get(name) {
                return Some(*binding);
            }
        }
        None
    }

    fn is_lexical(&self, name: &str) -> bool {
        self.lexical_binding(name).is_some() || self.capture_ids.contains_key(name)
    }

    /// Resolution order: innermost lexical binding, existing capture,
    /// capturable name from an enclosing function, namespace var.
    fn compile_symbol(&mut self, sym: &Symbol) -> Result<(), Error> {
        if !sym.is_qualified() {
            if let Some(binding) = self.lexical_binding(&sym.name) {
                match binding {
                    Binding::Argument(idx) => {
                        self.chunk.emit_with(Op::Lda, idx as u32);
                        self.grow(1);
                    }
                    Binding::Local(pos) => {
                        debug_assert!(pos < self.depth);
                        let from_top = self.depth - 1 - pos;
                        self.chunk.emit_with(Op::Dpn, from_top as u32);
                        self.grow(1);
                    }
                }
                return Ok(());
            }
            if let Some(idx) = self.capture_ids.get(sym.name.as_ref()) {
                self.chunk.emit_with(Op::Ldk, *idx as u32);
                self.grow(1);
                return Ok(());
            }
            if self.enclosing_names.contains(sym.name.as_ref()) {
                let idx = self.captures.len();
                self.captures.push(sym.clone());
                self.capture_ids.insert(sym.name.to_string(), idx);
                self.chunk.emit_with(Op::Ldk, idx as u32);
                self.grow(1);
                return Ok(());
            }
        }
        match self.ctx.resolve_var(sym) {
            Some(var) => {
                self.emit_const(Value::Var(var));
                self.chunk.emit(Op::Ldv);
                Ok(())
            }
            None => Err(Error::compile(format!("unable to resolve symbol: {}", sym))),
        }
    }

    fn compile_list(&mut self, items: &Vector<Value>) -> Result<(), Error> {
        let head = &items[0];
        let args: Vec<Value> = items.iter().skip(1).cloned().collect();

        if let Value::Symbol(sym) = head {
            // a lexical binding shadows macros and namespace vars alike,
            // including bindings this fn would capture from enclosing scopes
            if !sym.is_qualified()
                && (self.is_lexical(&sym.name) || self.enclosing_names.contains(sym.name.as_ref()))
            {
                return self.compile_invoke(head, &args);
            }
            if let Some(var) = self.ctx.resolve_var(sym) {
                if var.is_macro() {
                    return self.compile_macro_call(sym, &var, &args);
                }
            }
            if !sym.is_qualified() {
                match sym.name.as_ref() {
                    "quote" => return self.compile_quote(&args),
                    "if" => return self.compile_if(&args),
                    "do" => return self.compile_body(&args),
                    "def" => return self.compile_def(&args),
                    "fn" => return self.compile_fn(&args),
                    "let" => return self.compile_let(&args),
                    _ => {}
                }
            }
        }
        self.compile_invoke(head, &args)
    }

    /// Run the macro on its unevaluated argument forms, then compile
    /// whatever it returns.
    fn compile_macro_call(
        &mut self,
        sym: &Symbol,
        var: &Arc<Var>,
        args: &[Value],
    ) -> Result<(), Error> {
        let expansion = invoke(&var.deref(), args)
            .map_err(|e| Error::compile(format!("macro expansion of {} failed", sym)).wrap(e))?;
        self.compile_form(&expansion)
    }

    fn compile_invoke(&mut self, head: &Value, args: &[Value]) -> Result<(), Error> {
        self.compile_form(head)?;
        for arg in args {
            self.compile_form(arg)?;
        }
        self.chunk.emit_with(Op::Inv, args.len() as u32);
        self.shrink(args.len())
    }

    /// Compile `name args...` as an invocation of a `lang` builtin. Vector
    /// and map literals lower through their constructor functions.
    fn compile_builtin_call<'v>(
        &mut self,
        name: &str,
        args: impl Iterator<Item = &'v Value>,
    ) -> Result<(), Error> {
        let var = self
            .ctx
            .resolve_var(&Symbol::simple(name))
            .ok_or_else(|| Error::compile(format!("builtin {} is not defined", name)))?;
        self.emit_const(Value::Var(var));
        self.chunk.emit(Op::Ldv);
        let mut arity = 0;
        for arg in args {
            self.compile_form(arg)?;
            arity += 1;
        }
        self.chunk.emit_with(Op::Inv, arity as u32);
        self.shrink(arity)
    }

    fn compile_quote(&mut self, args: &[Value]) -> Result<(), Error> {
        let [form] = args else {
            return Err(Error::compile("quote expects exactly one form"));
        };
        self.emit_const(form.clone());
        Ok(())
    }

    /// Branch offsets are relative to the opcode byte of the branch
    /// instruction; the VM adds the offset to `ip`.
    fn compile_if(&mut self, args: &[Value]) -> Result<(), Error> {
        if !(2..=3).contains(&args.len()) {
            return Err(Error::compile(
                "if expects a condition and one or two branches",
            ));
        }
        self.compile_form(&args[0])?;
        let brf_at = self.chunk.len();
        self.chunk.emit_with(Op::Brf, 0);
        self.shrink(1)?;
        let branch_depth = self.depth;

        self.compile_form(&args[1])?;
        let jmp_at = self.chunk.len();
        self.chunk.emit_with(Op::Jmp, 0);

        self.chunk
            .patch_u32(brf_at + 1, (self.chunk.len() - brf_at) as u32);
        self.depth = branch_depth;
        match args.get(2) {
            Some(form) => self.compile_form(form)?,
            None => self.emit_const(Value::Nil),
        }
        self.chunk
            .patch_u32(jmp_at + 1, (self.chunk.len() - jmp_at) as u32);
        Ok(())
    }

    /// Implicit `do`: every form but the last is compiled and popped.
    fn compile_body(&mut self, forms: &[Value]) -> Result<(), Error> {
        match forms.split_last() {
            None => {
                self.emit_const(Value::Nil);
                Ok(())
            }
            Some((last, init)) => {
                for form in init {
                    self.compile_form(form)?;
                    self.chunk.emit(Op::Pop);
                    self.shrink(1)?;
                }
                self.compile_form(last)
            }
        }
    }

    /// `(def sym value)` interns the var, assigns, and leaves the var.
    fn compile_def(&mut self, args: &[Value]) -> Result<(), Error> {
        let [name_form, value_form] = args else {
            return Err(Error::compile("def expects a symbol and a value"));
        };
        let sym = name_form
            .as_symbol()
            .map_err(|_| Error::compile("def expects a symbol name"))?;
        if sym.is_qualified() {
            return Err(Error::compile("def expects an unqualified symbol"));
        }
        let var = self.ctx.ns.intern(&sym.name);
        self.emit_const(Value::Var(var));
        self.fn_name_hint = Some(sym.name.clone());
        self.compile_form(value_form)?;
        self.fn_name_hint = None;
        self.chunk.emit(Op::Stv);
        self.shrink(1)
    }

    /// `(fn [params] body...)`. The body compiles into a fresh inner chunk;
    /// symbols the body closes over are recorded by the inner compiler and
    /// compiled here, in the enclosing scope, once per capture slot.
    fn compile_fn(&mut self, args: &[Value]) -> Result<(), Error> {
        let Some(params_form) = args.first() else {
            return Err(Error::compile("fn expects a parameter vector"));
        };
        let Value::Vector(param_items) = params_form else {
            return Err(Error::compile("fn parameters must be a vector"));
        };
        let mut params = Vec::with_capacity(param_items.len());
        for item in param_items {
            match item {
                Value::Symbol(s) if !s.is_qualified() => params.push(s.name.to_string()),
                other => {
                    return Err(Error::compile(format!(
                        "fn parameter must be a simple symbol, got {}",
                        other
                    )))
                }
            }
        }

        let mut visible = self.enclosing_names.clone();
        for scope in &self.scopes {
            visible.extend(scope.keys().cloned());
        }
        visible.extend(self.capture_ids.keys().cloned());

        let name_hint = self.fn_name_hint.take();
        let mut inner = FnCompiler::function(self.ctx, visible, &params);
        inner.compile_body(&args[1..])?;
        let captures = std::mem::take(&mut inner.captures);
        let inner_chunk = Arc::new(inner.finish(params.len())?);

        let func = match &name_hint {
            Some(name) => Func::named(inner_chunk, name.as_ref()),
            None => Func::new(inner_chunk),
        };
        self.emit_const(Value::Func(Arc::new(func)));
        for sym in &captures {
            self.compile_symbol(sym)?;
            self.chunk.emit(Op::Pak);
            self.shrink(1)?;
        }
        Ok(())
    }

    /// `(let [s1 e1 ...] body...)`. Binding values stay on the stack and
    /// are addressed with DPN; PON lifts the body result past them.
    fn compile_let(&mut self, args: &[Value]) -> Result<(), Error> {
        let Some(Value::Vector(bindings)) = args.first() else {
            return Err(Error::compile("let expects a binding vector"));
        };
        if bindings.len() % 2 != 0 {
            return Err(Error::compile("let bindings must come in pairs"));
        }

        self.scopes.push(HashMap::new());
        let result = self.compile_let_inner(bindings, &args[1..]);
        self.scopes.pop();
        result
    }

    fn compile_let_inner(
        &mut self,
        bindings: &Vector<Value>,
        body: &[Value],
    ) -> Result<(), Error> {
        let mut count = 0;
        let mut iter = bindings.iter();
        while let (Some(name_form), Some(value_form)) = (iter.next(), iter.next()) {
            let sym = name_form
                .as_symbol()
                .map_err(|_| Error::compile("let binding name must be a symbol"))?;
            if sym.is_qualified() {
                return Err(Error::compile("let binding name must be unqualified"));
            }
            self.compile_form(value_form)?;
            let slot = Binding::Local(self.depth - 1);
            self.scopes
                .last_mut()
                .expect("let scope pushed")
                .insert(sym.name.to_string(), slot);
            count += 1;
        }
        self.compile_body(body)?;
        self.chunk.emit_with(Op::Pon, count as u32);
        self.shrink(count)
    }
}
