use std::sync::Arc;

use im::{HashMap, Vector};

use crate::error::Error;
use crate::namespaces::{Namespace, Registry, LANG_NS};
use crate::reader;
use crate::value::Value;
use crate::vm::{Compiler, Frame};

fn expect_arity(name: &str, args: &[Value], n: usize) -> Result<(), Error> {
    if args.len() != n {
        return Err(Error::native(format!(
            "{} expects {} argument{}, got {}",
            name,
            n,
            if n == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

fn expect_seq(name: &str, value: &Value) -> Result<Vector<Value>, Error> {
    value.seq_items().ok_or_else(|| {
        Error::native(format!(
            "{} expects a sequence, got {}",
            name,
            value.value_type()
        ))
    })
}

/// Strings render raw in printed output; everything else uses the readable
/// representation.
fn display_raw(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        other => other.to_string(),
    }
}

fn join_raw(args: &[Value], sep: &str) -> String {
    args.iter()
        .map(display_raw)
        .collect::<Vec<_>>()
        .join(sep)
}

fn add(args: &[Value]) -> Result<Value, Error> {
    let mut acc: i64 = 0;
    for arg in args {
        acc = acc
            .checked_add(arg.as_int()?)
            .ok_or_else(|| Error::native("integer overflow in +"))?;
    }
    Ok(Value::Int(acc))
}

fn mul(args: &[Value]) -> Result<Value, Error> {
    let mut acc: i64 = 1;
    for arg in args {
        acc = acc
            .checked_mul(arg.as_int()?)
            .ok_or_else(|| Error::native("integer overflow in *"))?;
    }
    Ok(Value::Int(acc))
}

fn sub(args: &[Value]) -> Result<Value, Error> {
    let (first, rest) = args
        .split_first()
        .ok_or_else(|| Error::native("- expects at least one argument"))?;
    let first = first.as_int()?;
    if rest.is_empty() {
        return first
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| Error::native("integer overflow in -"));
    }
    let mut acc = first;
    for arg in rest {
        acc = acc
            .checked_sub(arg.as_int()?)
            .ok_or_else(|| Error::native("integer overflow in -"))?;
    }
    Ok(Value::Int(acc))
}

/// `(/ n)` is the integer reciprocal; otherwise divide left to right.
/// Division by zero is an error rather than a nil.
fn div(args: &[Value]) -> Result<Value, Error> {
    let (first, rest) = args
        .split_first()
        .ok_or_else(|| Error::native("/ expects at least one argument"))?;
    let first = first.as_int()?;
    let checked = |a: i64, b: i64| -> Result<i64, Error> {
        if b == 0 {
            return Err(Error::native("division by zero"));
        }
        a.checked_div(b)
            .ok_or_else(|| Error::native("integer overflow in /"))
    };
    if rest.is_empty() {
        return checked(1, first).map(Value::Int);
    }
    let mut acc = first;
    for arg in rest {
        acc = checked(acc, arg.as_int()?)?;
    }
    Ok(Value::Int(acc))
}

fn equals(args: &[Value]) -> Result<Value, Error> {
    let (first, rest) = args
        .split_first()
        .ok_or_else(|| Error::native("= expects at least one argument"))?;
    Ok(Value::Bool(rest.iter().all(|v| v == first)))
}

fn gt(args: &[Value]) -> Result<Value, Error> {
    expect_arity("gt", args, 2)?;
    Ok(Value::Bool(args[0].as_int()? > args[1].as_int()?))
}

fn lt(args: &[Value]) -> Result<Value, Error> {
    expect_arity("lt", args, 2)?;
    Ok(Value::Bool(args[0].as_int()? < args[1].as_int()?))
}

fn set_macro(args: &[Value]) -> Result<Value, Error> {
    expect_arity("set-macro!", args, 1)?;
    let var = args[0].as_var()?;
    var.set_macro();
    Ok(args[0].clone())
}

fn vector(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Vector(args.iter().cloned().collect()))
}

fn list(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::List(args.iter().cloned().collect()))
}

fn hash_map(args: &[Value]) -> Result<Value, Error> {
    if args.len() % 2 != 0 {
        return Err(Error::native("hash-map expects an even number of arguments"));
    }
    let mut entries = HashMap::new();
    for pair in args.chunks(2) {
        entries.insert(pair[0].clone(), pair[1].clone());
    }
    Ok(Value::Map(entries))
}

fn get(args: &[Value]) -> Result<Value, Error> {
    if args.len() != 2 && args.len() != 3 {
        return Err(Error::native("get expects a collection, a key and an optional default"));
    }
    let missing = args.get(2).cloned().unwrap_or(Value::Nil);
    let found = match (&args[0], &args[1]) {
        (Value::Nil, _) => None,
        (Value::Map(entries), key) => entries.get(key).cloned(),
        (Value::Vector(items), Value::Int(idx)) => {
            usize::try_from(*idx).ok().and_then(|i| items.get(i).cloned())
        }
        (other, _) => {
            return Err(Error::native(format!(
                "get expects a map or vector, got {}",
                other.value_type()
            )))
        }
    };
    Ok(found.unwrap_or(missing))
}

fn cons(args: &[Value]) -> Result<Value, Error> {
    expect_arity("cons", args, 2)?;
    let mut items = expect_seq("cons", &args[1])?;
    items.push_front(args[0].clone());
    Ok(Value::List(items))
}

fn first(args: &[Value]) -> Result<Value, Error> {
    expect_arity("first", args, 1)?;
    let items = expect_seq("first", &args[0])?;
    Ok(items.get(0).cloned().unwrap_or(Value::Nil))
}

fn second(args: &[Value]) -> Result<Value, Error> {
    expect_arity("second", args, 1)?;
    let items = expect_seq("second", &args[0])?;
    Ok(items.get(1).cloned().unwrap_or(Value::Nil))
}

fn next(args: &[Value]) -> Result<Value, Error> {
    expect_arity("next", args, 1)?;
    let items = expect_seq("next", &args[0])?;
    if items.len() <= 1 {
        return Ok(Value::Nil);
    }
    Ok(Value::List(items.iter().skip(1).cloned().collect()))
}

fn rest(args: &[Value]) -> Result<Value, Error> {
    expect_arity("rest", args, 1)?;
    let items = expect_seq("rest", &args[0])?;
    Ok(Value::List(items.iter().skip(1).cloned().collect()))
}

fn count(args: &[Value]) -> Result<Value, Error> {
    expect_arity("count", args, 1)?;
    let n = match &args[0] {
        Value::Map(entries) => entries.len(),
        Value::Str(s) => s.chars().count(),
        other => expect_seq("count", other)?.len(),
    };
    Ok(Value::Int(n as i64))
}

fn nth(args: &[Value]) -> Result<Value, Error> {
    expect_arity("nth", args, 2)?;
    let items = expect_seq("nth", &args[0])?;
    let idx = args[1].as_int()?;
    usize::try_from(idx)
        .ok()
        .and_then(|i| items.get(i).cloned())
        .ok_or_else(|| Error::native(format!("nth: index {} out of bounds", idx)))
}

fn str_concat(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::string(join_raw(args, "")))
}

fn println_fn(args: &[Value]) -> Result<Value, Error> {
    println!("{}", join_raw(args, " "));
    Ok(Value::Nil)
}

fn type_of(args: &[Value]) -> Result<Value, Error> {
    expect_arity("type", args, 1)?;
    Ok(Value::keyword(args[0].value_type().name()))
}

/// Seed the `lang` namespace with the primitive set.
pub fn install_lang(registry: &Registry) -> Arc<Namespace> {
    let ns = registry.ensure(LANG_NS);

    ns.def("+", Value::native_fn("+", add));
    ns.def("-", Value::native_fn("-", sub));
    ns.def("*", Value::native_fn("*", mul));
    ns.def("/", Value::native_fn("/", div));

    ns.def("=", Value::native_fn("=", equals));
    ns.def("gt", Value::native_fn("gt", gt));
    ns.def("lt", Value::native_fn("lt", lt));

    ns.def("set-macro!", Value::native_fn("set-macro!", set_macro));

    ns.def("vector", Value::native_fn("vector", vector));
    ns.def("list", Value::native_fn("list", list));
    ns.def("hash-map", Value::native_fn("hash-map", hash_map));
    ns.def("get", Value::native_fn("get", get));
    ns.def("cons", Value::native_fn("cons", cons));
    ns.def("first", Value::native_fn("first", first));
    ns.def("second", Value::native_fn("second", second));
    ns.def("next", Value::native_fn("next", next));
    ns.def("rest", Value::native_fn("rest", rest));
    ns.def("count", Value::native_fn("count", count));
    ns.def("nth", Value::native_fn("nth", nth));

    ns.def("str", Value::native_fn("str", str_concat));
    ns.def("println", Value::native_fn("println", println_fn));
    ns.def("type", Value::native_fn("type", type_of));

    ns
}

const CORE_SRC: &str = include_str!("core.sor");

/// Compile and run the embedded core library into `lang`. The core defines
/// derived functions and the first macros on top of the primitives.
pub fn load_core(registry: &Registry) -> Result<(), Error> {
    let ns = registry.ensure(LANG_NS);
    let compiler = Compiler::with_registry(ns, registry.clone());
    for form in reader::read_many(CORE_SRC)? {
        let chunk = compiler
            .compile_form(&form)
            .map_err(|e| Error::compile(format!("core library form {} is invalid", form)).wrap(e))?;
        Frame::new(&chunk, Vec::new())
            .run()
            .map_err(|e| Error::execution("core library evaluation failed").wrap(e))?;
    }
    Ok(())
}
