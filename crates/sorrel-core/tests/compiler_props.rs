use sorrel_core::{Compiler, Error, EvalOptions, Frame, Registry, Value};

fn fresh_compiler() -> Compiler {
    let registry = Registry::bootstrapped().expect("bootstrap");
    let ns = registry.ensure("user");
    Compiler::with_registry(ns, registry)
}

#[test]
fn constant_dedup_is_per_compilation() {
    let compiler = fresh_compiler();
    let chunk = compiler
        .compile("(+ 7 7 (if true 7 7) :k :k \"s\" \"s\")")
        .unwrap();
    let sevens = chunk
        .consts()
        .iter()
        .filter(|v| **v == Value::Int(7))
        .count();
    let keywords = chunk
        .consts()
        .iter()
        .filter(|v| **v == Value::keyword("k"))
        .count();
    let strings = chunk
        .consts()
        .iter()
        .filter(|v| **v == Value::string("s"))
        .count();
    assert_eq!((sevens, keywords, strings), (1, 1, 1));
}

#[test]
fn declared_max_stack_is_sufficient() {
    // The VM refuses to push past the declared max, so successfully running
    // a deeply nested program shows the compiler's simulation covers it.
    let compiler = fresh_compiler();
    let sources = [
        "(+ 1 (+ 2 (+ 3 (+ 4 (+ 5 6)))))",
        "(let [a 1 b 2 c 3] (if (gt a b) (+ a b c) (let [d 4] (+ a b c d))))",
        "(do 1 (do 2 (do 3 [4 5 {:a 6}])))",
        "((fn [f] (f (f 10))) (fn [x] (* x x)))",
    ];
    for src in sources {
        let chunk = compiler.compile(src).unwrap_or_else(|e| panic!("{}: {}", src, e));
        assert!(chunk.max_stack() > 0, "{}", src);
        Frame::new(&chunk, Vec::new())
            .run()
            .unwrap_or_else(|e| panic!("{}: {}", src, e));
    }
}

#[test]
fn multiple_top_level_forms_compile_as_do() {
    let registry = Registry::bootstrapped().expect("bootstrap");
    let value = sorrel_core::eval_source_in(
        "(def twice (fn [x] (* 2 x))) (twice 21)",
        &EvalOptions::default(),
        &registry,
    )
    .unwrap();
    assert_eq!(value, Value::Int(42));
}

#[test]
fn empty_input_is_a_read_error() {
    let compiler = fresh_compiler();
    assert!(matches!(compiler.compile(""), Err(Error::Read { .. })));
    assert!(matches!(
        compiler.compile("; just a comment"),
        Err(Error::Read { .. })
    ));
}

#[test]
fn compiled_chunks_can_take_arguments() {
    let compiler = fresh_compiler();
    // a bare fn body addressed through the embedding API
    let chunk = compiler.compile("(fn [a b] (+ a b))").unwrap();
    let closure = Frame::new(&chunk, Vec::new()).run().unwrap();
    let result = sorrel_core::invoke(&closure, &[Value::Int(40), Value::Int(2)]).unwrap();
    assert_eq!(result, Value::Int(42));
}

#[test]
fn native_fn_embedding_contract() {
    let registry = Registry::bootstrapped().expect("bootstrap");
    let ns = registry.ensure("user");
    ns.def(
        "host-hypot2",
        Value::native_fn("host-hypot2", |args| {
            let a = args[0].as_int()?;
            let b = args[1].as_int()?;
            Ok(Value::Int(a * a + b * b))
        }),
    );
    let value = sorrel_core::eval_source_in(
        "(host-hypot2 3 4)",
        &EvalOptions::default(),
        &registry,
    )
    .unwrap();
    assert_eq!(value, Value::Int(25));
}

#[test]
fn nested_frame_errors_are_wrapped() {
    let registry = Registry::bootstrapped().expect("bootstrap");
    let err = sorrel_core::eval_source_in(
        "(do (def boom (fn [] (/ 1 0))) (boom))",
        &EvalOptions::default(),
        &registry,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Execution { .. }));
    let rendered = sorrel_core::format_error(&err).join("\n");
    assert!(rendered.contains("division by zero"), "{}", rendered);
}
