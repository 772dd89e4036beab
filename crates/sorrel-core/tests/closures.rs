use sorrel_core::{eval_source_in, EvalOptions, Registry, Value};

fn fresh() -> Registry {
    Registry::bootstrapped().expect("bootstrap")
}

fn eval(registry: &Registry, src: &str) -> Value {
    eval_source_in(src, &EvalOptions::default(), registry)
        .unwrap_or_else(|e| panic!("{}: {}", src, e))
}

#[test]
fn functions_apply_their_arguments() {
    let registry = fresh();
    assert_eq!(eval(&registry, "((fn [x y] (- x y)) 10 4)"), Value::Int(6));
    assert_eq!(eval(&registry, "((fn [] 7))"), Value::Int(7));
}

#[test]
fn lexical_capture_reaches_enclosing_arguments() {
    let registry = fresh();
    assert_eq!(
        eval(&registry, "(((fn [a] (fn [b] (+ a b))) 3) 4)"),
        Value::Int(7)
    );
}

#[test]
fn capture_survives_outer_shadowing() {
    let registry = fresh();
    // the inner fn closes over the let-bound a, not the later def
    let src = "(do (def a 100)
                   (def f (let [a 3] (fn [b] (+ a b))))
                   (def a 1000)
                   (f 4))";
    assert_eq!(eval(&registry, src), Value::Int(7));
}

#[test]
fn closure_factories_do_not_share_captures() {
    let registry = fresh();
    let src = "(do (def mkadd (fn [n] (fn [x] (+ x n))))
                   (def add10 (mkadd 10))
                   (def add20 (mkadd 20))
                   (+ (add10 1) (add20 1)))";
    assert_eq!(eval(&registry, src), Value::Int(32));
}

#[test]
fn mkadd_scenario() {
    let registry = fresh();
    eval(&registry, "(def mkadd (fn [n] (fn [x] (+ x n))))");
    assert_eq!(eval(&registry, "((mkadd 10) 5)"), Value::Int(15));
}

#[test]
fn capture_chains_through_intermediate_functions() {
    let registry = fresh();
    // `a` crosses a function that never uses it itself
    assert_eq!(
        eval(&registry, "((((fn [a] (fn [] (fn [] a))) 9))) "),
        Value::Int(9)
    );
}

#[test]
fn closures_capture_let_slots() {
    let registry = fresh();
    assert_eq!(
        eval(&registry, "(let [x 2 f (fn [y] (+ x y))] (f 3))"),
        Value::Int(5)
    );
}

#[test]
fn recursion_routes_through_the_var() {
    let registry = fresh();
    let src = "(do (def fact (fn [n] (if (lt n 2) 1 (* n (fact (- n 1))))))
                   (fact 5))";
    assert_eq!(eval(&registry, src), Value::Int(120));
}

#[test]
fn arity_is_enforced_at_invocation() {
    let registry = fresh();
    let err = eval_source_in("((fn [x] x) 1 2)", &EvalOptions::default(), &registry).unwrap_err();
    assert!(err.to_string().contains("wrong number of arguments"));
}

#[test]
fn parameters_shadow_namespace_vars() {
    let registry = fresh();
    let src = "(do (def x 1) ((fn [x] (+ x x)) 21))";
    assert_eq!(eval(&registry, src), Value::Int(42));
}
