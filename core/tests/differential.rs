//! Dual-engine conformance corpus.
//!
//! The tree-walking interpreter and the bytecode VM are independent code
//! paths that must stay observationally equivalent: identical result values,
//! identical side effects, identical error classification. Every program here
//! runs through both engines with equivalent policies and the outcomes are
//! compared directly.

use ark_enclave::ast::{BinOp, Expression, FunctionDef, Literal, Node, SealedNode, Statement};
use ark_enclave::compiler::compile;
use ark_enclave::eval::Interpreter;
use ark_enclave::intrinsics::IntrinsicRegistry;
use ark_enclave::runtime::{RuntimeError, Scope, Value};
use ark_enclave::sandbox::{Capability, Policy};
use ark_enclave::types::TypeAnnotation;
use ark_enclave::vm::Vm;
use std::path::Path;
use std::rc::Rc;
use tempfile::tempdir;

fn int(i: i64) -> Expression {
    Expression::Literal(Literal::Integer(i))
}

fn float(x: f64) -> Expression {
    Expression::Literal(Literal::Float(x))
}

fn string(s: &str) -> Expression {
    Expression::Literal(Literal::String(s.to_string()))
}

fn var(name: &str) -> Expression {
    Expression::Variable(name.to_string())
}

fn bin(op: BinOp, l: Expression, r: Expression) -> Expression {
    Expression::BinaryOp {
        op,
        left: Box::new(l),
        right: Box::new(r),
    }
}

fn call(callee: &str, args: Vec<Expression>) -> Expression {
    Expression::Call {
        callee: callee.to_string(),
        args,
    }
}

fn assign(target: &str, value: Expression) -> Statement {
    Statement::Assignment {
        target: target.to_string(),
        value,
    }
}

fn function(name: &str, params: &[&str], body: Node) -> Statement {
    Statement::Function(FunctionDef {
        name: name.to_string(),
        params: params.iter().map(|s| s.to_string()).collect(),
        return_type: TypeAnnotation::Any,
        body: Box::new(SealedNode::seal(body).unwrap()),
    })
}

fn registry_for(root: &Path, caps: &[Capability]) -> IntrinsicRegistry {
    IntrinsicRegistry::with_defaults(Rc::new(Policy::new(root, caps)))
}

fn run_interp(registry: &IntrinsicRegistry, node: &Node) -> Result<Value, RuntimeError> {
    Interpreter::new(registry).eval(node, &Scope::new())
}

fn run_vm(registry: &IntrinsicRegistry, node: &Node) -> Result<Value, RuntimeError> {
    let program = compile(node).expect("corpus programs must compile");
    Vm::new(registry).run(&program, &Scope::new())
}

/// Run a program through both engines (each with its own sandbox root) and
/// require identical outcomes; successful runs also return the agreed value.
fn engines_agree(stmts: Vec<Statement>) -> Value {
    let node = Node::Statement(Statement::Block(stmts));
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let reg_a = registry_for(dir_a.path(), &[Capability::Crypto]);
    let reg_b = registry_for(dir_b.path(), &[Capability::Crypto]);

    let a = run_interp(&reg_a, &node).unwrap();
    let b = run_vm(&reg_b, &node).unwrap();
    assert_eq!(a, b, "engines disagree on result value");
    a
}

/// Both engines must fail, with the same rendered error (class and message).
fn engines_agree_on_error(stmts: Vec<Statement>) -> String {
    let node = Node::Statement(Statement::Block(stmts));
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let reg_a = registry_for(dir_a.path(), &[Capability::Crypto]);
    let reg_b = registry_for(dir_b.path(), &[Capability::Crypto]);

    let a = run_interp(&reg_a, &node).unwrap_err().to_string();
    let b = run_vm(&reg_b, &node).unwrap_err().to_string();
    assert_eq!(a, b, "engines disagree on error");
    a
}

fn fib_def() -> Statement {
    function(
        "fib",
        &["n"],
        Node::Statement(Statement::If {
            condition: bin(BinOp::Lt, var("n"), int(2)),
            then_block: vec![Statement::Expression(var("n"))],
            else_block: Some(vec![Statement::Expression(bin(
                BinOp::Add,
                call("fib", vec![bin(BinOp::Sub, var("n"), int(1))]),
                call("fib", vec![bin(BinOp::Sub, var("n"), int(2))]),
            ))]),
        }),
    )
}

#[test]
fn test_arithmetic_and_promotion() {
    assert_eq!(
        engines_agree(vec![Statement::Expression(bin(
            BinOp::Add,
            bin(BinOp::Mul, int(6), int(7)),
            int(0),
        ))]),
        Value::Integer(42)
    );
    assert_eq!(
        engines_agree(vec![Statement::Expression(bin(
            BinOp::Add,
            int(1),
            float(0.5),
        ))]),
        Value::Float(1.5)
    );
    assert_eq!(
        engines_agree(vec![Statement::Expression(bin(
            BinOp::Add,
            string("Sov"),
            string("ereign"),
        ))]),
        Value::String("Sovereign".to_string())
    );
}

#[test]
fn test_conditionals() {
    assert_eq!(
        engines_agree(vec![Statement::If {
            condition: bin(BinOp::Gt, int(3), int(2)),
            then_block: vec![Statement::Expression(string("yes"))],
            else_block: Some(vec![Statement::Expression(string("no"))]),
        }]),
        Value::String("yes".to_string())
    );
    // A false condition with no else produces Unit in both engines.
    assert_eq!(
        engines_agree(vec![Statement::If {
            condition: Expression::Literal(Literal::Boolean(false)),
            then_block: vec![Statement::Expression(int(1))],
            else_block: None,
        }]),
        Value::Unit
    );
}

#[test]
fn test_loop_accumulation() {
    let program = vec![
        assign("i", int(0)),
        assign("total", int(0)),
        Statement::While {
            condition: bin(BinOp::Lt, var("i"), int(100)),
            body: vec![
                assign("total", bin(BinOp::Add, var("total"), var("i"))),
                assign("i", bin(BinOp::Add, var("i"), int(1))),
            ],
        },
        Statement::Expression(var("total")),
    ];
    assert_eq!(engines_agree(program), Value::Integer(4950));
}

#[test]
fn test_fib_10_is_55() {
    assert_eq!(
        engines_agree(vec![
            fib_def(),
            Statement::Expression(call("fib", vec![int(10)])),
        ]),
        Value::Integer(55)
    );
}

#[test]
fn test_fib_25_naive_recursion() {
    assert_eq!(
        engines_agree(vec![
            fib_def(),
            Statement::Expression(call("fib", vec![int(25)])),
        ]),
        Value::Integer(75025)
    );
}

#[test]
fn test_print_returns_unit_on_both_engines() {
    assert_eq!(
        engines_agree(vec![
            fib_def(),
            Statement::Expression(call("print", vec![call("fib", vec![int(10)])])),
        ]),
        Value::Unit
    );
}

#[test]
fn test_closures_capture_lexically() {
    let inner = function(
        "inner",
        &["x"],
        Node::Expression(bin(BinOp::Add, var("x"), var("n"))),
    );
    let make_adder = function(
        "make_adder",
        &["n"],
        Node::Statement(Statement::Block(vec![
            inner,
            Statement::Expression(var("inner")),
        ])),
    );
    let program = vec![
        make_adder,
        assign("add2", call("make_adder", vec![int(2)])),
        assign("add10", call("make_adder", vec![int(10)])),
        Statement::Expression(Expression::List(vec![
            call("add2", vec![int(5)]),
            call("add10", vec![int(5)]),
        ])),
    ];
    assert_eq!(
        engines_agree(program),
        Value::List(vec![Value::Integer(7), Value::Integer(15)])
    );
}

#[test]
fn test_holes_are_inert_sentinels() {
    assert_eq!(
        engines_agree(vec![Statement::Expression(Expression::List(vec![
            Expression::Hole,
            int(1),
        ]))]),
        Value::List(vec![Value::Hole, Value::Integer(1)])
    );
}

#[test]
fn test_declarative_statements_are_uniform_noops() {
    let program = vec![
        Statement::FlowAnnotation {
            target: "x".to_string(),
            ty: TypeAnnotation::Integer,
        },
        Statement::NeuroBlock {
            name: "embedder".to_string(),
            directives: serde_json::json!({"epochs": 3, "rate": 0.1}),
        },
        Statement::Expression(int(9)),
    ];
    assert_eq!(engines_agree(program), Value::Integer(9));
}

#[test]
fn test_error_classification_matches() {
    let err = engines_agree_on_error(vec![Statement::Expression(bin(
        BinOp::Eq,
        string("1"),
        int(1),
    ))]);
    assert!(err.contains("TypeError"));

    let err = engines_agree_on_error(vec![Statement::Expression(var("ghost"))]);
    assert!(err.contains("variable not found"));

    let spin = function("spin", &[], Node::Expression(call("spin", vec![])));
    let err = engines_agree_on_error(vec![spin, Statement::Expression(call("spin", vec![]))]);
    assert!(err.contains("call depth exceeded"));

    let err = engines_agree_on_error(vec![Statement::Expression(call(
        "math.div",
        vec![int(1), int(0)],
    ))]);
    assert!(err.contains("division by zero"));
}

#[test]
fn test_fs_side_effects_match() {
    // Same program, one sandbox root per engine; both must leave the same
    // file behind and return the same read-back value.
    let program = Node::Statement(Statement::Block(vec![
        Statement::Expression(call(
            "sys.fs.write",
            vec![string("out.txt"), string("payload")],
        )),
        Statement::Expression(call("sys.fs.read", vec![string("out.txt")])),
    ]));
    let caps = [Capability::FsRead, Capability::FsWrite];

    let dir_a = tempdir().unwrap();
    let reg_a = registry_for(dir_a.path(), &caps);
    let a = run_interp(&reg_a, &program).unwrap();

    let dir_b = tempdir().unwrap();
    let reg_b = registry_for(dir_b.path(), &caps);
    let b = run_vm(&reg_b, &program).unwrap();

    assert_eq!(a, b);
    assert_eq!(a, Value::String("payload".to_string()));
    let file_a = std::fs::read_to_string(dir_a.path().join("out.txt")).unwrap();
    let file_b = std::fs::read_to_string(dir_b.path().join("out.txt")).unwrap();
    assert_eq!(file_a, file_b);
}

#[test]
fn test_protected_manifest_write_is_denied_and_untouched() {
    let program = Node::Statement(Statement::Expression(call(
        "sys.fs.write",
        vec![string("Cargo.toml"), string("pwned")],
    )));
    let caps = [Capability::FsRead, Capability::FsWrite];

    for engine in ["interp", "vm"] {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("Cargo.toml");
        std::fs::write(&manifest, "original").unwrap();
        let registry = registry_for(dir.path(), &caps);

        let err = match engine {
            "interp" => run_interp(&registry, &program).unwrap_err(),
            _ => run_vm(&registry, &program).unwrap_err(),
        };
        assert!(
            err.to_string().contains("SandboxViolation"),
            "{}: wrong error class: {}",
            engine,
            err
        );
        assert_eq!(std::fs::read_to_string(&manifest).unwrap(), "original");
    }
}

#[test]
fn test_exec_whitelist_parity() {
    let denied = Node::Statement(Statement::Expression(call(
        "sys.exec",
        vec![Expression::List(vec![string("rm"), string("--help")])],
    )));
    let allowed = Node::Statement(Statement::Expression(call(
        "sys.exec",
        vec![Expression::List(vec![string("echo"), string("Sovereign")])],
    )));

    for engine in ["interp", "vm"] {
        let dir = tempdir().unwrap();
        let policy = Policy::new(dir.path(), &[Capability::Exec])
            .with_whitelist(vec!["echo".to_string()]);
        let registry = IntrinsicRegistry::with_defaults(Rc::new(policy));

        let err = match engine {
            "interp" => run_interp(&registry, &denied).unwrap_err(),
            _ => run_vm(&registry, &denied).unwrap_err(),
        };
        assert!(err.to_string().contains("SandboxViolation"), "{}", err);

        let ok = match engine {
            "interp" => run_interp(&registry, &allowed).unwrap(),
            _ => run_vm(&registry, &allowed).unwrap(),
        };
        match ok {
            Value::Namespace(meta) => {
                assert_eq!(meta["stdout"], Value::String("Sovereign\n".to_string()));
                assert_eq!(meta["status"], Value::Integer(0));
                assert_eq!(meta["truncated"], Value::Boolean(false));
                assert_eq!(meta["timed_out"], Value::Boolean(false));
            }
            other => panic!("Expected Namespace metadata, got {:?}", other),
        }
    }
}

#[test]
fn test_tampered_unit_is_refused_before_execution_by_both_paths() {
    let mut sealed = SealedNode::seal(Node::Statement(Statement::Expression(call(
        "print",
        vec![string("never runs")],
    ))))
    .unwrap();
    sealed.content = Node::Statement(Statement::Expression(call(
        "print",
        vec![string("tampered")],
    )));

    // Interpreter path refuses at run(); the VM path refuses at load time.
    let dir = tempdir().unwrap();
    let registry = registry_for(dir.path(), &[]);
    let err = Interpreter::new(&registry)
        .run(&sealed, &Scope::new())
        .unwrap_err();
    assert!(err.to_string().contains("HashMismatch"));

    let json = serde_json::to_string(&sealed).unwrap();
    let err = ark_enclave::loader::load_program(&json).unwrap_err();
    assert!(err.to_string().contains("HashMismatch"));
}
