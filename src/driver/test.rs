use super::*;
use crate::config::Options;
use crate::error::{BackendError, ErrorKind, TauError};
use crate::repl::{Backend, Output, Repl};
use std::collections::VecDeque;

/// Interactive source fed from a script.
struct Scripted {
    lines: VecDeque<String>,
}

impl Scripted {
    fn new(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }
}

impl LineSource for Scripted {
    fn read_line(&mut self, _level: usize) -> Option<String> {
        self.lines.pop_front()
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

/// Backend that records what it is given instead of running it.
#[derive(Default)]
struct Recorder {
    loaded: Vec<String>,
    invoked: Vec<String>,
    refuse: bool,
}

impl Backend for Recorder {
    fn load(&mut self, unit: &Unit) -> Result<(), BackendError> {
        if self.refuse {
            return Err(BackendError::new("refused"));
        }
        self.loaded.push(unit.name.clone());
        Ok(())
    }

    fn invoke(&mut self, entry: &Entry) -> Result<Option<Output>, BackendError> {
        self.invoked.push(entry.name.clone());
        Ok(entry.returns.as_ref().map(|_| Output::Int(7)))
    }
}

fn quiet() -> Options {
    Options {
        quiet: true,
        ..Options::default()
    }
}

fn command(text: &str) -> CompileResult<Unit> {
    let mut session = Session::new(quiet());
    compile_command(&mut session, text)
}

fn labels(function: &Function) -> Vec<&str> {
    function.blocks.iter().map(|b| b.label.as_str()).collect()
}

#[test]
fn test_end_tracks_indentation() {
    let mut source = SourceBuffer::new(StrSource::new("    a\n\n        b\nc"));
    assert!(!source.end(1).unwrap());
    assert_eq!(source.next_line(1), Some((1, "    a".to_string())));
    // blank lines are skipped when reading from a file
    assert!(!source.end(2).unwrap());
    assert_eq!(source.next_line(2), Some((3, "        b".to_string())));
    assert!(source.end(2).unwrap());
    assert!(source.end(1).unwrap());
    assert!(!source.end(0).unwrap());
    assert_eq!(source.next_line(0).map(|(_, l)| l), Some("c".to_string()));
    assert!(source.end(0).unwrap());
}

#[test]
fn test_end_line_closes_a_block() {
    let mut source = SourceBuffer::new(StrSource::new("    a\nend\nb"));
    assert!(!source.end(1).unwrap());
    source.next_line(1);
    assert!(source.end(1).unwrap());
    assert_eq!(source.peek(0), Some("b"));
}

#[test]
fn test_bad_indentation() {
    let mut source = SourceBuffer::new(StrSource::new("        a"));
    let err = source.end(1).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert_eq!(err.location.map(|l| l.line), Some(1));

    let mut source = SourceBuffer::new(StrSource::new("      a"));
    assert_eq!(source.end(2).unwrap_err().kind, ErrorKind::Syntax);
}

#[test]
fn test_interactive_blank_line_ends_blocks() {
    let mut source = SourceBuffer::new(Scripted::new(&["        x", "", "y"]));
    assert!(!source.end(2).unwrap());
    source.next_line(2);
    // the inner block ends without consuming the blank line
    assert!(source.end(2).unwrap());
    assert!(source.end(1).unwrap());
    assert_eq!(source.peek(0), Some("y"));
}

#[test]
fn test_entry_returns_the_last_value() {
    let unit = command("x = 2\nx * 3").unwrap();
    let entry = unit.entry.clone().unwrap();
    assert_eq!(entry.name, "__unit_0");
    assert_eq!(entry.returns, Some(Type::Int));
    assert_eq!(unit.function("__unit_0").unwrap().return_type, IRType::I32);

    // Bool values cross the entry boundary as i32
    let unit = command("1 < 2").unwrap();
    assert_eq!(unit.entry.as_ref().unwrap().returns, Some(Type::Bool));
    let entry_fn = unit.function("__unit_0").unwrap();
    assert_eq!(entry_fn.return_type, IRType::I32);

    let unit = command("[1, 2]").unwrap();
    assert_eq!(unit.entry.as_ref().unwrap().returns, None);
    assert_eq!(unit.function("__unit_0").unwrap().return_type, IRType::Void);

    let unit = command("x = 1").unwrap();
    assert_eq!(unit.entry.as_ref().unwrap().returns, None);
}

#[test]
fn test_control_flow_blocks() {
    let unit = command("k = 0\nwhile k < 3:\n    if k > 1:\n        k += 2\n    k += 1\nk").unwrap();
    let entry = unit.function("__unit_0").unwrap();
    assert_eq!(
        labels(entry),
        vec![
            "entry",
            "while0_condition",
            "while0_then",
            "if1_then",
            "if1_resume",
            "while0_resume"
        ]
    );
    assert!(entry.blocks.iter().all(|b| b.terminator.is_some()));

    let unit = command("for i in range(3):\n    print i").unwrap();
    assert_eq!(
        labels(unit.function("__unit_0").unwrap()),
        vec!["entry", "for0_condition", "for0_body", "for0_resume"]
    );
}

#[test]
fn test_for_header_shape() {
    for text in [
        "for i in 3:\n    print i",
        "for i in range(1, 2):\n    print i",
    ] {
        assert_eq!(command(text).unwrap_err().kind, ErrorKind::Syntax, "{}", text);
    }
    // `in` needs a value before it
    assert_eq!(
        command("for in range(3):\n    print 1").unwrap_err().kind,
        ErrorKind::Lexical
    );
    assert_eq!(
        command("r = 1.\nfor r in range(3):\n    print r")
            .unwrap_err()
            .kind,
        ErrorKind::Type
    );
}

#[test]
fn test_function_definition() {
    let mut session = Session::new(quiet());
    let unit = compile_command(&mut session, "def Int twice(Int n):\n    n * 2").unwrap();
    let function = unit.function("fn_twice").unwrap();
    assert_eq!(function.params, vec![("arg_n".to_string(), IRType::I32)]);
    assert_eq!(function.return_type, IRType::I32);
    assert!(matches!(
        function.blocks.last().and_then(|b| b.terminator.clone()),
        Some(Terminator::Ret { value: Some(_) })
    ));
    assert_eq!(unit.entry.as_ref().unwrap().returns, None);
    assert!(session.function("twice").is_some());

    // later units call it through a declaration
    let unit = compile_command(&mut session, "twice(4)").unwrap();
    assert!(unit.declarations.iter().any(|d| d.name() == "fn_twice"));
}

#[test]
fn test_function_errors() {
    let cases = [
        ("def Int f(Int n):\n    n * 2.", ErrorKind::Semantic),
        ("def Int f(Int n, Real n):\n    n", ErrorKind::Semantic),
        ("def Int sin(Int n):\n    n", ErrorKind::Semantic),
        ("def Void f(Int n):\n    n", ErrorKind::Type),
        ("def Int f(Int n):\n    print n", ErrorKind::Semantic),
        ("def Int f(n):\n    1", ErrorKind::Syntax),
        ("def Int f(Int n):\nn", ErrorKind::Syntax),
        ("if True:\n    def Int f(Int n):", ErrorKind::Syntax),
    ];
    for (text, kind) in cases {
        assert_eq!(command(text).unwrap_err().kind, kind, "{}", text);
    }

    let mut session = Session::new(quiet());
    compile_command(&mut session, "def Int f(Int n):\n    n").unwrap();
    let err = compile_command(&mut session, "def Real f(Real x):\n    x").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Semantic);
}

#[test]
fn test_errors_carry_their_line() {
    let err = command("x = 1\ny = nope").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Semantic);
    let location = err.location.unwrap();
    assert_eq!(location.line, 2);
    assert_eq!(location.text, "y = nope");
}

#[test]
fn test_owned_arrays_only_take_new_arrays() {
    // a second pass through the loop would free `b`'s array
    let err = command("b = Int[3]\na = Int[4]\nfor i in range(2):\n    a = b\nb[0] = 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Resource);
    assert_eq!(err.location.map(|l| l.line), Some(4));

    for text in ["a = Int[4]\na = a", "a = Int[4]\nif True:\n    a = a"] {
        assert_eq!(command(text).unwrap_err().kind, ErrorKind::Resource, "{}", text);
    }

    // a variable without an array of its own may alias one
    let mut session = Session::new(quiet());
    compile_command(&mut session, "b = Int[3]\nc = b\nc[0] = 5").unwrap();
    assert_eq!(session.global("c").and_then(|v| v.alloc), None);
    assert!(session.global("b").and_then(|v| v.alloc).is_some());
    assert_eq!(session.ledger().len(), 1);

    // new arrays may replace an owned one inside branches and loops
    let mut session = Session::new(quiet());
    let unit = compile_command(
        &mut session,
        "a = Int[4]\nif True:\n    a = Int[5]\nfor i in range(3):\n    a = Int[i + 1]",
    )
    .unwrap();
    assert_eq!(session.ledger().len(), 1);
    let owner = session.global("a").and_then(|v| v.alloc);
    assert_eq!(owner, Some(2));
    let body = unit.function("__unit_0").unwrap();
    assert!(body.blocks.iter().all(|b| b.terminator.is_some()));
}

#[test]
fn test_program_has_a_c_main() {
    let mut session = Session::new(quiet());
    let mut source = SourceBuffer::new(StrSource::new(
        "def Real half(Int n):\n    n / 2\n\nbuf = Real[3]\nbuf[0] = half(3)\nprint buf[0]\n",
    ));
    let unit = compile_program(&mut session, &mut source).unwrap();
    assert_eq!(unit.entry, None);

    let main = unit.function(PROGRAM_ENTRY).unwrap();
    assert_eq!(main.return_type, IRType::I32);
    assert_eq!(
        main.blocks.last().and_then(|b| b.terminator.clone()),
        Some(Terminator::Ret {
            value: Some((IRType::I32, Value::Constant(Constant::Int(0))))
        })
    );
    // globals still holding arrays are released before returning
    assert!(session.ledger().is_empty());
    assert!(unit.function("fn_half").is_some());
}

#[test]
fn test_units_are_read_one_construct_at_a_time() {
    let mut session = Session::new(quiet());
    let mut source = SourceBuffer::new(StrSource::new("x = 1\nif x > 0:\n    x = 2\nx"));
    let mut names = Vec::new();
    while !source.end(0).unwrap() {
        names.push(compile_unit(&mut session, &mut source).unwrap().name);
    }
    assert_eq!(names, vec!["__unit_0", "__unit_1", "__unit_2"]);
}

#[test]
fn test_repl_runs_each_command() {
    let mut repl = Repl::new(Session::new(quiet()), Recorder::default());
    assert_eq!(repl.run_command("x = 1").unwrap(), None);
    assert_eq!(repl.run_command("x + 1").unwrap(), Some(Output::Int(7)));
    assert_eq!(repl.backend().loaded, vec!["__unit_0", "__unit_1"]);
    assert_eq!(repl.backend().invoked, vec!["__unit_0", "__unit_1"]);
}

#[test]
fn test_repl_rolls_back_failed_units() {
    let mut repl = Repl::new(
        Session::new(quiet()),
        Recorder {
            refuse: true,
            ..Recorder::default()
        },
    );
    let err = repl.run_command("z = 1").unwrap_err();
    assert!(matches!(err, TauError::Backend(_)));
    assert!(repl.session().global("z").is_none());

    let mut repl = Repl::new(Session::new(quiet()), Recorder::default());
    assert!(matches!(
        repl.run_command("def Int f(Int n):\n    n * 2.").unwrap_err(),
        TauError::Compile(_)
    ));
    assert!(repl.session().function("f").is_none());
}

#[test]
fn test_repl_keeps_going_after_errors() {
    let mut repl = Repl::new(Session::new(quiet()), Recorder::default());
    let mut source = SourceBuffer::new(StrSource::new("a = 1\nb = nope\nc = 2"));
    repl.run(&mut source);
    assert_eq!(repl.backend().loaded, vec!["__unit_0", "__unit_2"]);
    assert!(repl.session().global("c").is_some());
}

#[test]
fn test_repl_reads_interactive_blocks() {
    let mut repl = Repl::new(Session::new(quiet()), Recorder::default());
    let mut source = SourceBuffer::new(Scripted::new(&[
        "k = 0",
        "",
        "while k < 3:",
        "    k += 1",
        "",
        "k",
    ]));
    repl.run(&mut source);
    assert_eq!(repl.backend().loaded.len(), 3);
}
