use checker::{
    diagnostics::{DiagnosticKind, Result},
    value::{Args, OutputStream, Value},
    CheckerError, EnvironmentRef, Interpreter, NativeFunction, SourcePos,
};

fn eval(source: &str) -> Value {
    let mut interpreter = Interpreter::new();
    interpreter
        .eval_source(source)
        .expect("evaluation should succeed")
}

fn eval_error(source: &str) -> CheckerError {
    let mut interpreter = Interpreter::new();
    match interpreter.eval_source(source) {
        Ok(value) => panic!("expected error, received value {value}"),
        Err(err) => err,
    }
}

fn eval_text(source: &str) -> String {
    eval(source).to_string()
}

fn expect_int(value: &Value) -> i64 {
    match value {
        Value::Int(n) => *n,
        other => panic!("expected int, found {}", other.type_name()),
    }
}

fn expect_bool(value: &Value) -> bool {
    match value {
        Value::Boolean(b) => *b,
        other => panic!("expected boolean, found {}", other.type_name()),
    }
}

fn message(err: &CheckerError) -> String {
    err.diagnostic()
        .map(|diagnostic| diagnostic.message.clone())
        .unwrap_or_else(|| err.to_string())
}

#[test]
fn evaluates_operator_precedence() {
    match eval("2 + 3 * 3 + 4 / 5.0") {
        Value::Decimal(n) => assert!((n - 11.8).abs() < 1e-9),
        other => panic!("expected decimal, found {other}"),
    }
    assert_eq!(expect_int(&eval("7 % 3 - -2")), 3);
    assert!(expect_bool(&eval("1 == 1.0")));
    assert!(expect_bool(&eval("1 < 2 <= 2")));
}

#[test]
fn returns_last_statement_value() {
    let value = eval(
        r#"
        def x = 40
        x + 2
        "#,
    );
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn closures_capture_by_reference() {
    let value = eval(
        r#"
        def x = 1
        def f = fn() x
        x = 2
        f()
        "#,
    );
    assert_eq!(expect_int(&value), 2);
}

#[test]
fn closures_keep_private_state() {
    let value = eval(
        r#"
        def make_counter() do
            def count = 0
            fn() do count += 1 end
        end
        def c = make_counter()
        c()
        c()
        "#,
    );
    assert_eq!(expect_int(&value), 2);
}

#[test]
fn sibling_definitions_see_each_other() {
    let value = eval(
        r#"
        def is_even(n) if n == 0 then TRUE else is_odd(n - 1)
        def is_odd(n) if n == 0 then FALSE else is_even(n - 1)
        is_even(10)
        "#,
    );
    assert!(expect_bool(&value));
}

#[test]
fn return_leaves_loop_and_script() {
    let value = eval("for i in range(10) do if i == 5 then return i end");
    assert_eq!(expect_int(&value), 5);
}

#[test]
fn return_leaves_only_the_enclosing_function() {
    let value = eval(
        r#"
        def first_big(xs) do
            for x in xs do
                if x > 10 then return x
            end
            NULL
        end;
        [first_big([1, 20, 30]), first_big([1])]
        "#,
    );
    assert_eq!(value.to_string(), "[20, NULL]");
}

#[test]
fn break_only_leaves_the_innermost_loop() {
    let value = eval_text(
        r#"
        def hits = []
        for i in range(3) do
            for j in range(3) do
                if j == 1 then break
                append(hits, [i, j])
            end
        end
        hits
        "#,
    );
    assert_eq!(value, "[[0, 0], [1, 0], [2, 0]]");
}

#[test]
fn continue_skips_to_next_iteration() {
    let value = eval_text(
        r#"
        def odd = []
        for i in range(6) do
            if i % 2 == 0 then continue
            append(odd, i)
        end
        odd
        "#,
    );
    assert_eq!(value, "[1, 3, 5]");
}

#[test]
fn while_loops_until_condition_fails() {
    let value = eval(
        r#"
        def n = 0
        while n < 5 n += 1
        n
        "#,
    );
    assert_eq!(expect_int(&value), 5);
}

#[test]
fn loop_variables_do_not_leak() {
    let value = eval_text(
        r#"
        def i = 'outer'
        for i in [1, 2] i
        i
        "#,
    );
    assert_eq!(value, "'outer'");
}

#[test]
fn iterates_maps_by_key_and_entry() {
    assert_eq!(
        eval_text(
            r#"
            def m = <<<'b' => 2, 'a' => 1>>>;
            [k for k in m]
            "#
        ),
        "['a', 'b']"
    );
    assert_eq!(
        eval_text(
            r#"
            def m = <<<'b' => 2, 'a' => 1>>>
            def out = []
            for k, v in entries m append(out, k + v)
            out
            "#
        ),
        "['a1', 'b2']"
    );
    assert_eq!(
        eval_text(
            r#"
            def out = []
            for v in values <<<1 => 1, 2 => 2>>> append(out, v * 10)
            out
            "#
        ),
        "[10, 20]"
    );
}

#[test]
fn binds_named_positional_and_rest_arguments() {
    let value = eval_text(
        r#"
        def f(a, b = 2, c...) [a, b, c]
        f(1, 3, 4, b = 9)
        "#,
    );
    assert_eq!(value, "[1, 9, [3, 4]]");
}

#[test]
fn defaults_see_earlier_parameters() {
    let value = eval(
        r#"
        def g(a, b = a * 2) a + b
        g(3)
        "#,
    );
    assert_eq!(expect_int(&value), 9);
}

#[test]
fn spread_arguments_match_explicit_ones() {
    let value = eval(
        r#"
        def h(a, b, c) a * 100 + b * 10 + c
        def xs = [1, 2, 3];
        [h(...xs), h(...<<<'c' => 3, 'a' => 1, 'b' => 2>>>), h(1, 2, 3)]
        "#,
    );
    assert_eq!(value.to_string(), "[123, 123, 123]");
}

#[test]
fn rejects_bad_argument_lists() {
    let err = eval_error("def f(a) a\nf(1, 2)");
    assert!(message(&err).contains("too many arguments for `f`"));
    let err = eval_error("def f(a) a\nf(b = 1)");
    assert!(message(&err).contains("unknown argument `b`"));
    let err = eval_error("def f(a, b) a\nf(1)");
    assert!(message(&err).contains("missing argument `b`"));
}

#[test]
fn collection_literals_and_comprehensions() {
    assert_eq!(eval_text("sorted([3, 2, 1])"), "[1, 2, 3]");
    assert_eq!(eval_text("[x * 2 for x in [1, 3]]"), "[2, 6]");
    assert_eq!(eval_text("<<x % 2 for x in range(5)>>"), "<<0, 1>>");
    assert_eq!(eval_text("<<3, 1, 2, 1>>"), "<<1, 2, 3>>");
    assert_eq!(
        eval_text("<<<'b' => 2, 'a' => 1>>>"),
        "<<<'a' => 1, 'b' => 2>>>"
    );
    assert_eq!(eval_text("[0, ...[1, 2], 3]"), "[0, 1, 2, 3]");
}

#[test]
fn sets_and_maps_use_structural_keys() {
    assert_eq!(expect_int(&eval("length(<<1, 1.0, 2>>)")), 2);
    assert_eq!(expect_int(&eval("length(<<[1, 2], [1, 2]>>)")), 1);
    let value = eval_text(
        r#"
        def m = <<<[1, 2] => 'pair'>>>
        m[[1, 2]]
        "#,
    );
    assert_eq!(value, "'pair'");
}

#[test]
fn containers_are_shared_handles() {
    let value = eval_text(
        r#"
        def a = [1]
        def b = a
        append(b, 2)
        a
        "#,
    );
    assert_eq!(value, "[1, 2]");
}

#[test]
fn destructuring_swaps_values() {
    let value = eval_text(
        r#"
        def [a, b] = [1, 2];
        [a, b] = [b, a];
        [a, b]
        "#,
    );
    assert_eq!(value, "[2, 1]");
}

#[test]
fn indexes_lists_strings_and_maps() {
    assert_eq!(expect_int(&eval("[1, 2, 3][-1]")), 3);
    assert_eq!(eval_text("'héllo'[1]"), "'é'");
    let err = eval_error("[1, 2][5]");
    assert!(message(&err).contains("out of range"));
    let err = eval_error("<<<'a' => 1>>>['b']");
    assert!(message(&err).contains("not found"));
}

#[test]
fn objects_support_members_and_invocation() {
    let value = eval(
        r#"
        def o = <*n = 1*>
        o->n += 1
        o->n
        "#,
    );
    assert_eq!(expect_int(&value), 2);
    let value = eval(
        r#"
        def counter = <*step = fn(x) x + 1*>
        counter->step(41)
        "#,
    );
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn membership_tests() {
    assert!(expect_bool(&eval("2 in [1, 2]")));
    assert!(expect_bool(&eval("'x' not in <<'y'>>")));
    assert!(expect_bool(&eval("'a' in <*a = 1*>")));
    assert!(expect_bool(&eval("'ell' in 'hello'")));
}

#[test]
fn predicate_grammar() {
    assert!(expect_bool(&eval("'12345' is numerical min_len 3")));
    assert!(!expect_bool(&eval("'12' is numerical min_len 3")));
    assert!(expect_bool(&eval("'' is empty")));
    assert!(expect_bool(&eval("[1] is not empty")));
    assert!(expect_bool(&eval("'abc' starts with 'a'")));
    assert!(expect_bool(&eval("'abc' not ends with 'b'")));
    assert!(expect_bool(&eval("'hello' matches //h.*o//")));
    assert!(expect_bool(&eval("'2024013112' is date with hour")));
    assert!(expect_bool(&eval("'2359' is time")));
    assert!(!expect_bool(&eval("'2460' is time")));
    assert!(expect_bool(&eval("def n = -3\nn is negative")));
}

#[test]
fn pipeline_passes_subject_first() {
    assert_eq!(eval_text("[3, 1, 2] !> sorted()"), "[1, 2, 3]");
    assert_eq!(expect_int(&eval("'abc' !> length")), 3);
    assert_eq!(
        eval_text("[3, 1, 2] !> sorted(key = fn(x) 0 - x)"),
        "[3, 2, 1]"
    );
}

#[test]
fn catch_binds_last_error() {
    let value = eval_text(
        r#"
        do
            error 'boom'
        catch all
            'caught ' + last_error
        end
        "#,
    );
    assert_eq!(value, "'caught boom'");
    let value = eval_text(
        r#"
        do
            error 42
        catch 41
            'first'
        catch 42
            'second'
        end
        "#,
    );
    assert_eq!(value, "'second'");
}

#[test]
fn catch_all_handles_runtime_errors() {
    let value = eval_text(
        r#"
        do
            1 / 0
        catch all
            last_error
        end
        "#,
    );
    assert_eq!(value, "'divide by zero'");
}

#[test]
fn finally_runs_on_success_and_failure() {
    let value = eval_text(
        r#"
        def log = []
        def r = do
            append(log, 'body')
            1
        finally
            append(log, 'finally')
        end;
        [r, log]
        "#,
    );
    assert_eq!(value, "[1, ['body', 'finally']]");

    let mut interpreter = Interpreter::new();
    interpreter
        .eval_source("def log = []")
        .expect("definition succeeds");
    let err = interpreter
        .eval_source("do error 'x' finally append(log, 'f') end")
        .expect_err("error propagates");
    assert_eq!(message(&err), "x");
    let log = interpreter.eval_source("log").expect("log is defined");
    assert_eq!(log.to_string(), "['f']");
}

#[test]
fn syntax_errors_are_not_caught() {
    let err = eval_error("do eval('1 +') catch all 0 end");
    assert_eq!(
        err.diagnostic().map(|diagnostic| diagnostic.kind),
        Some(DiagnosticKind::Parser)
    );
}

#[test]
fn division_by_zero_honours_fallback() {
    let err = eval_error("1 / 0");
    assert_eq!(message(&err), "divide by zero");
    let value = eval(
        r#"
        def DIV_0_VALUE = 0;
        [1 / 0, 7 % 0]
        "#,
    );
    assert_eq!(value.to_string(), "[0, 0]");
}

#[test]
fn errors_carry_call_trace() {
    let err = eval_error(
        r#"
        def inner(x) error 'boom'
        def outer(y) inner(y + 1)
        outer(1)
        "#,
    );
    let diagnostic = err.diagnostic().expect("diagnostic error");
    assert_eq!(diagnostic.kind, DiagnosticKind::User);
    assert_eq!(diagnostic.trace.len(), 2);
    assert!(diagnostic.trace[0].starts_with("inner(2) @"));
    assert!(diagnostic.trace[1].starts_with("outer(1) @"));
}

#[test]
fn reports_undefined_symbols() {
    let err = eval_error("nope + 1");
    assert_eq!(message(&err), "undefined symbol `nope`");
    let err = eval_error("missing = 1");
    assert_eq!(message(&err), "undefined symbol `missing`");
}

#[test]
fn break_outside_loop_is_an_error() {
    let err = eval_error("break");
    assert!(message(&err).contains("outside loop"));
}

#[test]
fn reads_lines_from_string_input() {
    assert_eq!(
        eval_text(
            r#"
            def input = str_input('a\nb');
            [read_line(input), read_line(input), read_line(input)]
            "#
        ),
        "['a', 'b', NULL]"
    );
    assert_eq!(
        eval_text(
            r#"
            def lines = []
            for line in str_input('x\ny') append(lines, line)
            lines
            "#
        ),
        "['x', 'y']"
    );
}

#[test]
fn parse_and_eval_round_trip_code() {
    assert_eq!(eval_text("string(parse('1 + 2'))"), "'add(1, 2)'");
    assert_eq!(expect_int(&eval("eval('1 + 2')")), 3);
    assert_eq!(expect_int(&eval("eval(parse('def z = 4\\nz * 2'))")), 8);
}

#[test]
fn conversions_and_type_names() {
    assert_eq!(eval_text("type(1.5)"), "'decimal'");
    assert_eq!(eval_text("type(fn() 1)"), "'func'");
    assert_eq!(expect_int(&eval("int('42')")), 42);
    assert_eq!(eval_text("list(<<2, 1>>)"), "[1, 2]");
    assert_eq!(
        eval_text("string(date('2024-01-31', '%Y-%m-%d'))"),
        "'20240131000000'"
    );
    assert_eq!(eval_text("string(date('20240131') + 1)"), "'20240201000000'");
}

#[test]
fn print_writes_to_bound_stdout() {
    let mut interpreter = Interpreter::new();
    let out = Value::output(OutputStream::Buffer(String::new()));
    interpreter.define("stdout", out.clone());
    interpreter
        .eval_source("println('a'); print(1)")
        .expect("printing succeeds");
    let Value::Output(stream) = &out else {
        panic!("expected output stream");
    };
    assert_eq!(stream.borrow().contents(), Some("a\n1"));
}

#[test]
fn free_variables_exclude_local_bindings() {
    let interpreter = Interpreter::new();
    let node = interpreter
        .parse("def f(x) x + y\nf(z)")
        .expect("parse succeeds");
    assert_eq!(node.free_vars(), vec!["add", "y", "z"]);
}

#[test]
fn catch_handlers_see_last_error_as_bound() {
    let interpreter = Interpreter::new();
    let node = interpreter
        .parse("do\n  error 'x'\ncatch all\n  println(last_error)\nend")
        .expect("parse succeeds");
    assert_eq!(node.free_vars(), vec!["println"]);
    let node = interpreter
        .parse("do\n  1\ncatch all\n  0\nend\nlast_error")
        .expect("parse succeeds");
    assert_eq!(node.free_vars(), vec!["last_error"]);
}

fn sum_all(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let mut total = if args.has("base") {
        args.get_int("base", pos)?
    } else {
        0
    };
    for value in args.get("values", pos)?.elements(pos)? {
        total += value.as_int(pos)?;
    }
    Ok(Value::Int(total))
}

#[test]
fn host_natives_bind_like_lambdas() {
    let mut interpreter = Interpreter::new();
    interpreter
        .register_native(NativeFunction::new("sum_all", &["base"], sum_all).with_rest("values"));
    let value = interpreter
        .eval_source("[sum_all(), sum_all(100, 1, 2), sum_all(1, 2, base = 10)]")
        .expect("natives evaluate");
    assert_eq!(value.to_string(), "[0, 103, 13]");
}

#[test]
fn sorted_orders_by_key_function() {
    let value = eval_text("sorted(['ccc', 'a', 'bb'], key = fn(s) length(s))");
    assert_eq!(value, "['a', 'bb', 'ccc']");
    let value = eval_text("sorted([3, 1, 2], key = fn(x) 0 - x)");
    assert_eq!(value, "[3, 2, 1]");
    let err = eval_error("sorted([1, 2], key = 5)");
    assert_eq!(err.diagnostic().map(|d| d.kind), Some(DiagnosticKind::Runtime));
}

#[test]
fn containers_cannot_hold_themselves_as_keys() {
    let err = eval_error("def s = <<1>>; append(s, s)");
    assert_eq!(message(&err), "cannot add a set to itself");
    let err = eval_error("def s = <<1>>; append(s, [s])");
    assert_eq!(message(&err), "cannot add a set to itself");
    let err = eval_error("def m = <<<1 => 2>>>; m[m] = 1");
    assert_eq!(message(&err), "cannot use a map as its own key");

    let value = eval_text("def s = <<1>>; append(s, [1]); append(s, [1]); s");
    assert_eq!(value, "<<1, [1]>>");
    let value = eval_text("def m = <<<>>>; def k = <<<1 => 2>>>; m[k] = 'x'; m[<<<1 => 2>>>]");
    assert_eq!(value, "'x'");
}

#[test]
fn oversized_repetition_is_an_error() {
    assert_eq!(eval_text("'ab' * 3"), "'ababab'");
    assert_eq!(eval_text("[0] * 2"), "[0, 0]");
    assert_eq!(eval_text("'' * 9223372036854775807"), "''");
    let err = eval_error("'ab' * 9223372036854775807");
    assert_eq!(message(&err), "repetition too large");
    let err = eval_error("[1, 2] * 9223372036854775807");
    assert_eq!(message(&err), "repetition too large");
}

#[test]
fn equal_numbers_share_collection_slots() {
    assert!(expect_bool(&eval("9007199254740993 == 9007199254740992.0")));
    assert_eq!(
        expect_int(&eval("length(<<9007199254740993, 9007199254740992.0>>)")),
        1
    );
    assert_eq!(expect_int(&eval("length(<<1, 1.0, 2>>)")), 2);
    assert_eq!(
        eval_text("<<<9007199254740993 => 'big'>>>[9007199254740992.0]"),
        "'big'"
    );
}

fn mixed_values() -> Vec<Value> {
    [
        "NULL",
        "TRUE",
        "FALSE",
        "0",
        "1",
        "1.0",
        "-2.5",
        "'1'",
        "'a'",
        "'NULL'",
        "[]",
        "[1, 2]",
        "[1.0, 2]",
        "[2, 1]",
        "<<1, 2>>",
        "<<2, 1>>",
        "<<'x'>>",
        "<<<'a' => 1>>>",
        "<<<'a' => 1.0>>>",
        "<<<'a' => 2>>>",
        "<*a=1, b=2*>",
        "<*b=2, a=1*>",
        "<*a=1*>",
        "//a.b//",
        "//a.c//",
        "fn() 1",
        "fn() 1",
        "[fn() 1]",
        "[fn() 1]",
    ]
    .iter()
    .map(|source| eval(source))
    .collect()
}

#[test]
fn equality_is_symmetric_and_matches_ordering() {
    let values = mixed_values();
    for a in &values {
        assert!(a.is_equals(a), "{a} should equal itself");
        assert_eq!(a.compare_to(a), std::cmp::Ordering::Equal);
        for b in &values {
            assert_eq!(a.is_equals(b), b.is_equals(a), "symmetry of {a} and {b}");
            assert_eq!(
                a.compare_to(b),
                b.compare_to(a).reverse(),
                "antisymmetry of {a} and {b}"
            );
            assert_eq!(
                a.compare_to(b) == std::cmp::Ordering::Equal,
                a.is_equals(b),
                "ordering agrees with equality for {a} and {b}"
            );
        }
    }
}

#[test]
fn distinct_lambdas_order_consistently() {
    let value = eval("def f = fn() 1; def g = fn() 1; [f < g, g < f, f == g, f == f]");
    let Value::List(items) = &value else {
        panic!("expected list, found {value}");
    };
    let flags: Vec<bool> = items.borrow().iter().map(expect_bool).collect();
    assert!(flags[0] != flags[1], "exactly one lambda sorts first: {value}");
    assert!(!flags[2]);
    assert!(flags[3]);
}

#[test]
fn printed_literals_evaluate_back_to_equal_values() {
    let literals = [
        "[1, 'two', [3.5, NULL], TRUE]",
        "<<3, 1, 'b', 'a'>>",
        "<<<'a' => 1, 2 => [3], 'c' => <*x=1*>>>>",
        "<*name='box', size=2.5, tags=['x', 'y']*>",
        r"'it\'s a\ttab\nand \\ slash'",
        "2.5",
        "-0.125",
        "3.0",
        "//^[a-z]+\\d*$//",
    ];
    for literal in literals {
        let value = eval(literal);
        let printed = value.to_string();
        let reparsed = eval(&printed);
        assert!(
            value.is_equals(&reparsed),
            "{literal} printed as {printed} evaluated to {reparsed}"
        );
        assert_eq!(reparsed.type_name(), value.type_name());
    }
    assert!(expect_bool(&eval(
        r"def v = <<<'k' => ['a\'b', 1.5]>>>; eval(string(v)) == v"
    )));
}
