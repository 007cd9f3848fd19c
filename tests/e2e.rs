//! End-to-end tests driving the compiled `krait` binary.

use std::process::Command;

fn run_krait_with_args(args: &[&str], source: &str) -> (String, String, Option<i32>) {
    // Unique temp file per test so parallel runs do not collide.
    let temp_dir = std::env::temp_dir();
    let unique_id = format!("{}_{:?}", std::process::id(), std::thread::current().id());
    let temp_file = temp_dir.join(format!("krait_test_{}.kr", unique_id.replace(['(', ')'], "")));
    std::fs::write(&temp_file, source).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_krait"))
        .args(args)
        .arg(&temp_file)
        .output()
        .expect("failed to execute krait");

    std::fs::remove_file(&temp_file).ok();

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code(),
    )
}

fn run_krait(source: &str) -> (String, String, Option<i32>) {
    run_krait_with_args(&[], source)
}

fn assert_output(source: &str, expected: &str) {
    let (stdout, stderr, code) = run_krait(source);
    assert_eq!(code, Some(0), "program should succeed, stderr:\n{}", stderr);
    assert_eq!(stdout, expected);
}

#[test]
fn test_arithmetic() {
    assert_output("print 1 + 2 * 3;", "7\n");
}

#[test]
fn test_string_concatenation() {
    assert_output("var a = \"hi\"; var b = \" there\"; print a + b;", "hi there\n");
}

#[test]
fn test_for_loop() {
    assert_output(
        "var x = 0; for (var i = 0; i < 5; i = i + 1) { x = x + i; } print x;",
        "10\n",
    );
}

#[test]
fn test_recursion() {
    assert_output(
        "fun fact(n) { if (n <= 1) return 1; return n * fact(n - 1); } print fact(5);",
        "120\n",
    );
}

#[test]
fn test_logical_operators() {
    assert_output("print true and false; print nil or 7;", "false\n7\n");
}

#[test]
fn test_fibonacci() {
    assert_output(
        "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);",
        "55\n",
    );
}

#[test]
fn test_nested_scopes() {
    let source = r#"
var a = "global";
{
    var a = "outer";
    {
        var a = "inner";
        print a;
    }
    print a;
}
print a;
"#;
    assert_output(source, "inner\nouter\nglobal\n");
}

#[test]
fn test_while_countdown() {
    assert_output(
        "var n = 3; while (n > 0) { print n; n = n - 1; }",
        "3\n2\n1\n",
    );
}

#[test]
fn test_multiline_program_line_numbers() {
    let source = "var ok = 1;\nprint ok;\nprint 1 + nil;\n";
    let (stdout, stderr, code) = run_krait(source);
    assert_eq!(stdout, "1\n");
    assert_eq!(code, Some(70));
    assert!(stderr.contains("[line 3] in script"));
}

#[test]
fn test_runtime_error_exit_code_and_trace() {
    let (stdout, stderr, code) = run_krait("print 1 + \"a\";");
    assert_eq!(stdout, "");
    assert_eq!(code, Some(70));
    assert!(stderr.contains("Operands must be two numbers or two strings."));
    assert!(stderr.contains("[line 1]"));
}

#[test]
fn test_runtime_error_in_function_reports_each_frame() {
    let source = "fun boom() { return -\"x\"; }\nboom();";
    let (_, stderr, code) = run_krait(source);
    assert_eq!(code, Some(70));
    assert!(stderr.contains("Operand must be a number."));
    assert!(stderr.contains("[line 1] in boom()"));
    assert!(stderr.contains("[line 2] in script"));
}

#[test]
fn test_compile_error_exit_code() {
    let (stdout, stderr, code) = run_krait("var = 1;");
    assert_eq!(stdout, "");
    assert_eq!(code, Some(65));
    assert!(stderr.contains("Error [line 1]"));
}

#[test]
fn test_undefined_variable() {
    let (_, stderr, code) = run_krait("print nope;");
    assert_eq!(code, Some(70));
    assert!(stderr.contains("Undefined variable 'nope'."));
}

#[test]
fn test_missing_file_reports_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_krait"))
        .arg("does_not_exist.kr")
        .output()
        .expect("failed to execute krait");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("could not read file"));
}

#[test]
fn test_dump_flag_disassembles_functions() {
    let (stdout, stderr, code) = run_krait_with_args(&["--dump"], "fun f() {} print 1;");
    assert_eq!(code, Some(0));
    assert_eq!(stdout, "1\n");
    assert!(stderr.contains("== f =="));
    assert!(stderr.contains("== script =="));
    assert!(stderr.contains("OpReturn"));
}

#[test]
fn test_trace_flag_keeps_stdout_clean() {
    let (stdout, stderr, code) = run_krait_with_args(&["--trace"], "print 2 + 3;");
    assert_eq!(code, Some(0));
    assert_eq!(stdout, "5\n");
    assert!(stderr.contains("OpConstant"));
    assert!(stderr.contains("OpAdd"));
}

#[test]
fn test_unterminated_string_is_compile_error() {
    let (_, stderr, code) = run_krait("var s = \"oops;");
    assert_eq!(code, Some(65));
    assert!(stderr.contains("Unterminated String."));
}

#[test]
fn test_empty_program_succeeds() {
    let (stdout, _, code) = run_krait("");
    assert_eq!(code, Some(0));
    assert_eq!(stdout, "");
}

#[test]
fn test_comments_are_ignored() {
    assert_output("// nothing to see\nprint 1; // trailing\n// done\n", "1\n");
}
