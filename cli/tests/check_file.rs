//! Whole-file runs through the CLI library.

use cli::{check_source, exit_code, run_file};
use frontend::FrontendConfig;
use std::path::Path;

fn check(source: &str, config: FrontendConfig) -> (i32, String) {
    let mut out = Vec::new();
    let outcome = check_source("test.lean", source, config, &mut out).unwrap();
    (exit_code(&outcome), String::from_utf8(out).unwrap())
}

#[test]
fn clean_file_exits_zero_and_prints_nothing() {
    let (code, out) = check(
        "namespace Foo\ndef id (x : Nat) : Nat := x\nend Foo\n",
        FrontendConfig::default(),
    );
    assert_eq!(code, 0);
    assert!(out.is_empty(), "{}", out);
}

#[test]
fn errors_are_rendered_with_their_code() {
    let (code, out) = check("end\n", FrontendConfig::default());
    assert_eq!(code, 1);
    assert!(out.contains("F0210"), "{}", out);
    assert!(out.contains("invalid end, no open scope to end"), "{}", out);
}

#[test]
fn info_output_does_not_fail_the_run() {
    let (code, out) = check("def one : Nat := 1\n#check one\n", FrontendConfig::default());
    assert_eq!(code, 0);
    assert!(out.contains("one : Nat"), "{}", out);
}

#[test]
fn exhausted_budget_is_fatal() {
    let config = FrontendConfig {
        step_budget: 1,
        ..FrontendConfig::default()
    };
    let (code, out) = check("def a : Nat := 1\ndef b : Nat := 2\n", config);
    assert_eq!(code, 2);
    insta::assert_snapshot!(out.trim_end(), @"error: [F0901] maximum number of elaboration steps exceeded");
}

#[test]
fn unterminated_scope_fatality_follows_the_flag() {
    let (code, _) = check("section S\n", FrontendConfig::default());
    assert_eq!(code, 1);
    let strict = FrontendConfig {
        errors_are_fatal: true,
        ..FrontendConfig::default()
    };
    let (code, out) = check("section S\n", strict);
    assert_eq!(code, 2);
    assert!(out.contains("missing end for section 'S'"), "{}", out);
}

#[test]
fn missing_files_are_reported() {
    let mut out = Vec::new();
    let err = run_file(Path::new("does/not/exist.lean"), FrontendConfig::default(), &mut out).unwrap_err();
    assert!(err.to_string().contains("failed to read"));
}
