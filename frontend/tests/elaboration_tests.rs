//! End-to-end elaboration through the driver.

use frontend::{Diagnostic, Driver, FrontendConfig, Parser, Severity, StepResult};
use frontend::CommandSource;
use kernel::Name;

fn run(src: &str) -> (Driver, Vec<Diagnostic>) {
    let mut driver = Driver::new(FrontendConfig::default());
    let outcome = driver.run(src);
    assert!(!outcome.fatal, "unexpected fatal run: {:?}", outcome.diagnostics);
    (driver, outcome.diagnostics)
}

fn rendered(diagnostics: &[Diagnostic]) -> Vec<String> {
    diagnostics.iter().map(|d| d.to_string()).collect()
}

fn value_of(driver: &Driver, name: &str) -> String {
    let info = driver.environment().find(&Name::parse(name)).unwrap();
    info.value.as_ref().unwrap().erase_positions().to_string()
}

// =============================================================================
// Declarations and namespaces
// =============================================================================

#[test]
fn namespaced_definition_is_admitted_silently() {
    let (driver, diagnostics) = run("namespace Foo\ndef id (x : Nat) : Nat := x\nend Foo");
    assert!(diagnostics.is_empty());
    let info = driver.environment().find(&Name::parse("Foo.id")).unwrap();
    insta::assert_snapshot!(info.ty.erase_positions().to_string(), @"Nat → Nat");
    assert_eq!(driver.context().scopes.len(), 1);
}

#[test]
fn later_commands_see_earlier_declarations() {
    let src = "
inductive Color where
  | red
  | green

def fav : Color := Color.red

namespace Color
def other : Color := green
end Color
";
    let (driver, diagnostics) = run(src);
    assert!(diagnostics.is_empty(), "{:?}", rendered(&diagnostics));
    assert_eq!(value_of(&driver, "fav"), "Color.red");
    assert_eq!(value_of(&driver, "Color.other"), "Color.green");
}

#[test]
fn failed_commands_leave_no_trace() {
    let (driver, diagnostics) = run("def a : Nat := 1\ndef a : Nat := 2\ndef b : Nat := a");
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].message, "'a' has already been declared");
    assert_eq!(value_of(&driver, "a"), "1");
    assert_eq!(value_of(&driver, "b"), "a");
}

// =============================================================================
// Scopes
// =============================================================================

#[test]
fn bare_end_is_a_single_error() {
    let (driver, diagnostics) = run("end");
    insta::assert_snapshot!(rendered(&diagnostics).join("\n"), @"1:0: error: [F0210] invalid end, no open scope to end");
    assert_eq!(driver.context().scopes.len(), 1);
}

#[test]
fn balanced_scopes_close_cleanly() {
    let (_, diagnostics) = run("namespace A\nsection S\nnamespace B\nend B\nend S\nend A");
    assert!(diagnostics.is_empty());
}

#[test]
fn mismatched_end_keeps_the_scope_open() {
    let (_, diagnostics) = run("namespace A\nend B");
    let messages: Vec<&str> = diagnostics.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(
        messages,
        vec!["invalid end of namespace, expected name 'A'", "missing end for namespace 'A'"]
    );
}

/// Elaborate commands without ending the run.
fn feed(driver: &mut Driver, src: &str) -> Vec<Diagnostic> {
    let mut parser = Parser::new(src);
    let mut diagnostics = Vec::new();
    loop {
        let stx = parser.next_command(driver.parser_config()).unwrap();
        if stx.is_node("command.eoi") {
            return diagnostics;
        }
        diagnostics.extend(driver.step(&stx).diagnostics().iter().cloned());
    }
}

/// The scoped tables, rendered for comparison.
fn scoped_state(driver: &Driver) -> Vec<String> {
    let ctx = driver.context();
    let scope = ctx.current_scope();
    let names = |ns: &[Name]| ns.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(",");
    let pairs = |ps: &[(Name, Name)]| {
        ps.iter()
            .map(|(a, b)| format!("{}={}", a, b))
            .collect::<Vec<_>>()
            .join(",")
    };
    vec![
        format!("path={}", ctx.namespace_path),
        format!("opens={}", names(scope.opened_namespaces.as_slice())),
        format!("ns_aliases={}", pairs(scope.namespace_aliases.as_slice())),
        format!("aliases={}", pairs(scope.local_aliases.as_slice())),
        format!("hidden={}", names(scope.hidden.as_slice())),
        format!("universes={}", ctx.universes.len()),
        format!("vars={}", ctx.vars.len()),
        format!("options={}", ctx.options.len()),
    ]
}

fn notation_tags(driver: &Driver) -> Vec<String> {
    driver
        .context()
        .notations
        .iter()
        .map(|(tag, _)| tag.to_string())
        .collect()
}

#[test]
fn nested_scopes_restore_every_table() {
    let mut driver = Driver::new(FrontendConfig::default());
    let setup = "
namespace Lib
def k : Nat := 1
def m : Nat := 2
end Lib
open Lib (k)
infixl:65 \" ⊕ \" => HXor.hXor
";
    assert!(feed(&mut driver, setup).is_empty());
    let before = scoped_state(&driver);

    let body = "
namespace A
open Lib
open Lib as L
open Lib hiding m
open Lib renaming m → mm
universe u
variable (n : Nat)
set_option maxUniverseOffset 16
infixl:70 \" ⊗ \" => HMul.hMul
local infix:50 \" ≺ \" => Prec
namespace B
open Lib (m)
universe v
variable {α : Sort v}
set_option deferUnknown false
infixr:75 \" ⊛ \" => Star
local infix:50 \" ≼ \" => PrecEq
end B
end A
";
    let diagnostics = feed(&mut driver, body);
    assert!(diagnostics.is_empty(), "{:?}", rendered(&diagnostics));
    assert_eq!(scoped_state(&driver), before);
    assert_eq!(
        notation_tags(&driver),
        vec!["infixl#0", "infixl#1", "infixr#3"]
    );
    let tokens = &driver.parser_config().tokens;
    assert!(tokens.contains("⊗") && tokens.contains("⊛"));
    assert!(!tokens.contains("≺") && !tokens.contains("≼"));
}

#[test]
fn section_variables_end_with_the_section() {
    let src = "
section
variable (n : Nat)
def double := n
end
def plain := n
";
    let (driver, diagnostics) = run(src);
    assert!(diagnostics.is_empty());
    assert_eq!(value_of(&driver, "double"), "fun (n : Nat) => n");
    assert_eq!(value_of(&driver, "plain"), "n");
}

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn colliding_opens_are_ambiguous() {
    let src = "
namespace A
def f : Nat := 1
end A
namespace B
def f : Nat := 2
end B
open A B
#check f
";
    let (_, diagnostics) = run(src);
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, Some("F0201"));
    assert_eq!(
        diagnostics[0].message,
        "ambiguous identifier 'f', possible interpretations: A.f, B.f"
    );
}

#[test]
fn root_anchor_escapes_the_namespace() {
    let src = "
def x : Nat := 1
namespace Foo
def x : Nat := 2
#check _root_.x
#check x
end Foo
";
    let (_, diagnostics) = run(src);
    let messages: Vec<&str> = diagnostics.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(messages, vec!["x : Nat", "Foo.x : Nat"]);
    assert!(diagnostics.iter().all(|d| d.severity == Severity::Info));
}

#[test]
fn private_names_stay_reachable_in_their_file() {
    let (driver, diagnostics) = run("private def secret : Nat := 1\ndef shown : Nat := secret");
    assert!(diagnostics.is_empty());
    assert!(!driver.environment().contains(&Name::parse("secret")));
    assert!(value_of(&driver, "shown").starts_with("_private."));
}

// =============================================================================
// Notations
// =============================================================================

#[test]
fn notation_use_elaborates_like_its_expansion() {
    let src = "
infixl:65 \" ⊕ \" => HXor.hXor
def viaNotation : Nat := a ⊕ b ⊕ c
def direct : Nat := HXor.hXor (HXor.hXor a b) c
";
    let (driver, diagnostics) = run(src);
    assert!(diagnostics.is_empty(), "{:?}", rendered(&diagnostics));
    assert_eq!(value_of(&driver, "viaNotation"), value_of(&driver, "direct"));
}

#[test]
fn duplicate_notation_is_reported_and_skipped() {
    let src = "infixl:65 \" ⊕ \" => HXor.hXor\ninfixl:65 \" ⊕ \" => Nat.xor\ndef v : Nat := a ⊕ b";
    let (driver, diagnostics) = run(src);
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, Some("F0300"));
    assert_eq!(value_of(&driver, "v"), "HXor.hXor a b");
}

#[test]
fn local_notation_tokens_leave_with_their_scope() {
    let mut driver = Driver::new(FrontendConfig::default());
    let mut parser = Parser::new("section\nlocal infix:50 \" ≺ \" => Prec\nend\n#check a ≺ b");
    let mut deltas = Vec::new();
    let mut diagnostics = Vec::new();
    loop {
        let step = match parser.next_command(driver.parser_config()) {
            Ok(stx) => driver.step(&stx),
            Err(err) => driver.step_parse_error(err),
        };
        diagnostics.extend(step.diagnostics().iter().cloned());
        match step {
            StepResult::Suspended { parser_delta, .. } => deltas.push(parser_delta),
            _ => break,
        }
    }
    assert_eq!(deltas[1].added_tokens, vec!["≺".to_string()]);
    assert_eq!(deltas[2].removed_tokens, vec!["≺".to_string()]);
    assert_eq!(diagnostics[0].code, Some("F0100"));
}

// =============================================================================
// Limits
// =============================================================================

#[test]
fn huge_universe_literals_are_reported() {
    let src = "
universe u
#check Sort 100000
#check Type (u+40)
set_option maxUniverseOffset 64
def big := Type (u+40)
";
    let (driver, diagnostics) = run(src);
    let codes: Vec<Option<&str>> = diagnostics.iter().map(|d| d.code).collect();
    assert_eq!(codes, vec![Some("F0902"), Some("F0902")]);
    assert!(diagnostics[0].message.starts_with("maximum universe level offset threshold (32)"));
    assert!(driver.environment().contains(&Name::parse("big")));
}

#[test]
fn deeply_nested_terms_fail_only_their_command() {
    let depth = 20_000;
    let src = format!(
        "def x : Nat := {}1{}\ndef y : Nat := 2",
        "(".repeat(depth),
        ")".repeat(depth)
    );
    let (driver, diagnostics) = run(&src);
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, Some("F0100"));
    assert!(diagnostics[0].message.starts_with("maximum term nesting depth"));
    assert!(!driver.environment().contains(&Name::parse("x")));
    assert_eq!(value_of(&driver, "y"), "2");
}
