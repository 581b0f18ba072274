//! Determinism and step-budget tests for the driver
//!
//! The same source with the same budget must always produce the same
//! diagnostics and the same environment.

use frontend::{CommandSource, Driver, FrontendConfig, Parser, RunOutcome, StepResult};
use kernel::Name;

const SOURCE: &str = "
namespace A
def one : Nat := 1
end A
open A
def two : Nat := one
#check two
";

/// Top-level commands in `SOURCE`.
const COMMANDS: usize = 6;

fn run_with_budget(budget: usize) -> (RunOutcome, Vec<String>) {
    let config = FrontendConfig {
        step_budget: budget,
        ..FrontendConfig::default()
    };
    let mut driver = Driver::new(config);
    let outcome = driver.run(SOURCE);
    let mut names: Vec<String> = driver.environment().names().map(|n| n.to_string()).collect();
    names.sort();
    (outcome, names)
}

// =============================================================================
// FUEL
// =============================================================================

#[test]
fn budget_bounds_the_commands_processed() {
    for budget in 0..=COMMANDS + 2 {
        let (outcome, _) = run_with_budget(budget);
        assert_eq!(outcome.commands, budget.min(COMMANDS), "budget {}", budget);
        if budget < COMMANDS {
            assert!(outcome.fatal, "budget {} should exhaust", budget);
            let last = outcome.diagnostics.last().unwrap();
            assert_eq!(last.code, Some("F0901"));
            assert_eq!(
                outcome.diagnostics.iter().filter(|d| d.code == Some("F0901")).count(),
                1
            );
        } else {
            assert!(!outcome.fatal, "budget {} should finish", budget);
        }
    }
}

#[test]
fn exhausted_runs_keep_the_work_done_so_far() {
    let (_, names) = run_with_budget(2);
    assert_eq!(names, vec!["A.one"]);
    let (_, names) = run_with_budget(COMMANDS);
    assert_eq!(names, vec!["A.one", "two"]);
}

#[test]
fn open_in_charges_its_inner_command() {
    let mut driver = Driver::new(FrontendConfig {
        step_budget: 10,
        ..FrontendConfig::default()
    });
    let mut parser = Parser::new("namespace Lib\nend Lib\nopen Lib in\ndef a : Nat := 1\n");
    let mut budgets = Vec::new();
    loop {
        let stx = parser.next_command(driver.parser_config()).unwrap();
        if stx.is_node("command.eoi") {
            break;
        }
        let step = driver.step(&stx);
        assert!(step.diagnostics().is_empty(), "{:?}", step.diagnostics());
        budgets.push(driver.context().step_budget);
    }
    assert_eq!(budgets, vec![9, 8, 6]);
}

#[test]
fn open_in_can_exhaust_the_budget() {
    let mut driver = Driver::new(FrontendConfig {
        step_budget: 3,
        ..FrontendConfig::default()
    });
    let outcome = driver.run("namespace Lib\nend Lib\nopen Lib in\ndef a : Nat := 1\n");
    assert!(outcome.fatal);
    assert_eq!(outcome.diagnostics.last().unwrap().code, Some("F0901"));
    assert!(!driver.environment().contains(&Name::parse("a")));
    assert!(matches!(
        driver.step(&frontend::Syntax::node("command.eoi", vec![], Default::default())),
        StepResult::Fatal { .. }
    ));
}

// =============================================================================
// REPEATABILITY
// =============================================================================

#[test]
fn repeated_runs_agree() {
    for budget in [1, 4, COMMANDS] {
        let first = run_with_budget(budget);
        for _ in 0..3 {
            assert_eq!(run_with_budget(budget), first);
        }
    }
}

#[test]
fn info_output_is_stable() {
    let (outcome, _) = run_with_budget(COMMANDS);
    let rendered: Vec<String> = outcome.diagnostics.iter().map(|d| d.to_string()).collect();
    insta::assert_snapshot!(rendered.join("\n"), @"7:0: info: two : Nat");
}
