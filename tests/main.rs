use std::{
    collections::VecDeque,
    fs::{self},
    path::{Path, PathBuf},
};

use colored::Colorize;
use graft::{
    parse, CaseFallthrough, Compiler, CompilerConfig, DiagnosticKind, ParserError, ParserOpts,
    Scheduling, ScannerError, Snapshot,
};
use itertools::Itertools;
use lazy_static::lazy_static;
use libtest_mimic::{self, run_tests, Arguments, Outcome, Test};
use miette::{miette, IntoDiagnostic, Result};
use regex::Regex;

fn main() {
    let tests = read_all_files("test_fixtures".to_string().into())
        .unwrap()
        .into_iter()
        .filter(|path| path.extension().map_or(false, |ext| ext == "graft"))
        .flat_map(|path| {
            [
                Test {
                    name: path.to_string_lossy().into(),
                    kind: "async".into(),
                    is_bench: false,
                    is_ignored: false,
                    data: path.clone(),
                },
                Test {
                    name: path.to_string_lossy().into(),
                    kind: "sync".into(),
                    is_bench: false,
                    is_ignored: false,
                    data: path,
                },
            ]
        })
        .collect::<Vec<_>>();

    run_tests(&Arguments::from_args(), tests, |test| {
        let scheduling = if test.kind == "sync" {
            Scheduling::Sync
        } else {
            Scheduling::Async
        };
        match run_test(&test.data, scheduling) {
            Ok(outcome) => outcome,
            Err(err) => Outcome::Failed {
                msg: Some(format!("{:?}", err)),
            },
        }
    })
    .exit();
}

lazy_static! {
    static ref EXPECTED_VALUE_RE: Regex = Regex::new(r"\| expect: (.*)\n?").unwrap();
    static ref PARSER_ERROR_RE: Regex = Regex::new(r"\| (Scanner|Parser)Error: (.*)\n?").unwrap();
    static ref DIAGNOSTIC_RE: Regex =
        Regex::new(r"\| (Check|Eval|Internal)Error: (.*)\n?").unwrap();
    static ref DATA_RE: Regex = Regex::new(r"\| data: (.*)\n?").unwrap();
    static ref FALLTHROUGH_RE: Regex = Regex::new(r"\| fallthrough: report\n?").unwrap();
}

fn run_test(path: &Path, scheduling: Scheduling) -> Result<Outcome> {
    let test_source = fs::read_to_string(path).into_diagnostic()?;

    let expected_value = EXPECTED_VALUE_RE
        .captures_iter(&test_source)
        .map(|captures| captures[1].trim().to_string())
        .at_most_one()
        .map_err(|_| miette!("should have at most one expected value"))?;

    let mut expected_parser_errors = PARSER_ERROR_RE
        .captures_iter(&test_source)
        .map(|captures| format!("{}Error: {}", &captures[1], captures[2].trim()))
        .collect::<VecDeque<_>>();

    let expected_diagnostics = DIAGNOSTIC_RE
        .captures_iter(&test_source)
        .map(|captures| format!("{}Error: {}", &captures[1], captures[2].trim()))
        .collect::<Vec<_>>();

    let data = match DATA_RE
        .captures_iter(&test_source)
        .at_most_one()
        .map_err(|_| miette!("should have at most one data annotation"))?
    {
        Some(captures) => serde_json::from_str(&captures[1]).into_diagnostic()?,
        None => serde_json::Value::Null,
    };

    let config = CompilerConfig {
        scheduling,
        case_fallthrough: if FALLTHROUGH_RE.is_match(&test_source) {
            CaseFallthrough::Report
        } else {
            CaseFallthrough::Empty
        },
        ..CompilerConfig::default()
    };

    let output = parse(&test_source, ParserOpts::default());
    let did_have_scan_or_parse_errors = output.has_errors();
    for scanner_error in &output.scanner_errors {
        if let Err(msg) = match_errors(scanner_error, &expected_parser_errors.pop_front()) {
            return Ok(Outcome::Failed { msg: Some(msg) });
        }
    }
    for parser_error in &output.parser_errors {
        if let Err(msg) = match_errors(parser_error, &expected_parser_errors.pop_front()) {
            return Ok(Outcome::Failed { msg: Some(msg) });
        }
    }

    if !expected_parser_errors.is_empty() {
        return Ok(Outcome::Failed {
            msg: Some(format!(
                "Expected errors:\n{}",
                expected_parser_errors
                    .iter()
                    .map(|err| format!(" - {}\n", err))
                    .collect::<String>(),
            )),
        });
    }

    if did_have_scan_or_parse_errors {
        return Ok(Outcome::Passed);
    }

    let snapshot = output
        .snapshot()
        .ok_or_else(|| miette!("a clean parse should produce a program"))?;
    let snapshot = Snapshot::from_json(&snapshot.to_json()?)?;
    let compiled = Compiler::new(config).compile(&snapshot, &data);

    let mut actual_lines = compiled
        .diagnostics
        .iter()
        .map(|diagnostic| match diagnostic.kind {
            DiagnosticKind::Check => format!("CheckError: {}", diagnostic.message),
            DiagnosticKind::Evaluation => format!("EvalError: {}", diagnostic.message),
            DiagnosticKind::Internal => format!("InternalError: {}", diagnostic.message),
            kind => format!("{}: {}", kind, diagnostic.message),
        })
        .collect::<Vec<_>>();
    if let Some(value) = &compiled.value {
        actual_lines.push(format!("expect: {}", value));
    }

    let mut expected_lines = expected_diagnostics;
    if let Some(value) = expected_value {
        expected_lines.push(format!("expect: {}", value));
    }

    Ok(compare_outputs(expected_lines, actual_lines))
}

fn match_errors<E: FmtError>(
    actual_error: &E,
    expected_error: &Option<String>,
) -> Result<(), String> {
    let actual_str = actual_error.fmt_error();
    match expected_error {
        Some(expected_str) if expected_str.trim() == actual_str.trim() => Ok(()),
        Some(expected_str) => Err(format!(
            "Errors do not match.\nExpected: {}\n  Actual: {}",
            expected_str, actual_str
        )),
        None => Err(format!("Unexpected error:\n{}", actual_str)),
    }
}

fn compare_outputs(expected_lines: Vec<String>, actual_lines: Vec<String>) -> Outcome {
    const EXPECTED: &str = "expected";
    const ACTUAL: &str = "actual";
    const NONE: &str = "<None>";

    fn max_len(lines: &[String], label: &str) -> usize {
        lines
            .iter()
            .map(|line| line.len())
            .max()
            .unwrap_or(0)
            .max(label.len())
    }

    let max_expected_len = max_len(&expected_lines, EXPECTED);
    let max_actual_len = max_len(&actual_lines, ACTUAL);

    let mut output_str = format!(
        "   | {:max_expected_len$} | {:max_actual_len$} \n",
        EXPECTED.bold(),
        ACTUAL.bold()
    );
    let line_count = expected_lines.len().max(actual_lines.len());
    let mut unmatched_count = 0usize;
    for i in 0..line_count {
        let expected_line = expected_lines.get(i);
        let actual_line = actual_lines.get(i);

        let is_match = expected_line == actual_line;
        if !is_match {
            unmatched_count += 1;
        }

        let colorify = |string: &str| {
            if is_match {
                string.green()
            } else {
                string.red()
            }
        };

        let result_char = if is_match { "✓" } else { "✗" };
        let result_str = &format!(
            " {} | {:max_expected_len$} | {:max_actual_len$}",
            colorify(result_char),
            expected_line
                .map(|line| colorify(line))
                .unwrap_or_else(|| NONE.dimmed()),
            actual_line
                .map(|line| colorify(line))
                .unwrap_or_else(|| NONE.dimmed()),
        );
        output_str.push_str(result_str);
        output_str.push('\n');
    }

    if unmatched_count > 0 {
        Outcome::Failed {
            msg: Some(output_str),
        }
    } else {
        Outcome::Passed
    }
}

fn read_all_files(prefix: PathBuf) -> Result<Vec<PathBuf>> {
    let mut results = Vec::<PathBuf>::new();
    read_children(prefix, &mut results)?;
    results.sort();
    return Ok(results);

    fn read_children(prefix: PathBuf, results: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(prefix).into_diagnostic()? {
            let entry = entry.into_diagnostic()?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if entry.file_type().into_diagnostic()?.is_dir() {
                read_children(entry.path(), results)?;
            } else {
                results.push(entry.path())
            }
        }
        Ok(())
    }
}

trait FmtError {
    fn fmt_error(&self) -> String;
}
impl FmtError for ScannerError {
    fn fmt_error(&self) -> String {
        format!("ScannerError: {}", self)
    }
}
impl FmtError for ParserError {
    fn fmt_error(&self) -> String {
        format!("ParserError: {}", self)
    }
}
