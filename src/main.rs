use colored::Colorize;
use miette::{Diagnostic, IntoDiagnostic, Report, Result};
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use graft::{
    parse, Compiler, CompilerConfig, ParseOutput, ParserOpts, Scheduling, Snapshot,
    SourceReference,
};

struct Cli {
    show_ast: bool,
    data: serde_json::Value,
    compiler: Compiler,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GRAFT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<_> = std::env::args().skip(1).collect();
    let sync = consume_arg(&mut args, |arg| (arg == "--sync").then_some(true)).unwrap_or(false);
    let show_ast = consume_arg(&mut args, |arg| (arg == "--ast").then_some(true)).unwrap_or(false);
    let data_file = consume_flag_value(&mut args, "--data");
    let config_file = consume_flag_value(&mut args, "--config");
    let file = consume_arg(&mut args, |arg| {
        if arg.starts_with("--") {
            None
        } else {
            Some(arg.to_string())
        }
    });
    if !args.is_empty() {
        eprintln!("Unrecognized arguments: {:?}", args);
        eprintln!("Usage: graft [--sync] [--ast] [--data FILE.json] [--config FILE.json] [FILE]");
        std::process::exit(1);
    }

    let mut config = match config_file {
        Some(path) => CompilerConfig::load(path).into_diagnostic()?,
        None => CompilerConfig::default(),
    };
    if sync {
        config = config.with_scheduling(Scheduling::Sync);
    }
    let data = match data_file {
        Some(path) => {
            let text = std::fs::read_to_string(path).into_diagnostic()?;
            serde_json::from_str(&text).into_diagnostic()?
        }
        None => serde_json::Value::Null,
    };
    let cli = Cli {
        show_ast,
        data,
        compiler: Compiler::new(config),
    };

    if let Some(file) = file {
        run_file(&cli, file)?;
    } else {
        run_prompt(&cli)?;
    }

    Ok(())
}

fn consume_arg<T, F: Fn(&str) -> Option<T>>(args: &mut Vec<String>, predicate: F) -> Option<T> {
    let found = args
        .iter()
        .enumerate()
        .filter_map(|(idx, arg)| predicate(arg).map(|val| (idx, val)))
        .next();

    if let Some((idx, val)) = found {
        args.remove(idx);
        Some(val)
    } else {
        None
    }
}

/// Removes `flag` and the argument after it, returning that argument.
fn consume_flag_value(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let idx = args.iter().position(|arg| arg == flag)?;
    if idx + 1 >= args.len() {
        return None;
    }
    args.remove(idx);
    Some(args.remove(idx))
}

fn report_all_errors<E: Diagnostic + Send + Sync + 'static>(
    errors: impl IntoIterator<Item = E>,
    source_reference: &SourceReference,
) {
    for error in errors {
        println!(
            "{:?}",
            Report::new(error).with_source_code(source_reference.clone())
        );
    }
}

fn parser_opts(cli: &Cli) -> ParserOpts {
    ParserOpts::default().with_recursion_limit(cli.compiler.config().recursion_limit)
}

/// Parses `source`, printing every scanner and parser error. Returns the snapshot to
/// compile when the parse was clean.
fn parse_and_report_errors(cli: &Cli, file_name: &str, source: &str) -> Option<Snapshot> {
    let source_reference = SourceReference::new(file_name, source);
    let ParseOutput {
        store,
        root,
        scanner_errors,
        parser_errors,
        version,
    } = parse(source, parser_opts(cli));
    let did_have_error = !scanner_errors.is_empty() || !parser_errors.is_empty();
    report_all_errors(scanner_errors, &source_reference);
    report_all_errors(parser_errors, &source_reference);

    let root = root?;
    if cli.show_ast {
        if let Some(tree) = store.tree(root) {
            println!("{}", tree.to_string().dimmed());
        }
    }
    if did_have_error {
        None
    } else {
        Some(Snapshot {
            version,
            ..store.snapshot(root)
        })
    }
}

fn print_diagnostics(diagnostics: &[graft::Diagnostic]) {
    for diagnostic in diagnostics {
        println!("{}", diagnostic.to_string().yellow());
    }
}

fn run_file(cli: &Cli, file_name: String) -> Result<()> {
    let path = std::fs::canonicalize(file_name).into_diagnostic()?;
    let source = std::fs::read_to_string(&path).into_diagnostic()?;

    let snapshot = match parse_and_report_errors(cli, &path.to_string_lossy(), &source) {
        Some(snapshot) => snapshot,
        None => std::process::exit(70),
    };
    let compiled = match cli.compiler.try_compile(&snapshot, &cli.data) {
        Ok(compiled) => compiled,
        Err(error) => {
            println!("{:?}", Report::new(error));
            std::process::exit(70);
        }
    };
    print_diagnostics(&compiled.diagnostics);
    match compiled.value {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value).into_diagnostic()?),
        None => std::process::exit(70),
    }

    Ok(())
}

fn repl_loop<
    E: Diagnostic + Send + Sync + 'static,
    F: FnMut(String, String) -> Option<Result<String, E>>,
>(
    mut eval: F,
) -> Result<()> {
    let mut rl = rustyline::Editor::<()>::new();
    let mut repl_line: usize = 1;
    loop {
        match rl.readline(&format!("{}> ", repl_line)) {
            Ok(line) => {
                rl.add_history_entry(line.as_str());
                match eval(format!("<repl-{}>", repl_line), format!("{}\n", line)) {
                    Some(Ok(val)) => println!("==> {}", val),
                    Some(Err(err)) => println!("{:?}", Report::new(err)),
                    None => {}
                }
            }
            Err(ReadlineError::Interrupted) => return Ok(()),
            Err(ReadlineError::Eof) => return Ok(()),
            Err(err) => return Err(err).into_diagnostic(),
        }
        repl_line += 1;
    }
}

fn run_prompt(cli: &Cli) -> Result<()> {
    repl_loop(|file_name, source| {
        let snapshot = parse_and_report_errors(cli, &file_name, &source)?;
        Some(
            cli.compiler
                .try_compile(&snapshot, &cli.data)
                .map(|compiled| {
                    print_diagnostics(&compiled.diagnostics);
                    compiled
                        .value
                        .map_or_else(|| "<no value>".to_string(), |value| value.to_string())
                }),
        )
    })
}
