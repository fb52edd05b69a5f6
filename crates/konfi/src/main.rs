use std::process::ExitCode;

use konfi::{encode_as_json_indent, encode_as_yaml, load_module, Ctx};

enum OutputFormat {
    Json,
    Yaml,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let mut format = OutputFormat::Json;
    let mut print_result = true;
    let mut file: Option<String> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "--format" => {
                let Some(value) = args.next() else {
                    return Err("--format expects a value".to_string());
                };
                format = parse_format(&value)?;
            }
            "-p" | "-p=true" => print_result = true,
            "-p=false" => print_result = false,
            _ if arg.starts_with("--format=") => {
                format = parse_format(&arg["--format=".len()..])?;
            }
            _ if arg.starts_with('-') => return Err(format!("unknown flag {arg}")),
            _ => {
                if file.is_some() {
                    return Err(format!("unexpected argument {arg}"));
                }
                file = Some(arg);
            }
        }
    }

    let Some(file) = file else {
        print_help();
        return Err("expected one input file".to_string());
    };

    let ctx = Ctx::global();
    let module = load_module(&file, &ctx).map_err(|e| ctx.format_error(&e))?;
    if print_result {
        let output = match format {
            OutputFormat::Json => encode_as_json_indent(&module.body),
            OutputFormat::Yaml => encode_as_yaml(&module.body),
        }
        .map_err(|e| ctx.format_error(&e))?;
        println!("{output}");
    }
    Ok(())
}

fn parse_format(value: &str) -> Result<OutputFormat, String> {
    match value {
        "json" => Ok(OutputFormat::Json),
        "yaml" => Ok(OutputFormat::Yaml),
        other => Err(format!("unknown output format: {other}")),
    }
}

fn print_help() {
    println!(
        "konfi\n\nUSAGE:\n  konfi [--format=json|yaml] [-p[=true|false]] <file>\n\nOPTIONS:\n  --format  output format, json (default) or yaml\n  -p        print the evaluated module body to stdout (default true)\n  -h, --help"
    );
}
