//! MCP stdio server binary for PlasmidGPT.

use plasmid_gpt::{
    about, config::Settings, logging::set_up_logging, mcp_server::run_stdio_server,
    pipeline::Pipeline,
};
use std::env;

fn usage() {
    println!(
        "Usage:\n  \
plasmid_gpt_mcp [--offline] [-v] [--help|-h] [--version|-V]\n\n  \
Starts a MCP stdio server with tools:\n  \
  - capabilities\n  \
  - vocabulary\n  \
  - generate_plasmid (progress notifications per snapshot)\n  \
  - annotate_sequence\n  \
  - metrics\n\n  \
Logs go to stderr; stdout carries only MCP frames.\n"
    );
}

struct ServerArgs {
    offline: bool,
    verbosity: u8,
}

fn parse_args(args: &[String]) -> Result<ServerArgs, String> {
    let mut ret = ServerArgs {
        offline: false,
        verbosity: 0,
    };
    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--offline" => ret.offline = true,
            "-v" => ret.verbosity += 1,
            "-vv" => ret.verbosity += 2,
            other => {
                return Err(format!("Unknown argument '{other}'. Use --help for usage."));
            }
        }
    }
    Ok(ret)
}

fn run() -> Result<(), String> {
    let args = env::args().collect::<Vec<_>>();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        usage();
        return Ok(());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }
    let server_args = parse_args(&args)?;
    let settings = Settings::from_env();
    set_up_logging(server_args.verbosity, settings.log_dir.as_deref())?;
    let pipeline =
        Pipeline::from_settings(&settings, server_args.offline).map_err(|e| e.to_string())?;
    run_stdio_server(&pipeline)
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
