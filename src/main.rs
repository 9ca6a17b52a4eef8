//! Plotcraft command line
//!
//! Usage: plotcraft [--config <FILE>] <COMMAND> ...
//!
//! Commands:
//!   check <SCRIPT>                 Parse and validate a script
//!   compile <SCRIPT>               Print the fill commands for plot 0,0
//!   encode <SCRIPT> <OUT.nbt>      Write the build as a structure file
//!   build <SCRIPT> [X,Z] [--name N] Build on a plot of the live server
//!   reset <X,Z>                    Clear and redecorate a plot
//!
//! RCON_HOST, RCON_PORT, RCON_PASSWORD and PLOTCRAFT_STRUCTURE_DIR override
//! the config file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use plotcraft::build::{BuildRequest, BuildService};
use plotcraft::compile::commands::region_commands;
use plotcraft::compile::{compile, place, split_oversized};
use plotcraft::core::{AppConfig, logging};
use plotcraft::plot::{PlotGrid, PlotId};
use plotcraft::script::{Sandbox, SandboxOutput};
use plotcraft::structure::StructureDocument;

#[derive(Debug)]
enum Command {
    Check(PathBuf),
    Compile(PathBuf),
    Encode(PathBuf, PathBuf),
    Build {
        script: PathBuf,
        plot: PlotId,
        name: Option<String>,
    },
    Reset(PlotId),
}

#[derive(Debug)]
struct Args {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_plot(text: &str) -> Result<PlotId, String> {
    let (x, z) = text
        .split_once(',')
        .ok_or_else(|| format!("plot must be X,Z: {}", text))?;
    let x = x.trim().parse().map_err(|_| format!("bad plot x: {}", x))?;
    let z = z.trim().parse().map_err(|_| format!("bad plot z: {}", z))?;
    Ok(PlotId::new(x, z))
}

fn parse_args() -> Result<Args, String> {
    let mut args = std::env::args().skip(1);
    let mut config = None;
    let mut name = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                config = Some(PathBuf::from(args.next().ok_or("--config needs a file")?));
            }
            "-n" | "--name" => {
                name = Some(args.next().ok_or("--name needs a value")?);
            }
            "-h" | "--help" | "help" => return Err("show_help".to_string()),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let verb = positional.next().ok_or("missing command")?;
    let mut next = |what: &str| positional.next().ok_or_else(|| format!("{} needs {}", verb, what));

    let command = match verb.as_str() {
        "check" => Command::Check(next("a script")?.into()),
        "compile" => Command::Compile(next("a script")?.into()),
        "encode" => Command::Encode(next("a script")?.into(), next("an output file")?.into()),
        "build" => {
            let script = next("a script")?.into();
            let plot = match next("a plot") {
                Ok(text) => parse_plot(&text)?,
                Err(_) => PlotId::default(),
            };
            Command::Build { script, plot, name }
        }
        "reset" => Command::Reset(parse_plot(&next("a plot")?)?),
        other => return Err(format!("unknown command: {}", other)),
    };

    Ok(Args { config, command })
}

fn print_help() {
    println!("Plotcraft - sandboxed voxel build scripts");
    println!();
    println!("Usage: plotcraft [--config <FILE>] <COMMAND> ...");
    println!();
    println!("Commands:");
    println!("  check <SCRIPT>                  Parse and validate a script");
    println!("  compile <SCRIPT>                Print the fill commands for plot 0,0");
    println!("  encode <SCRIPT> <OUT.nbt>       Write the build as a structure file");
    println!("  build <SCRIPT> [X,Z] [--name N] Build on a plot of the live server");
    println!("  reset <X,Z>                     Clear and redecorate a plot");
}

fn read_script(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))
}

fn run_sandbox(config: &AppConfig, path: &Path) -> Result<SandboxOutput, String> {
    let source = read_script(path)?;
    Sandbox::new(config.sandbox.clone())
        .run(&source)
        .map_err(|failure| failure.error.reason())
}

async fn run(args: Args) -> Result<(), String> {
    let config = AppConfig::load(args.config.as_deref()).map_err(|e| e.to_string())?;

    match args.command {
        Command::Check(path) => {
            let source = read_script(&path)?;
            let program = Sandbox::new(config.sandbox.clone())
                .check(&source)
                .map_err(|e| e.reason())?;
            println!("{}: ok ({} statements)", path.display(), program.len());
        }
        Command::Compile(path) => {
            let output = run_sandbox(&config, &path)?;
            let grid = PlotGrid::new(config.grid.clone()).map_err(|e| e.to_string())?;
            let plot = PlotId::default();
            let regions = split_oversized(place(
                &compile(&output.canvas),
                grid.origin(plot).as_ivec3(),
                Some(&grid.plot_bounds(plot)),
            ));
            for command in region_commands(&regions) {
                println!("{}", command);
            }
            log::info!("{} blocks in {} commands", output.block_count, regions.len());
        }
        Command::Encode(path, out) => {
            let output = run_sandbox(&config, &path)?;
            let bytes = StructureDocument::from_canvas(&output.canvas)
                .and_then(|doc| doc.with_data_version(config.data_version).encode())
                .map_err(|e| e.to_string())?;
            std::fs::write(&out, &bytes).map_err(|e| format!("{}: {}", out.display(), e))?;
            println!(
                "Wrote {} ({} blocks, {} bytes)",
                out.display(),
                output.block_count,
                bytes.len()
            );
        }
        Command::Build { script, plot, name } => {
            let source = read_script(&script)?;
            let service = BuildService::new(config).map_err(|e| e.to_string())?;
            let mut request = BuildRequest::new(plot, source);
            request.name = name;
            let outcome = service.build(request).await;
            service.close();
            match outcome.error {
                Some(error) => return Err(error),
                None => println!(
                    "Built plot {}: {} blocks, {} commands",
                    plot, outcome.block_count, outcome.commands_executed
                ),
            }
        }
        Command::Reset(plot) => {
            let service = BuildService::new(config).map_err(|e| e.to_string())?;
            let result = service.reset_plot(plot).await;
            service.close();
            let executed = result.map_err(|e| e.to_string())?;
            println!("Reset plot {} ({} commands)", plot, executed);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            if e == "show_help" {
                print_help();
                return ExitCode::SUCCESS;
            }
            eprintln!("Error: {}", e);
            print_help();
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
