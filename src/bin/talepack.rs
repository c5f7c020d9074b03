/// `bin/talepack.rs` - load a pack archive and print what it contains
use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use talepack::{LoaderConfig, Pack, PackLoader};

#[derive(Debug, Parser)]
#[command(author, version, about = "Load a story pack archive", long_about = None)]
struct Cli {
    /// Pack archive (.zip, .tar or .tar.gz)
    archive: PathBuf,
    /// Loader config as JSON
    #[arg(long)]
    config: Option<PathBuf>,
    /// Instruction budget per script, 0 disables it
    #[arg(long)]
    budget: Option<u32>,
    /// Print the whole tree as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match LoaderConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("talepack: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => LoaderConfig::default(),
    };
    if let Some(budget) = cli.budget {
        config.instruction_budget = (budget > 0).then_some(budget);
    }

    let pack = match PackLoader::new(config).and_then(|loader| loader.load_file(&cli.archive)) {
        Ok(pack) => pack,
        Err(e) => {
            eprintln!("talepack: {} failed: {e}", e.stage());
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&pack.to_json()) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("talepack: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_tree(&pack);
    }
    ExitCode::SUCCESS
}

fn print_tree(pack: &Pack) {
    println!("pack ({} keys)", pack.root.result.len());
    if let Some(options) = &pack.options {
        println!("  options: {} keys", options.len());
    }
    for (phase_name, phase) in &pack.root.phases {
        println!("  phase {phase_name}");
        for (stage_name, stage) in &phase.stages {
            println!("    stage {stage_name}");
            for (action_name, action) in &stage.actions {
                println!("      {} {action_name}", action.author.dir_name());
            }
        }
    }
}
