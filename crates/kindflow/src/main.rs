use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kindflow_core::eval::Interpreter;
use kindflow_core::ir::{Entity, Program};
use kindflow_core::{UnboxConfig, Unboxer};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kindflow", version, about = "Kind specialization and box elimination")]
struct Cli {
    /// Dump the solved kind assignment and per-rewrite detail
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// JSON configuration file; flags override its settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Specialize and unbox a program
    Run {
        /// Program in JSON form
        program: PathBuf,

        /// Deepest boxing layer to remove
        #[arg(long)]
        max_depth: Option<usize>,

        /// Write the rewritten program as JSON instead of printing it
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Print the per-depth report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the specialized kind of every box-typed field and local
    Kinds {
        /// Program in JSON form
        program: PathBuf,
    },

    /// Execute one function and print the resulting field values
    Exec {
        /// Program in JSON form
        program: PathBuf,

        /// Function to run
        function: String,

        /// Unbox the program before running it
        #[arg(long, default_value_t = false)]
        unbox: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut config = match &cli.config {
        Some(path) => UnboxConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => UnboxConfig::default(),
    };
    if cli.debug {
        config = config.with_debug(true);
    }

    match cli.cmd {
        Cmd::Run {
            program,
            max_depth,
            output,
            json,
        } => {
            if let Some(depth) = max_depth {
                config = config.with_max_depth(depth);
            }
            run(&program, config, output.as_deref(), json)
        }
        Cmd::Kinds { program } => kinds(&program, config),
        Cmd::Exec {
            program,
            function,
            unbox,
        } => exec(&program, &function, config, unbox),
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load(path: &Path) -> Result<Program> {
    let source = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let program =
        Program::from_json(&source).with_context(|| format!("failed to parse program {}", path.display()))?;
    tracing::debug!(
        "loaded {}: {} field(s), {} function(s)",
        path.display(),
        program.fields.len(),
        program.functions.len()
    );
    Ok(program)
}

fn run(path: &Path, config: UnboxConfig, output: Option<&Path>, json: bool) -> Result<()> {
    let mut program = load(path)?;
    let report = Unboxer::new(config)
        .run(&mut program)
        .with_context(|| format!("unboxing {} failed", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.depths)?);
    } else {
        for depth in &report.depths {
            println!(
                "depth {}: replaced {}, kept {}, rewrote {}, removed {}, unsatisfied {}",
                depth.depth, depth.replaced, depth.kept, depth.rewritten, depth.removed, depth.unsatisfied
            );
        }
    }
    for (entity, desc) in &report.replacements {
        println!("{} -> {} ({} slots)", program.describe(entity), desc.kind, desc.slots.len());
    }

    match output {
        Some(out) => {
            let json = program.to_json()?;
            std::fs::write(out, json).with_context(|| format!("failed to write {}", out.display()))?;
            println!("wrote {}", out.display());
        }
        None => print!("{}", program),
    }
    Ok(())
}

fn kinds(path: &Path, config: UnboxConfig) -> Result<()> {
    let program = load(path)?;
    let cx = Unboxer::new(config).analyze(&program);
    for entity in cx.entities().filter(|entity| !matches!(entity, Entity::Alloc(..))) {
        let kind = cx.specialized_kind(entity)?;
        let mut notes = Vec::new();
        if cx.is_unsafe(entity) {
            notes.push("unsafe");
        }
        if cx.is_conflicted(entity) {
            notes.push("conflicted");
        }
        if notes.is_empty() {
            println!("{}: {}", program.describe(entity), kind);
        } else {
            println!("{}: {} [{}]", program.describe(entity), kind, notes.join(", "));
        }
    }
    let unsatisfied = cx.unsatisfied().len();
    if unsatisfied > 0 {
        println!("{} unsatisfied constraint(s)", unsatisfied);
    }
    Ok(())
}

fn exec(path: &Path, function: &str, config: UnboxConfig, unbox: bool) -> Result<()> {
    let mut program = load(path)?;
    if unbox {
        Unboxer::new(config).run(&mut program)?;
    }
    let mut interp = Interpreter::new(&program);
    let result = interp
        .call(function)
        .with_context(|| format!("evaluating {} failed", function))?;
    for (name, value) in interp.live_fields() {
        println!("{} = {}", name, value);
    }
    if let Some(value) = result {
        println!("return {}", value);
    }
    Ok(())
}
