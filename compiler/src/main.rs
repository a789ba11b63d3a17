use clap::Parser;
use std::path::PathBuf;

use dlc::emitter::CppEmitter;
use dlc::pass::PassId;
use dlc::pipeline::{compile, CompileOptions};
use dlc::tree::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Rendered per-domain code
    Code,
    /// Program output as JSON
    Json,
    /// Element dependency graph as DOT
    Graph,
    /// Validated tree echoed back as JSON
    Tree,
}

impl EmitStage {
    fn terminal(self) -> PassId {
        match self {
            EmitStage::Code => PassId::Render,
            EmitStage::Json | EmitStage::Graph => PassId::Assemble,
            EmitStage::Tree => PassId::Validate,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "dlc",
    version,
    about = "Dataflow lowering compiler: lowers multirate stream graphs to per-domain imperative code"
)]
struct Cli {
    /// Input program tree (JSON)
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Code)]
    emit: EmitStage,

    /// Override the platform framework used to filter namespaces
    #[arg(long)]
    framework: Option<String>,

    /// Print compiler passes and timing
    #[arg(long)]
    verbose: bool,
}

fn init_logging(verbose: bool) -> Option<flexi_logger::LoggerHandle> {
    let default = if verbose { "info" } else { "warn" };
    let log_spec = std::env::var("DLC_LOG").unwrap_or_else(|_| default.to_string());
    match flexi_logger::Logger::try_with_str(&log_spec).and_then(|l| l.log_to_stderr().start()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("dlc: warning: logging disabled: {}", e);
            None
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let _logger = init_logging(cli.verbose);

    log::info!("dlc: source = {}", cli.source.display());
    log::info!("dlc: emit   = {:?}", cli.emit);

    // ── Read and parse tree ──
    let text = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("dlc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };
    let program = match Program::from_json(&text) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("dlc: {}", e.to_diagnostic());
            std::process::exit(1);
        }
    };

    // ── Compile ──
    let options = CompileOptions {
        framework: cli.framework.clone(),
        terminal: cli.emit.terminal(),
    };
    let compilation = match compile(&program, &CppEmitter, &options) {
        Ok(c) => c,
        Err(err) => {
            for diag in &err.diagnostics {
                eprintln!("dlc: {}", diag);
            }
            std::process::exit(1);
        }
    };
    for diag in &compilation.diagnostics {
        eprintln!("dlc: {}", diag);
    }

    // ── Emit ──
    let rendered = match cli.emit {
        EmitStage::Code => compilation.rendered.clone().unwrap_or_default(),
        EmitStage::Json => compilation
            .output
            .as_ref()
            .map(serde_json::to_string_pretty)
            .transpose()
            .map(Option::unwrap_or_default)
            .unwrap_or_else(|e| {
                eprintln!("dlc: error: {}", e);
                std::process::exit(1);
            }),
        EmitStage::Graph => compilation
            .output
            .as_ref()
            .map(|out| {
                let platform = program.platform.domain.as_deref().unwrap_or_default();
                dlc::dot::emit_dot(&compilation.graph, &out.elements, platform)
            })
            .unwrap_or_default(),
        EmitStage::Tree => serde_json::to_string_pretty(&program).unwrap_or_else(|e| {
            eprintln!("dlc: error: {}", e);
            std::process::exit(1);
        }),
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, rendered) {
                eprintln!("dlc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
            log::info!("dlc: wrote {}", path.display());
        }
        None => print!("{}", rendered),
    }
}
