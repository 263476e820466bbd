//! threadtrace CLI tool
//!
//! Commands:
//! - `threadtrace list` - Summarize dumps in the dump directory
//! - `threadtrace show --path <file>` - Print one dump as a stack trace
//! - `threadtrace clean` - Delete dumps

use std::path::{Path, PathBuf};

use facet::Facet;
use figue as args;
use threadtrace::dump::{clean_dumps, dump_dir_from_env, read_dump, read_dumps};
use threadtrace::render::render_lines;
use tracing::debug;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    #[facet(args::subcommand)]
    command: Command,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum Command {
    List {
        #[facet(args::named, default)]
        dir: Option<String>,
    },
    Show {
        #[facet(args::named)]
        path: String,
    },
    Clean {
        #[facet(args::named, default)]
        dir: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("threadtrace")
                .description("Inspect stack dumps written on SIGUSR1")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();
    let cli = args::Driver::new(figue_config)
        .run()
        .into_result()
        .map_err(|e| e.to_string())?;

    match cli.value.command {
        Command::List { dir } => run_list(&resolve_dir(dir)),
        Command::Show { path } => run_show(Path::new(&path)),
        Command::Clean { dir } => run_clean(&resolve_dir(dir)),
    }
}

fn resolve_dir(dir: Option<String>) -> PathBuf {
    dir.map(PathBuf::from).unwrap_or_else(dump_dir_from_env)
}

fn run_list(dir: &Path) -> Result<(), String> {
    debug!(dir = %dir.display(), "reading dumps");
    let dumps = read_dumps(dir).map_err(|e| e.to_string())?;
    if dumps.is_empty() {
        return Err(format!(
            "no dumps in {}. Trigger one with: kill -USR1 <pid>",
            dir.display()
        ));
    }

    println!("{} dumps in {}:", dumps.len(), dir.display());
    for (path, dump) in &dumps {
        let snapshot = &dump.snapshot;
        println!(
            "  {} (pid {}): {} threads, {} timed out  {}",
            dump.process_name,
            snapshot.pid,
            snapshot.threads.len(),
            snapshot.timed_out_count(),
            path.display()
        );
    }
    Ok(())
}

fn run_show(path: &Path) -> Result<(), String> {
    let dump = read_dump(path).map_err(|e| e.to_string())?;
    println!(
        "# {} (pid {}) captured at {} ms",
        dump.process_name, dump.snapshot.pid, dump.snapshot.captured_at_unix_ms
    );
    for line in render_lines(&dump.snapshot) {
        println!("{line}");
    }
    Ok(())
}

fn run_clean(dir: &Path) -> Result<(), String> {
    let removed = clean_dumps(dir).map_err(|e| e.to_string())?;
    eprintln!("Removed {removed} dumps from {}", dir.display());
    Ok(())
}
