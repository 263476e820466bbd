use facet::Facet;
use figue as args;

mod scenarios;

type AnyResult<T> = Result<T, String>;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    #[facet(args::subcommand)]
    command: CommandKind,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum CommandKind {
    ParkedWorkers {
        #[facet(args::named, default)]
        workers: Option<usize>,
        #[facet(args::named, default)]
        json: bool,
    },
    TokioWorkers,
    LockOrder,
    QuitAfter,
    BoardRoundtrip {
        #[facet(args::named, default)]
        path: Option<String>,
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

fn run() -> AnyResult<()> {
    let cli = parse_cli()?;
    dispatch_command(cli.command)
}

fn parse_cli() -> AnyResult<Cli> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("threadtrace-examples")
                .description("Run threadtrace scenarios as subcommands")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();

    args::Driver::new(figue_config)
        .run()
        .into_result()
        .map(|v| v.value)
        .map_err(|e| e.to_string())
}

fn dispatch_command(command: CommandKind) -> AnyResult<()> {
    match command {
        CommandKind::ParkedWorkers { workers, json } => {
            scenarios::parked_workers::run(workers.unwrap_or(4), json)
        }
        CommandKind::TokioWorkers => scenarios::tokio_workers::run(),
        CommandKind::LockOrder => scenarios::lock_order::run(),
        CommandKind::QuitAfter => scenarios::quit_after::run(),
        CommandKind::BoardRoundtrip { path } => {
            let path = path.unwrap_or_else(|| scenarios::board_roundtrip::DEFAULT_PATH.to_string());
            scenarios::board_roundtrip::run(std::path::Path::new(&path))
        }
    }
}
