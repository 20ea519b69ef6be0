use std::process;

use arena_alloc::{
    Allocator as _,
    config::{AllocatorConfig, Strategy},
};
use argh::FromArgs;
use log::LevelFilter;
use snafu::ResultExt as _;
use snafu_utils::{GenericError, Report};

use self::script::{Op, Session};

mod logger;
mod script;

/// Run a sequence of operations against an arena allocator and print the
/// results to stdout.
#[derive(Debug, FromArgs)]
struct Args {
    /// allocation strategy (`pool` or `free-list`)
    #[argh(option, default = "Strategy::default()")]
    strategy: Strategy,
    /// arena size in bytes for the free list
    #[argh(option, default = "1024")]
    arena_size: usize,
    /// slot size in bytes for the pool
    #[argh(option, default = "256")]
    slot_size: usize,
    /// number of slots in the pool
    #[argh(option, default = "5")]
    slot_count: usize,
    /// log level (`off`, `error`, `warn`, `info`, `debug` or `trace`),
    /// defaults to $ARENA_LOG or `info`
    #[argh(option)]
    log_level: Option<LevelFilter>,
    /// disable colored output
    #[argh(switch)]
    no_color: bool,
    /// operations: alloc:<size>, free:<handle>, blocks, stat, free-list or
    /// check
    #[argh(positional)]
    ops: Vec<Op>,
}

fn main() {
    let args: Args = argh::from_env();

    if let Err(err) = run(&args) {
        let report = Report::new(err).color(!args.no_color);
        eprintln!("{report}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), GenericError> {
    let level =
        logger::resolve_level(args.log_level).whatever_context("failed to set up logging")?;
    logger::init(level, !args.no_color).whatever_context("failed to set up logging")?;

    let config = AllocatorConfig::new(
        args.strategy,
        args.arena_size,
        args.slot_size,
        args.slot_count,
    );
    log::info!("using {config}");

    let mut allocator = config
        .build()
        .with_whatever_context(|_| format!("failed to create allocator, config={config:?}"))?;
    allocator
        .init()
        .whatever_context("failed to initialize allocator")?;

    let mut session = Session::new(allocator);
    let mut out = String::new();
    for &op in &args.ops {
        out.clear();
        let result = session.run(op, &mut out);
        print!("{out}");
        result.with_whatever_context(|_| format!("failed to run `{op}`"))?;
    }
    session.finish();

    Ok(())
}
