use std::cell::{Cell, RefCell};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use tickbridge::logging::init_logging;
use tickbridge::scripting::host::concat_sources;
use tickbridge::scripting::report::ErrorOrigin;
use tickbridge::scripting::HostOperationError;
use tickbridge::{
    BridgeConfig, CompletionFlag, Coord, ExecutionScheduler, Handle, HostApi, HostValue,
    Operation, ParameterDescriptor, SchedulerState, SourceUnit, Target, ValueKind,
};

#[derive(Parser)]
#[command(version = env!("VERSION_STRING"), about, long_about = None)]
pub struct Cli {
    /// Lua files to run, concatenated in the order given
    #[arg(required_unless_present = "list")]
    files: Vec<PathBuf>,

    /// Config file (default: platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Milliseconds between host update steps
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,

    /// Maximum number of update steps to drive
    #[arg(long, default_value_t = 200)]
    ticks: u64,

    /// Re-run the script every N steps instead of once
    #[arg(long)]
    repeat: Option<u64>,

    /// Also write logs to the data directory
    #[arg(long)]
    log_file: bool,

    /// Print the published operations and exit
    #[arg(long)]
    list: bool,
}

struct Job {
    handle: Handle,
    destination: Coord,
    remaining: u64,
    done: CompletionFlag,
}

/// A turtle on an integer grid that walks to targets over several ticks
#[derive(Default)]
struct Turtle {
    position: Cell<Option<Coord>>,
    jobs: RefCell<Vec<Job>>,
    next_id: Cell<u64>,
}

impl Turtle {
    fn position(&self) -> Coord {
        self.position.get().unwrap_or(Coord::new(0, 0, 0))
    }

    fn issue_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    /// Progress every job by one step
    fn advance(&self) {
        let mut jobs = self.jobs.borrow_mut();
        for job in jobs.iter_mut() {
            job.remaining = job.remaining.saturating_sub(1);
            if job.remaining == 0 && !job.done.is_raised() {
                self.position.set(Some(job.destination));
                job.done.raise();
                info!("{} arrived at {}", job.handle, job.destination);
            }
        }
        jobs.retain(|job| !job.done.is_raised() || job.remaining > 0);
    }
}

struct TurtleHost(Rc<Turtle>);

impl HostApi for TurtleHost {
    fn operations(&self) -> Vec<Operation> {
        let position = self.0.clone();
        let mover = self.0.clone();

        vec![
            Operation::new("Add")
                .param(ParameterDescriptor::required("a", ValueKind::Number))
                .param(ParameterDescriptor::required("b", ValueKind::Number))
                .returns(ValueKind::Number)
                .handler(|args| Ok(HostValue::Number(args.number("a")? + args.number("b")?))),
            Operation::new("Turtle.GetPosition")
                .returns(ValueKind::Coord)
                .handler(move |_| Ok(position.position().into())),
            Operation::new("Turtle.MoveTo")
                .param(ParameterDescriptor::required("destination", ValueKind::Target))
                .param(ParameterDescriptor::with_default("ticks", ValueKind::Int, 3))
                .returns(ValueKind::Handle(Some("Job")))
                .handler(move |args| {
                    let destination = match args.target("destination")? {
                        Target::Cell(coord) if coord.is_valid() => coord,
                        Target::Entity(handle) => {
                            return Err(HostOperationError::new(format!(
                                "cannot walk to entity {}",
                                handle
                            )))
                        }
                        _ => {
                            return Err(HostOperationError::new(
                                "destination is not a valid cell",
                            ))
                        }
                    };
                    let handle = Handle::new("Job", mover.issue_id());
                    mover.jobs.borrow_mut().push(Job {
                        handle: handle.clone(),
                        destination,
                        remaining: args.int("ticks")?.max(1) as u64,
                        done: CompletionFlag::new(),
                    });
                    Ok(handle.into())
                }),
        ]
    }

    fn construct_entity(&self, type_name: &str) -> Option<Handle> {
        (type_name == "Marker").then(|| Handle::new("Marker", self.0.issue_id()))
    }

    fn watch_completion(&self, subject: Option<&Handle>) -> Option<CompletionFlag> {
        let jobs = self.0.jobs.borrow();
        let job = match subject {
            Some(handle) => jobs.iter().find(|job| &job.handle == handle),
            None => jobs.last(),
        };
        job.map(|job| job.done.clone())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging("cli", cli.log_file).context("Failed to initialize logging")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let config = match cli.config.clone().or_else(BridgeConfig::config_path) {
        Some(path) => BridgeConfig::load_or_default(&path),
        None => BridgeConfig::default(),
    };

    let turtle = Rc::new(Turtle::default());
    let mut scheduler =
        ExecutionScheduler::with_config(Rc::new(TurtleHost(turtle.clone())), config);

    if cli.list {
        for descriptor in scheduler.describe_all() {
            println!("{}", descriptor);
        }
        return Ok(());
    }

    let mut units = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        units.push(SourceUnit::new(path.display().to_string(), content));
    }

    match cli.repeat {
        Some(every) => scheduler.execute_repeating(concat_sources(&units), every),
        None => scheduler.execute_units(&units),
    }

    let mut interval = tokio::time::interval(Duration::from_millis(cli.tick_ms.max(1)));
    for _ in 0..cli.ticks {
        interval.tick().await;
        turtle.advance();
        scheduler.tick();

        if cli.repeat.is_none() && scheduler.state() != SchedulerState::Running {
            break;
        }
    }

    info!(
        "Finished after tick {} ({}), turtle at {}",
        scheduler.counter(),
        scheduler.state(),
        turtle.position()
    );

    if let Some(error) = scheduler.last_error() {
        eprintln!("{} error", error.origin);
        if error.has_line() {
            eprintln!("  line {}: {}", error.line_number, error.line_text);
        }
        eprintln!("  {}", error.message);
        for record in &error.history {
            eprintln!("  called {}", record);
        }
        if error.origin == ErrorOrigin::Guest {
            bail!("script failed");
        }
    }

    Ok(())
}
