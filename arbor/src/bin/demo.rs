//! Arbor ownership demo.
//!
//! Builds a parent/child pair and destroys the parent (taking the child with
//! it), hangs one more object under the application root, then runs the
//! event loop until a one-shot timer asks it to quit.
//!
//! # Usage
//!
//! ```sh
//! arbor-demo --delay 1000
//! RUST_LOG=arbor=trace cargo run --features tracing --bin arbor-demo
//! ```

use std::time::Duration;

use arbor::object::{ObjectError, ObjectTree};
use arbor::{Application, LoopError};

/// Default delay before the quit timer fires, in milliseconds.
const DEFAULT_DELAY_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error("{0}")]
    Usage(String),
    #[error("object error: {0}")]
    Object(#[from] ObjectError),
    #[error("event loop error: {0}")]
    Loop(#[from] LoopError),
}

/// Parsed command line.
struct DemoArgs {
    delay: Duration,
}

fn main() {
    arbor::init_tracing();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("arbor-demo: {e}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32, DemoError> {
    let args: Vec<String> = std::env::args().collect();
    let Some(args) = parse_args(&args)? else {
        print_usage();
        return Ok(0);
    };

    let mut app: Application = Application::new("app");

    // An owner and its child, unrelated to the application root.
    cascade(app.objects_mut())?;

    let ob = app.create_object("", ())?;
    app.objects_mut().set_name(ob, "ob...")?;
    println!(
        "created {:?} owned by {:?}",
        app.objects().name(ob)?,
        app.objects().name(app.root())?
    );

    app.single_shot(args.delay, |lp, _| {
        println!("timer fired after {:?}; quitting", lp.elapsed());
        lp.request_termination();
    })?;

    let code = app.exec()?;
    println!("event loop returned {code}");
    Ok(code)
}

/// Creates `parent` with a `child`, destroys `parent`, and reports what went.
fn cascade(objects: &mut ObjectTree) -> Result<(), DemoError> {
    let parent = objects.create("", None, ())?;
    objects.set_name(parent, "parent")?;
    let child = objects.create("", Some(parent), ())?;
    objects.set_name(child, "child")?;

    for destroyed in objects.destroy(parent)? {
        println!("destroyed {:?}", destroyed.name);
    }
    debug_assert!(!objects.is_alive(child));
    Ok(())
}

/// Parses command line arguments; `None` means help was requested.
fn parse_args(args: &[String]) -> Result<Option<DemoArgs>, DemoError> {
    let mut delay_ms = DEFAULT_DELAY_MS;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--delay" | "-d" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    return Err(DemoError::Usage("missing value for --delay".into()));
                };
                delay_ms = value
                    .parse()
                    .map_err(|e| DemoError::Usage(format!("invalid --delay {value:?}: {e}")))?;
            }
            "--help" | "-h" => return Ok(None),
            arg => return Err(DemoError::Usage(format!("unknown argument: {arg}"))),
        }
        i += 1;
    }

    Ok(Some(DemoArgs {
        delay: Duration::from_millis(delay_ms),
    }))
}

fn print_usage() {
    eprintln!(
        r#"arbor-demo - owned object tree and event loop demo

USAGE:
    arbor-demo [OPTIONS]

OPTIONS:
    -d, --delay <MS>    Delay before the quit timer fires (default: 1000)
    -h, --help          Print this help message

EXAMPLE:
    arbor-demo --delay 250
"#
    );
}
