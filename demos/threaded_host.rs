//! A small host wiring a suite of fake checks through the threaded runner.
//!
//! ```sh
//! TESTLOOM_WORKERS=4 RUST_LOG=debug cargo run --example threaded_host
//! ```

use std::{env, process::ExitCode, sync::Arc, thread, time::Duration};

use testloom::{ExecError, Session, ThreadedRunner, WorkerCount};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let workers: WorkerCount = env::var("TESTLOOM_WORKERS")
        .ok()
        .map(|raw| {
            raw.parse()
                .expect("TESTLOOM_WORKERS must be \"auto\" or a positive integer")
        })
        .unwrap_or_default();

    let checks: Vec<String> = (1..=24).map(|n| format!("demo::check_{n:02}")).collect();
    let session = Arc::new(Session::new(checks));

    let executor = {
        let session = Arc::clone(&session);
        move |item: &String, _: Option<&String>| {
            let environ = session.environ();
            environ.set(environ.shadowed_key(), item);

            // Stand-in for real work.
            thread::sleep(Duration::from_millis(5));
            tracing::debug!(%item, "check finished");

            match item.ends_with("13") {
                true => Err(ExecError::failed("superstition check failed")),
                false => Ok(()),
            }
        }
    };

    println!("running {} checks on {workers} workers", session.len());
    match ThreadedRunner::new(executor)
        .with_workers(workers)
        .run(Arc::clone(&session))
    {
        Ok(()) => {
            println!("all {} checks passed", session.len());
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}
