mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use deptrace::model::TraceHeader;
use deptrace::{io, trace};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let code = match cli.cmd {
        Commands::Run { output, command } => match run_trace(PathBuf::from(output), command).await
        {
            Ok(code) => code,
            Err(e) => {
                eprintln!("deptrace: {e:#}");
                1
            }
        },
        Commands::Summary { trace } => match summarize(Path::new(&trace)) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("deptrace: {e:#}");
                1
            }
        },
    };
    std::process::exit(code);
}

/// Wire the blocking ptrace loop to the async sink and wait for both.
/// The traced command's exit code becomes ours.
async fn run_trace(output: PathBuf, command: Vec<String>) -> Result<i32> {
    let (tx, rx) = mpsc::channel(1024);
    let token = CancellationToken::new();

    let header = TraceHeader::new(command.clone());
    let sink = tokio::spawn(io::write_reports(output, header, rx));

    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let tracer = tokio::task::spawn_blocking(move || trace::run(&command, tx, token));
    let exit_code = tracer.await??;
    sink.await??;
    Ok(exit_code)
}

fn summarize(trace: &Path) -> Result<()> {
    let (header, reports) = io::read_trace(trace)?;
    println!(
        "trace of `{}` started {}",
        header.command.join(" "),
        header.start.to_rfc3339()
    );

    let mut inputs = BTreeSet::new();
    let mut outputs = BTreeSet::new();
    for r in &reports {
        println!(
            "  #{:<4} pid {:<7} {}  in:{} out:{} touched:{} renames:{} links:{} removals:{}",
            r.uid,
            r.pid,
            r.image.display(),
            r.inputs.len(),
            r.outputs.len(),
            r.touched.len(),
            r.renames.len(),
            r.links.len(),
            r.removals.len(),
        );
        inputs.extend(r.inputs.iter().cloned());
        outputs.extend(r.outputs.iter().cloned());
    }
    println!(
        "{} processes, {} distinct inputs, {} distinct outputs",
        reports.len(),
        inputs.len(),
        outputs.len()
    );
    Ok(())
}
