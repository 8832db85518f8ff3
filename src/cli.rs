use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "deptrace",
    version = env!("CARGO_PKG_VERSION"),
    about = "Record per-process file effects of a build command"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command under the tracer and write its trace file
    Run {
        /// trace output path, defaults to ./deptrace.jsonl or $DEPTRACE_OUT
        #[arg(long, short, env = "DEPTRACE_OUT", default_value = "deptrace.jsonl")]
        output: String,

        /// command line to trace
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Print per-process and aggregate effect counts from a trace file
    Summary {
        /// trace file written by `deptrace run`
        trace: String,
    },
}
