//! Command line of the demo launcher

use clap::Parser;
use std::path::PathBuf;

/// Real-time communication demo: configures the network interface, TSN
/// queue disciplines and clock synchronization, then runs the sample
/// applications described by the selected JSON profile.
#[derive(Debug, Parser)]
#[command(name = "tcc_rt_communication_demo", version)]
pub struct Cli {
    /// Profile: basic-a-noopt, basic-b-noopt, siso-single-a-noopt,
    /// siso-single-b-noopt, basic-a-opt, basic-b-opt, siso-single-a-opt,
    /// siso-single-b-opt
    #[arg(short = 'p', long)]
    pub profile: String,

    /// Network interface to configure and use
    #[arg(short = 'i', long)]
    pub interface: String,

    /// Network interface of the second board (automatic launch mode)
    #[arg(short = 'r', long = "remote-interface")]
    pub remote_interface: Option<String>,

    /// Mode: all, setup, clock, tsn, run
    #[arg(short = 'm', long, default_value = "all")]
    pub mode: String,

    /// Do not start best-effort network load
    #[arg(short = 'n', long = "no-best-effort")]
    pub no_best_effort: bool,

    /// Directory with configuration profiles, relative to the executable
    #[arg(short = 'c', long = "config-path", default_value = "cfg")]
    pub config_path: PathBuf,

    /// Directory with configuration profiles on the second board
    #[arg(short = 'g', long = "remote-config-path", default_value = "cfg")]
    pub remote_config_path: PathBuf,

    /// Statistics file written by the sample application
    #[arg(short = 'o', long = "output-file")]
    pub output_file: Option<PathBuf>,

    /// Directory with sample binaries, prepended to PATH and LD_LIBRARY_PATH
    #[arg(short = 'e', long = "exec-path")]
    pub exec_path: Option<PathBuf>,

    /// Directory with sample binaries on the second board
    #[arg(short = 'u', long = "remote-exec-path")]
    pub remote_exec_path: Option<PathBuf>,

    /// Address of the second board; enables automatic launch mode
    #[arg(short = 'a', long = "remote-address")]
    pub remote_address: Option<String>,

    /// Target board: AUTO, EHL, TGL-U, TGL-H
    #[arg(short = 't', long, default_value = "AUTO")]
    pub target: String,

    /// UTC base time in seconds, 0 computes it from the current time
    #[arg(short = 'b', long = "base-time", default_value_t = 0)]
    pub base_time: u64,

    /// Debug output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Log commands without executing them
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}
