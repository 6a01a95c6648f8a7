//! `winixctl` drives a [`winix_kernel::Kernel`] through scripted scenarios
//! from a host process, the same role `mkfs` plays for the on-disk image in
//! the teaching kernel this tool grew out of: a small, fallible, clap-based
//! CLI around one library crate, not a production operations tool.

use clap::{Parser, Subcommand};
use winix_kernel::message::Message;
use winix_kernel::param::{NUM_PROCS, USER_PRIORITY};
use winix_kernel::syscall::{self, SyscallOutcome};
use winix_kernel::Kernel;

mod scenario;

#[derive(Parser, Debug)]
#[command(name = "winixctl", about = "Drive the WINIX kernel core from a host process")]
struct Args {
    /// Number of process table slots to allocate.
    #[arg(long, default_value_t = NUM_PROCS)]
    procs: usize,

    /// Number of physical pages backing the simulated machine.
    #[arg(long, default_value_t = 4096)]
    pages: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Spawn a handful of user processes, run the scheduler for a fixed
    /// number of ticks, and print a `ps`-style trace.
    Trace {
        #[arg(long, default_value_t = 10)]
        ticks: u64,
        #[arg(long, default_value_t = 3)]
        spawn: usize,
    },
    /// Run one of the built-in end-to-end scenarios and report the result.
    Scenario {
        #[arg(value_enum)]
        name: scenario::ScenarioName,
    },
    /// Print the process table as it stands right after boot.
    Ps,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let mut kernel = Kernel::new(args.procs, args.pages);

    match args.command {
        Command::Ps => print_ps(&kernel),
        Command::Trace { ticks, spawn } => run_trace(&mut kernel, ticks, spawn),
        Command::Scenario { name } => match scenario::run(&mut kernel, name) {
            Ok(report) => println!("{report}"),
            Err(err) => {
                log::error!("scenario failed: {err}");
                std::process::exit(1);
            }
        },
    }
}

fn run_trace(kernel: &mut Kernel, ticks: u64, spawn: usize) {
    for n in 0..spawn {
        match kernel.start_user_proc(2048, 0, 256, 256, 0, USER_PRIORITY, &format!("proc{n}")) {
            Ok((idx, _layout)) => {
                log::info!("spawned proc_nr={idx}");
                let out = dispatch_and_report(kernel, idx, Message::new(syscall::SYS_GETPID));
                log::debug!("proc_nr={idx} getpid -> {out}");
            }
            Err(e) => log::warn!("failed to spawn proc{n}: {e}"),
        }
    }

    for tick in 0..ticks {
        let current = kernel.schedule();
        kernel.ticks += 1;
        let fired = kernel.alarms.fire_due(kernel.ticks);
        for proc_nr in fired {
            log::info!("tick {tick}: alarm fired for proc_nr={proc_nr}");
        }
        log::debug!("tick {tick}: running proc_nr={current}");
    }

    print_ps(kernel);
}

fn print_ps(kernel: &Kernel) {
    println!("{:>4} {:>6} {:>6} {:<12} {:>8} {:>3} {:<12}", "NR", "PID", "PPID", "NAME", "RBASE", "PRI", "STATE");
    for row in kernel.ps_snapshot() {
        println!(
            "{:>4} {:>6} {:>6} {:<12} {:>8} {:>3} {:?}",
            row.proc_nr, row.pid, row.parent_pid, row.name, row.rbase, row.priority, row.state
        );
    }
}

/// Dispatches one syscall message on behalf of `caller` and prints the
/// outcome, used by the scenario runner.
fn dispatch_and_report(kernel: &mut Kernel, caller: usize, m: Message) -> String {
    match syscall::dispatch(kernel, caller, m) {
        Ok(SyscallOutcome::Reply(reply)) => format!("reply({})", reply.reply_res),
        Ok(SyscallOutcome::Suspended) => "suspended".to_string(),
        Err(e) => format!("error({e})"),
    }
}
