//! Small scripted end-to-end scenarios for exercising a freshly built
//! [`Kernel`] from the command line — the host-side analogue of the
//! teacher's `mkfs`, which builds a fixed artifact rather than taking a
//! name and branching, but the same idea of "one binary, a few canned
//! jobs" carries over.

use clap::ValueEnum;
use winix_kernel::errno::KResult;
use winix_kernel::message::Message;
use winix_kernel::param::USER_PRIORITY;
use winix_kernel::Kernel;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ScenarioName {
    /// fork a child off a freshly spawned process, then exit it, and
    /// confirm the global page map returns to its pre-fork state.
    ForkExit,
    /// a parent `sendrec`s a child that is already waiting, then only
    /// the child's reply — not a stranger's send — unblocks it.
    SendrecRoundtrip,
    /// two processes each try to send to the other; the second send
    /// must be refused with EDEADLK rather than hang.
    Deadlock,
}

pub fn run(kernel: &mut Kernel, name: ScenarioName) -> KResult<String> {
    match name {
        ScenarioName::ForkExit => fork_exit(kernel),
        ScenarioName::SendrecRoundtrip => sendrec_roundtrip(kernel),
        ScenarioName::Deadlock => deadlock(kernel),
    }
}

fn spawn(kernel: &mut Kernel, name: &str) -> KResult<usize> {
    let (idx, _layout) = kernel.start_user_proc(1024, 0, 256, 256, 0, USER_PRIORITY, name)?;
    Ok(idx)
}

fn fork_exit(kernel: &mut Kernel) -> KResult<String> {
    let parent = spawn(kernel, "parent")?;
    let before = kernel.mem_map.count_set();
    let child = kernel.do_fork(parent)?;
    let after_fork = kernel.mem_map.count_set();
    kernel.end_process(child);
    let after_exit = kernel.mem_map.count_set();
    Ok(format!(
        "forked proc_nr={child} from parent={parent}: pages {before} -> {after_fork} -> {after_exit} (restored: {})",
        after_exit == before
    ))
}

fn sendrec_roundtrip(kernel: &mut Kernel) -> KResult<String> {
    let parent = spawn(kernel, "parent")?;
    let child = spawn(kernel, "child")?;
    let stranger = spawn(kernel, "stranger")?;

    kernel.receive(child)?;
    let mut request = Message::new(100);
    request.i1 = child as i32;
    kernel.sendrec(parent, child, request)?;

    kernel.send(stranger, parent, Message::new(1))?;
    let still_waiting = kernel.get_proc(parent).map(|p| p.flags.contains(winix_kernel::ProcFlags::RECEIVING)).unwrap_or(false);

    let reply = Message::new(100).with_reply(7);
    kernel.send(child, parent, reply)?;
    let woke_up = kernel.get_proc(parent).map(|p| !p.flags.contains(winix_kernel::ProcFlags::RECEIVING)).unwrap_or(false);

    Ok(format!(
        "sendrec parent={parent} child={child} stranger={stranger}: ignored stranger = {still_waiting}, woke on child reply = {woke_up}"
    ))
}

fn deadlock(kernel: &mut Kernel) -> KResult<String> {
    let a = spawn(kernel, "a")?;
    let b = spawn(kernel, "b")?;

    let mut m1 = Message::new(1);
    m1.i1 = b as i32;
    kernel.send(a, b, m1)?;

    let mut m2 = Message::new(2);
    m2.i1 = a as i32;
    let result = kernel.send(b, a, m2);
    Ok(format!("a={a} b={b}: second send returned {result:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_exit_scenario_reports_restored_state() {
        let mut k = Kernel::new(8, 512);
        let report = run(&mut k, ScenarioName::ForkExit).unwrap();
        assert!(report.contains("restored: true"));
    }

    #[test]
    fn deadlock_scenario_reports_edeadlk() {
        let mut k = Kernel::new(8, 512);
        let report = run(&mut k, ScenarioName::Deadlock).unwrap();
        assert!(report.contains("Edeadlk"));
    }

    #[test]
    fn sendrec_roundtrip_scenario_ignores_stranger_and_wakes_on_reply() {
        let mut k = Kernel::new(8, 512);
        let report = run(&mut k, ScenarioName::SendrecRoundtrip).unwrap();
        assert!(report.contains("ignored stranger = true"));
        assert!(report.contains("woke on child reply = true"));
    }
}
