use std::time::Duration;

use crossbeam_channel as cbc;
use mips_ensemble::asm::ObjectFile;
use mips_ensemble::ast::reg_consts::{T0, V0, ZERO};
use mips_ensemble::ast::sim::{BranchOp, ImmOp, SimInstr};
use mips_ensemble::ast::RegId;
use mips_ensemble::sim::io::Console;
use mips_ensemble::sim::worker::{SimEvent, SimThread};
use mips_ensemble::sim::{FinishReason, PauseReason, Simulator};

const TEXT: u32 = 0x0040_0000;
const TIMEOUT: Duration = Duration::from_secs(10);

fn load(instrs: &[SimInstr]) -> Simulator {
    let mut obj = ObjectFile::empty();
    obj.add_text_block(TEXT, instrs).unwrap();

    let mut sim = Simulator::default();
    sim.load_obj_file(&obj).unwrap();
    sim
}
fn counter() -> Vec<SimInstr> {
    vec![
        SimInstr::AluImm(ImmOp::Addiu, T0, T0, 1),
        SimInstr::AluImm(ImmOp::Addiu, T0, T0, 1),
        SimInstr::AluImm(ImmOp::Addiu, T0, T0, 1),
        SimInstr::AluImm(ImmOp::Addiu, V0, ZERO, 10),
        SimInstr::Syscall,
    ]
}
fn spin() -> Vec<SimInstr> {
    vec![
        SimInstr::AluImm(ImmOp::Addiu, T0, T0, 1),
        SimInstr::Branch(BranchOp::Beq, ZERO, ZERO, -2),
    ]
}
/// Reads an integer, then spins.
fn read_then_spin() -> Vec<SimInstr> {
    vec![
        SimInstr::AluImm(ImmOp::Addiu, V0, ZERO, 5),
        SimInstr::Syscall,
        SimInstr::AluImm(ImmOp::Addiu, T0, T0, 1),
        SimInstr::Branch(BranchOp::Beq, ZERO, ZERO, -2),
    ]
}

/// A console whose reads wait for a line to be sent.
struct WaitingConsole(cbc::Receiver<String>);
impl Console for WaitingConsole {
    fn print(&mut self, _text: &str) {}

    fn read_line(&mut self) -> Option<String> {
        self.0.recv().ok()
    }

    fn read_char(&mut self) -> Option<char> {
        None
    }
}
fn waiting(instrs: &[SimInstr]) -> (Simulator, cbc::Sender<String>) {
    let (tx, rx) = cbc::unbounded();
    let mut sim = load(instrs);
    sim.set_console(WaitingConsole(rx));
    (sim, tx)
}

fn next(thread: &SimThread) -> SimEvent {
    thread.events().recv_timeout(TIMEOUT).unwrap()
}

#[test]
fn test_run_to_exit() {
    let thread = SimThread::spawn(load(&counter()));
    thread.run().unwrap();

    assert_eq!(next(&thread), SimEvent::Started);
    let SimEvent::Finished(fin) = next(&thread) else { panic!("expected program to finish") };
    assert_eq!(fin.reason, FinishReason::ExitSyscall);
    assert_eq!(fin.exit_code, Some(0));
    assert_eq!(thread.lock().reg_file.get(RegId::Gpr(T0)), 3);

    // finished programs report the same finish
    thread.run().unwrap();
    assert_eq!(next(&thread), SimEvent::Started);
    assert_eq!(next(&thread), SimEvent::Finished(fin));
}

#[test]
fn test_breakpoint_step_and_step_back() {
    let mut sim = load(&counter());
    sim.breakpoints.insert(TEXT + 8);
    let thread = SimThread::spawn(sim);

    thread.run().unwrap();
    assert_eq!(next(&thread), SimEvent::Started);
    assert_eq!(next(&thread), SimEvent::Paused(PauseReason::Breakpoint));
    assert_eq!(thread.lock().reg_file.pc(), TEXT + 8);

    thread.step().unwrap();
    assert_eq!(next(&thread), SimEvent::Paused(PauseReason::Step));
    assert_eq!(thread.lock().reg_file.get(RegId::Gpr(T0)), 3);

    thread.step_back().unwrap();
    assert_eq!(next(&thread), SimEvent::SteppedBack { pc: TEXT + 8, success: true });
    assert_eq!(thread.lock().reg_file.get(RegId::Gpr(T0)), 2);

    thread.reset().unwrap();
    assert_eq!(next(&thread), SimEvent::Reset);
    thread.step_back().unwrap();
    assert_eq!(next(&thread), SimEvent::SteppedBack { pc: TEXT, success: false });
}

#[test]
fn test_run_with_limit() {
    let thread = SimThread::spawn(load(&spin()));
    thread.run_with_limit(100).unwrap();

    assert_eq!(next(&thread), SimEvent::Started);
    assert_eq!(next(&thread), SimEvent::Paused(PauseReason::Tripwire));

    let sim = thread.lock();
    assert_eq!(sim.instructions_run, 100);
    assert_eq!(sim.reg_file.get(RegId::Gpr(T0)), 50);
}

#[test]
fn test_stop_infinite_loop() {
    let thread = SimThread::spawn(load(&spin()));
    thread.run().unwrap();
    assert_eq!(next(&thread), SimEvent::Started);

    // the simulator can be inspected while it runs
    let _ = thread.lock().reg_file.pc();
    thread.stop();

    let SimEvent::Finished(fin) = next(&thread) else { panic!("expected program to finish") };
    assert_eq!(fin.reason, FinishReason::External);

    let sim = thread.shutdown();
    assert!(sim.finished().is_some());
    assert!(sim.instructions_run > 0);
}

#[test]
fn test_stop_queued_run() {
    let (sim, input) = waiting(&read_then_spin());
    let thread = SimThread::spawn(sim);

    thread.step().unwrap();
    thread.step().unwrap(); // waits on input
    thread.run().unwrap();
    thread.stop();
    input.send("12".to_string()).unwrap();

    assert_eq!(next(&thread), SimEvent::Paused(PauseReason::Step));
    assert_eq!(next(&thread), SimEvent::Paused(PauseReason::Step));
    assert_eq!(next(&thread), SimEvent::Started);
    let SimEvent::Finished(fin) = next(&thread) else { panic!("expected program to finish") };
    assert_eq!(fin.reason, FinishReason::External);
    assert_eq!(fin.pc, TEXT + 8);

    let sim = thread.lock();
    assert_eq!(sim.reg_file.get(RegId::Gpr(V0)), 12);
    assert_eq!(sim.reg_file.get(RegId::Gpr(T0)), 0);
    drop(sim);

    // later runs are unaffected
    thread.step_back().unwrap();
    assert_eq!(next(&thread), SimEvent::SteppedBack { pc: TEXT + 4, success: true });
    thread.reset().unwrap();
    assert_eq!(next(&thread), SimEvent::Reset);
    thread.step().unwrap();
    thread.run_with_limit(3).unwrap();
    input.send("1".to_string()).unwrap();
    assert_eq!(next(&thread), SimEvent::Paused(PauseReason::Step));
    assert_eq!(next(&thread), SimEvent::Started);
    assert_eq!(next(&thread), SimEvent::Paused(PauseReason::Tripwire));
}

#[test]
fn test_shutdown_with_queued_run() {
    let (sim, input) = waiting(&read_then_spin());
    let thread = SimThread::spawn(sim);

    thread.step().unwrap();
    thread.step().unwrap();
    thread.run().unwrap();

    let typist = std::thread::spawn(move || input.send("3".to_string()));
    let sim = thread.shutdown();
    typist.join().unwrap().unwrap();

    assert_eq!(sim.finished().map(|f| f.reason), Some(FinishReason::External));
    assert_eq!(sim.reg_file.get(RegId::Gpr(V0)), 3);
}
