//! Running the simulator on its own thread.
//!
//! [`SimThread`] moves a [`Simulator`] onto a worker thread.
//! The caller sends commands (run, step, step back, reset) and receives [`SimEvent`]s
//! over channels, and can inspect the simulator between instruction cycles with [`SimThread::lock`].
//!
//! ```no_run
//! use mips_ensemble::sim::Simulator;
//! use mips_ensemble::sim::worker::{SimEvent, SimThread};
//!
//! let sim = Simulator::default(); // load a program first
//! let thread = SimThread::spawn(sim);
//! thread.run().unwrap();
//!
//! for event in thread.events() {
//!     if let SimEvent::Finished(fin) = event {
//!         println!("finished: {:?}", fin.reason);
//!         break;
//!     }
//! }
//! ```

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel as cbc;

use super::{FinishEvent, PauseReason, RunFlag, RunState, SimErr, Simulator};

/// The number of cycles run per lock acquisition while running.
const SLICE: u64 = 64;

/// A request to the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Run until the program finishes, pauses, or (if given) the limit of cycles is reached.
    Run {
        /// The maximum number of cycles to run.
        limit: Option<u64>
    },
    /// Execute one instruction.
    Step,
    /// Undo one instruction.
    StepBack,
    /// Reset the simulator.
    Reset,
    /// Stop the worker thread.
    Shutdown,
}

/// A report from the worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// A run started.
    Started,
    /// Execution paused (after a run or a step).
    Paused(PauseReason),
    /// The program finished.
    Finished(FinishEvent),
    /// A step back was attempted.
    SteppedBack {
        /// The PC after the attempt.
        pc: u32,
        /// Whether there was a step to undo.
        success: bool
    },
    /// The simulator was reset.
    Reset,
    /// The simulator failed internally. A [`SimEvent::Finished`] follows.
    Error(SimErr),
}

/// A simulator running on a dedicated worker thread.
///
/// Dropping this stops the current run and joins the thread.
pub struct SimThread {
    sim: Arc<Mutex<Simulator>>,
    run_flag: RunFlag,
    stops: Arc<AtomicU64>,
    commands: cbc::Sender<(Command, u64)>,
    events: cbc::Receiver<SimEvent>,
    handle: Option<JoinHandle<()>>
}
impl SimThread {
    /// Moves the simulator onto a new worker thread.
    pub fn spawn(sim: Simulator) -> Self {
        let run_flag = Arc::clone(sim.run_flag());
        let stops = Arc::new(AtomicU64::new(0));
        let sim = Arc::new(Mutex::new(sim));
        let (cmd_tx, cmd_rx) = cbc::unbounded();
        let (event_tx, event_rx) = cbc::unbounded();

        let worker_sim = Arc::clone(&sim);
        let worker_stops = Arc::clone(&stops);
        let handle = std::thread::spawn(move || {
            // The loop ends once the handle stops listening.
            let _ = worker(&worker_sim, &worker_stops, &cmd_rx, &event_tx);
        });

        Self { sim, run_flag, stops, commands: cmd_tx, events: event_rx, handle: Some(handle) }
    }

    fn send(&self, cmd: Command) -> Result<(), SimErr> {
        let stops = self.stops.load(Ordering::SeqCst);
        self.commands.send((cmd, stops))
            .map_err(|_| SimErr::Internal("worker thread stopped".to_string()))
    }

    /// Runs the program until it finishes or pauses.
    pub fn run(&self) -> Result<(), SimErr> {
        self.send(Command::Run { limit: None })
    }
    /// Runs the program for at most `limit` cycles.
    pub fn run_with_limit(&self, limit: u64) -> Result<(), SimErr> {
        self.send(Command::Run { limit: Some(limit) })
    }
    /// Executes one instruction.
    pub fn step(&self) -> Result<(), SimErr> {
        self.send(Command::Step)
    }
    /// Undoes one instruction.
    pub fn step_back(&self) -> Result<(), SimErr> {
        self.send(Command::StepBack)
    }
    /// Resets the simulator.
    pub fn reset(&self) -> Result<(), SimErr> {
        self.send(Command::Reset)
    }

    /// Stops the current run before its next cycle.
    ///
    /// The run finishes with [`FinishReason::External`].
    /// Runs requested before the stop but not yet started also finish this way, before their first cycle.
    /// If the worker is blocked on console input, the stop applies once the input arrives.
    ///
    /// [`FinishReason::External`]: super::FinishReason::External
    pub fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.run_flag.store(false, Ordering::SeqCst);
    }
    /// The simulator's run flag.
    pub fn run_flag(&self) -> &RunFlag {
        &self.run_flag
    }

    /// The events reported by the worker.
    pub fn events(&self) -> &cbc::Receiver<SimEvent> {
        &self.events
    }

    /// Locks the simulator, blocking until the current cycle slice completes.
    pub fn lock(&self) -> MutexGuard<'_, Simulator> {
        lock(&self.sim)
    }

    fn join(&mut self) {
        self.stop();
        // A disconnected worker has already stopped.
        let _ = self.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked");
            }
        }
    }

    /// Stops the worker thread and returns the simulator.
    pub fn shutdown(mut self) -> Simulator {
        self.join();

        let sim = std::mem::replace(&mut self.sim, Arc::new(Mutex::new(Simulator::default())));
        match Arc::try_unwrap(sim) {
            Ok(m) => m.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(sim) => std::mem::take(&mut *lock(&sim)),
        }
    }
}
impl std::fmt::Debug for SimThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimThread")
            .field("running", &self.run_flag.load(Ordering::Relaxed))
            .field("alive", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}
impl Drop for SimThread {
    fn drop(&mut self) {
        self.join();
    }
}

fn lock(sim: &Mutex<Simulator>) -> MutexGuard<'_, Simulator> {
    sim.lock().unwrap_or_else(|e| {
        tracing::warn!("simulator lock was poisoned, recovering");
        e.into_inner()
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload.downcast_ref::<&str>().map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "simulator panicked".to_string())
}

/// Runs `f` on the locked simulator, converting panics into internal errors.
fn guarded<T>(sim: &Mutex<Simulator>, f: impl FnOnce(&mut Simulator) -> Result<T, SimErr>) -> Result<T, SimErr> {
    let mut guard = lock(sim);
    match catch_unwind(AssertUnwindSafe(|| f(&mut *guard))) {
        Ok(r) => r,
        Err(payload) => {
            let err = SimErr::Internal(panic_message(&*payload));
            guard.finish_internal(&err);
            Err(err)
        }
    }
}

type Disconnected = cbc::SendError<SimEvent>;

fn report(sim: &Mutex<Simulator>, result: Result<RunState, SimErr>, events: &cbc::Sender<SimEvent>) -> Result<(), Disconnected> {
    match result {
        Ok(RunState::Paused(reason)) => events.send(SimEvent::Paused(reason)),
        Ok(RunState::Finished(fin)) => events.send(SimEvent::Finished(fin)),
        Err(e) => {
            events.send(SimEvent::Error(e))?;
            let fin = lock(sim).finished().cloned();
            match fin {
                Some(fin) => events.send(SimEvent::Finished(fin)),
                None => Ok(()),
            }
        }
    }
}

fn worker(sim: &Mutex<Simulator>, stops: &AtomicU64, commands: &cbc::Receiver<(Command, u64)>, events: &cbc::Sender<SimEvent>) -> Result<(), Disconnected> {
    for (cmd, requested) in commands {
        tracing::trace!(?cmd, "worker command");
        match cmd {
            Command::Run { limit } => {
                let result = run_sliced(sim, limit, (stops, requested), events)?;
                report(sim, result, events)?;
            },
            Command::Step => {
                let result = guarded(sim, Simulator::step_in);
                report(sim, result, events)?;
            },
            Command::StepBack => {
                let mut guard = lock(sim);
                let success = guard.step_back();
                let pc = guard.reg_file.pc();
                drop(guard);
                events.send(SimEvent::SteppedBack { pc, success })?;
            },
            Command::Reset => {
                lock(sim).reset();
                events.send(SimEvent::Reset)?;
            },
            Command::Shutdown => break,
        }
    }
    Ok(())
}

/// Runs in slices of cycles, releasing the simulator between slices.
///
/// `stops` holds the stop count and its value when the run was requested.
/// A run stopped while queued finishes before its first cycle.
fn run_sliced(sim: &Mutex<Simulator>, limit: Option<u64>, stops: (&AtomicU64, u64), events: &cbc::Sender<SimEvent>) -> Result<Result<RunState, SimErr>, Disconnected> {
    let (run_flag, start) = {
        let guard = lock(sim);
        (Arc::clone(guard.run_flag()), guard.instructions_run)
    };

    // Any stop after the request applies, including one racing this store.
    run_flag.store(true, Ordering::SeqCst);
    let (count, requested) = stops;
    if count.load(Ordering::SeqCst) != requested {
        run_flag.store(false, Ordering::SeqCst);
    }
    events.send(SimEvent::Started)?;

    let mut first = true;
    let result = loop {
        let result = guarded(sim, |s| {
            let ran = s.instructions_run.wrapping_sub(start);
            let slice = match limit {
                Some(n) if ran >= n => return Ok(None),
                Some(n) => SLICE.min(n - ran),
                None => SLICE,
            };
            s.run_slice(slice, first).map(Some)
        });
        first = false;

        match result {
            Ok(None) => break Ok(RunState::Paused(PauseReason::Tripwire)),
            Ok(Some(RunState::Paused(PauseReason::Tripwire))) => continue,
            Ok(Some(state)) => break Ok(state),
            Err(e) => break Err(e),
        }
    };

    run_flag.store(false, Ordering::Relaxed);
    Ok(result)
}
