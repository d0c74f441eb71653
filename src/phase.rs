//! Benchmark run phase shared between the coordinator and every worker.
//!
//! The phase has exactly one writer ([`PhaseController`], owned by the
//! coordinator) and any number of readers ([`PhaseView`]). Readers load the
//! phase from an atomic and never block, so a worker can consult it once per
//! received message without adding contention to the measurement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle stage of a benchmark run.
///
/// Transitions follow `Idle → Preparing → Running → Stopping → CleanedUp`,
/// after which a new run may be prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunPhase {
    /// No run has been prepared yet
    Idle,
    /// Peers are being created and connected
    Preparing,
    /// Messages are counted
    Running,
    /// The run has stopped; traffic is no longer counted
    Stopping,
    /// Every teardown step has been executed
    CleanedUp,
}

impl RunPhase {
    fn as_u8(self) -> u8 {
        match self {
            RunPhase::Idle => 0,
            RunPhase::Preparing => 1,
            RunPhase::Running => 2,
            RunPhase::Stopping => 3,
            RunPhase::CleanedUp => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunPhase::Preparing,
            2 => RunPhase::Running,
            3 => RunPhase::Stopping,
            4 => RunPhase::CleanedUp,
            _ => RunPhase::Idle,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Preparing => "preparing",
            RunPhase::Running => "running",
            RunPhase::Stopping => "stopping",
            RunPhase::CleanedUp => "cleaned up",
        };
        f.write_str(name)
    }
}

/// Write side of the run phase. Not `Clone`: only the coordinator holds one.
#[derive(Debug)]
pub struct PhaseController {
    cell: Arc<AtomicU8>,
}

impl PhaseController {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(AtomicU8::new(RunPhase::Idle.as_u8())),
        }
    }

    /// Publishes a new phase and returns the previous one.
    pub fn set(&self, phase: RunPhase) -> RunPhase {
        RunPhase::from_u8(self.cell.swap(phase.as_u8(), Ordering::AcqRel))
    }

    pub fn get(&self) -> RunPhase {
        RunPhase::from_u8(self.cell.load(Ordering::Acquire))
    }

    /// Hands out a read-only view for workers.
    pub fn view(&self) -> PhaseView {
        PhaseView {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the run phase, cheap to clone into worker threads.
#[derive(Debug, Clone)]
pub struct PhaseView {
    cell: Arc<AtomicU8>,
}

impl PhaseView {
    #[inline]
    pub fn get(&self) -> RunPhase {
        RunPhase::from_u8(self.cell.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.get() == RunPhase::Running
    }

    /// True while peers are connecting or traffic is counted. Disconnects in
    /// this window are worth reporting.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self.get(), RunPhase::Preparing | RunPhase::Running)
    }
}
