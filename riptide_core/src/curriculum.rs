use crate::scheduler::EmaScheduler;
use crate::signal::PlateauPoller;
use std::path::PathBuf;
use std::time::Duration;

/// Parse rate at which the curriculum leaves structure discovery.
pub const REFINEMENT_RATE: f64 = 0.50;
/// Parse rate at which the full catalogue unlocks.
pub const EXPLORATION_RATE: f64 = 0.90;

/// Operators visible during structure discovery: identity and flip-bool.
const DISCOVERY_OPS: usize = 2;
/// Refinement adds num-boundary on top of the discovery window.
const REFINEMENT_OPS: usize = 3;

/// Curriculum phase, derived from the observed parse rate on every call.
///
/// The ordering of the variants is meaningful: later phases strictly widen
/// the operator window, so `Discovery < Refinement < Exploration` mirrors
/// the subset relation between their windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Structure discovery: outputs barely parse, stick to conservative
    /// textual tweaks that cannot make things worse.
    Discovery,
    /// Syntax refinement: most outputs parse, numeric boundary probing
    /// becomes worthwhile.
    Refinement,
    /// Semantic exploration: the corpus is structurally sound, every
    /// operator is in play.
    Exploration,
}

impl Phase {
    /// Maps a parse rate in [0, 1] onto a phase. A rate below
    /// [`REFINEMENT_RATE`] (including the 0.0 of an empty window) stays in
    /// discovery; [`EXPLORATION_RATE`] and above unlocks everything.
    pub fn from_rate(rate: f64) -> Self {
        if rate < REFINEMENT_RATE {
            Phase::Discovery
        } else if rate < EXPLORATION_RATE {
            Phase::Refinement
        } else {
            Phase::Exploration
        }
    }

    /// The next phase up the ladder; exploration is terminal.
    pub fn next(self) -> Self {
        match self {
            Phase::Discovery => Phase::Refinement,
            Phase::Refinement | Phase::Exploration => Phase::Exploration,
        }
    }

    /// Short label for log lines.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Discovery => "A",
            Phase::Refinement => "B",
            Phase::Exploration => "C",
        }
    }

    /// The dense prefix of operator indices this phase permits, given a
    /// catalogue of `op_count` operators. Windows nest: each phase returns a
    /// superset of the previous one, and exploration includes any operators
    /// appended after the built-ins.
    pub fn window(self, op_count: usize) -> Vec<usize> {
        let end = match self {
            Phase::Discovery => DISCOVERY_OPS,
            Phase::Refinement => REFINEMENT_OPS,
            Phase::Exploration => op_count,
        };
        (0..end.min(op_count)).collect()
    }
}

/// Running tally of how many recent outputs parsed as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseStats {
    ok: u64,
    total: u64,
}

impl ParseStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tally from raw counts; `ok` is clamped to `total`.
    pub fn from_counts(ok: u64, total: u64) -> Self {
        Self {
            ok: ok.min(total),
            total,
        }
    }

    pub fn record(&mut self, parsed: bool) {
        self.total += 1;
        if parsed {
            self.ok += 1;
        }
    }

    /// Fraction of outputs that parsed. An empty tally reads as 0.0, which
    /// keeps a fresh campaign in the discovery phase.
    pub fn rate(&self) -> f64 {
        self.ok as f64 / self.total.max(1) as f64
    }

    pub fn ok(&self) -> u64 {
        self.ok
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Decides, per mutation, which slice of the catalogue is in play.
///
/// The phase is recomputed from the parse rate on every call rather than
/// latched, so a regressing corpus narrows the window again on its own. The
/// sidecar's plateau signal overrides that: while it is set, the controller
/// advances one phase past the computed one and clears the scheduler's
/// scores, giving the newly unlocked operators an unbiased restart.
pub struct CurriculumController {
    poller: Option<PlateauPoller>,
    override_active: bool,
}

impl CurriculumController {
    /// `plateau_file` of `None` disables the override path entirely;
    /// `poll_interval` bounds how often the signal file is re-read (zero
    /// means every call).
    pub fn new(plateau_file: Option<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            poller: plateau_file.map(|path| PlateauPoller::new(path, poll_interval)),
            override_active: false,
        }
    }

    /// Computes the phase and operator window for the next mutation.
    ///
    /// Applies the plateau override when the signal is set and the computed
    /// phase is not already terminal. The scheduler reset happens here, on
    /// every overridden call, so scores accumulated against the narrow
    /// window cannot steer the wider one.
    pub fn plan(
        &mut self,
        stats: ParseStats,
        op_count: usize,
        scheduler: &mut EmaScheduler,
    ) -> (Phase, Vec<usize>) {
        let mut phase = Phase::from_rate(stats.rate());
        let signalled = self.poll_signal();

        if signalled && phase != Phase::Exploration {
            let advanced = phase.next();
            if !self.override_active {
                log::info!(
                    "Plateau signal engaged: phase {} -> {}, operator scores reset",
                    phase.label(),
                    advanced.label()
                );
            }
            self.override_active = true;
            scheduler.reset();
            phase = advanced;
        } else {
            if self.override_active {
                log::info!("Plateau override disengaged at phase {}", phase.label());
            }
            self.override_active = false;
        }

        let window = phase.window(op_count);
        (phase, window)
    }

    fn poll_signal(&mut self) -> bool {
        self.poller.as_mut().is_some_and(|poller| poller.current())
    }
}
