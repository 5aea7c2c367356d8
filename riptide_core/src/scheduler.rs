use rand::Rng;
use rand_core::RngCore;

/// Reward contribution of a trial that added a new path to the host queue.
///
/// Kept at exactly 1.0 so a bare new-path reward drives a score toward 1.0,
/// which makes the EMA trajectory easy to reason about and to test.
pub const NEW_PATH_BONUS: f64 = 1.0;
/// Reward contribution of a trial that produced a previously unseen crash.
pub const UNIQUE_CRASH_BONUS: f64 = 2.0;
/// Reward contribution per unit of raw coverage-map delta.
pub const COVERAGE_WEIGHT: f64 = 0.05;

/// Tuning knobs of the [`EmaScheduler`], immutable after construction.
///
/// Valid ranges: `lam` in (0, 1], `tau` strictly positive, `eps` in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerParams {
    /// EMA learning rate: how strongly the latest reward displaces history.
    pub lam: f64,
    /// Softmax temperature: lower values exploit score differences harder.
    pub tau: f64,
    /// Probability of ignoring scores entirely and exploring uniformly.
    pub eps: f64,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            lam: 0.2,
            tau: 0.8,
            eps: 0.02,
        }
    }
}

impl SchedulerParams {
    /// Builds a parameter set, substituting the default for an out-of-range
    /// `lam` or `tau` and clamping `eps` into [0, 1].
    ///
    /// Construction never fails: a bad value arriving through config must
    /// degrade to a sane default instead of taking the mutator down.
    pub fn new(lam: f64, tau: f64, eps: f64) -> Self {
        let defaults = Self::default();
        Self {
            lam: if lam.is_finite() && lam > 0.0 && lam <= 1.0 {
                lam
            } else {
                defaults.lam
            },
            tau: if tau.is_finite() && tau > 0.0 {
                tau
            } else {
                defaults.tau
            },
            eps: if eps.is_finite() {
                eps.clamp(0.0, 1.0)
            } else {
                defaults.eps
            },
        }
    }
}

/// Softmax-with-exploration operator scheduler over an EMA score vector.
///
/// The scheduler holds one real-valued score per operator index and selects
/// from whatever subset of indices the curriculum passes in. It learns from
/// rewards reported out-of-band (after the host engine has judged a trial)
/// and deliberately has no failure mode: every operation returns a usable
/// value no matter how it is called.
#[derive(Debug)]
pub struct EmaScheduler {
    scores: Vec<f64>,
    params: SchedulerParams,
}

impl EmaScheduler {
    /// Creates a scheduler tracking `op_count` operators, all scores at 0.
    pub fn new(op_count: usize, params: SchedulerParams) -> Self {
        Self {
            scores: vec![0.0; op_count],
            params,
        }
    }

    /// Selects one operator index from `allowed`.
    ///
    /// With probability `eps` the choice is uniform (exploration). Otherwise
    /// softmax weights `exp((score - max_score) / tau)` are sampled
    /// proportionally (exploitation with stochastic tie-breaking); with all
    /// scores equal this is exactly uniform, which is the required cold-start
    /// behavior. Indices beyond the score vector read as score 0.
    ///
    /// # Arguments
    /// * `allowed`: The operator indices the current curriculum phase
    ///   permits. Expected non-empty; an empty slice returns index 0 rather
    ///   than faulting, since the identity operator is always safe to run.
    /// * `rng`: Random source for the exploration and sampling draws.
    ///
    /// # Returns
    /// An element of `allowed` (or 0 on an empty `allowed`). Never fails; a
    /// non-finite weight total degrades to a uniform draw over `allowed`.
    pub fn pick(&self, allowed: &[usize], rng: &mut dyn RngCore) -> usize {
        let Some(&first) = allowed.first() else {
            return 0;
        };
        if allowed.len() == 1 {
            return first;
        }

        if self.params.eps > 0.0 && rng.random_bool(self.params.eps) {
            return allowed[rng.random_range(0..allowed.len())];
        }

        // Max-subtraction keeps every exponent at or below zero, so the
        // weights stay in (0, 1] and the total cannot overflow.
        let max_score = allowed
            .iter()
            .map(|&idx| self.score_of(idx))
            .fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = allowed
            .iter()
            .map(|&idx| ((self.score_of(idx) - max_score) / self.params.tau).exp())
            .collect();
        let total: f64 = weights.iter().sum();

        if !total.is_finite() || total <= 0.0 {
            log::debug!(
                "Softmax weight total {} unusable, degrading to uniform choice",
                total
            );
            return allowed[rng.random_range(0..allowed.len())];
        }

        let mut threshold = rng.random::<f64>() * total;
        for (&idx, weight) in allowed.iter().zip(&weights) {
            if threshold < *weight {
                return idx;
            }
            threshold -= weight;
        }
        // Floating-point rounding can leave a sliver past the last weight.
        allowed[allowed.len() - 1]
    }

    /// Folds one trial outcome into the score of operator `op`.
    ///
    /// The reward scalar combines a fixed bonus for a new path, a larger
    /// bonus for a unique crash, and a proportional term for the raw
    /// coverage delta; the exact weighting is policy, not correctness. The
    /// update is the EMA `score <- (1 - lam) * score + lam * reward` and is
    /// the only mutation of scheduler state during normal operation.
    ///
    /// The reward channel is decoupled from `pick` (the host reports
    /// outcomes whenever its own bookkeeping completes), so an
    /// out-of-catalogue index is a silent no-op rather than corruption.
    pub fn reward_update(&mut self, op: usize, cov_delta: i64, unique_crash: bool, new_path: bool) {
        let Some(slot) = self.scores.get_mut(op) else {
            return;
        };
        let mut reward = COVERAGE_WEIGHT * cov_delta as f64;
        if new_path {
            reward += NEW_PATH_BONUS;
        }
        if unique_crash {
            reward += UNIQUE_CRASH_BONUS;
        }
        if !reward.is_finite() {
            return;
        }
        *slot = (1.0 - self.params.lam) * *slot + self.params.lam * reward;
    }

    /// Sets every known score back to 0.
    ///
    /// Invoked by the curriculum controller when a plateau forces the phase
    /// forward, so the newly unlocked operators start without inherited bias
    /// toward the previously dominant ones.
    pub fn reset(&mut self) {
        self.scores.fill(0.0);
    }

    /// Extends the score vector (zero-filled) when operators are appended to
    /// the registry. The vector never shrinks; indices stay stable.
    pub fn grow_to(&mut self, op_count: usize) {
        if op_count > self.scores.len() {
            self.scores.resize(op_count, 0.0);
        }
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn params(&self) -> SchedulerParams {
        self.params
    }

    fn score_of(&self, idx: usize) -> f64 {
        self.scores.get(idx).copied().unwrap_or(0.0)
    }
}
