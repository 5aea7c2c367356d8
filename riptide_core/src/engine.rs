use crate::config::MutatorConfig;
use crate::curriculum::{CurriculumController, ParseStats, Phase};
use crate::ops::{MutationOp, OpRegistry};
use crate::scheduler::{EmaScheduler, SchedulerParams};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;

/// The adaptive mutation pipeline: curriculum, scheduler, and operator
/// catalogue behind one infallible entry point.
///
/// [`mutate`] is the hot path and upholds the host fuzzer's contract by
/// construction: it always returns a buffer of at most `max_size` bytes and
/// never surfaces an error or a panic, whatever the inputs look like.
/// Feedback arrives separately through [`record_outcome`], which credits the
/// most recently applied operator.
///
/// [`mutate`]: MutationEngine::mutate
/// [`record_outcome`]: MutationEngine::record_outcome
pub struct MutationEngine {
    registry: OpRegistry,
    scheduler: EmaScheduler,
    curriculum: CurriculumController,
    stats: ParseStats,
    rng: ChaCha8Rng,
    last_op: Option<usize>,
    last_phase: Option<Phase>,
}

impl MutationEngine {
    /// Builds an engine from config, seeding the RNG from the OS unless the
    /// config pins a seed for reproducible runs.
    pub fn new(config: &MutatorConfig) -> Self {
        let rng = match config.engine.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        Self::with_rng(config, rng)
    }

    /// Builds an engine with an explicit RNG seed, ignoring any seed in the
    /// config. Two engines built this way replay identical decision streams.
    pub fn with_seed(config: &MutatorConfig, seed: u64) -> Self {
        Self::with_rng(config, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(config: &MutatorConfig, rng: ChaCha8Rng) -> Self {
        let registry = OpRegistry::builtin();
        let params = SchedulerParams::new(
            config.scheduler.lam,
            config.scheduler.tau,
            config.scheduler.eps,
        );
        let scheduler = EmaScheduler::new(registry.len(), params);
        let curriculum = CurriculumController::new(
            config.curriculum.plateau_file.clone(),
            config.curriculum.poll_interval(),
        );
        Self {
            registry,
            scheduler,
            curriculum,
            stats: ParseStats::new(),
            rng,
            last_op: None,
            last_phase: None,
        }
    }

    /// Produces one mutated buffer from `seed`, splicing from `aux` when the
    /// chosen operator wants donor material.
    ///
    /// The phase and operator window are recomputed per call, the scheduler
    /// picks an index from the window, and the registry applies it with full
    /// containment. The output's parseability feeds the parse-rate tally
    /// that drives the curriculum.
    pub fn mutate(&mut self, seed: &[u8], aux: &[u8], max_size: usize) -> Vec<u8> {
        let (phase, allowed) =
            self.curriculum
                .plan(self.stats, self.registry.len(), &mut self.scheduler);
        if self.last_phase != Some(phase) {
            log::debug!(
                "Curriculum phase {}: {} of {} operators in play at parse rate {:.3}",
                phase.label(),
                allowed.len(),
                self.registry.len(),
                self.stats.rate()
            );
            self.last_phase = Some(phase);
        }

        let idx = self.scheduler.pick(&allowed, &mut self.rng);
        let out = self.registry.apply(idx, seed, aux, max_size, &mut self.rng);

        let parsed = serde_json::from_slice::<serde::de::IgnoredAny>(&out).is_ok();
        self.stats.record(parsed);
        self.last_op = Some(idx);
        log::trace!(
            "Applied {} ({}): {} -> {} bytes, parse_ok={}",
            idx,
            self.registry.name(idx).unwrap_or("?"),
            seed.len(),
            out.len(),
            parsed
        );
        out
    }

    /// Credits the operator behind the most recent [`mutate`] call with one
    /// trial outcome. A call before any mutation is a no-op.
    ///
    /// [`mutate`]: MutationEngine::mutate
    pub fn record_outcome(&mut self, cov_delta: i64, unique_crash: bool, new_path: bool) {
        if let Some(op) = self.last_op {
            self.scheduler.reward_update(op, cov_delta, unique_crash, new_path);
        }
    }

    /// Appends a custom operator behind the built-ins and returns its index.
    /// The scheduler's score vector grows to match, so the new operator is
    /// selectable as soon as the exploration window opens.
    pub fn register_op(&mut self, op: MutationOp) -> usize {
        let idx = self.registry.append(op);
        self.scheduler.grow_to(self.registry.len());
        idx
    }

    /// Phase chosen by the most recent [`mutate`] call.
    ///
    /// [`mutate`]: MutationEngine::mutate
    pub fn phase(&self) -> Phase {
        self.last_phase.unwrap_or(Phase::Discovery)
    }

    pub fn parse_stats(&self) -> ParseStats {
        self.stats
    }

    pub fn scores(&self) -> &[f64] {
        self.scheduler.scores()
    }

    pub fn op_count(&self) -> usize {
        self.registry.len()
    }

    pub fn op_name(&self, idx: usize) -> Option<&'static str> {
        self.registry.name(idx)
    }

    pub fn last_op(&self) -> Option<usize> {
        self.last_op
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::RngCore;

    fn test_engine(seed: u64) -> MutationEngine {
        MutationEngine::with_seed(&MutatorConfig::default(), seed)
    }

    #[test]
    fn outputs_never_exceed_max_size() {
        let mut engine = test_engine(1);
        let valid = br#"{"name":"demo","count":3,"live":true}"#;
        let garbage: &[u8] = b"\xfe\xed\xfa\xce not json";
        let aux = br#"{"x":1,"y":[2,3]}"#;

        for round in 0..300 {
            for &max_size in &[0usize, 1, 7, 100, 4096] {
                let seed: &[u8] = if round % 2 == 0 { valid } else { garbage };
                let out = engine.mutate(seed, aux, max_size);
                assert!(
                    out.len() <= max_size,
                    "Round {}: {} bytes exceeds cap {}",
                    round,
                    out.len(),
                    max_size
                );
            }
        }
    }

    #[test]
    fn adversarial_seeds_and_feedback_never_panic() {
        let mut engine = test_engine(2);
        let huge = vec![b'{'; 100_000];
        let seeds: &[&[u8]] = &[b"", b"\xff", b"[", br#"{"a":"#, &huge];

        for round in 0..200 {
            let seed = seeds[round % seeds.len()];
            let out = engine.mutate(seed, b"", 512);
            assert!(out.len() <= 512);
            engine.record_outcome((round as i64) - 100, round % 7 == 0, round % 3 == 0);
        }
        assert_eq!(engine.parse_stats().total(), 200);
    }

    #[test]
    fn equal_seeds_replay_identical_decision_streams() {
        let mut left = test_engine(42);
        let mut right = test_engine(42);
        let seed = br#"{"k":[1,2,3],"flag":false}"#;
        let aux = br#"{"donor":true}"#;

        for _ in 0..100 {
            let a = left.mutate(seed, aux, 256);
            let b = right.mutate(seed, aux, 256);
            assert_eq!(a, b, "Same RNG seed must give the same output stream");
        }
        assert_eq!(left.last_op(), right.last_op());
    }

    #[test]
    fn record_outcome_before_any_mutation_is_a_noop() {
        let mut engine = test_engine(3);
        engine.record_outcome(1000, true, true);
        assert!(
            engine.scores().iter().all(|&score| score == 0.0),
            "No operator has run yet, so no score may move"
        );
    }

    #[test]
    fn record_outcome_credits_the_last_operator() {
        let mut engine = test_engine(4);
        engine.mutate(br#"{"a":1}"#, b"", 4096);
        let credited = engine.last_op().expect("A mutation just ran");

        engine.record_outcome(0, false, true);
        assert!(
            engine.scores()[credited] > 0.0,
            "The operator that produced the trial should be rewarded"
        );
        assert!(
            engine
                .scores()
                .iter()
                .enumerate()
                .filter(|&(idx, _)| idx != credited)
                .all(|(_, &score)| score == 0.0),
            "Only the credited operator's score may move"
        );
    }

    #[test]
    fn registered_operator_extends_catalogue_and_scores() {
        fn op_constant(_: &[u8], _: &[u8], _: usize, _: &mut dyn RngCore) -> Option<Vec<u8>> {
            Some(b"null".to_vec())
        }

        let mut engine = test_engine(5);
        let idx = engine.register_op(MutationOp {
            name: "constant",
            apply: op_constant,
        });
        assert_eq!(idx, 13);
        assert_eq!(engine.op_count(), 14);
        assert_eq!(engine.scores().len(), 14);
        assert_eq!(engine.op_name(idx), Some("constant"));

        // The engine keeps running with the extended catalogue.
        for _ in 0..50 {
            let out = engine.mutate(br#"{"a":1}"#, b"", 64);
            assert!(out.len() <= 64);
        }
    }

    #[test]
    fn parse_tally_follows_mutation_volume() {
        let mut engine = test_engine(6);
        for _ in 0..25 {
            engine.mutate(br#"{"ok":true}"#, b"", 4096);
        }
        let stats = engine.parse_stats();
        assert_eq!(stats.total(), 25);
        assert!(
            stats.ok() > 0,
            "Mutating a small valid document at a generous cap should mostly parse"
        );
        assert_eq!(engine.phase(), Phase::from_rate(stats.rate()));
    }
}
