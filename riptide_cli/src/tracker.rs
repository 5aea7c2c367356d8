use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Sliding-window watchdog over the host fuzzer's path counter.
///
/// Feed it one `(time, total paths)` sample per check; it answers whether
/// discovery has plateaued, meaning the counter grew by less than
/// `min_delta` across the most recent full window. Verdicts are withheld
/// until a whole window has actually been observed, so a freshly started
/// watchdog (or one whose fuzzer restarted) never cries plateau early.
pub struct PlateauTracker {
    window: Duration,
    min_delta: u64,
    samples: VecDeque<(Instant, u64)>,
    observing_since: Option<Instant>,
}

impl PlateauTracker {
    /// `min_delta` of 0 disables plateau detection outright: any window,
    /// even a flat one, then counts as progress.
    pub fn new(window: Duration, min_delta: u64) -> Self {
        Self {
            window,
            min_delta,
            samples: VecDeque::new(),
            observing_since: None,
        }
    }

    /// Records one sample and returns the current plateau verdict.
    ///
    /// A counter that moves backwards means the fuzzer restarted or its
    /// stats were recycled; the window starts over from scratch rather
    /// than diffing across two unrelated campaigns.
    pub fn observe(&mut self, now: Instant, paths: u64) -> bool {
        if let Some(&(_, last)) = self.samples.back() {
            if paths < last {
                log::info!(
                    "Path counter regressed from {} to {}, restarting the observation window",
                    last,
                    paths
                );
                self.samples.clear();
                self.observing_since = None;
            }
        }
        let since = *self.observing_since.get_or_insert(now);
        self.samples.push_back((now, paths));

        // The front sample is the newest one that still spans the whole
        // window; older ones may go once their successor also covers it.
        while self.samples.len() > 1 {
            let next_covers = self
                .samples
                .get(1)
                .is_some_and(|&(taken_at, _)| now.duration_since(taken_at) >= self.window);
            if next_covers {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        if now.duration_since(since) < self.window {
            return false;
        }
        let oldest = self.samples.front().map(|&(_, count)| count).unwrap_or(paths);
        paths.saturating_sub(oldest) < self.min_delta
    }

    /// The most recently observed path count, if any.
    pub fn latest(&self) -> Option<u64> {
        self.samples.back().map(|&(_, count)| count)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Pulls the path counter out of `fuzzer_stats` contents.
///
/// AFL++ renamed the counter along the way: newer versions report
/// `corpus_count`, older ones `paths_total`. The newer key wins when both
/// are present. Lines are `key : value` pairs; anything unparseable is
/// skipped rather than treated as an error, since the file is rewritten
/// live and a torn read is routine.
pub fn parse_paths_total(contents: &str) -> Option<u64> {
    let mut fallback = None;
    for line in contents.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "corpus_count" => {
                if let Ok(count) = value.trim().parse::<u64>() {
                    return Some(count);
                }
            }
            "paths_total" => {
                if let Ok(count) = value.trim().parse::<u64>() {
                    fallback = Some(count);
                }
            }
            _ => {}
        }
    }
    fallback
}

/// Accepts either the stats file itself or the fuzzer's output directory
/// containing one.
pub fn resolve_stats_path(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        path.join("fuzzer_stats")
    } else {
        path
    }
}
