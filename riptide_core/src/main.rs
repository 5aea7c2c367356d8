use riptide_core::config::MutatorConfig;
use riptide_core::engine::MutationEngine;

use std::collections::HashSet;
use std::time::Instant;

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let config = MutatorConfig::from_env();
    let mut engine = MutationEngine::with_seed(&config, 0);

    let mut corpus: Vec<Vec<u8>> = vec![
        br#"{"user":"alice","id":7,"active":true}"#.to_vec(),
        br#"{"items":[1,2,3],"total":6,"label":"cart"}"#.to_vec(),
        br#"[{"k":"v"},false,null]"#.to_vec(),
    ];
    let mut seen: HashSet<[u8; 16]> = corpus.iter().map(|doc| md5::compute(doc).0).collect();

    let max_iterations = 20_000;
    let max_size = 4096;
    let corpus_cap = 512;

    println!(
        "Exercising the mutation engine for {} iterations...",
        max_iterations
    );
    let start_time = Instant::now();
    let mut kept = 0;

    for i in 0..max_iterations {
        let seed = corpus[i % corpus.len()].clone();
        let aux = corpus[(i * 7 + 1) % corpus.len()].clone();
        let out = engine.mutate(&seed, &aux, max_size);

        // Stand-in for host feedback: a previously unseen output that parses
        // counts as a new path, the way a real campaign would credit a
        // queue-worthy testcase.
        let parsed = serde_json::from_slice::<serde_json::Value>(&out).is_ok();
        let new_path = parsed && seen.insert(md5::compute(&out).0);
        engine.record_outcome(i64::from(new_path), false, new_path);

        if new_path {
            if corpus.len() >= corpus_cap {
                corpus.swap_remove(0);
            }
            corpus.push(out);
            kept += 1;
        }

        if i % (max_iterations / 100) == 0 && i > 0 {
            let stats = engine.parse_stats();
            let exec_per_sec = i as f32 / start_time.elapsed().as_secs_f32();
            print!(
                "\rIter: {}/{}, Phase: {}, Parse rate: {:.3}, Corpus: {}, Execs/sec: {:.0}",
                i,
                max_iterations,
                engine.phase().label(),
                stats.rate(),
                corpus.len(),
                exec_per_sec
            );
            use std::io::Write;
            std::io::stdout().flush().unwrap();
        }
    }

    println!("\nRun finished in {:.2?}.", start_time.elapsed());
    let stats = engine.parse_stats();
    println!(
        "Total trials: {}, Parse rate: {:.3}, Final phase: {}, Kept outputs: {}",
        stats.total(),
        stats.rate(),
        engine.phase().label(),
        kept
    );
    println!("Operator scores:");
    for idx in 0..engine.op_count() {
        println!(
            "  {:>2} {:<14} {:.4}",
            idx,
            engine.op_name(idx).unwrap_or("?"),
            engine.scores()[idx]
        );
    }
    Ok(())
}
