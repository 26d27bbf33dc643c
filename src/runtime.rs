use rayon::ThreadPoolBuilder;
use std::sync::Once;

const ENV_HINTS: [&str; 6] = [
    "TRIPMATRIX_THREADS",
    "RAYON_NUM_THREADS",
    "SLURM_CPUS_PER_TASK",
    "SLURM_CPUS_ON_NODE",
    "PBS_NP",
    "OMP_NUM_THREADS",
];

#[derive(Debug, PartialEq, Eq)]
struct ThreadConfig {
    count: usize,
    source: String,
}

fn first_positive(hints: impl IntoIterator<Item = (String, Option<String>)>) -> Option<ThreadConfig> {
    hints.into_iter().find_map(|(key, value)| {
        let count = value?.trim().parse::<usize>().ok().filter(|&n| n > 0)?;
        Some(ThreadConfig { count, source: key })
    })
}

fn detect_thread_config(explicit: Option<usize>) -> ThreadConfig {
    if let Some(count) = explicit.filter(|&n| n > 0) {
        return ThreadConfig {
            count,
            source: "--threads".to_string(),
        };
    }

    let env = ENV_HINTS
        .iter()
        .map(|&key| (key.to_string(), std::env::var(key).ok()));
    if let Some(cfg) = first_positive(env) {
        return cfg;
    }

    let fallback = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1);

    ThreadConfig {
        count: fallback,
        source: "available_parallelism".to_string(),
    }
}

/// Sizes the global rayon pool once; later calls are no-ops.
pub fn configure_thread_pool(explicit: Option<usize>) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let cfg = detect_thread_config(explicit);
        match ThreadPoolBuilder::new()
            .num_threads(cfg.count)
            .thread_name(|i| format!("tripmatrix-worker-{i}"))
            .build_global()
        {
            Ok(_) => {
                log::info!("[threads] rayon pool = {} threads (hint: {})", cfg.count, cfg.source);
            }
            Err(err) => {
                log::warn!("[threads] failed to configure rayon pool ({err}); continuing with default");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(key: &str, value: Option<&str>) -> (String, Option<String>) {
        (key.to_string(), value.map(str::to_string))
    }

    #[test]
    fn test_first_positive_hint_wins() {
        let cfg = first_positive([
            hint("TRIPMATRIX_THREADS", None),
            hint("RAYON_NUM_THREADS", Some("0")),
            hint("SLURM_CPUS_PER_TASK", Some("lots")),
            hint("SLURM_CPUS_ON_NODE", Some(" 6 ")),
            hint("PBS_NP", Some("12")),
        ]);
        assert_eq!(
            cfg,
            Some(ThreadConfig {
                count: 6,
                source: "SLURM_CPUS_ON_NODE".to_string()
            })
        );
        assert_eq!(first_positive([hint("OMP_NUM_THREADS", Some("-1"))]), None);
    }

    #[test]
    fn test_explicit_count_beats_env() {
        let cfg = detect_thread_config(Some(3));
        assert_eq!(cfg.count, 3);
        assert_eq!(cfg.source, "--threads");
        assert!(detect_thread_config(None).count >= 1);
    }
}
