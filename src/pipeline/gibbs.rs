//! Source tracking runs: one Gibbs task per sink, or per held-out source.

use crate::config::GibbsConfig;
use crate::count_table::{CountTable, InputError};
use crate::stats::collate::{collate_gibbs_results, GibbsResults};
use crate::stats::conditional::ConditionalProbability;
use crate::stats::sampler::{gibbs_sampler, ChainDraws, ChainSchedule};
use crate::stats::GibbsError;
use crate::utils::parallel::ParallelExecutor;
use log::{debug, info, warn};
use ndarray::ArrayView1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Estimates the contribution of every source in `sources` to every sink in
/// `sinks`. Rows of the returned proportions follow the row order of `sinks`.
pub fn gibbs(
    sources: &CountTable,
    sinks: &CountTable,
    config: &GibbsConfig,
) -> Result<GibbsResults, GibbsError> {
    let schedule = prepare(sources, config)?;
    sources.ensure_same_features(sinks)?;
    info!(
        "Source tracking {} sink(s) against {} source(s) over {} features",
        sinks.n_samples(),
        sources.n_samples(),
        sources.n_features()
    );

    let model = ConditionalProbability::new(
        config.alpha1,
        config.alpha2,
        config.beta,
        sources.counts_matrix().view(),
    )?;
    let sink_ids = sinks.sample_ids();
    let tasks: Vec<(ArrayView1<u64>, &ConditionalProbability)> = sinks
        .counts_matrix()
        .outer_iter()
        .map(|row| (row, &model))
        .collect();

    let all_draws = run_tasks(&tasks, &sink_ids, &schedule, config)?;

    let results = collate_gibbs_results(
        &all_draws,
        &sink_ids,
        &sources.sample_ids(),
        &sources.feature_ids(),
        config.create_feature_tables,
        false,
    )?;
    info!("Finished source tracking {} sink(s)", sink_ids.len());
    Ok(results)
}

/// Leave-one-out classification: each source in turn is treated as a sink
/// and tracked against the remaining sources.
pub fn gibbs_loo(sources: &CountTable, config: &GibbsConfig) -> Result<GibbsResults, GibbsError> {
    let schedule = prepare(sources, config)?;
    if sources.n_samples() < 2 {
        return Err(InputError::TooFewSources {
            required: 2,
            found: sources.n_samples(),
        }
        .into());
    }
    info!(
        "Leave-one-out source tracking of {} source(s) over {} features",
        sources.n_samples(),
        sources.n_features()
    );

    let models = (0..sources.n_samples())
        .map(|held_out| {
            let remaining = sources.without_sample(held_out);
            ConditionalProbability::new(
                config.alpha1,
                config.alpha2,
                config.beta,
                remaining.counts_matrix().view(),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    let source_ids = sources.sample_ids();
    let tasks: Vec<(ArrayView1<u64>, &ConditionalProbability)> = sources
        .counts_matrix()
        .outer_iter()
        .zip(models.iter())
        .collect();

    let all_draws = run_tasks(&tasks, &source_ids, &schedule, config)?;

    let results = collate_gibbs_results(
        &all_draws,
        &source_ids,
        &source_ids,
        &sources.feature_ids(),
        config.create_feature_tables,
        true,
    )?;
    info!("Finished leave-one-out source tracking");
    Ok(results)
}

fn prepare(sources: &CountTable, config: &GibbsConfig) -> Result<ChainSchedule, GibbsError> {
    config.validate()?;
    if sources.n_samples() == 0 {
        return Err(InputError::TooFewSources {
            required: 1,
            found: 0,
        }
        .into());
    }
    if config.sample_with_replacement {
        warn!("sample_with_replacement has no effect on Gibbs sampling and is ignored");
    }
    let schedule = config.schedule()?;
    if config.delay == 1 && config.draws_per_restart > 1 {
        warn!(
            "delay = 1 records a single draw per restart; {} draws per restart were requested",
            config.draws_per_restart
        );
    }
    Ok(schedule)
}

/// Runs one sampler per task and returns the draws in task order.
///
/// Every task clones its model and owns a generator seeded from the base
/// seed and the task index, so results do not depend on scheduling.
fn run_tasks(
    tasks: &[(ArrayView1<u64>, &ConditionalProbability)],
    ids: &[String],
    schedule: &ChainSchedule,
    config: &GibbsConfig,
) -> Result<Vec<ChainDraws>, GibbsError> {
    let base_seed = config.seed.unwrap_or_else(|| rand::rng().random());
    info!(
        "Running {} chain task(s) with {} worker(s), base seed {}",
        tasks.len(),
        config.jobs,
        base_seed
    );

    let executor = ParallelExecutor::new(config.jobs)?;
    let results = executor.execute(tasks, |i, (sink, model)| {
        debug!("Sampling '{}'", ids[i]);
        let mut model = (*model).clone();
        let mut rng = StdRng::seed_from_u64(task_seed(base_seed, i));
        let draws = gibbs_sampler(*sink, &mut model, schedule, &mut rng).map_err(|source| {
            GibbsError::Task {
                sink: ids[i].clone(),
                source,
            }
        })?;
        debug!("Finished '{}' with {} draws", ids[i], draws.n_draws());
        Ok::<_, GibbsError>(draws)
    })?;

    Ok(results.into_iter().map(|(_, draws)| draws).collect())
}

fn task_seed(base_seed: u64, index: usize) -> u64 {
    base_seed.wrapping_add(index as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, Array2};

    fn labels(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    fn table(counts: Array2<u64>, prefix: &str) -> CountTable {
        let (rows, cols) = counts.dim();
        CountTable::new(counts, labels(prefix, rows), labels("F", cols)).unwrap()
    }

    fn config(seed: u64) -> GibbsConfig {
        GibbsConfig {
            restarts: 2,
            burnin: 20,
            delay: 2,
            draws_per_restart: 2,
            seed: Some(seed),
            ..Default::default()
        }
    }

    #[test]
    fn test_even_mixture_of_two_pure_sources() {
        let sources = table(arr2(&[[10, 0, 0, 0], [0, 0, 0, 10]]), "source");
        let sinks = table(arr2(&[[5, 0, 0, 5]]), "sink");
        let config = GibbsConfig {
            restarts: 1,
            draws_per_restart: 1,
            burnin: 5,
            delay: 1,
            seed: Some(3),
            ..Default::default()
        };
        let results = gibbs(&sources, &sinks, &config).unwrap();
        let means = &results.proportions.means;
        assert_eq!(means.col_ids, vec!["source1", "source2", "Unknown"]);
        let row = means.values.row(0);
        assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        assert!(row[0] >= 0.1 && row[1] >= 0.1, "proportions {:?}", row);
        assert!(row[2] <= 0.6, "unknown {}", row[2]);
    }

    #[test]
    fn test_rows_follow_sink_order_and_sum_to_one() {
        let sources = table(arr2(&[[30, 20, 0, 0, 1], [0, 1, 25, 25, 0]]), "source");
        let sinks = table(
            arr2(&[[0, 1, 12, 13, 0], [15, 10, 0, 0, 1], [8, 6, 6, 6, 0]]),
            "sink",
        );
        let results = gibbs(&sources, &sinks, &config(5)).unwrap();
        let means = &results.proportions.means;
        assert_eq!(means.row_ids, vec!["sink1", "sink2", "sink3"]);
        for row in means.values.outer_iter() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-9);
        }
        assert!(means.values[[0, 1]] > means.values[[0, 0]]);
        assert!(means.values[[1, 0]] > means.values[[1, 1]]);
    }

    #[test]
    fn test_results_independent_of_worker_count() {
        let sources = table(arr2(&[[30, 20, 0, 0], [0, 1, 25, 25]]), "source");
        let sinks = table(
            arr2(&[[0, 1, 12, 13], [15, 10, 0, 0], [8, 6, 6, 6], [1, 1, 1, 1]]),
            "sink",
        );
        let serial = gibbs(&sources, &sinks, &config(8)).unwrap();
        let parallel = gibbs(
            &sources,
            &sinks,
            &GibbsConfig {
                jobs: 3,
                ..config(8)
            },
        )
        .unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_feature_tables_per_sink() {
        let sources = table(arr2(&[[10, 0, 0], [0, 0, 10]]), "source");
        let sinks = table(arr2(&[[2, 1, 3], [0, 0, 0]]), "sink");
        let results = gibbs(
            &sources,
            &sinks,
            &GibbsConfig {
                create_feature_tables: true,
                ..config(1)
            },
        )
        .unwrap();
        let tables = results.feature_tables.unwrap();
        assert_eq!(tables.len(), 2);

        let first = &tables[0];
        assert_eq!(first.table.row_ids, vec!["source1", "source2", "Unknown"]);
        assert_eq!(first.n_draws, 4);
        let per_feature: Vec<u64> = first
            .table
            .values
            .columns()
            .into_iter()
            .map(|c| c.sum())
            .collect();
        assert_eq!(per_feature, vec![8, 4, 12]);

        assert!(tables[1].table.values.iter().all(|&c| c == 0));
        assert!(results.proportions.means.values.row(1).iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_sink_identical_to_source() {
        let sources = table(
            arr2(&[[40, 30, 20, 10, 0, 0, 0, 0], [0, 0, 0, 0, 10, 20, 30, 40]]),
            "source",
        );
        let sinks = table(arr2(&[[40, 30, 20, 10, 0, 0, 0, 0]]), "sink");
        let config = GibbsConfig {
            burnin: 100,
            restarts: 2,
            seed: Some(21),
            ..Default::default()
        };
        let results = gibbs(&sources, &sinks, &config).unwrap();
        let row = results.proportions.means.values.row(0).to_owned();
        assert!(row[0] > 0.8, "proportions {:?}", row);
        assert!(row[1] < 0.01, "proportions {:?}", row);
    }

    #[test]
    fn test_loo_zero_diagonal() {
        let sources = table(
            arr2(&[[20, 10, 0, 0], [18, 12, 0, 1], [0, 0, 15, 15]]),
            "source",
        );
        let results = gibbs_loo(
            &sources,
            &GibbsConfig {
                create_feature_tables: true,
                ..config(4)
            },
        )
        .unwrap();
        let means = &results.proportions.means;
        assert_eq!(means.values.dim(), (3, 4));
        assert_eq!(means.col_ids, vec!["source1", "source2", "source3", "Unknown"]);
        for i in 0..3 {
            assert_eq!(means.values[[i, i]], 0.0);
            assert_eq!(results.proportions.stds.values[[i, i]], 0.0);
            assert_abs_diff_eq!(means.values.row(i).sum(), 1.0, epsilon = 1e-9);
        }
        // the two similar sources explain each other
        assert!(means.values[[0, 1]] > means.values[[0, 2]]);

        let tables = results.feature_tables.unwrap();
        for (i, ft) in tables.iter().enumerate() {
            assert_eq!(ft.table.values.dim(), (4, 4));
            assert!(ft.table.values.row(i).iter().all(|&c| c == 0));
        }
    }

    #[test]
    fn test_loo_requires_two_sources() {
        let sources = table(arr2(&[[1, 2, 3]]), "source");
        assert!(matches!(
            gibbs_loo(&sources, &config(0)),
            Err(GibbsError::Input(InputError::TooFewSources { .. }))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected_before_sampling() {
        let sources = table(arr2(&[[1, 2, 3]]), "source");
        let sinks = table(arr2(&[[1, 2, 3]]), "sink");
        let bad = GibbsConfig {
            delay: 0,
            ..config(0)
        };
        assert!(matches!(
            gibbs(&sources, &sinks, &bad),
            Err(GibbsError::Config(_))
        ));
    }

    #[test]
    fn test_feature_mismatch_is_rejected() {
        let sources = table(arr2(&[[1, 2, 3]]), "source");
        let sinks = table(arr2(&[[1, 2]]), "sink");
        assert!(matches!(
            gibbs(&sources, &sinks, &config(0)),
            Err(GibbsError::Input(InputError::FeatureMismatch(_)))
        ));
    }

    #[test]
    fn test_task_seeds_are_distinct() {
        assert_ne!(task_seed(10, 0), task_seed(10, 1));
        assert_eq!(task_seed(u64::MAX, 1), 0);
    }
}
