// End-to-end sky generation over synthetic frames held in a MemoryStore.
//
// Frames are a flat sky with a mild gradient, scaled per exposure and
// sprinkled with noise, so the combined sky should come back close to the
// normalized gradient regardless of exposure level.

#[cfg(test)]
mod tests {
    use crate::combine::{combine_group, prepare_frame};
    use crate::fits::{CardValue, Frame, Header, MemoryStore};
    use crate::repair::{repair_sky, RepairStrategy};
    use crate::selection::FrameKind;
    use crate::sky::{build_sky_model, generate_sky_from_frames, SkyConfig};
    use crate::stats::missing_count;
    use nalgebra::DMatrix;
    use rand::prelude::*;
    use std::path::PathBuf;

    const ROWS: usize = 32;
    const COLUMNS: usize = 40;

    fn sky_level(row: usize, column: usize) -> f64 {
        1.0 + 0.002 * row as f64 + 0.001 * column as f64
    }

    /// Exposure of the synthetic sky at the given throughput
    fn exposure(rng: &mut StdRng, throughput: f64) -> DMatrix<f64> {
        DMatrix::from_fn(ROWS, COLUMNS, |r, c| {
            throughput * sky_level(r, c) * (1.0 + rng.gen_range(-0.002..0.002))
        })
    }

    fn header(sequence: usize) -> Header {
        let mut header = Header::new();
        header.set("FILTER1", CardValue::Text("Open".into()));
        header.set("FILTER2", CardValue::Text("J".into()));
        header.set("SEQNUM", CardValue::Integer(sequence as i64));
        header
    }

    /// Store `count` registered frames named after consecutive sequence ids
    fn populate(store: &MemoryStore, rng: &mut StdRng, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = PathBuf::from(format!("/mem/C4/astrom/{:08}C4.ramp.new", 747455 + i));
                let throughput = 800.0 + 50.0 * i as f64;
                store.insert(&path, Frame::new(exposure(rng, throughput), header(i)));
                path
            })
            .collect()
    }

    fn registered_config() -> SkyConfig {
        SkyConfig::for_kind(FrameKind::Registered, "/mem/C4/astrom", "/mem/C4/sky")
    }

    #[test]
    fn test_six_frames_two_groups_no_repair() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(11);
        let frames = populate(&store, &mut rng, 6);

        let config = SkyConfig {
            group_size: Some(3),
            ..registered_config()
        };
        let run = generate_sky_from_frames(&store, &frames, &config).unwrap();

        assert_eq!(run.frame_count, 6);
        assert_eq!(run.group_count, 2);
        assert_eq!(run.repair.missing_before, 0);
        assert_eq!(run.repair.strategy_applied, None);
        assert_eq!(
            run.output_path,
            PathBuf::from("/mem/C4/sky/sky.Open-J.00747455-00747460.C4.fits")
        );

        let sky = store.get(&run.output_path).unwrap();
        assert_eq!(missing_count(&sky.samples), 0);
        assert_eq!(sky.header.integer("NCOMBINE"), Some(6));
        assert_eq!(sky.header.integer("SKYGRPS"), Some(2));
        // Header comes from the last frame in sort order
        assert_eq!(sky.header.integer("SEQNUM"), Some(5));

        // Ratios between positions survive normalization
        let ratio = sky.samples[(ROWS - 1, COLUMNS - 1)] / sky.samples[(0, 0)];
        let expected = sky_level(ROWS - 1, COLUMNS - 1) / sky_level(0, 0);
        assert!((ratio - expected).abs() < 0.01);
    }

    #[test]
    fn test_single_group_matches_group_combination() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(5);
        let frames = populate(&store, &mut rng, 4);

        let resolved = registered_config().resolve(&store, frames.len()).unwrap();
        let model = build_sky_model(&store, &frames, &resolved).unwrap();

        let prepared: Vec<DMatrix<f64>> = frames
            .iter()
            .map(|path| {
                let mut samples = store.get(path).unwrap().samples;
                prepare_frame(&mut samples, None, None);
                samples
            })
            .collect();
        let direct = combine_group(&prepared);

        assert_eq!(model.group_count, 1);
        for (a, b) in model.samples.iter().zip(direct.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_missing_row_in_one_member_is_recovered() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut frames: Vec<DMatrix<f64>> = (0..3).map(|i| exposure(&mut rng, 500.0 + i as f64)).collect();
        frames[1].row_mut(7).fill(f64::NAN);

        for frame in frames.iter_mut() {
            prepare_frame(frame, None, None);
        }
        let combined = combine_group(&frames);

        assert_eq!(missing_count(&combined), 0);
        assert!((combined[(7, 0)] - sky_level(7, 0) / sky_level(ROWS / 2, COLUMNS / 2)).abs() < 0.05);
    }

    #[test]
    fn test_sigma_disabled_is_bitwise_pass_through() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut frame = exposure(&mut rng, 1000.0);
        frame[(3, 3)] = 1.0e6;
        let original = frame.clone();

        prepare_frame(&mut frame, None, None);
        let scale = crate::stats::nan_median(&original);
        for (a, b) in original.iter().zip(frame.iter()) {
            assert_eq!((a / scale).to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_sigma_clipping_removes_transient_source() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(17);
        let frames = populate(&store, &mut rng, 3);

        // A bright source sits on the same pixel in two of three frames, so
        // the median alone cannot reject it
        for path in &frames[..2] {
            let mut frame = store.get(path).unwrap();
            frame.samples[(10, 10)] *= 50.0;
            store.insert(path, frame);
        }

        let unclipped = {
            let resolved = registered_config().resolve(&store, 3).unwrap();
            build_sky_model(&store, &frames, &resolved).unwrap().samples
        };
        assert!(unclipped[(10, 10)] > 10.0);

        let config = SkyConfig {
            sigma: Some(3.0),
            ..registered_config()
        };
        let resolved = config.resolve(&store, 3).unwrap();
        let clipped = build_sky_model(&store, &frames, &resolved).unwrap().samples;
        assert!((clipped[(10, 10)] - unclipped[(10, 11)]).abs() < 0.05);
    }

    #[test]
    fn test_prior_sky_reference_keeps_gradient() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(29);
        let frames = populate(&store, &mut rng, 3);

        // Residuals against a prior of the right shape are a small scaled
        // copy of the gradient plus noise, so nothing gets clipped
        let prior = DMatrix::from_fn(ROWS, COLUMNS, |r, c| 850.0 * sky_level(r, c));
        store.insert("/mem/C4/sky/prior.fits", Frame::new(prior, Header::new()));

        let config = SkyConfig {
            sigma: Some(5.0),
            prior_sky: Some(PathBuf::from("/mem/C4/sky/prior.fits")),
            ..registered_config()
        };
        let resolved = config.resolve(&store, 3).unwrap();
        let model = build_sky_model(&store, &frames, &resolved).unwrap();
        assert_eq!(missing_count(&model.samples), 0);
    }

    #[test]
    fn test_zero_threshold_always_repairs() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(8);
        let frames: Vec<PathBuf> = (0..3)
            .map(|i| {
                let path = PathBuf::from(format!("/mem/C2/flat/{:08}C2.flat.fits", 100 + i));
                let mut samples = exposure(&mut rng, 900.0);
                // Bad column shared by every frame: nothing can measure it
                samples.column_mut(5).fill(f64::NAN);
                store.insert(&path, Frame::new(samples, Header::new()));
                path
            })
            .collect();

        for repair in [RepairStrategy::LocalMedian { size: 5 }, RepairStrategy::LocalMean { radius: 4 }] {
            let config = SkyConfig {
                repair,
                ..SkyConfig::for_kind(FrameKind::Flat, "/mem/C2/flat", "/mem/C2/sky")
            };
            let run = generate_sky_from_frames(&store, &frames, &config).unwrap();
            assert_eq!(run.repair.missing_before, ROWS);
            assert_eq!(run.repair.strategy_applied, Some(repair));
            assert_eq!(run.repair.filled_by_strategy, ROWS);
            assert_eq!(run.repair.filled_by_cleanup, 0);

            let sky = store.get(&run.output_path).unwrap();
            assert_eq!(missing_count(&sky.samples), 0);
            assert_eq!(
                run.output_path,
                PathBuf::from("/mem/C2/sky/sky.unknown-unknown.00000100-00000102.C2.fits")
            );
        }
    }

    #[test]
    fn test_repair_paths_near_large_missing_region() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut sky = exposure(&mut rng, 1.0);
        for r in 8..24 {
            for c in 10..30 {
                sky[(r, c)] = f64::NAN;
            }
        }
        let holes = missing_count(&sky);

        let mut by_median = sky.clone();
        let median_report = repair_sky(&mut by_median, 0.0, RepairStrategy::LocalMedian { size: 9 }).unwrap();
        let mut by_mean = sky.clone();
        let mean_report = repair_sky(&mut by_mean, 0.0, RepairStrategy::LocalMean { radius: 4 }).unwrap();

        // Missing values drag the median filter's rank into the hole, so the
        // centre of the region falls through to the global median
        assert!(median_report.filled_by_cleanup > 0);
        assert_eq!(mean_report.filled_by_cleanup, 0);
        assert_eq!(median_report.filled_by_strategy + median_report.filled_by_cleanup, holes);

        for repaired in [&by_median, &by_mean] {
            assert_eq!(missing_count(repaired), 0);
            assert!(repaired.iter().all(|v| (v - 1.05).abs() < 0.1));
        }
    }

    #[test]
    fn test_missing_count_never_increases_through_cascade() {
        let mut rng = StdRng::seed_from_u64(99);
        for threshold in [0.0, 1.0, 5.0, 50.0] {
            let mut sky = exposure(&mut rng, 1.0);
            for _ in 0..40 {
                let r = rng.gen_range(0..ROWS);
                let c = rng.gen_range(0..COLUMNS);
                sky[(r, c)] = f64::NAN;
            }
            let before = missing_count(&sky);
            let valid_before = sky.clone();

            let report = repair_sky(&mut sky, threshold, RepairStrategy::LocalMedian { size: 3 }).unwrap();
            assert_eq!(report.missing_before, before);
            assert_eq!(missing_count(&sky), 0);
            for (a, b) in valid_before.iter().zip(sky.iter()) {
                if !a.is_nan() {
                    assert_eq!(a.to_bits(), b.to_bits());
                }
            }
        }
    }

    #[test]
    fn test_load_failure_aborts_run() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut frames = populate(&store, &mut rng, 2);
        frames.push(PathBuf::from("/mem/C4/astrom/00999999C4.ramp.new"));

        let result = generate_sky_from_frames(&store, &frames, &registered_config());
        assert!(matches!(result, Err(crate::error::SkyError::Load { .. })));
        assert!(store.paths().iter().all(|p| !p.starts_with("/mem/C4/sky")));
    }
}
