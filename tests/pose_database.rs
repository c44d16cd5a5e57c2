mod common;

use bevy_motion_matching_core::motion_data::chunk::ChunkIterator;
use bevy_motion_matching_core::prelude::*;
use bevy_motion_matching_core::search::cost::pose_cost;
use common::*;

fn walk_database(looping: bool) -> MotionDatabase {
    let sampler = AnalyticSampler::new(vec![AnalyticClip::walk(1.0)]);
    let config = MotionMatchConfig::new(vec![foot_feature(), trajectory_feature()])
        .with_pose_interval(0.1);

    build_database(
        config,
        vec![MotionClip::new("walk", 1.0).looping(looping)],
        &sampler,
    )
}

#[test]
fn non_looping_sequencing_stays_inside_the_clip() {
    let database = walk_database(false);
    let pose_count = database.pose_count();
    assert_eq!(pose_count, 11);

    for pose in database.poses() {
        assert!(pose.next_pose_id < pose_count);
        assert!(pose.last_pose_id < pose_count);

        let next = &database.poses()[pose.next_pose_id];
        if pose.next_pose_id != pose.pose_id {
            assert_eq!(next.last_pose_id, pose.pose_id);
        }
    }

    let first = &database.poses()[0];
    let last = &database.poses()[pose_count - 1];
    assert_eq!(first.last_pose_id, first.pose_id);
    assert_eq!(last.next_pose_id, last.pose_id);
}

#[test]
fn looping_sequencing_wraps_after_every_pose() {
    let database = walk_database(true);
    let expected_steps = (1.0f32 / 0.1).floor() as usize + 1;

    let mut pose_id = 0;
    for step in 1..=expected_steps {
        pose_id = database.poses()[pose_id].next_pose_id;
        if step < expected_steps {
            assert_ne!(pose_id, 0, "wrapped early after {step} steps");
        }
    }
    assert_eq!(pose_id, 0);
}

#[test]
fn identical_rows_cost_nothing() {
    let database = locomotion_database();
    let matrix = database.lookup_matrix();

    for pose_id in 0..database.pose_count() {
        let row = matrix.row(pose_id).unwrap();
        for weights in [vec![1.0; row.len() - 1], vec![123.0; row.len() - 1]] {
            assert_eq!(pose_cost(row, row, &weights), 0.0);
        }
    }
}

#[test]
fn neutral_ratio_scales_base_weights_by_normalizer() {
    let database = locomotion_database();
    let user = database.calibration();
    assert_eq!(user.quality_vs_responsiveness, 0.5);

    for traits in database.used_traits() {
        let std_dev = database.std_dev_calibration(traits).unwrap();
        let final_weights = database.final_calibration(traits).unwrap();

        for ((&weight, &normalizer), &base) in final_weights
            .weights()
            .iter()
            .zip(std_dev.weights())
            .zip(&user.weights)
        {
            assert!((weight - base * normalizer).abs() <= 1e-6 * normalizer.max(1.0));
        }
    }
}

#[test]
fn search_remap_round_trips() {
    let database = locomotion_database();
    let search = database.search_matrix();
    assert!(!search.is_empty());

    for index in 0..search.len() {
        let pose_id = database.matrix_to_database(index).unwrap();
        assert_eq!(database.database_to_matrix(pose_id), Some(index));
    }
}

#[test]
fn tags_flag_and_partition_poses() {
    let sampler = AnalyticSampler::new(vec![AnalyticClip::walk(1.0)]);
    let config = MotionMatchConfig::new(vec![foot_feature(), trajectory_feature()])
        .with_pose_interval(0.1);
    let crouch = MotionTraits::from_bit(0);

    let clip = MotionClip::new("walk", 1.0)
        .looping(true)
        .with_tag(MotionTag::DoNotUse {
            start: 0.0,
            end: 0.2,
        })
        .with_tag(MotionTag::Traits {
            start: 0.5,
            end: 1.1,
            traits: crouch,
        })
        .with_tag(MotionTag::CostMultiplier {
            start: 0.3,
            end: 0.5,
            multiplier: 2.0,
            replace: true,
        });
    let database = build_database(config, vec![clip], &sampler);

    let flags: Vec<_> = database.poses().iter().map(|pose| pose.search_flag).collect();
    assert_eq!(flags[..2], [PoseSearchFlag::DoNotUse; 2]);
    assert!(flags[2..].iter().all(|flag| *flag == PoseSearchFlag::Searchable));

    assert!(database.poses()[..5].iter().all(|pose| pose.traits == MotionTraits::NONE));
    assert!(database.poses()[5..].iter().all(|pose| pose.traits == crouch));

    assert_eq!(database.pose_favour(2), 1.0);
    assert_eq!(database.pose_favour(3), 2.0);
    assert_eq!(database.pose_favour(4), 2.0);
    assert_eq!(database.pose_favour(5), 1.0);

    let used: Vec<_> = database.used_traits().collect();
    assert_eq!(used, vec![MotionTraits::NONE, crouch]);
    assert!(database.final_calibration(crouch).is_some());
}

#[test]
fn edge_poses_lead_into_unusable_poses() {
    let sampler = AnalyticSampler::new(vec![AnalyticClip::walk(2.0)]);
    let config = MotionMatchConfig::new(vec![foot_feature(), trajectory_feature()])
        .with_pose_interval(0.1);
    let database = build_database(config, vec![MotionClip::new("walk", 2.0)], &sampler);

    // A one second horizon on both ends only leaves the middle pose, right before an
    // unusable one.
    let flag_at = |time: f32| {
        database
            .poses()
            .iter()
            .find(|pose| (pose.time - time).abs() < 1e-4)
            .unwrap()
            .search_flag
    };
    assert_eq!(flag_at(0.9), PoseSearchFlag::DoNotUse);
    assert_eq!(flag_at(1.0), PoseSearchFlag::EdgePose);
    assert_eq!(flag_at(1.1), PoseSearchFlag::DoNotUse);
    assert!(database.search_matrix().is_empty());
}

#[test]
fn missing_clip_zero_fills_features() {
    let sampler = AnalyticSampler::new(vec![AnalyticClip::walk(1.0)]);
    let config = MotionMatchConfig::new(vec![foot_feature()]).with_pose_interval(0.1);
    let database = build_database(
        config,
        vec![
            MotionClip::new("walk", 1.0).looping(true),
            MotionClip::new("missing", 0.5).looping(true),
        ],
        &sampler,
    );

    let missing = database
        .poses()
        .iter()
        .filter(|pose| pose.anim_id == 1)
        .map(|pose| database.lookup_matrix().row(pose.pose_id).unwrap());
    for row in missing {
        assert_eq!(row[0], 1.0);
        assert!(row[1..].iter().all(|atom| *atom == 0.0));
    }
}

#[test]
fn invalid_inputs_are_rejected() {
    let sampler = AnalyticSampler::new(vec![AnalyticClip::walk(1.0)]);
    let config = MotionMatchConfig::new(vec![foot_feature()]);
    let calibration = MotionCalibration::from_config(&config);

    let no_clips = MotionDatabase::preprocess(
        config.clone(),
        Vec::new(),
        calibration.clone(),
        &sampler,
        &mut (),
    );
    assert!(matches!(no_clips, Err(PreprocessError::NoClips)));

    let zero_length = MotionDatabase::preprocess(
        config.clone(),
        vec![MotionClip::new("empty", 0.0)],
        calibration,
        &sampler,
        &mut (),
    );
    assert!(matches!(
        zero_length,
        Err(PreprocessError::InvalidClipLength { .. })
    ));

    let mismatched = MotionCalibration {
        weights: vec![1.0],
        quality_vs_responsiveness: 0.5,
    };
    let result = MotionDatabase::preprocess(
        config,
        vec![MotionClip::new("walk", 1.0)],
        mismatched,
        &sampler,
        &mut (),
    );
    assert!(result.is_err());
}

#[test]
fn database_survives_json() {
    let database = locomotion_database();
    let json = database.to_json().unwrap();
    let loaded = MotionDatabase::from_json(&json).unwrap();

    assert_eq!(loaded.pose_count(), database.pose_count());
    assert_eq!(loaded.search_matrix().len(), database.search_matrix().len());
    assert_eq!(loaded.lookup_matrix(), database.lookup_matrix());
}

#[test]
fn mirrored_clips_get_their_own_run() {
    let sampler = AnalyticSampler::new(vec![AnalyticClip::walk(1.0)]);
    let config = MotionMatchConfig::new(vec![foot_feature()]).with_pose_interval(0.1);
    let database = build_database(
        config,
        vec![MotionClip::new("walk", 1.0).looping(true).with_mirroring(true)],
        &sampler,
    );

    let runs: Vec<_> = database.iter_chunk().collect();
    assert_eq!(runs.len(), 2);
    assert!(runs[0].iter().all(|pose| !pose.mirrored));
    assert!(runs[1].iter().all(|pose| pose.mirrored));

    // Looping wraps within the run, never into the other mirror state.
    let mirrored_start = runs[1][0].pose_id;
    assert_eq!(runs[1].last().unwrap().next_pose_id, mirrored_start);

    for pose in runs[1] {
        let row = database.lookup_matrix().row(pose.pose_id).unwrap();
        assert!((row[1] + 0.1).abs() < 1e-6);
    }
}
