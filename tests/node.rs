mod common;

use std::sync::Arc;

use bevy::prelude::*;
use bevy_motion_matching_core::blend::BlendStatus;
use bevy_motion_matching_core::error::SetupError;
use bevy_motion_matching_core::prelude::*;
use bevy_motion_matching_core::telemetry::{MotionMatchingDebug, NoDebug};
use common::*;

/// Pose ids of the turn clip start after the 11 walk poses.
const TURN_POSE: usize = 13;

fn settings() -> MotionMatchingSettings {
    MotionMatchingSettings {
        pose_match_method: PoseMatchMethod::Linear,
        next_pose_tolerance_test: false,
        ..default()
    }
}

fn context(settings: MotionMatchingSettings) -> MotionMatchingContext {
    MotionMatchingContext::new(Arc::new(locomotion_database()), settings).unwrap()
}

/// Desired input asking for the trajectory of `pose_id`.
fn desired_input(context: &MotionMatchingContext, pose_id: usize) -> Vec<f32> {
    let row = context.database().lookup_matrix().row(pose_id).unwrap();
    row[1..].to_vec()
}

fn anim_of(context: &MotionMatchingContext, pose_id: usize) -> usize {
    context.database().pose(pose_id).unwrap().anim_id
}

#[test]
fn starts_on_the_first_usable_pose() {
    let context = context(settings());

    assert!(context.is_valid_to_evaluate());
    assert_eq!(context.chosen_pose_id(), 0);
    assert_eq!(context.blend_channels().len(), 1);
    assert_eq!(context.current_pose().anim_id, 0);
    assert_eq!(context.current_pose_array()[0], 1.0);
}

#[test]
fn desired_turn_inertializes_into_the_turn_clip() {
    let mut context = context(settings());
    let desired = desired_input(&context, TURN_POSE);
    let mut requests = Vec::new();

    context.update(0.1, &MotionMatchingInput::new(&desired), &mut requests, &mut NoDebug);

    assert_eq!(requests.len(), 1);
    let request = requests[0];
    assert_eq!(request.blend_time, 0.3);
    assert_eq!(anim_of(&context, request.pose_id), 1);

    let channels = context.blend_channels();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels.chosen().unwrap().anim_id, 1);
    assert_eq!(channels.chosen().unwrap().status, BlendStatus::Dominant);
}

#[test]
fn blend_transitions_cross_fade() {
    let mut context = context(MotionMatchingSettings {
        transition_method: TransitionMethod::Blend,
        ..settings()
    });
    let desired = desired_input(&context, TURN_POSE);
    let mut requests = Vec::new();

    context.update(0.1, &MotionMatchingInput::new(&desired), &mut requests, &mut NoDebug);

    // Blending never asks the host to inertialize.
    assert!(requests.is_empty());

    let channels = context.blend_channels();
    assert_eq!(channels.len(), 2);
    let chosen = channels.chosen().unwrap();
    assert_eq!(chosen.anim_id, 1);
    assert!(chosen.weight > 0.0 && chosen.weight < 1.0);
    assert_eq!(channels.iter().next().unwrap().status, BlendStatus::Decay);
}

#[test]
fn passing_tolerance_test_skips_the_search() {
    let mut context = context(MotionMatchingSettings {
        next_pose_tolerance_test: true,
        position_tolerance: 1000.0,
        rotation_tolerance: 1000.0,
        ..settings()
    });
    let desired = desired_input(&context, TURN_POSE);
    let mut requests = Vec::new();

    context.update(0.1, &MotionMatchingInput::new(&desired), &mut requests, &mut NoDebug);

    assert!(requests.is_empty());
    assert_eq!(context.blend_channels().chosen().unwrap().anim_id, 0);
}

#[test]
fn searches_wait_for_the_update_interval() {
    let mut context = context(MotionMatchingSettings {
        update_interval: 0.5,
        ..settings()
    });
    let desired = desired_input(&context, TURN_POSE);
    let mut requests = Vec::new();

    context.update(0.1, &MotionMatchingInput::new(&desired), &mut requests, &mut NoDebug);
    assert!(requests.is_empty());

    for _ in 0..4 {
        context.update(0.1, &MotionMatchingInput::new(&desired), &mut requests, &mut NoDebug);
    }
    assert_eq!(requests.len(), 1);
}

#[test]
fn triggered_transition_jumps_immediately() {
    let mut context = context(settings());
    let desired = desired_input(&context, TURN_POSE);
    let mut requests = Vec::new();

    context.trigger_transition();
    context.update(0.02, &MotionMatchingInput::new(&desired), &mut requests, &mut NoDebug);

    assert_eq!(requests.len(), 1);
    assert_eq!(anim_of(&context, requests[0].pose_id), 1);
    assert_eq!(context.time_since_motion_chosen(), 0.0);
}

#[test]
fn snapshot_overrides_quality_features() {
    struct FootSnapshot;

    impl MotionSnapshot for FootSnapshot {
        fn bone_transform(&self, bone: &str) -> Option<Transform> {
            (bone == "foot").then(|| Transform::from_xyz(0.1, 0.1, 0.45))
        }

        fn bone_velocity(&self, _bone: &str) -> Option<Vec3> {
            None
        }
    }

    let mut context = context(settings());
    let desired = desired_input(&context, 0);
    let mut requests = Vec::new();

    let input = MotionMatchingInput::new(&desired).with_snapshot(&FootSnapshot);
    context.update(0.1, &input, &mut requests, &mut NoDebug);

    // Foot at 0.45 only matches the walk at 0.9 s.
    assert_eq!(requests.len(), 1);
    let pose = context.database().pose(requests[0].pose_id).unwrap();
    assert_eq!(pose.anim_id, 0);
    assert!((pose.time - 0.9).abs() < 1e-4);
}

#[test]
fn past_trajectory_can_follow_the_current_pose() {
    let mut context = context(MotionMatchingSettings {
        past_trajectory_mode: PastTrajectoryMode::CopyFromCurrentPose,
        ..settings()
    });
    let mut desired = desired_input(&context, 0);
    let layout = context.database().layout().clone();
    let input = layout.input_range(1).unwrap();
    let matrix = layout.feature_range(1).unwrap();
    desired[input.start..input.start + 4].fill(99.0);

    context.update(0.05, &MotionMatchingInput::new(&desired), &mut (), &mut NoDebug);

    let past = &context.desired_input()[input.start..input.start + 4];
    assert!(past.iter().all(|atom| *atom != 99.0));
    assert_eq!(past, &context.current_pose_array()[matrix.start..matrix.start + 4]);
}

#[test]
fn unmatched_traits_keep_playing() {
    let mut context = context(settings());
    let desired = desired_input(&context, TURN_POSE);
    let mut requests = Vec::new();

    let input = MotionMatchingInput::new(&desired).with_traits(MotionTraits::from_bit(5));
    context.update(0.1, &input, &mut requests, &mut NoDebug);

    assert!(requests.is_empty());
    assert_eq!(context.required_traits(), MotionTraits::from_bit(5));
    assert_eq!(context.blend_channels().chosen().unwrap().anim_id, 0);
}

#[test]
fn winners_close_to_the_playhead_are_not_transitioned_to() {
    struct FootAt(f32);

    impl MotionSnapshot for FootAt {
        fn bone_transform(&self, bone: &str) -> Option<Transform> {
            (bone == "foot").then(|| Transform::from_xyz(0.1, 0.1, self.0 * 0.5))
        }

        fn bone_velocity(&self, _bone: &str) -> Option<Vec3> {
            None
        }
    }

    let mut context = context(settings());
    let desired = desired_input(&context, 0);
    let mut requests = Vec::new();

    // The next walk pose wins, it is what is playing anyway.
    context.update(0.1, &MotionMatchingInput::new(&desired), &mut requests, &mut NoDebug);
    assert!(requests.is_empty());

    // Playing 0.2 s, the winner at 0.3 s is still too close.
    let input = MotionMatchingInput::new(&desired).with_snapshot(&FootAt(0.3));
    context.update(0.1, &input, &mut requests, &mut NoDebug);
    assert!(requests.is_empty());
    assert_eq!(context.blend_channels().len(), 1);

    // Playing 0.3 s, the winner at 0.9 s is far enough.
    let input = MotionMatchingInput::new(&desired).with_snapshot(&FootAt(0.9));
    context.update(0.1, &input, &mut requests, &mut NoDebug);
    assert_eq!(requests.len(), 1);
    let pose = context.database().pose(requests[0].pose_id).unwrap();
    assert_eq!(pose.anim_id, 0);
    assert!((pose.time - 0.9).abs() < 1e-4);
}

#[test]
fn clip_end_forces_a_search_one_blend_time_early() {
    let sampler = AnalyticSampler::new(vec![AnalyticClip::walk(1.0), AnalyticClip::turn(1.0, 1.5)]);
    let config = MotionMatchConfig::new(vec![foot_feature(), trajectory_feature()])
        .with_pose_interval(0.1);
    let clip = |name| {
        MotionClip::new(name, 1.0).with_trajectory_methods(
            TrajectoryPreprocessMethod::Extrapolate,
            TrajectoryPreprocessMethod::Extrapolate,
        )
    };
    let database = build_database(config, vec![clip("walk"), clip("turn")], &sampler);

    let settings = MotionMatchingSettings {
        update_interval: 100.0,
        ..settings()
    };
    let blend_time = settings.blend_time;
    let mut context = MotionMatchingContext::new(Arc::new(database), settings).unwrap();
    assert_eq!(context.chosen_pose_id(), 0);
    let desired = desired_input(&context, 0);

    let mut elapsed = 0.0;
    loop {
        context.update(0.05, &MotionMatchingInput::new(&desired), &mut (), &mut NoDebug);
        elapsed += 0.05;

        // The chosen channel is at full weight, so the whole blend time is added.
        let playhead = elapsed + blend_time;
        if playhead < 0.97 {
            assert!(!context.forced_search(), "forced at {elapsed}");
        } else if playhead > 1.03 {
            assert!(context.forced_search(), "not forced at {elapsed}");
            break;
        }
        assert!(elapsed < 1.0);
    }
}

#[test]
fn optimized_without_optimisation_falls_back_to_linear() {
    let context = context(MotionMatchingSettings {
        pose_match_method: PoseMatchMethod::Optimized,
        ..settings()
    });
    assert_eq!(context.pose_match_method(), PoseMatchMethod::Linear);
}

#[test]
fn ratio_override_reweights_categories() {
    let quality_only = context(MotionMatchingSettings {
        override_quality_vs_responsiveness: Some(0.0),
        ..settings()
    });
    let layout = quality_only.database().layout().clone();
    let weights = quality_only.calibration(MotionTraits::NONE).unwrap();

    let trajectory = layout.input_range(1).unwrap();
    assert!(weights[trajectory].iter().all(|weight| *weight == 0.0));

    let foot = layout.input_range(0).unwrap();
    let authored = quality_only
        .database()
        .final_calibration(MotionTraits::NONE)
        .unwrap();
    for atom in foot {
        assert!((weights[atom] - authored[atom] * 2.0).abs() <= 1e-4 * authored[atom].max(1.0));
    }
}

#[test]
fn invalid_setup_disables_the_node() {
    let database = Arc::new(locomotion_database());
    let settings = MotionMatchingSettings {
        override_quality_vs_responsiveness: Some(2.0),
        ..settings()
    };

    assert!(matches!(
        MotionMatchingContext::new(Arc::clone(&database), settings.clone()),
        Err(SetupError::InvalidRatio(_))
    ));

    let mut context = MotionMatchingContext::new_or_invalid(database, settings);
    assert!(!context.is_valid_to_evaluate());

    let mut requests = Vec::new();
    context.trigger_transition();
    context.update(0.1, &MotionMatchingInput::new(&[]), &mut requests, &mut NoDebug);
    assert!(requests.is_empty());
    assert!(context.blend_channels().is_empty());
}

#[test]
fn debug_draws_both_trajectories() {
    #[derive(Default)]
    struct Recorder {
        lines: usize,
        spheres: usize,
    }

    impl MotionMatchingDebug for Recorder {
        fn draw_line(&mut self, _start: Vec3, _end: Vec3, _color: Color) {
            self.lines += 1;
        }

        fn draw_sphere(&mut self, _center: Vec3, _radius: f32, _color: Color) {
            self.spheres += 1;
        }
    }

    let context = context(settings());
    let mut recorder = Recorder::default();
    context.draw_debug(&mut recorder, &Transform::IDENTITY);

    // Three trajectory points, drawn for the desired and the current trajectory.
    assert_eq!(recorder.spheres, 6);
    assert_eq!(recorder.lines, 12);
}
