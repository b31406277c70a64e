// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashMap;

use crate::frame::{BodyRecord, JointName, Payload, ProcessedBody, Swipe, TrackingState, Vec3};

use super::{SideEffect, WorkerError};

#[derive(Debug, Clone)]
pub struct BodyParams {
    pub correction: f32,
    pub max_deviation: f32,
    pub jitter_radius: f32,
    pub velocities: bool,
    pub bounds: bool,
    pub confidence: bool,
    pub gestures: bool,
    pub gesture_threshold: f32,
}

#[derive(Debug, Clone, Default)]
struct PreviousBody {
    joints: HashMap<JointName, Vec3>,
    right_hand_relative_x: Option<f32>,
}

/// Per-worker-thread state carried across frames: the previous smoothed joint positions and
/// swipe-gesture baseline for every tracking id seen so far. Bodies that stop being tracked
/// are pruned at the start of each call so state doesn't grow unbounded.
#[derive(Debug, Clone, Default)]
pub struct BodyState {
    previous: HashMap<u64, PreviousBody>,
}

/// Smooths, derives metrics for, and detects gestures in a batch of body records.
pub fn process(
    bodies: &[BodyRecord],
    timestamp_ms: u64,
    params: &BodyParams,
    state: &mut BodyState,
) -> Result<(Payload, Vec<SideEffect>), WorkerError> {
    let live_ids: Vec<u64> = bodies.iter().filter(|b| b.tracked).map(|b| b.tracking_id).collect();
    state.previous.retain(|id, _| live_ids.contains(id));

    let mut processed = Vec::with_capacity(bodies.len());
    let mut side_effects = Vec::new();

    for body in bodies {
        if !body.tracked {
            continue;
        }
        if body.joints.is_empty() {
            return Err(WorkerError::MissingJoints(body.tracking_id));
        }

        let prev = state.previous.entry(body.tracking_id).or_default();
        let mut smoothed = HashMap::with_capacity(body.joints.len());
        for (&name, joint) in &body.joints {
            let prev_pos = prev.joints.get(&name).copied().unwrap_or(joint.position);
            let new_pos = smooth(joint.position, prev_pos, params);
            let mut smoothed_joint = *joint;
            smoothed_joint.previous_position = Some(prev_pos);
            smoothed_joint.position = new_pos;
            smoothed.insert(name, smoothed_joint);
        }

        let center_of_mass = params
            .bounds
            .then(|| center_of_mass(&smoothed))
            .flatten();
        let bounds = params.bounds.then(|| aabb(&smoothed)).flatten();
        let confidence = params.confidence.then(|| mean_confidence(&smoothed)).flatten();

        let velocities = if params.velocities {
            let v = compute_velocities(&smoothed, &prev.joints);
            if !v.is_empty() {
                side_effects.push(SideEffect::Movement {
                    tracking_id: body.tracking_id,
                    velocities: v.clone(),
                });
            }
            Some(v)
        } else {
            None
        };

        if params.gestures {
            if let Some(swipe) = detect_swipe(&smoothed, prev.right_hand_relative_x, params) {
                side_effects.push(SideEffect::Gesture {
                    tracking_id: body.tracking_id,
                    swipe,
                });
            }
        }

        prev.right_hand_relative_x = relative_x(&smoothed, JointName::HandRight);
        prev.joints = smoothed.iter().map(|(&k, v)| (k, v.position)).collect();

        processed.push(ProcessedBody {
            tracking_id: body.tracking_id,
            joints: smoothed,
            center_of_mass,
            bounds,
            confidence,
            velocities,
        });
    }

    Ok((
        Payload::Body {
            bodies: processed,
            timestamp_ms,
        },
        side_effects,
    ))
}

fn smooth(current: Vec3, prev: Vec3, params: &BodyParams) -> Vec3 {
    let alpha = params.correction;
    let mut new = current.scale(1.0 - alpha).add(prev.scale(alpha));
    let delta = new.sub(prev);
    let magnitude = delta.length();

    if magnitude > params.max_deviation && magnitude > 0.0 {
        new = prev.add(delta.scale(params.max_deviation / magnitude));
    } else if magnitude < params.jitter_radius {
        new = prev;
    }
    new
}

fn center_of_mass(joints: &HashMap<JointName, crate::frame::Joint>) -> Option<Vec3> {
    let tracked: Vec<Vec3> = joints
        .values()
        .filter(|j| j.tracking_state > TrackingState::NotTracked)
        .map(|j| j.position)
        .collect();
    if tracked.is_empty() {
        return None;
    }
    let sum = tracked.iter().fold(Vec3::ZERO, |acc, &p| acc.add(p));
    Some(sum.scale(1.0 / tracked.len() as f32))
}

fn aabb(joints: &HashMap<JointName, crate::frame::Joint>) -> Option<(Vec3, Vec3)> {
    let mut tracked = joints
        .values()
        .filter(|j| j.tracking_state > TrackingState::NotTracked)
        .map(|j| j.position);
    let first = tracked.next()?;
    let (min, max) = tracked.fold((first, first), |(min, max), p| {
        (
            Vec3 {
                x: min.x.min(p.x),
                y: min.y.min(p.y),
                z: min.z.min(p.z),
            },
            Vec3 {
                x: max.x.max(p.x),
                y: max.y.max(p.y),
                z: max.z.max(p.z),
            },
        )
    });
    Some((min, max))
}

fn mean_confidence(joints: &HashMap<JointName, crate::frame::Joint>) -> Option<f32> {
    let tracked: Vec<f32> = joints
        .values()
        .filter(|j| j.tracking_state > TrackingState::NotTracked)
        .map(|j| j.confidence)
        .collect();
    if tracked.is_empty() {
        return None;
    }
    Some(tracked.iter().sum::<f32>() / tracked.len() as f32)
}

fn compute_velocities(
    joints: &HashMap<JointName, crate::frame::Joint>,
    previous: &HashMap<JointName, Vec3>,
) -> HashMap<JointName, Vec3> {
    let spine_delta = match (
        joints.get(&JointName::SpineBase).map(|j| j.position),
        previous.get(&JointName::SpineBase),
    ) {
        (Some(now), Some(&prev)) => now.sub(prev),
        _ => Vec3::ZERO,
    };

    joints
        .iter()
        .filter_map(|(&name, joint)| {
            let prev = previous.get(&name)?;
            let delta = joint.position.sub(*prev).sub(spine_delta);
            Some((name, delta))
        })
        .collect()
}

fn relative_x(joints: &HashMap<JointName, crate::frame::Joint>, name: JointName) -> Option<f32> {
    let spine_x = joints.get(&JointName::SpineBase)?.position.x;
    let joint = joints.get(&name)?;
    Some(joint.position.x - spine_x)
}

fn detect_swipe(
    joints: &HashMap<JointName, crate::frame::Joint>,
    previous_relative_x: Option<f32>,
    params: &BodyParams,
) -> Option<Swipe> {
    let spine = joints.get(&JointName::SpineBase)?;
    let hand = joints.get(&JointName::HandRight)?;
    if hand.position.y <= spine.position.y {
        return None;
    }

    let relative_x = hand.position.x - spine.position.x;
    let previous = previous_relative_x?;
    let displacement = relative_x - previous;

    if displacement.abs() <= params.gesture_threshold {
        return None;
    }
    Some(if displacement < 0.0 { Swipe::Left } else { Swipe::Right })
}

#[cfg(test)]
mod test {
    use crate::frame::{HandState, Joint};

    use super::*;

    fn params() -> BodyParams {
        BodyParams {
            correction: 0.5,
            max_deviation: 0.25,
            jitter_radius: 0.03,
            velocities: true,
            bounds: true,
            confidence: true,
            gestures: true,
            gesture_threshold: 0.35,
        }
    }

    fn body_with(spine: Vec3, hand: Vec3) -> BodyRecord {
        let mut joints = HashMap::new();
        joints.insert(
            JointName::SpineBase,
            Joint {
                position: spine,
                tracking_state: TrackingState::Tracked,
                confidence: 0.9,
                previous_position: None,
            },
        );
        joints.insert(
            JointName::HandRight,
            Joint {
                position: hand,
                tracking_state: TrackingState::Tracked,
                confidence: 0.9,
                previous_position: None,
            },
        );
        BodyRecord {
            tracking_id: 1,
            tracked: true,
            joints,
            left_hand: HandState::Open,
            right_hand: HandState::Open,
        }
    }

    #[test]
    fn test_jitter_below_radius_snaps_to_previous() {
        let mut state = BodyState::default();
        let spine = Vec3::ZERO;
        let body1 = body_with(spine, Vec3 { x: 0.0, y: 0.3, z: 2.0 });
        let (payload, _) = process(&[body1], 0, &params(), &mut state).expect("first frame");
        let Payload::Body { bodies, .. } = payload else { panic!() };
        let hand_after_first = bodies[0].joints[&JointName::HandRight].position;

        let body2 = body_with(
            spine,
            Vec3 {
                x: 0.001,
                y: 0.3,
                z: 2.0,
            },
        );
        let (payload2, _) = process(&[body2], 33, &params(), &mut state).expect("second frame");
        let Payload::Body { bodies, .. } = payload2 else { panic!() };
        assert_eq!(hand_after_first, bodies[0].joints[&JointName::HandRight].position);
    }

    #[test]
    fn test_large_jump_is_clamped_to_max_deviation() {
        let mut state = BodyState::default();
        let spine = Vec3::ZERO;
        let body1 = body_with(spine, Vec3 { x: 0.0, y: 0.3, z: 2.0 });
        process(&[body1], 0, &params(), &mut state).expect("first frame");

        let body2 = body_with(spine, Vec3 { x: 5.0, y: 0.3, z: 2.0 });
        let (payload, _) = process(&[body2], 33, &params(), &mut state).expect("second frame");
        let Payload::Body { bodies, .. } = payload else { panic!() };
        let moved = bodies[0].joints[&JointName::HandRight].position;
        let delta = moved.sub(Vec3 { x: 0.0, y: 0.3, z: 2.0 }).length();
        assert!(delta <= params().max_deviation + 1e-4);
    }

    #[test]
    fn test_swipe_detected_on_large_horizontal_motion_above_spine() {
        let mut state = BodyState::default();
        let spine = Vec3::ZERO;
        let body1 = body_with(spine, Vec3 { x: 0.0, y: 0.3, z: 2.0 });
        process(&[body1], 0, &params(), &mut state).expect("first frame");

        // Feed several frames to walk the smoothed hand position far enough right,
        // since smoothing + clamping limits per-frame displacement.
        let mut swiped = None;
        for i in 1..10 {
            let body = body_with(spine, Vec3 { x: 3.0, y: 0.3, z: 2.0 });
            let (_, effects) = process(&[body], i * 33, &params(), &mut state).expect("frame");
            if let Some(SideEffect::Gesture { swipe, .. }) = effects.into_iter().next() {
                swiped = Some(swipe);
                break;
            }
        }
        assert_eq!(Some(Swipe::Right), swiped);
    }

    #[test]
    fn test_missing_joints_on_tracked_body_is_an_error() {
        let mut state = BodyState::default();
        let body = BodyRecord {
            tracking_id: 1,
            tracked: true,
            joints: HashMap::new(),
            left_hand: HandState::Unknown,
            right_hand: HandState::Unknown,
        };
        let err = process(&[body], 0, &params(), &mut state);
        assert!(matches!(err, Err(WorkerError::MissingJoints(1))));
    }
}
