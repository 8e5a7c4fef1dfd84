use criterion::{Criterion, black_box, criterion_group, criterion_main};

use meridian_core::animation::{Animation, AnimationChannel, ChannelValues, PrecomputedKeyframes};
use meridian_core::ids::{AnimationId, SkeletonId};
use meridian_core::math::{Vec3, quat_from_rotation_y};
use meridian_core::skeleton::{Joint, JointIndex, Skeleton};

/// A single chain of `joints` joints.
fn chain(joints: u32) -> Skeleton {
    let joints = (0..joints)
        .map(|i| {
            let parent = i.checked_sub(1).map(JointIndex);
            Joint::new(format!("joint_{i}"), parent)
        })
        .collect();
    Skeleton::new(SkeletonId(0), joints).unwrap()
}

/// Rotation and translation keys on every joint over one second.
fn wave(joints: u32, keys: usize) -> Animation {
    let times: Vec<f32> = (0..keys).map(|k| k as f32 / (keys - 1) as f32).collect();
    let mut channels = Vec::with_capacity(joints as usize * 2);
    for j in 0..joints {
        channels.push(AnimationChannel::new(
            JointIndex(j),
            times.clone(),
            ChannelValues::Rotation(
                times
                    .iter()
                    .map(|t| quat_from_rotation_y(t * std::f32::consts::TAU + j as f32))
                    .collect(),
            ),
        ));
        channels.push(AnimationChannel::new(
            JointIndex(j),
            times.clone(),
            ChannelValues::Translation(times.iter().map(|t| Vec3::new(0.0, 1.0 + t, 0.0)).collect()),
        ));
    }
    Animation::new(AnimationId(0), "wave", channels)
}

// ---------------------------------------------------------------------------
// Skeleton
// ---------------------------------------------------------------------------

fn bench_global_transforms(c: &mut Criterion) {
    let skeleton = chain(64);
    let pose = skeleton.bind_pose();
    c.bench_function("global_transforms_64_joints", |b| {
        b.iter(|| black_box(skeleton.global_transforms(black_box(&pose))));
    });
}

fn bench_skinning_matrices(c: &mut Criterion) {
    let skeleton = chain(64);
    let pose = skeleton.bind_pose();
    c.bench_function("skinning_matrices_64_joints", |b| {
        b.iter(|| black_box(skeleton.skinning_matrices(black_box(&pose))));
    });
}

// ---------------------------------------------------------------------------
// Animation
// ---------------------------------------------------------------------------

fn bench_sample(c: &mut Criterion) {
    let skeleton = chain(64);
    let animation = wave(64, 30);
    c.bench_function("animation_sample_64_joints", |b| {
        b.iter(|| black_box(animation.sample(&skeleton, black_box(0.37))));
    });
}

fn bench_precompute(c: &mut Criterion) {
    let skeleton = chain(32);
    let animation = wave(32, 30);
    c.bench_function("precompute_32_joints_60hz", |b| {
        b.iter(|| {
            black_box(PrecomputedKeyframes::compute(&animation, &skeleton, black_box(60.0)).unwrap())
        });
    });
}

criterion_group!(skeleton_benches, bench_global_transforms, bench_skinning_matrices);
criterion_group!(animation_benches, bench_sample, bench_precompute);
criterion_main!(skeleton_benches, animation_benches);
