use std::sync::Arc;

use super::Animation;
use crate::error::CoreError;
use crate::ids::{AnimationId, AnimatorId, SkeletonId};
use crate::math::Mat4;
use crate::skeleton::{Skeleton, SkeletonPose};

/// Skinning matrices of one clip sampled at a fixed rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecomputedKeyframes {
    pub animation: AnimationId,
    pub skeleton: SkeletonId,
    pub framerate: f32,
    /// Clip length in seconds.
    pub duration: f32,
    /// One entry per sample, each holding one matrix per joint.
    pub frames: Vec<Vec<Mat4>>,
}

impl PrecomputedKeyframes {
    /// Sample `animation` every `1 / framerate` seconds from zero up to its
    /// max timestamp, both ends included.
    pub fn compute(
        animation: &Animation,
        skeleton: &Skeleton,
        framerate: f32,
    ) -> Result<Self, CoreError> {
        if !(framerate.is_finite() && framerate > 0.0) {
            return Err(CoreError::InvalidSampleRate(framerate.to_string()));
        }

        let duration = animation.max_timestamp.max(0.0);
        let count = (duration * framerate).floor() as usize + 1;
        let frames = (0..count)
            .map(|i| {
                let pose = animation.sample(skeleton, i as f32 / framerate);
                skeleton.skinning_matrices(&pose)
            })
            .collect();

        Ok(Self {
            animation: animation.id,
            skeleton: skeleton.id(),
            framerate,
            duration,
            frames,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// The sample at or just before `time`, clamped to the clip.
    pub fn frame_at(&self, time: f32) -> &[Mat4] {
        let last = self.frames.len().saturating_sub(1);
        let index = ((time.max(0.0) * self.framerate) as usize).min(last);
        self.frames.get(index).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Playback state binding an animation to a skeleton.
#[derive(Debug, Clone)]
pub struct Animator {
    pub id: AnimatorId,
    pub skeleton: SkeletonId,
    pub animation: AnimationId,
    pub time: f32,
    pub speed: f32,
    pub looping: bool,
    pub precomputed: Option<Arc<PrecomputedKeyframes>>,
}

impl Animator {
    pub fn new(id: AnimatorId, skeleton: SkeletonId, animation: AnimationId) -> Self {
        Self {
            id,
            skeleton,
            animation,
            time: 0.0,
            speed: 1.0,
            looping: true,
            precomputed: None,
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Advance playback by `dt` seconds of wall time.
    pub fn advance(&mut self, dt: f32) {
        let duration = self.precomputed.as_ref().map_or(0.0, |p| p.duration);
        self.time += dt * self.speed;
        if duration <= 0.0 {
            self.time = 0.0;
        } else if self.looping {
            self.time = self.time.rem_euclid(duration);
        } else {
            self.time = self.time.clamp(0.0, duration);
        }
    }

    /// Current skinning matrices, or `None` before precomputation finished.
    pub fn current_matrices(&self) -> Option<&[Mat4]> {
        self.precomputed.as_ref().map(|p| p.frame_at(self.time))
    }

    /// Sample the clip directly, bypassing the precomputed frames.
    pub fn sample_pose(&self, animation: &Animation, skeleton: &Skeleton) -> SkeletonPose {
        animation.sample(skeleton, self.time)
    }
}
