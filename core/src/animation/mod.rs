//! Skeletal animation clips and the background animation thread.
//!
//! An [`Animation`] is a set of keyframe channels, each driving one property
//! of one joint. Sampling a clip produces a [`SkeletonPose`]. Because sampling
//! every channel every frame is comparatively expensive, animators are driven
//! from [`PrecomputedKeyframes`] built on a [`TaskPool`](crate::compute::TaskPool)
//! and owned by the [`AnimationThread`].

mod precompute;
mod thread;

pub use precompute::{Animator, PrecomputedKeyframes};
pub use thread::{AnimatedSkeleton, AnimationThread, AnimationThreadConfig};

use crate::ids::AnimationId;
use crate::math::{Quat, Vec3, quat_slerp, vec3_lerp};
use crate::skeleton::{JointIndex, Skeleton, SkeletonPose};

/// Keyframe values of one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelValues {
    Translation(Vec<Vec3>),
    Rotation(Vec<Quat>),
    Scale(Vec<Vec3>),
}

impl ChannelValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Translation(v) | Self::Scale(v) => v.len(),
            Self::Rotation(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keyframes for a single property of a single joint.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationChannel {
    pub joint: JointIndex,
    /// Ascending keyframe times in seconds.
    pub timestamps: Vec<f32>,
    pub values: ChannelValues,
}

impl AnimationChannel {
    pub fn new(joint: JointIndex, timestamps: Vec<f32>, values: ChannelValues) -> Self {
        Self {
            joint,
            timestamps,
            values,
        }
    }

    /// Locate the keyframe pair around `time` and the blend factor between them.
    ///
    /// Times before the first key clamp to the first key, times after the last
    /// key clamp to the last.
    fn segment(&self, time: f32) -> Option<(usize, usize, f32)> {
        let count = self.timestamps.len().min(self.values.len());
        if count == 0 {
            return None;
        }
        let next = self.timestamps[..count].partition_point(|&t| t <= time);
        if next == 0 {
            return Some((0, 0, 0.0));
        }
        if next >= count {
            return Some((count - 1, count - 1, 0.0));
        }
        let prev = next - 1;
        let span = self.timestamps[next] - self.timestamps[prev];
        let factor = if span > 0.0 {
            (time - self.timestamps[prev]) / span
        } else {
            0.0
        };
        Some((prev, next, factor))
    }
}

/// A named animation clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Animation {
    pub id: AnimationId,
    pub name: String,
    pub channels: Vec<AnimationChannel>,
    /// Time of the last keyframe across all channels.
    pub max_timestamp: f32,
}

impl Animation {
    pub fn new(id: AnimationId, name: impl Into<String>, channels: Vec<AnimationChannel>) -> Self {
        let max_timestamp = channels
            .iter()
            .filter_map(|c| c.timestamps.last().copied())
            .fold(0.0f32, f32::max);
        Self {
            id,
            name: name.into(),
            channels,
            max_timestamp,
        }
    }

    /// Sample the clip at `time` on top of the skeleton's bind pose.
    ///
    /// Channels targeting joints the skeleton does not have are ignored.
    pub fn sample(&self, skeleton: &Skeleton, time: f32) -> SkeletonPose {
        let mut pose = skeleton.bind_pose();
        for channel in &self.channels {
            let Some(local) = pose.locals.get_mut(channel.joint.index()) else {
                continue;
            };
            let Some((a, b, t)) = channel.segment(time) else {
                continue;
            };
            match &channel.values {
                ChannelValues::Translation(v) => local.translation = vec3_lerp(&v[a], &v[b], t),
                ChannelValues::Rotation(v) => local.rotation = quat_slerp(v[a], v[b], t),
                ChannelValues::Scale(v) => local.scale = vec3_lerp(&v[a], &v[b], t),
            }
        }
        pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SkeletonId;
    use crate::skeleton::Joint;

    fn skeleton() -> Skeleton {
        Skeleton::new(
            SkeletonId(0),
            vec![Joint::new("root", None), Joint::new("arm", Some(JointIndex(0)))],
        )
        .unwrap()
    }

    fn slide() -> Animation {
        Animation::new(
            AnimationId(0),
            "slide",
            vec![AnimationChannel::new(
                JointIndex(1),
                vec![0.0, 1.0, 2.0],
                ChannelValues::Translation(vec![
                    Vec3::new(0.0, 0.0, 0.0),
                    Vec3::new(2.0, 0.0, 0.0),
                    Vec3::new(2.0, 4.0, 0.0),
                ]),
            )],
        )
    }

    #[test]
    fn test_max_timestamp() {
        assert_eq!(slide().max_timestamp, 2.0);
        assert_eq!(Animation::new(AnimationId(1), "empty", vec![]).max_timestamp, 0.0);
    }

    #[test]
    fn test_sample_interpolates() {
        let pose = slide().sample(&skeleton(), 0.5);
        assert_eq!(pose.locals[1].translation, Vec3::new(1.0, 0.0, 0.0));
        let pose = slide().sample(&skeleton(), 1.5);
        assert_eq!(pose.locals[1].translation, Vec3::new(2.0, 2.0, 0.0));
    }

    #[test]
    fn test_sample_clamps() {
        let anim = slide();
        let skel = skeleton();
        assert_eq!(anim.sample(&skel, -1.0).locals[1].translation, Vec3::zeros());
        assert_eq!(
            anim.sample(&skel, 10.0).locals[1].translation,
            Vec3::new(2.0, 4.0, 0.0)
        );
    }

    #[test]
    fn test_unknown_joint_ignored() {
        let anim = Animation::new(
            AnimationId(2),
            "bad",
            vec![AnimationChannel::new(
                JointIndex(9),
                vec![0.0],
                ChannelValues::Scale(vec![Vec3::new(2.0, 2.0, 2.0)]),
            )],
        );
        let skel = skeleton();
        assert_eq!(anim.sample(&skel, 0.0), skel.bind_pose());
    }
}
