//! Arena-indexed joint hierarchies.
//!
//! A [`Skeleton`] stores its joints in a flat `Vec`; parent and child links are
//! [`JointIndex`] values into that vector. Joint order in the arena is
//! arbitrary; global transforms are computed by walking down from the root.

use crate::error::CoreError;
use crate::ids::SkeletonId;
use crate::math::{Mat4, Quat, Vec3, mat4_from_scale_rotation_translation, quat_identity};

/// Index of a joint inside its skeleton's joint arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JointIndex(pub u32);

impl JointIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Local translation/rotation/scale of a joint relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl JointTransform {
    pub fn to_matrix(&self) -> Mat4 {
        mat4_from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for JointTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::zeros(),
            rotation: quat_identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

/// A single joint.
#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub name: String,
    pub parent: Option<JointIndex>,
    pub children: Vec<JointIndex>,
    /// Bind-pose local transform.
    pub local: JointTransform,
    pub inverse_bind: Mat4,
}

impl Joint {
    pub fn new(name: impl Into<String>, parent: Option<JointIndex>) -> Self {
        Self {
            name: name.into(),
            parent,
            children: Vec::new(),
            local: JointTransform::default(),
            inverse_bind: Mat4::identity(),
        }
    }

    pub fn with_local(mut self, local: JointTransform) -> Self {
        self.local = local;
        self
    }

    pub fn with_inverse_bind(mut self, inverse_bind: Mat4) -> Self {
        self.inverse_bind = inverse_bind;
        self
    }
}

/// A validated joint hierarchy with exactly one root.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    id: SkeletonId,
    joints: Vec<Joint>,
    root: JointIndex,
}

impl Skeleton {
    /// Build a skeleton from joints whose `parent` links are set.
    ///
    /// Children lists are rebuilt from the parent links. Fails when a parent
    /// index is out of range, when there is not exactly one root, or when the
    /// parent links form a cycle.
    pub fn new(id: SkeletonId, mut joints: Vec<Joint>) -> Result<Self, CoreError> {
        let count = joints.len();
        let mut roots = Vec::new();
        for (i, joint) in joints.iter().enumerate() {
            match joint.parent {
                Some(parent) if parent.index() >= count || parent.index() == i => {
                    return Err(CoreError::InvalidJointParent {
                        joint: i,
                        parent: parent.index(),
                    });
                }
                Some(_) => {}
                None => roots.push(JointIndex(i as u32)),
            }
        }
        if roots.len() != 1 {
            return Err(CoreError::InvalidRootCount(roots.len()));
        }
        let root = roots[0];

        for joint in &mut joints {
            joint.children.clear();
        }
        for i in 0..count {
            if let Some(parent) = joints[i].parent {
                joints[parent.index()].children.push(JointIndex(i as u32));
            }
        }

        let skeleton = Self { id, joints, root };
        if skeleton.traversal_order().len() != count {
            return Err(CoreError::CyclicHierarchy);
        }
        Ok(skeleton)
    }

    pub fn id(&self) -> SkeletonId {
        self.id
    }

    pub fn root(&self) -> JointIndex {
        self.root
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn joint(&self, index: JointIndex) -> Option<&Joint> {
        self.joints.get(index.index())
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn find_joint(&self, name: &str) -> Option<JointIndex> {
        self.joints
            .iter()
            .position(|j| j.name == name)
            .map(|i| JointIndex(i as u32))
    }

    /// Joints reachable from the root, parents before children.
    pub fn traversal_order(&self) -> Vec<JointIndex> {
        let mut order = Vec::with_capacity(self.joints.len());
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            order.push(index);
            if let Some(joint) = self.joint(index) {
                stack.extend(joint.children.iter().rev().copied());
            }
        }
        order
    }

    /// The bind pose of this skeleton.
    pub fn bind_pose(&self) -> SkeletonPose {
        SkeletonPose {
            skeleton: self.id,
            locals: self.joints.iter().map(|j| j.local).collect(),
        }
    }

    /// Model-space transform of every joint for the given pose.
    ///
    /// Joints missing from `pose` use their bind-pose local transform.
    pub fn global_transforms(&self, pose: &SkeletonPose) -> Vec<Mat4> {
        let mut globals = vec![Mat4::identity(); self.joints.len()];
        for index in self.traversal_order() {
            let i = index.index();
            let local = pose
                .locals
                .get(i)
                .copied()
                .unwrap_or(self.joints[i].local)
                .to_matrix();
            globals[i] = match self.joints[i].parent {
                Some(parent) => globals[parent.index()] * local,
                None => local,
            };
        }
        globals
    }

    /// Skinning matrices (`global * inverse_bind`) for the given pose.
    pub fn skinning_matrices(&self, pose: &SkeletonPose) -> Vec<Mat4> {
        self.global_transforms(pose)
            .into_iter()
            .zip(&self.joints)
            .map(|(global, joint)| global * joint.inverse_bind)
            .collect()
    }
}

/// Per-joint local transforms of one skeleton at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonPose {
    pub skeleton: SkeletonId,
    pub locals: Vec<JointTransform>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Skeleton {
        let t = |x: f32| JointTransform {
            translation: Vec3::new(x, 0.0, 0.0),
            ..JointTransform::default()
        };
        Skeleton::new(
            SkeletonId(1),
            vec![
                Joint::new("root", None).with_local(t(1.0)),
                Joint::new("spine", Some(JointIndex(0))).with_local(t(2.0)),
                Joint::new("head", Some(JointIndex(1))).with_local(t(3.0)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_children_rebuilt() {
        let skeleton = chain();
        assert_eq!(skeleton.root(), JointIndex(0));
        assert_eq!(skeleton.joints()[0].children, vec![JointIndex(1)]);
        assert_eq!(skeleton.joints()[1].children, vec![JointIndex(2)]);
        assert_eq!(skeleton.find_joint("head"), Some(JointIndex(2)));
    }

    #[test]
    fn test_global_transforms_accumulate() {
        let skeleton = chain();
        let globals = skeleton.global_transforms(&skeleton.bind_pose());
        assert!((globals[2][(0, 3)] - 6.0).abs() < 1.0e-5);
        assert!((globals[1][(0, 3)] - 3.0).abs() < 1.0e-5);
    }

    #[test]
    fn test_rejects_two_roots() {
        let result = Skeleton::new(
            SkeletonId(0),
            vec![Joint::new("a", None), Joint::new("b", None)],
        );
        assert_eq!(result, Err(CoreError::InvalidRootCount(2)));
    }

    #[test]
    fn test_rejects_missing_parent() {
        let result = Skeleton::new(
            SkeletonId(0),
            vec![Joint::new("a", None), Joint::new("b", Some(JointIndex(7)))],
        );
        assert_eq!(
            result,
            Err(CoreError::InvalidJointParent { joint: 1, parent: 7 })
        );
    }

    #[test]
    fn test_rejects_cycle() {
        let result = Skeleton::new(
            SkeletonId(0),
            vec![
                Joint::new("root", None),
                Joint::new("a", Some(JointIndex(2))),
                Joint::new("b", Some(JointIndex(1))),
            ],
        );
        assert_eq!(result, Err(CoreError::CyclicHierarchy));
    }
}
