//! Core error types.

use thiserror::Error;

use crate::ids::{AnimationId, SkeletonId};

/// Errors raised by the CPU-side asset and animation layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A skeleton joint referenced a parent that does not exist.
    #[error("joint {joint} references missing parent {parent}")]
    InvalidJointParent { joint: usize, parent: usize },
    /// A skeleton has more than one root joint or none at all.
    #[error("skeleton must have exactly one root joint, found {0}")]
    InvalidRootCount(usize),
    /// The parent links of a skeleton contain a cycle.
    #[error("skeleton joint hierarchy contains a cycle")]
    CyclicHierarchy,
    /// A skeleton id was not known to the animation thread.
    #[error("unknown skeleton {0:?}")]
    UnknownSkeleton(SkeletonId),
    /// An animation id was not known to the animation thread.
    #[error("unknown animation {0:?}")]
    UnknownAnimation(AnimationId),
    /// The sample rate used for keyframe precomputation was not positive.
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(String),
    /// The background worker could not be started.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidRootCount(2);
        assert_eq!(
            err.to_string(),
            "skeleton must have exactly one root joint, found 2"
        );

        let err = CoreError::InvalidJointParent { joint: 3, parent: 9 };
        assert_eq!(err.to_string(), "joint 3 references missing parent 9");
    }
}
