//! The background animation worker.
//!
//! State is split across three locks so that the render thread only ever
//! contends on the one it reads:
//!
//! - **skeleton state**: the published per-animator skinning matrices,
//!   copied out wholesale by [`AnimationThread::get_current_skeletons`]
//! - **animation state**: skeleton and animation definitions plus live animators
//! - **pending state**: animators whose keyframes are still being precomputed
//!
//! Nested locks are always taken in that list's reverse order: pending, then
//! animation, then skeleton state. Merging finished precomputations and every
//! removal hold the outer locks across the whole operation, so an animator
//! that was disconnected, or whose skeleton or animation was removed, can not
//! be merged back in or published afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{Animation, Animator, PrecomputedKeyframes};
use crate::compute::{TaskHandle, TaskPool};
use crate::error::CoreError;
use crate::ids::{AnimationId, AnimatorId, SkeletonId};
use crate::math::Mat4;
use crate::scene::AssetUpdate;
use crate::skeleton::Skeleton;

/// Settings of the animation worker.
#[derive(Debug, Clone)]
pub struct AnimationThreadConfig {
    /// Keyframe precomputation rate in samples per second.
    pub framerate: f32,
    /// Interval at which the worker polls tasks and advances animators.
    pub tick: Duration,
    /// Number of precompute workers.
    pub pool_threads: usize,
}

impl Default for AnimationThreadConfig {
    fn default() -> Self {
        Self {
            framerate: 30.0,
            tick: Duration::from_millis(5),
            pool_threads: 2,
        }
    }
}

impl AnimationThreadConfig {
    pub fn with_framerate(mut self, framerate: f32) -> Self {
        self.framerate = framerate;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

/// The published pose of one animator.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimatedSkeleton {
    pub animator: AnimatorId,
    pub skeleton: SkeletonId,
    pub time: f32,
    pub joint_matrices: Vec<Mat4>,
}

#[derive(Default)]
struct AnimationState {
    skeletons: HashMap<SkeletonId, Arc<Skeleton>>,
    animations: HashMap<AnimationId, Arc<Animation>>,
    animators: HashMap<AnimatorId, Animator>,
}

struct PendingAnimator {
    animator: Animator,
    handle: TaskHandle<Result<PrecomputedKeyframes, CoreError>>,
}

#[derive(Default)]
struct PendingState {
    animators: Vec<PendingAnimator>,
}

struct Shared {
    skeletons: Mutex<HashMap<AnimatorId, AnimatedSkeleton>>,
    animation: Mutex<AnimationState>,
    pending: Mutex<PendingState>,
    shutdown: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            skeletons: Mutex::new(HashMap::new()),
            animation: Mutex::new(AnimationState::default()),
            pending: Mutex::new(PendingState::default()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Merge finished precomputations, advance animators and publish.
    fn step(&self, dt: f32) {
        crate::profile_scope!("animation_step");

        let mut pending = self.pending.lock();
        let mut completed = Vec::new();
        pending.animators.retain_mut(|entry| match entry.handle.try_recv() {
            Some(Ok(keyframes)) => {
                let mut animator = entry.animator.clone();
                animator.precomputed = Some(Arc::new(keyframes));
                completed.push(animator);
                false
            }
            Some(Err(e)) => {
                log::error!("Keyframe precompute for {} failed: {e}", entry.animator.id);
                false
            }
            None if entry.handle.is_finished() => {
                log::error!("Keyframe precompute for {} was lost", entry.animator.id);
                false
            }
            None => true,
        });

        let mut state = self.animation.lock();
        drop(pending);
        for animator in completed {
            // The skeleton or animation may have been removed after connect
            // validated them.
            if !state.skeletons.contains_key(&animator.skeleton)
                || !state.animations.contains_key(&animator.animation)
            {
                log::debug!("Animator {} finished after its assets were removed", animator.id);
                continue;
            }
            log::debug!("Animator {} ready", animator.id);
            state.animators.insert(animator.id, animator);
        }
        let snapshot: HashMap<AnimatorId, AnimatedSkeleton> = state
            .animators
            .values_mut()
            .filter_map(|animator| {
                animator.advance(dt);
                let matrices = animator.current_matrices()?.to_vec();
                Some((
                    animator.id,
                    AnimatedSkeleton {
                        animator: animator.id,
                        skeleton: animator.skeleton,
                        time: animator.time,
                        joint_matrices: matrices,
                    },
                ))
            })
            .collect();

        *self.skeletons.lock() = snapshot;
    }

    /// Drop pending and live animators matching `predicate`, plus their poses.
    fn drop_animators(&self, state: &mut AnimationState, predicate: impl Fn(&Animator) -> bool) {
        let mut skeletons = self.skeletons.lock();
        state.animators.retain(|id, animator| {
            let dropped = predicate(animator);
            if dropped {
                skeletons.remove(id);
            }
            !dropped
        });
    }

    fn remove_skeleton(&self, id: SkeletonId) {
        let mut pending = self.pending.lock();
        let mut state = self.animation.lock();
        if state.skeletons.remove(&id).is_none() {
            log::warn!("Removing unknown skeleton {id}");
            return;
        }
        pending.animators.retain(|p| p.animator.skeleton != id);
        drop(pending);
        self.drop_animators(&mut state, |a| a.skeleton == id);
    }

    fn remove_animation(&self, id: AnimationId) {
        let mut pending = self.pending.lock();
        let mut state = self.animation.lock();
        if state.animations.remove(&id).is_none() {
            log::warn!("Removing unknown animation {id}");
            return;
        }
        pending.animators.retain(|p| p.animator.animation != id);
        drop(pending);
        self.drop_animators(&mut state, |a| a.animation == id);
    }

    fn disconnect(&self, id: AnimatorId) {
        let mut pending = self.pending.lock();
        let mut state = self.animation.lock();
        pending.animators.retain(|p| p.animator.id != id);
        drop(pending);
        self.drop_animators(&mut state, |a| a.id == id);
    }
}

/// Dedicated thread that owns skeletal animation state.
///
/// Dropping the handle stops and joins the worker.
pub struct AnimationThread {
    shared: Arc<Shared>,
    pool: TaskPool,
    framerate: f32,
    worker: Option<JoinHandle<()>>,
}

impl AnimationThread {
    /// Start the worker and its precompute pool.
    pub fn spawn(config: AnimationThreadConfig) -> Result<Self, CoreError> {
        if !(config.framerate.is_finite() && config.framerate > 0.0) {
            return Err(CoreError::InvalidSampleRate(config.framerate.to_string()));
        }

        let pool = TaskPool::new(config.pool_threads)?;
        let shared = Arc::new(Shared::new());
        let worker_shared = Arc::clone(&shared);
        let tick = config.tick;

        let worker = std::thread::Builder::new()
            .name("meridian-animation".into())
            .spawn(move || {
                let mut last = Instant::now();
                while !worker_shared.shutdown.load(Ordering::Acquire) {
                    std::thread::sleep(tick);
                    let now = Instant::now();
                    worker_shared.step(now.duration_since(last).as_secs_f32());
                    last = now;
                }
            })
            .map_err(|e| CoreError::ThreadSpawn(e.to_string()))?;

        log::info!(
            "Animation thread started (framerate {}, tick {:?})",
            config.framerate,
            config.tick
        );
        Ok(Self {
            shared,
            pool,
            framerate: config.framerate,
            worker: Some(worker),
        })
    }

    /// Copy of the most recently published poses.
    pub fn get_current_skeletons(&self) -> HashMap<AnimatorId, AnimatedSkeleton> {
        self.shared.skeletons.lock().clone()
    }

    pub fn add_skeleton(&self, skeleton: Skeleton) {
        let mut state = self.shared.animation.lock();
        state.skeletons.insert(skeleton.id(), Arc::new(skeleton));
    }

    pub fn add_animation(&self, animation: Animation) {
        let mut state = self.shared.animation.lock();
        state.animations.insert(animation.id, Arc::new(animation));
    }

    /// Remove a skeleton together with every animator driving it, pending
    /// ones included.
    pub fn remove_skeleton(&self, id: SkeletonId) {
        self.shared.remove_skeleton(id);
    }

    /// Remove an animation together with every animator playing it, pending
    /// ones included.
    pub fn remove_animation(&self, id: AnimationId) {
        self.shared.remove_animation(id);
    }

    /// Apply the skeleton and animation parts of an update batch.
    pub fn apply_update(&self, update: AssetUpdate) {
        for id in update.removed_animations {
            self.remove_animation(id);
        }
        for id in update.removed_skeletons {
            self.remove_skeleton(id);
        }
        for skeleton in update.added_skeletons {
            self.add_skeleton(skeleton);
        }
        for animation in update.added_animations {
            self.add_animation(animation);
        }
    }

    /// Bind an animator to its skeleton and animation.
    ///
    /// Keyframe precomputation is submitted to the task pool; the animator
    /// starts publishing once the worker has merged the result.
    pub fn connect(&self, animator: Animator) -> Result<(), CoreError> {
        let (animation, skeleton) = {
            let state = self.shared.animation.lock();
            let animation = state
                .animations
                .get(&animator.animation)
                .cloned()
                .ok_or(CoreError::UnknownAnimation(animator.animation))?;
            let skeleton = state
                .skeletons
                .get(&animator.skeleton)
                .cloned()
                .ok_or(CoreError::UnknownSkeleton(animator.skeleton))?;
            (animation, skeleton)
        };

        let framerate = self.framerate;
        let handle = self
            .pool
            .spawn(move || PrecomputedKeyframes::compute(&animation, &skeleton, framerate));

        log::debug!("Animator {} queued for precompute", animator.id);
        self.shared
            .pending
            .lock()
            .animators
            .push(PendingAnimator { animator, handle });
        Ok(())
    }

    /// Stop an animator, whether live or still precomputing.
    pub fn disconnect(&self, id: AnimatorId) {
        self.shared.disconnect(id);
    }

    /// Animators whose precomputation has not been merged yet.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().animators.len()
    }

    pub fn animator_count(&self) -> usize {
        self.shared.animation.lock().animators.len()
    }
}

impl Drop for AnimationThread {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            log::error!("Animation thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{AnimationChannel, ChannelValues};
    use crate::math::Vec3;
    use crate::skeleton::{Joint, JointIndex};

    fn skeleton() -> Skeleton {
        Skeleton::new(SkeletonId(1), vec![Joint::new("root", None)]).unwrap()
    }

    fn animation() -> Animation {
        Animation::new(
            AnimationId(2),
            "bob",
            vec![AnimationChannel::new(
                JointIndex(0),
                vec![0.0, 1.0],
                ChannelValues::Translation(vec![Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0)]),
            )],
        )
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_connect_publishes_snapshot() {
        let thread = AnimationThread::spawn(AnimationThreadConfig::default()).unwrap();
        thread.add_skeleton(skeleton());
        thread.add_animation(animation());
        thread
            .connect(Animator::new(AnimatorId(9), SkeletonId(1), AnimationId(2)))
            .unwrap();

        assert!(wait_for(|| thread.get_current_skeletons().contains_key(&AnimatorId(9))));
        let snapshot = thread.get_current_skeletons();
        let pose = &snapshot[&AnimatorId(9)];
        assert_eq!(pose.skeleton, SkeletonId(1));
        assert_eq!(pose.joint_matrices.len(), 1);
        assert_eq!(thread.pending_count(), 0);
    }

    #[test]
    fn test_connect_unknown_ids() {
        let thread = AnimationThread::spawn(AnimationThreadConfig::default()).unwrap();
        thread.add_animation(animation());
        let err = thread
            .connect(Animator::new(AnimatorId(0), SkeletonId(1), AnimationId(2)))
            .unwrap_err();
        assert_eq!(err, CoreError::UnknownSkeleton(SkeletonId(1)));

        let err = thread
            .connect(Animator::new(AnimatorId(0), SkeletonId(1), AnimationId(7)))
            .unwrap_err();
        assert_eq!(err, CoreError::UnknownAnimation(AnimationId(7)));
    }

    #[test]
    fn test_remove_skeleton_drops_animators() {
        let thread = AnimationThread::spawn(AnimationThreadConfig::default()).unwrap();
        let update = AssetUpdate::new()
            .with_skeleton(skeleton())
            .with_animation(animation());
        thread.apply_update(update);
        thread
            .connect(Animator::new(AnimatorId(3), SkeletonId(1), AnimationId(2)))
            .unwrap();
        assert!(wait_for(|| thread.animator_count() == 1));

        thread.remove_skeleton(SkeletonId(1));
        assert_eq!(thread.animator_count(), 0);
        assert!(wait_for(|| thread.get_current_skeletons().is_empty()));
    }

    fn shared_with_assets() -> Shared {
        let shared = Shared::new();
        {
            let mut state = shared.animation.lock();
            state.skeletons.insert(SkeletonId(1), Arc::new(skeleton()));
            state.animations.insert(AnimationId(2), Arc::new(animation()));
        }
        shared
    }

    /// Queue an animator whose precompute has already delivered its result.
    fn push_finished(shared: &Shared, id: AnimatorId) {
        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(PrecomputedKeyframes::compute(&animation(), &skeleton(), 10.0))
            .unwrap();
        shared.pending.lock().animators.push(PendingAnimator {
            animator: Animator::new(id, SkeletonId(1), AnimationId(2)),
            handle: TaskHandle::new(rx),
        });
    }

    #[test]
    fn test_finished_precompute_merged_once_assets_exist() {
        let shared = shared_with_assets();
        push_finished(&shared, AnimatorId(1));
        shared.step(0.1);
        assert_eq!(shared.animation.lock().animators.len(), 1);
        assert!(shared.skeletons.lock().contains_key(&AnimatorId(1)));
    }

    #[test]
    fn test_disconnect_drops_finished_precompute() {
        let shared = shared_with_assets();
        push_finished(&shared, AnimatorId(1));
        shared.disconnect(AnimatorId(1));
        shared.step(0.1);
        assert!(shared.animation.lock().animators.is_empty());
        assert!(shared.skeletons.lock().is_empty());
    }

    #[test]
    fn test_removed_assets_drop_pending_animators() {
        let shared = shared_with_assets();
        push_finished(&shared, AnimatorId(1));
        shared.remove_skeleton(SkeletonId(1));
        assert!(shared.pending.lock().animators.is_empty());

        let shared = shared_with_assets();
        push_finished(&shared, AnimatorId(2));
        shared.remove_animation(AnimationId(2));
        shared.step(0.1);
        assert!(shared.animation.lock().animators.is_empty());
        assert!(shared.skeletons.lock().is_empty());
    }

    #[test]
    fn test_merge_skips_animator_whose_skeleton_vanished() {
        let shared = shared_with_assets();
        push_finished(&shared, AnimatorId(1));
        // Removed behind the pending queue's back, as a connect racing a
        // removal would leave it.
        shared.animation.lock().skeletons.remove(&SkeletonId(1));
        shared.step(0.1);
        assert!(shared.pending.lock().animators.is_empty());
        assert!(shared.animation.lock().animators.is_empty());
        assert!(shared.skeletons.lock().is_empty());
    }

    #[test]
    fn test_remove_skeleton_unpublishes_immediately() {
        let shared = shared_with_assets();
        push_finished(&shared, AnimatorId(1));
        shared.step(0.1);
        assert_eq!(shared.skeletons.lock().len(), 1);

        shared.remove_skeleton(SkeletonId(1));
        assert!(shared.skeletons.lock().is_empty());
        assert!(shared.animation.lock().animators.is_empty());
    }

    #[test]
    fn test_step_without_thread() {
        let shared = Shared::new();
        let pre = PrecomputedKeyframes::compute(&animation(), &skeleton(), 10.0).unwrap();
        let mut animator = Animator::new(AnimatorId(4), SkeletonId(1), AnimationId(2));
        animator.precomputed = Some(Arc::new(pre));
        shared.animation.lock().animators.insert(animator.id, animator);

        shared.step(0.5);
        let published = shared.skeletons.lock().clone();
        let pose = &published[&AnimatorId(4)];
        assert!((pose.time - 0.5).abs() < 1.0e-5);
        assert!((pose.joint_matrices[0][(1, 3)] - 0.5).abs() < 1.0e-4);
    }
}
