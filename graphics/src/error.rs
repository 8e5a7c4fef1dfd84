//! Graphics error types.

use meridian_core::CoreError;
use thiserror::Error;

use crate::graph::GraphError;

/// Errors that can occur in the graphics system.
///
/// Only device and API failures travel as errors. Resource exhaustion inside
/// the fat buffers or the staging budget is a normal outcome and is reported
/// through invalid handles and deferred work instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    /// Failed to create a resource.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// Failed to create a pipeline.
    #[error("pipeline creation failed: {0}")]
    PipelineCreationFailed(String),
    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,
    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A handle did not refer to a live object of this context.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
    /// Command submission failed.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors surfaced by the [`Renderer`](crate::renderer::Renderer) facade.
#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Graphics(#[from] GraphicsError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("animation: {0}")]
    Animation(#[from] CoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::InitializationFailed("no GPU found".to_string());
        assert_eq!(err.to_string(), "initialization failed: no GPU found");

        let err = GraphicsError::InvalidHandle("BufferHandle(3)".to_string());
        assert_eq!(err.to_string(), "invalid handle: BufferHandle(3)");
    }

    #[test]
    fn test_renderer_error_wraps_sources() {
        let err = RendererError::from(GraphicsError::DeviceLost);
        assert_eq!(err.to_string(), "GPU device lost");

        let err = RendererError::from(GraphError::CyclicDependency);
        assert!(matches!(err, RendererError::Graph(_)));
    }
}
