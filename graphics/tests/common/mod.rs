//! Common utilities for integration tests.
//!
//! Tests are parameterized over [`Backend`]. A backend that is not compiled
//! in or finds no usable device yields no context and the test returns early.

use meridian_core::ids::{MeshId, TextureId};
use meridian_core::scene::{Mesh, Texture, TextureDataFormat, Vertex};
use meridian_graphics::RenderContext;
use meridian_graphics::backend::RecordingContext;
use meridian_graphics::resources::{BindlessTable, FatBuffer, StagingBuffer};
use meridian_graphics::types::BufferUsage;
use meridian_graphics::upload::{UploadEvent, UploadQueue, UploadReport, UploadTargets};

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Render contexts available for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// In-memory context that records commands.
    Recording,
    /// Native Vulkan context (headless).
    Vulkan,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Recording => true,
            #[cfg(feature = "vulkan-backend")]
            Backend::Vulkan => true,
            #[cfg(not(feature = "vulkan-backend"))]
            Backend::Vulkan => false,
        }
    }

    #[allow(dead_code)]
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Recording => "recording",
            Backend::Vulkan => "vulkan",
        }
    }

    /// Create a context, or `None` when the backend cannot run here.
    pub fn create_context(self) -> Option<Box<dyn RenderContext>> {
        init_logging();
        if !self.is_available() {
            return None;
        }
        match self {
            Backend::Recording => Some(Box::new(RecordingContext::new())),
            Backend::Vulkan => create_vulkan(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
fn create_vulkan() -> Option<Box<dyn RenderContext>> {
    match meridian_graphics::backend::VulkanContext::with_params(false, 2) {
        Ok(ctx) => Some(Box::new(ctx)),
        Err(e) => {
            eprintln!("Skipping Vulkan test: {e}");
            None
        }
    }
}

#[cfg(not(feature = "vulkan-backend"))]
fn create_vulkan() -> Option<Box<dyn RenderContext>> {
    None
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Asset Helpers
// ============================================================================

/// A mesh of `vertices * 80 + indices * 4` bytes.
pub fn mesh(id: u64, vertices: usize, indices: usize) -> Mesh {
    Mesh::new(
        MeshId(id),
        vec![Vertex::from_position([0.0, 0.0, 0.0]); vertices],
        (0..indices as u32).collect(),
    )
}

/// An opaque white RGBA8 texture.
#[allow(dead_code)]
pub fn texture(id: u64, width: u32, height: u32) -> Texture {
    Texture::new(
        TextureId(id),
        format!("texture_{id}"),
        width,
        height,
        TextureDataFormat::Rgba8Unorm,
        vec![255; (width * height * 4) as usize],
    )
}

// ============================================================================
// Upload Fixture
// ============================================================================

/// Staging buffer, fat buffers and bindless table on one context.
#[allow(dead_code)]
pub struct UploadFixture {
    pub ctx: Box<dyn RenderContext>,
    pub staging: Option<StagingBuffer>,
    pub vertices: Option<FatBuffer>,
    pub indices: Option<FatBuffer>,
    pub bindless: BindlessTable,
}

#[allow(dead_code)]
impl UploadFixture {
    pub fn new(backend: Backend, staging_size: u64, fat_size: u64) -> Option<Self> {
        let mut ctx = backend.create_context()?;
        let staging = StagingBuffer::new(ctx.as_mut(), staging_size, "upload").ok()?;
        let vertices =
            FatBuffer::new(ctx.as_mut(), "vertices", fat_size, BufferUsage::VERTEX).ok()?;
        let indices = FatBuffer::new(ctx.as_mut(), "indices", fat_size, BufferUsage::INDEX).ok()?;
        Some(Self {
            ctx,
            staging: Some(staging),
            vertices: Some(vertices),
            indices: Some(indices),
            bindless: BindlessTable::new(16),
        })
    }

    /// Run one upload pass inside its own frame.
    pub fn run(&mut self, queue: &mut UploadQueue) -> (UploadReport, Vec<UploadEvent>) {
        let (Some(staging), Some(vertices), Some(indices)) =
            (&mut self.staging, &mut self.vertices, &mut self.indices)
        else {
            panic!("fixture already destroyed");
        };

        let mut events = Vec::new();
        let cmd = self.ctx.begin_frame().expect("begin_frame");
        let report = queue.execute(
            self.ctx.as_mut(),
            cmd,
            UploadTargets {
                staging,
                vertices,
                indices,
                bindless: &mut self.bindless,
            },
            &mut |event| events.push(event),
        );
        self.ctx.end_frame(cmd).expect("end_frame");
        (report, events)
    }
}

impl Drop for UploadFixture {
    fn drop(&mut self) {
        for (_, image) in self.bindless.iter().collect::<Vec<_>>() {
            self.ctx.destroy_image(image);
        }
        if let Some(staging) = self.staging.take() {
            staging.destroy(self.ctx.as_mut());
        }
        if let Some(vertices) = self.vertices.take() {
            vertices.destroy(self.ctx.as_mut());
        }
        if let Some(indices) = self.indices.take() {
            indices.destroy(self.ctx.as_mut());
        }
    }
}

/// Mesh ids of the mesh events, in order.
#[allow(dead_code)]
pub fn mesh_ids(events: &[UploadEvent]) -> Vec<MeshId> {
    events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::Mesh(m) => Some(m.mesh),
            UploadEvent::Texture(_) => None,
        })
        .collect()
}
