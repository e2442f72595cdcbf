//! Error types for the render core.
//!
//! Each subsystem has its own `thiserror` enum; [`RenderError`] wraps them for
//! callers that only care that *something* in the render path failed. Nothing in
//! this crate panics across the rendering boundary: every failure is a value.

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a [`crate::device::GpuDevice`] implementation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Object allocation failed: {0}")]
    AllocationFailed(String),
    #[error("Framebuffer incomplete: status 0x{0:x}")]
    IncompleteFramebuffer(u32),
    #[error("Shader compilation failed ({stage}): {log}")]
    ShaderCompile { stage: &'static str, log: String },
    #[error("Shader program linking failed: {0}")]
    ProgramLink(String),
    #[error("Unknown object handle: {0}")]
    InvalidHandle(String),
    #[error("Operation unsupported by the device: {0}")]
    Unsupported(&'static str),
    #[error("Platform error 0x{code:x} during {operation}")]
    Platform { operation: &'static str, code: u32 },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TextureError {
    #[error("Texture dimensions {width}x{height} are invalid")]
    InvalidSize { width: i32, height: i32 },
    #[error("Texture allocation failed: {0}")]
    AllocationFailed(#[source] DeviceError),
    #[error("Pixel data is too short: need {needed} bytes, got {got}")]
    ShortData { needed: usize, got: usize },
    #[error("Source rectangle lies outside the image")]
    SourceOutOfBounds,
    #[error("Foreign textures are read-only")]
    ForeignTexture,
    #[error("Texture geometry upload failed: {0}")]
    Geometry(#[from] BufferError),
    #[error("Texture operation failed: {0}")]
    Device(#[from] DeviceError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BufferError {
    #[error("Buffer storage allocation failed: {0}")]
    AllocationFailed(#[source] DeviceError),
    #[error("Buffer could not be mapped")]
    MapFailed,
    #[error("Buffer is already mapped")]
    AlreadyMapped,
    #[error("Buffer is not mapped")]
    NotMapped,
    #[error("GPU fence wait timed out after {0:?}")]
    FenceTimeout(Duration),
    #[error("GPU fence wait failed")]
    FenceWaitFailed,
    #[error("Requested {requested} bytes exceeds the mapped region")]
    Overflow { requested: usize },
    #[error("Buffer operation failed: {0}")]
    Device(#[from] DeviceError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContextError {
    #[error("No rendering display available: {0}")]
    NoDisplay(String),
    #[error("No framebuffer configuration matches the requested surface format")]
    NoConfig,
    #[error("Every context candidate was rejected ({attempts} attempted)")]
    Exhausted { attempts: usize },
    #[error("Candidate rejected by the platform: {0}")]
    CandidateRejected(String),
    #[error("Making the context current failed: {0}")]
    MakeCurrent(String),
    #[error("Context was lost")]
    Lost,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("Frame operation invalid in state {0}")]
    InvalidState(&'static str),
    #[error("Output {0} is not known to the backend")]
    UnknownOutput(u32),
    #[error("Frame dropped: GPU synchronization timed out")]
    SyncTimeout,
    #[error("Presentation rejected by the backend: {0}")]
    PresentRejected(String),
    #[error("Render target setup failed: {0}")]
    RenderTarget(#[source] TextureError),
    #[error("Rendering context was lost")]
    ContextLost,
    #[error("Drawing failed: {0}")]
    Draw(#[from] TextureError),
    #[error("Vertex streaming failed: {0}")]
    Buffer(#[from] BufferError),
    #[error("Shader program unavailable: {0}")]
    ShaderUnavailable(&'static str),
    #[error("Backend failure: {0}")]
    Backend(String),
}

impl FrameError {
    /// Folds GPU hang symptoms from nested errors into [`FrameError::SyncTimeout`].
    pub fn normalized(self) -> Self {
        match self {
            FrameError::Buffer(BufferError::FenceTimeout(_))
            | FrameError::Draw(TextureError::Geometry(BufferError::FenceTimeout(_))) => {
                FrameError::SyncTimeout
            }
            other => other,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("Context failure: {0}")]
    Context(#[from] ContextError),
    #[error("Frame failure: {0}")]
    Frame(#[from] FrameError),
    #[error("Device failure: {0}")]
    Device(#[from] DeviceError),
}

impl From<BackendError> for FrameError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Frame(frame) => frame,
            BackendError::Context(ContextError::Lost) => FrameError::ContextLost,
            other => FrameError::Backend(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse render configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid render configuration: {0}")]
    Validation(String),
}

/// Umbrella error for callers spanning several subsystems.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Texture(#[from] TextureError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;
