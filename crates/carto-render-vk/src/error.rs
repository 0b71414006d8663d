// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("vulkan loader unavailable: {0}")]
    Loader(String),
    #[error("window handle unavailable: {0}")]
    Window(String),
    #[error("no usable physical device: {0}")]
    NoDevice(String),
    #[error("no queue family satisfies graphics and present capability")]
    NoQueue,
    #[error("{what} failed: {result}")]
    Init {
        what: &'static str,
        result: vk::Result,
    },
    #[error("shader `{name}`: {reason}")]
    Shader { name: String, reason: String },
    #[error("no host-visible memory type matches {0:?}")]
    NoMemoryType(vk::MemoryPropertyFlags),
    #[error("descriptor pool refused allocation right after growing")]
    DescriptorPoolCorrupt,
    #[error("transform ring overflow (capacity {capacity})")]
    TransformRingOverflow { capacity: usize },
    #[error("device lost")]
    DeviceLost,
    #[error("device has been invalidated")]
    DeviceInvalidated,
    #[error("invalid update: {0}")]
    InvalidUpdate(String),
    #[error("range {offset}+{len} exceeds size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
    #[error("frame has no image to read back")]
    NoImage,
    #[error("vulkan: {0}")]
    Vk(vk::Result),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RenderError {
    pub fn init(what: &'static str) -> impl FnOnce(vk::Result) -> RenderError {
        move |result| RenderError::Init { what, result }
    }

    /// Fatal errors end the renderer; everything else is handled by dropping work or resizing.
    pub fn is_fatal(&self) -> bool {
        match self {
            RenderError::Loader(_)
            | RenderError::Window(_)
            | RenderError::NoDevice(_)
            | RenderError::NoQueue
            | RenderError::Init { .. }
            | RenderError::Shader { .. }
            | RenderError::NoMemoryType(_)
            | RenderError::DescriptorPoolCorrupt
            | RenderError::TransformRingOverflow { .. }
            | RenderError::DeviceLost
            | RenderError::DeviceInvalidated => true,
            RenderError::InvalidUpdate(_)
            | RenderError::OutOfBounds { .. }
            | RenderError::NoImage
            | RenderError::Io(_) => false,
            RenderError::Vk(r) => matches!(
                *r,
                vk::Result::ERROR_OUT_OF_HOST_MEMORY
                    | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                    | vk::Result::ERROR_INITIALIZATION_FAILED
            ),
        }
    }
}

impl From<vk::Result> for RenderError {
    fn from(r: vk::Result) -> Self {
        if r == vk::Result::ERROR_DEVICE_LOST {
            RenderError::DeviceLost
        } else {
            RenderError::Vk(r)
        }
    }
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;
