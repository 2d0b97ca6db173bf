pub mod buffer;
pub mod cache;
pub mod image;
pub mod memory;

pub use buffer::{BufferUsage, SharedBuffer, SharedBufferHandle};
pub use cache::{CacheKey, DerivedCache};
pub use image::CameraImage;
pub use memory::{align_up, HostAllocator, SharedBufferAllocator};
