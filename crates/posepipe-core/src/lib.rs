pub mod capabilities;
pub mod error;
pub mod fence;
pub mod traits;
pub mod transform;
pub mod types;

pub use capabilities::PlatformCapabilities;
pub use error::{PoseError, Result};
pub use fence::{fence_pair, FenceSignaler, SyncFence};
pub use traits::{Clock, ManualClock, MonotonicClock};
pub use transform::{PreviewGeometry, Size, TextureTransform};
pub use types::*;
