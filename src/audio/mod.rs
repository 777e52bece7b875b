//! Audio output subsystem

pub mod buffer;
pub mod convert;
pub mod device;
pub mod render;

pub use buffer::{AudioFrame, BlockCursor, RingBuffer, SharedRingBuffer};
pub use convert::FormatConverter;
pub use device::{list_output_devices, DeviceLease, DeviceSlot, OutputDeviceInfo};
pub use render::{CpalBackend, ManualBackend, OutputBackend, RenderEngine, RenderHandle};
