pub mod geometry;
pub mod ui;
pub mod window;

pub use geometry::{Point, Rect, Size};
pub use ui::{ui_channel, HostLayout, HostRegion, MarkerId, Rgb, SlotId, UiEvent, UiReceiver, UiSender};
pub use window::{WindowEvent, WindowEventKind, WindowHandle, WindowInfo};
