pub mod change_notifier;
pub mod controller;
pub mod embed;
pub mod handle_resolver;
pub mod mirror;
pub mod overlay;

pub use change_notifier::{ChangeNotifier, Subscription};
pub use controller::{CompositionController, CompositionSlot, SlotSession};
pub use embed::{EmbedSession, EmbedSessionManager};
pub use handle_resolver::HandleResolver;
pub use mirror::{MirrorSession, MirrorSessionManager};
pub use overlay::{Overlay, OverlayInjector, OverlayMarker};
