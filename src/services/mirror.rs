use crate::error::{ComposeError, Result};
use crate::events::{Point, Rect, Size, WindowHandle};
use crate::platform::{ThumbnailId, ThumbnailProperties, WindowManagerPort};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Живое зеркало чужого окна, нарисованное компоновщиком в хост-окне
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorSession {
    pub source: WindowHandle,
    pub destination: WindowHandle,
    pub thumbnail: ThumbnailId,
    pub destination_rect: Option<Rect>,
    /// Размер клиентской области источника на момент последней раскладки
    pub source_size: Option<Size>,
}

impl MirrorSession {
    pub fn is_active(&self) -> bool {
        !self.thumbnail.is_empty()
    }
}

/// Idle → Registered → Idle
pub struct MirrorSessionManager {
    port: Arc<dyn WindowManagerPort>,
    crop_source: bool,
}

impl MirrorSessionManager {
    pub fn new(port: Arc<dyn WindowManagerPort>, crop_source: bool) -> Self {
        Self { port, crop_source }
    }

    pub fn start(&self, source: WindowHandle, destination_owner: WindowHandle) -> Result<MirrorSession> {
        if source.is_empty() || destination_owner.is_empty() {
            return ComposeError::empty_handle();
        }

        let thumbnail = self.port.register_thumbnail(destination_owner, source)?;
        if thumbnail.is_empty() {
            return Err(crate::compose_error!(
                compositor,
                "компоновщик вернул пустую миниатюру для {}",
                source
            ));
        }

        info!("Зеркало {} → {} зарегистрировано", source, destination_owner);
        Ok(MirrorSession {
            source,
            destination: destination_owner,
            thumbnail,
            destination_rect: None,
            source_size: None,
        })
    }

    /// Разместить зеркало в области `offset`/`bounds` окна-владельца.
    ///
    /// Ничего не делает, если сессия или размеры недействительны или источник
    /// пропал. Возвращает `true`, если свойства переданы компоновщику.
    pub fn update_layout(&self, session: &mut MirrorSession, offset: Point, bounds: Size) -> bool {
        if !session.is_active() || bounds.is_empty() {
            return false;
        }

        let source_size = match self.port.thumbnail_source_size(session.thumbnail) {
            Ok(size) if !size.is_empty() => size,
            Ok(size) => {
                debug!("Источник {} имеет пустой размер {}", session.source, size);
                return false;
            }
            Err(e) => {
                debug!("Размер источника {} недоступен: {}", session.source, e);
                return false;
            }
        };

        let destination = fit_destination(offset, bounds, source_size);
        let source = if self.crop_source {
            Rect::from_origin_size(Point::default(), destination.size())
        } else {
            Rect::from_origin_size(Point::default(), source_size)
        };
        let props = ThumbnailProperties {
            destination,
            source,
            visible: true,
            source_client_area_only: true,
        };

        if let Err(e) = self.port.update_thumbnail(session.thumbnail, &props) {
            debug!("Компоновщик не принял раскладку {}: {}", session.source, e);
            return false;
        }

        debug!(
            "Зеркало {}: источник {}, назначение {}",
            session.source, source_size, destination
        );
        session.destination_rect = Some(destination);
        session.source_size = Some(source_size);
        true
    }

    /// Снять регистрацию. Повторный вызов ничего не делает.
    pub fn stop(&self, session: &mut MirrorSession) {
        if !session.is_active() {
            return;
        }

        if let Err(e) = self.port.unregister_thumbnail(session.thumbnail) {
            warn!("Не удалось снять зеркало {}: {}", session.source, e);
        } else {
            info!("Зеркало {} снято", session.source);
        }
        session.thumbnail = ThumbnailId::NONE;
        session.destination_rect = None;
    }
}

/// Прямоугольник назначения: не больше источника, по центру области, без увеличения
pub fn fit_destination(offset: Point, bounds: Size, source: Size) -> Rect {
    let width = bounds.width.min(source.width);
    let height = bounds.height.min(source.height);
    let origin = Point::new(
        offset.x + (bounds.width - width) / 2,
        offset.y + (bounds.height - height) / 2,
    );
    Rect::from_origin_size(origin, Size::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FakeWindowManager;

    fn setup() -> (Arc<FakeWindowManager>, WindowHandle, WindowHandle) {
        let fake = Arc::new(FakeWindowManager::new());
        let host = fake.add_window("Host", 1, Rect::new(0, 0, 1600, 900));
        let source = fake.add_window("Source", 2, Rect::new(0, 0, 1920, 1080));
        (fake, host, source)
    }

    #[test]
    fn test_large_source_is_capped_to_host() {
        let rect = fit_destination(Point::new(0, 0), Size::new(800, 600), Size::new(1920, 1080));
        assert_eq!(rect, Rect::new(0, 0, 800, 600));
    }

    #[test]
    fn test_small_source_is_centered_not_upscaled() {
        let rect = fit_destination(Point::new(10, 20), Size::new(1000, 800), Size::new(640, 480));
        assert_eq!(rect.size(), Size::new(640, 480));
        assert_eq!(rect.origin(), Point::new(10 + 180, 20 + 160));
    }

    #[test]
    fn test_mixed_axes() {
        let rect = fit_destination(Point::new(0, 0), Size::new(500, 1000), Size::new(800, 600));
        assert_eq!(rect, Rect::new(0, 200, 500, 800));
    }

    #[test]
    fn test_start_then_stop_leaves_no_binding() {
        let (fake, host, source) = setup();
        let manager = MirrorSessionManager::new(fake.clone(), false);

        let mut session = manager.start(source, host).unwrap();
        assert_eq!(fake.thumbnail_count(), 1);
        manager.stop(&mut session);
        assert_eq!(fake.thumbnail_count(), 0);
        assert!(!session.is_active());

        manager.stop(&mut session);
        assert_eq!(fake.calls("unregister_thumbnail"), 1);
    }

    #[test]
    fn test_stop_never_started_is_noop() {
        let (fake, _, _) = setup();
        let manager = MirrorSessionManager::new(fake.clone(), false);
        let mut session = MirrorSession::default();
        manager.stop(&mut session);
        assert_eq!(session, MirrorSession::default());
        assert_eq!(fake.calls("unregister_thumbnail"), 0);
    }

    #[test]
    fn test_start_rejects_empty_and_dead_handles() {
        let (fake, host, source) = setup();
        let manager = MirrorSessionManager::new(fake.clone(), false);
        assert!(matches!(
            manager.start(WindowHandle::NULL, host),
            Err(ComposeError::EmptyHandle)
        ));
        assert!(manager.start(source, WindowHandle::NULL).is_err());

        fake.close_window(source);
        assert!(manager.start(source, host).is_err());
        assert_eq!(fake.thumbnail_count(), 0);
    }

    #[test]
    fn test_update_layout_pushes_full_client_source() {
        let (fake, host, source) = setup();
        let manager = MirrorSessionManager::new(fake.clone(), false);
        let mut session = manager.start(source, host).unwrap();

        assert!(manager.update_layout(&mut session, Point::new(0, 0), Size::new(800, 600)));
        let props = fake.thumbnail(session.thumbnail).unwrap().properties.unwrap();
        assert_eq!(props.destination, Rect::new(0, 0, 800, 600));
        assert_eq!(props.source, Rect::new(0, 0, 1920, 1080));
        assert!(props.visible);
        assert!(props.source_client_area_only);
        assert_eq!(session.source_size, Some(Size::new(1920, 1080)));
    }

    #[test]
    fn test_update_layout_crop_mode_maps_one_to_one() {
        let (fake, host, source) = setup();
        let manager = MirrorSessionManager::new(fake.clone(), true);
        let mut session = manager.start(source, host).unwrap();

        assert!(manager.update_layout(&mut session, Point::new(8, 0), Size::new(800, 600)));
        let props = fake.thumbnail(session.thumbnail).unwrap().properties.unwrap();
        assert_eq!(props.source, Rect::new(0, 0, 800, 600));
        assert_eq!(props.destination, Rect::new(8, 0, 808, 600));
    }

    #[test]
    fn test_update_layout_is_silent_when_source_gone_or_bounds_empty() {
        let (fake, host, source) = setup();
        let manager = MirrorSessionManager::new(fake.clone(), false);
        let mut session = manager.start(source, host).unwrap();

        assert!(!manager.update_layout(&mut session, Point::new(0, 0), Size::new(0, 600)));
        fake.close_window(source);
        assert!(!manager.update_layout(&mut session, Point::new(0, 0), Size::new(800, 600)));
        assert_eq!(fake.calls("update_thumbnail"), 0);

        let mut idle = MirrorSession::default();
        assert!(!manager.update_layout(&mut idle, Point::new(0, 0), Size::new(800, 600)));
    }
}
