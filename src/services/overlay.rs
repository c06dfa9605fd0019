use crate::config::OverlayConfig;
use crate::error::Result;
use crate::events::{MarkerId, Point, Rgb, Size, WindowHandle};
use crate::platform::{MarkerSpec, PointerMessage, WindowManagerPort, ZOrder};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Полупрозрачный маркер поверх встроенного окна
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayMarker {
    pub id: MarkerId,
    pub label: String,
    pub color: Rgb,
    pub size: Size,
    /// Левый верхний угол в координатах панели хоста
    pub position: Point,
    /// Точка захвата внутри маркера, пока идёт перетаскивание
    pub drag_anchor: Option<Point>,
    pub window: WindowHandle,
}

impl OverlayMarker {
    pub fn is_dragging(&self) -> bool {
        self.drag_anchor.is_some()
    }

    pub fn begin_drag(&mut self, at: Point) {
        self.drag_anchor = Some(at);
    }

    /// `at`: координаты указателя в окне маркера. `true`, если маркер сдвинулся.
    pub fn drag_to(&mut self, at: Point, bounds: Size) -> bool {
        let Some(anchor) = self.drag_anchor else {
            return false;
        };
        let target = clamp_position(self.position + (at - anchor), self.size, bounds);
        if target == self.position {
            return false;
        }
        self.position = target;
        true
    }

    pub fn end_drag(&mut self) {
        self.drag_anchor = None;
    }

    pub fn clamp_into(&mut self, bounds: Size) -> bool {
        let clamped = clamp_position(self.position, self.size, bounds);
        let moved = clamped != self.position;
        self.position = clamped;
        moved
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.position.x + self.size.width / 2,
            self.position.y + self.size.height / 2,
        )
    }
}

/// Маркер целиком внутри области; если область меньше маркера, прижат к (0, 0)
pub fn clamp_position(position: Point, marker: Size, bounds: Size) -> Point {
    let clamp = |v: i32, m: i32, b: i32| v.min(b - m).max(0);
    Point::new(
        clamp(position.x, marker.width, bounds.width),
        clamp(position.y, marker.height, bounds.height),
    )
}

/// Набор маркеров одной панели
#[derive(Debug, Default)]
pub struct Overlay {
    pub host: WindowHandle,
    pub markers: SmallVec<[OverlayMarker; 2]>,
}

impl Overlay {
    pub fn marker(&self, id: MarkerId) -> Option<&OverlayMarker> {
        self.markers.iter().find(|m| m.id == id)
    }

    fn marker_mut(&mut self, id: MarkerId) -> Option<&mut OverlayMarker> {
        self.markers.iter_mut().find(|m| m.id == id)
    }
}

pub struct OverlayInjector {
    port: Arc<dyn WindowManagerPort>,
    config: OverlayConfig,
}

impl OverlayInjector {
    pub fn new(port: Arc<dyn WindowManagerPort>, config: OverlayConfig) -> Self {
        Self { port, config }
    }

    /// Создать маркеры из конфигурации. При ошибке уже созданные уничтожаются.
    pub fn create_markers(&self, host: WindowHandle, bounds: Size) -> Result<Overlay> {
        let size = Size::new(self.config.marker_size, self.config.marker_size);
        let mut overlay = Overlay {
            host,
            markers: SmallVec::new(),
        };

        for (index, marker) in self.config.markers.iter().enumerate() {
            let id = MarkerId(u8::try_from(index).unwrap_or(u8::MAX));
            let color = marker.rgb().unwrap_or(Rgb { r: 0x80, g: 0x80, b: 0x80 });
            let position = clamp_position(Point::new(marker.x, marker.y), size, bounds);
            let spec = MarkerSpec {
                id,
                label: marker.label.clone(),
                color,
                size,
                position,
                alpha: self.config.alpha,
            };

            match self.port.create_marker(host, &spec) {
                Ok(window) => overlay.markers.push(OverlayMarker {
                    id,
                    label: spec.label,
                    color,
                    size,
                    position,
                    drag_anchor: None,
                    window,
                }),
                Err(e) => {
                    warn!("Не удалось создать маркер '{}': {}", marker.label, e);
                    self.destroy(&mut overlay);
                    return Err(e);
                }
            }
        }

        info!("Создано маркеров: {} в {}", overlay.markers.len(), host);
        Ok(overlay)
    }

    pub fn destroy(&self, overlay: &mut Overlay) {
        for marker in overlay.markers.drain(..) {
            if let Err(e) = self.port.destroy_window(marker.window) {
                debug!("Маркер {} уже уничтожен: {}", marker.id, e);
            }
        }
    }

    pub fn pointer_down(&self, overlay: &mut Overlay, id: MarkerId, at: Point) {
        if let Some(marker) = overlay.marker_mut(id) {
            marker.begin_drag(at);
        }
    }

    /// `true`, если маркер переместился
    pub fn pointer_move(&self, overlay: &mut Overlay, id: MarkerId, at: Point, bounds: Size) -> Result<bool> {
        let Some(marker) = overlay.marker_mut(id) else {
            return Ok(false);
        };
        if !marker.drag_to(at, bounds) {
            return Ok(false);
        }
        self.port.move_window(marker.window, marker.position)?;
        Ok(true)
    }

    pub fn pointer_up(&self, overlay: &mut Overlay, id: MarkerId) {
        if let Some(marker) = overlay.marker_mut(id) {
            marker.end_drag();
        }
    }

    /// Вернуть маркеры в пределы панели после изменения её размера
    pub fn reclamp(&self, overlay: &mut Overlay, bounds: Size) {
        for marker in overlay.markers.iter_mut() {
            if marker.clamp_into(bounds) {
                if let Err(e) = self.port.move_window(marker.window, marker.position) {
                    debug!("Не удалось сдвинуть маркер {}: {}", marker.id, e);
                }
            }
        }
    }

    /// Встроенное окно вниз, маркеры поверх. Повторный вызов даёт тот же порядок.
    ///
    /// Сбой на одном окне не останавливает остальные; наружу уходит первая ошибка.
    pub fn correct_z_order(&self, child: WindowHandle, overlay: &Overlay) -> Result<()> {
        let mut first_error = None;

        if !child.is_empty() {
            if let Err(e) = self.port.set_z_order(child, ZOrder::Bottom) {
                debug!("Не удалось опустить {}: {}", child, e);
                first_error.get_or_insert(e);
            }
        }
        for marker in &overlay.markers {
            if let Err(e) = self.port.set_z_order(marker.window, ZOrder::Top) {
                debug!("Не удалось поднять маркер {}: {}", marker.id, e);
                first_error.get_or_insert(e);
                continue;
            }
            // Прозрачность может слететь после смены родителя соседей
            if let Err(e) = self.port.set_layered_alpha(marker.window, self.config.alpha) {
                debug!("Не удалось восстановить прозрачность {}: {}", marker.id, e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Синтетический щелчок по центру маркера в окне `child`. Возвращает точку щелчка.
    pub fn activate(&self, overlay: &Overlay, id: MarkerId, child: WindowHandle) -> Result<Point> {
        let marker = overlay
            .marker(id)
            .ok_or_else(|| crate::compose_error!(internal, "неизвестный маркер {}", id))?;
        let at = marker.center();

        if let Err(e) = self.port.set_foreground(child) {
            debug!("Не удалось активировать {}: {}", child, e);
        }
        for message in [
            PointerMessage::Move,
            PointerMessage::LeftButtonDown,
            PointerMessage::LeftButtonUp,
        ] {
            self.port.post_pointer(child, message, at)?;
        }

        info!("Маркер '{}' нажат: щелчок в {} по {}", marker.label, at, child);
        Ok(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ComposeError;
    use crate::events::Rect;
    use crate::platform::FakeWindowManager;

    fn setup() -> (Arc<FakeWindowManager>, OverlayInjector, WindowHandle, WindowHandle) {
        let fake = Arc::new(FakeWindowManager::new());
        let host = fake.add_window("Host", 1, Rect::new(0, 0, 1600, 900));
        let panel = fake.add_child(host, Rect::new(800, 0, 1600, 900));
        let child = fake.add_window("Foreign", 2, Rect::new(0, 0, 800, 900));
        fake.set_parent(child, panel).unwrap();
        let injector = OverlayInjector::new(fake.clone(), Config::default().overlay);
        (fake, injector, panel, child)
    }

    #[test]
    fn test_clamp_keeps_marker_inside() {
        let marker = Size::new(36, 36);
        let bounds = Size::new(800, 600);
        for (x, y) in [(-50, -50), (0, 0), (400, 300), (790, 590), (10_000, 10_000)] {
            let p = clamp_position(Point::new(x, y), marker, bounds);
            assert!(p.x >= 0 && p.x <= 800 - 36, "x = {}", p.x);
            assert!(p.y >= 0 && p.y <= 600 - 36, "y = {}", p.y);
        }
        // Область меньше маркера
        assert_eq!(
            clamp_position(Point::new(5, 5), marker, Size::new(20, 20)),
            Point::new(0, 0)
        );
    }

    #[test]
    fn test_create_markers_applies_config() {
        let (fake, injector, panel, _) = setup();
        let overlay = injector.create_markers(panel, Size::new(800, 900)).unwrap();

        assert_eq!(overlay.markers.len(), 2);
        assert_eq!(overlay.markers[0].position, Point::new(40, 40));
        assert_eq!(overlay.markers[1].position, Point::new(100, 40));
        for marker in &overlay.markers {
            assert_eq!(fake.parent(marker.window), panel);
            assert_eq!(fake.alpha_of(marker.window), Some(128));
        }
    }

    #[test]
    fn test_failed_creation_leaves_no_markers() {
        let (fake, injector, panel, _) = setup();
        fake.fail("create_marker");
        assert!(injector.create_markers(panel, Size::new(800, 900)).is_err());
        assert_eq!(fake.children_in_z_order(panel).len(), 1);
    }

    #[test]
    fn test_drags_are_independent_and_clamped() {
        let (fake, injector, panel, _) = setup();
        let bounds = Size::new(800, 900);
        let mut overlay = injector.create_markers(panel, bounds).unwrap();
        let first = MarkerId(0);
        let second = MarkerId(1);

        injector.pointer_down(&mut overlay, first, Point::new(10, 10));
        assert!(injector
            .pointer_move(&mut overlay, first, Point::new(30, 15), bounds)
            .unwrap());
        // Второй маркер не захвачен и не двигается
        assert!(!injector
            .pointer_move(&mut overlay, second, Point::new(500, 500), bounds)
            .unwrap());
        assert!(injector
            .pointer_move(&mut overlay, first, Point::new(5000, 5000), bounds)
            .unwrap());
        injector.pointer_up(&mut overlay, first);

        let moved = overlay.marker(first).unwrap();
        assert_eq!(moved.position, Point::new(800 - 36, 900 - 36));
        assert_eq!(fake.position_of(moved.window), Some(moved.position));
        assert_eq!(overlay.marker(second).unwrap().position, Point::new(100, 40));

        assert!(!injector
            .pointer_move(&mut overlay, first, Point::new(0, 0), bounds)
            .unwrap());
    }

    #[test]
    fn test_reclamp_after_shrink() {
        let (fake, injector, panel, _) = setup();
        let mut overlay = injector.create_markers(panel, Size::new(800, 900)).unwrap();
        injector.reclamp(&mut overlay, Size::new(80, 60));
        for marker in &overlay.markers {
            assert!(marker.position.x + marker.size.width <= 80);
            assert!(marker.position.y + marker.size.height <= 60);
            assert_eq!(fake.position_of(marker.window), Some(marker.position));
        }
    }

    #[test]
    fn test_z_order_correction_is_idempotent() {
        let (fake, injector, panel, child) = setup();
        let overlay = injector.create_markers(panel, Size::new(800, 900)).unwrap();
        // Чужое окно вылезло наверх
        fake.set_z_order(child, ZOrder::Top).unwrap();
        fake.set_layered_alpha(overlay.markers[0].window, 255).unwrap();

        injector.correct_z_order(child, &overlay).unwrap();
        let once = fake.children_in_z_order(panel);
        injector.correct_z_order(child, &overlay).unwrap();
        let twice = fake.children_in_z_order(panel);

        assert_eq!(once, twice);
        assert_eq!(once.last(), Some(&child));
        assert_eq!(fake.alpha_of(overlay.markers[0].window), Some(128));
    }

    #[test]
    fn test_z_order_correction_continues_past_dead_marker() {
        let (fake, injector, panel, child) = setup();
        let overlay = injector.create_markers(panel, Size::new(800, 900)).unwrap();
        fake.set_z_order(child, ZOrder::Top).unwrap();
        fake.set_layered_alpha(overlay.markers[1].window, 255).unwrap();
        fake.destroy_window(overlay.markers[0].window).unwrap();

        assert!(matches!(
            injector.correct_z_order(child, &overlay),
            Err(ComposeError::StaleWindow(_))
        ));
        let order = fake.children_in_z_order(panel);
        assert_eq!(order, vec![overlay.markers[1].window, child]);
        assert_eq!(fake.alpha_of(overlay.markers[1].window), Some(128));
    }

    #[test]
    fn test_activate_posts_click_at_marker_center() {
        let (fake, injector, panel, child) = setup();
        let overlay = injector.create_markers(panel, Size::new(800, 900)).unwrap();

        let at = injector.activate(&overlay, MarkerId(1), child).unwrap();

        assert_eq!(at, Point::new(118, 58));
        assert_eq!(fake.foreground(), child);
        assert_eq!(
            fake.posted(child),
            vec![
                (PointerMessage::Move, at),
                (PointerMessage::LeftButtonDown, at),
                (PointerMessage::LeftButtonUp, at),
            ]
        );
        assert!(injector.activate(&overlay, MarkerId(9), child).is_err());
    }

    #[test]
    fn test_activate_survives_foreground_refusal() {
        let (fake, injector, panel, child) = setup();
        let overlay = injector.create_markers(panel, Size::new(800, 900)).unwrap();
        fake.fail("set_foreground");
        assert!(injector.activate(&overlay, MarkerId(0), child).is_ok());
        assert_eq!(fake.posted(child).len(), 3);
    }
}
