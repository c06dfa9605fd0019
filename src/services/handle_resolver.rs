use crate::error::{ComposeError, Result};
use crate::events::{Point, SlotId, UiEvent, UiSender, WindowHandle, WindowInfo};
use crate::platform::WindowManagerPort;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Поиск чужих окон: перечисление и выбор окна под курсором.
///
/// Сам по себе запросов к состоянию компоновки не делает. Единственное состояние:
/// ожидающий выбор под курсором: второй выбор, пока первый не завершён, отклоняется.
pub struct HandleResolver {
    port: Arc<dyn WindowManagerPort>,
    pick_delay: Duration,
    pending: Option<PendingPick>,
}

struct PendingPick {
    slot: SlotId,
    task: JoinHandle<()>,
}

impl HandleResolver {
    pub fn new(port: Arc<dyn WindowManagerPort>, pick_delay: Duration) -> Self {
        Self {
            port,
            pick_delay,
            pending: None,
        }
    }

    pub fn parse_handle(text: &str) -> WindowHandle {
        WindowHandle::parse(text)
    }

    /// Видимые окна верхнего уровня с непустым заголовком
    pub fn list_top_level_windows(&self) -> Result<Vec<WindowInfo>> {
        let windows = self.port.list_top_level_windows()?;
        debug!("Найдено {} окон верхнего уровня", windows.len());
        Ok(windows)
    }

    pub fn resolve_top_level_at_point(&self, point: Point) -> WindowHandle {
        resolve_top_level_at(self.port.as_ref(), point)
    }

    pub fn resolve_under_cursor(&self) -> WindowHandle {
        resolve_under_cursor(self.port.as_ref())
    }

    pub fn is_pick_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Запустить выбор окна: через `pick_delay` положение курсора будет прочитано
    /// один раз, а результат придёт в UI-цикл как `UiEvent::PickCompleted`.
    pub fn begin_pick(&mut self, slot: SlotId, events: UiSender) -> Result<()> {
        if self.pending.is_some() {
            return Err(ComposeError::PickPending);
        }

        let port = Arc::clone(&self.port);
        let delay = self.pick_delay;
        info!(
            "Выбор окна для слота '{}' через {}мс",
            slot,
            delay.as_millis()
        );

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let handle = resolve_under_cursor(port.as_ref());
            let _ = events.send(UiEvent::PickCompleted { slot, handle });
        });

        self.pending = Some(PendingPick { slot, task });
        Ok(())
    }

    /// Принять результат выбора. `false`, если для этого слота выбор не ожидался
    /// (например, его уже отменили).
    pub fn finish_pick(&mut self, slot: SlotId) -> bool {
        match &self.pending {
            Some(pending) if pending.slot == slot => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel_pick(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.task.abort();
                info!("Выбор окна для слота '{}' отменён", pending.slot);
                true
            }
            None => false,
        }
    }
}

impl Drop for HandleResolver {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
        }
    }
}

/// Окно верхнего уровня, которому принадлежит то, что нарисовано в точке
pub fn resolve_top_level_at(port: &dyn WindowManagerPort, point: Point) -> WindowHandle {
    let hit = port.window_at_point(point);
    if hit.is_empty() {
        return WindowHandle::NULL;
    }
    let root = port.root_ancestor(hit);
    if root.is_empty() {
        hit
    } else {
        root
    }
}

pub fn resolve_under_cursor(port: &dyn WindowManagerPort) -> WindowHandle {
    match port.cursor_position() {
        Some(point) => resolve_top_level_at(port, point),
        None => WindowHandle::NULL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ui_channel, Rect};
    use crate::platform::FakeWindowManager;

    fn resolver_with(fake: Arc<FakeWindowManager>) -> HandleResolver {
        HandleResolver::new(fake, Duration::from_secs(2))
    }

    #[test]
    fn test_resolve_walks_to_top_level() {
        let fake = Arc::new(FakeWindowManager::new());
        let app = fake.add_window("App", 10, Rect::new(0, 0, 400, 300));
        fake.add_child(app, Rect::new(10, 10, 110, 60));
        let resolver = resolver_with(fake.clone());

        assert_eq!(resolver.resolve_top_level_at_point(Point::new(20, 20)), app);
        assert_eq!(resolver.resolve_top_level_at_point(Point::new(300, 200)), app);
        assert!(resolver.resolve_top_level_at_point(Point::new(900, 900)).is_empty());
    }

    #[test]
    fn test_resolve_under_cursor_without_cursor_is_empty() {
        let fake = Arc::new(FakeWindowManager::new());
        fake.add_window("App", 10, Rect::new(0, 0, 400, 300));
        let resolver = resolver_with(fake);
        assert!(resolver.resolve_under_cursor().is_empty());
    }

    #[test]
    fn test_list_top_level_windows() {
        let fake = Arc::new(FakeWindowManager::new());
        fake.add_window("First", 1, Rect::new(0, 0, 10, 10));
        fake.add_window("Second", 2, Rect::new(0, 0, 10, 10));
        let resolver = resolver_with(fake);

        let titles: Vec<String> = resolver
            .list_top_level_windows()
            .unwrap()
            .into_iter()
            .map(|w| w.title)
            .collect();
        assert_eq!(titles, vec!["Second".to_string(), "First".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pick_samples_cursor_after_delay() {
        let fake = Arc::new(FakeWindowManager::new());
        let app = fake.add_window("App", 10, Rect::new(0, 0, 400, 300));
        let mut resolver = resolver_with(fake.clone());
        let (tx, mut rx) = ui_channel();

        resolver.begin_pick(SlotId::Embed, tx).unwrap();
        // Курсор окажется над окном только к концу задержки
        fake.set_cursor(Some(Point::new(50, 50)));

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            UiEvent::PickCompleted {
                slot: SlotId::Embed,
                handle: app
            }
        );
        assert!(resolver.finish_pick(SlotId::Embed));
        assert!(!resolver.is_pick_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_pick_is_rejected_while_pending() {
        let fake = Arc::new(FakeWindowManager::new());
        let mut resolver = resolver_with(fake);
        let (tx, _rx) = ui_channel();

        resolver.begin_pick(SlotId::Mirror, tx.clone()).unwrap();
        assert!(matches!(
            resolver.begin_pick(SlotId::Embed, tx),
            Err(ComposeError::PickPending)
        ));
        assert!(!resolver.finish_pick(SlotId::Embed));
        assert!(resolver.is_pick_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_pick_never_completes() {
        let fake = Arc::new(FakeWindowManager::new());
        let mut resolver = resolver_with(fake);
        let (tx, mut rx) = ui_channel();

        resolver.begin_pick(SlotId::Mirror, tx.clone()).unwrap();
        assert!(resolver.cancel_pick());
        assert!(!resolver.cancel_pick());

        let waited = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(waited.is_err());

        // После отмены можно выбирать снова
        resolver.begin_pick(SlotId::Mirror, tx).unwrap();
    }
}
