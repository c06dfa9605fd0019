use crate::config::Config;
use crate::error::{ComposeError, Result};
use crate::events::{
    HostLayout, HostRegion, MarkerId, Point, SlotId, UiEvent, UiReceiver, UiSender,
    WindowEventKind, WindowHandle,
};
use crate::platform::WindowManagerPort;
use crate::services::change_notifier::{ChangeNotifier, Subscription};
use crate::services::embed::{EmbedSession, EmbedSessionManager};
use crate::services::handle_resolver::HandleResolver;
use crate::services::mirror::{MirrorSession, MirrorSessionManager};
use crate::services::overlay::{Overlay, OverlayInjector};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Что сейчас показывает слот
#[derive(Debug, Default)]
pub enum SlotSession {
    #[default]
    Empty,
    Mirror {
        session: MirrorSession,
        subscription: Option<Subscription>,
    },
    Embed {
        session: EmbedSession,
        subscription: Option<Subscription>,
    },
}

impl SlotSession {
    /// Чужое окно, привязанное к слоту
    pub fn handle(&self) -> WindowHandle {
        match self {
            SlotSession::Empty => WindowHandle::NULL,
            SlotSession::Mirror { session, .. } => session.source,
            SlotSession::Embed { session, .. } => session.child,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SlotSession::Empty)
    }
}

#[derive(Debug)]
pub struct CompositionSlot {
    pub id: SlotId,
    pub region: HostRegion,
    pub session: SlotSession,
    /// Маркеры есть только у интерактивного слота
    pub overlay: Option<Overlay>,
}

impl CompositionSlot {
    fn new(id: SlotId, region: HostRegion) -> Self {
        Self {
            id,
            region,
            session: SlotSession::Empty,
            overlay: None,
        }
    }
}

/// Владелец всего состояния компоновки.
///
/// Живёт в одной задаче UI-цикла: события приходят из канала `UiEvent`, нативные
/// сообщения прокачиваются по таймеру, z-order поправляется периодически после
/// первой успешной раскладки встроенного окна.
pub struct CompositionController {
    port: Arc<dyn WindowManagerPort>,
    config: Arc<Config>,
    events: UiSender,
    top_level: WindowHandle,
    resolver: HandleResolver,
    mirror: MirrorSessionManager,
    embed: EmbedSessionManager,
    notifier: ChangeNotifier,
    injector: OverlayInjector,
    left: CompositionSlot,
    right: CompositionSlot,
    zorder_timer_armed: bool,
}

impl CompositionController {
    pub fn new(
        port: Arc<dyn WindowManagerPort>,
        config: Arc<Config>,
        events: UiSender,
        layout: HostLayout,
    ) -> Self {
        let composition = &config.composition;
        Self {
            resolver: HandleResolver::new(Arc::clone(&port), composition.pick_delay()),
            mirror: MirrorSessionManager::new(Arc::clone(&port), composition.mirror_crop_source),
            embed: EmbedSessionManager::new(Arc::clone(&port)),
            notifier: ChangeNotifier::new(Arc::clone(&port)),
            injector: OverlayInjector::new(Arc::clone(&port), config.overlay.clone()),
            left: CompositionSlot::new(SlotId::Mirror, layout.left),
            right: CompositionSlot::new(SlotId::Embed, layout.right),
            top_level: layout.top_level,
            zorder_timer_armed: false,
            port,
            config,
            events,
        }
    }

    pub fn slot(&self, id: SlotId) -> &CompositionSlot {
        match id {
            SlotId::Mirror => &self.left,
            SlotId::Embed => &self.right,
        }
    }

    pub fn is_zorder_timer_armed(&self) -> bool {
        self.zorder_timer_armed
    }

    pub fn is_pick_pending(&self) -> bool {
        self.resolver.is_pick_pending()
    }

    /// Главный цикл: события UI, насос нативных сообщений и таймер z-order.
    pub async fn run(mut self, mut rx: UiReceiver) -> Result<()> {
        let mut pump = interval(self.config.composition.pump_interval());
        pump.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut zorder: Option<Interval> = None;

        info!("Цикл компоновки запущен (backend: {})", self.port.backend_name());

        loop {
            if zorder.is_none() && self.zorder_timer_armed {
                let period = self.config.composition.zorder_interval();
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                zorder = Some(timer);
                info!("Таймер z-order запущен: каждые {}мс", period.as_millis());
            }

            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event).is_break() {
                            info!("Получена команда завершения");
                            break;
                        }
                    }
                    None => {
                        info!("Все отправители событий закрыты");
                        break;
                    }
                },
                _ = pump.tick() => {
                    if !self.port.pump_messages() {
                        info!("Хост-окно закрыто");
                        break;
                    }
                }
                _ = async {
                    match zorder.as_mut() {
                        Some(timer) => {
                            timer.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    self.on_zorder_tick();
                }
            }
        }

        self.shutdown();
        self.destroy_host();
        Ok(())
    }

    /// Обработать одно событие. Ошибки превращаются в уведомление оператору.
    pub fn handle_event(&mut self, event: UiEvent) -> ControlFlow<()> {
        crate::debug_if_enabled!("Событие UI: {:?}", event);

        match event {
            UiEvent::AttachRequested { slot, handle_text } => {
                let handle = HandleResolver::parse_handle(&handle_text);
                let result = if handle.is_empty() {
                    Err(crate::compose_error!(
                        invalid_handle,
                        "'{}' не похоже на дескриптор окна",
                        handle_text.trim()
                    ))
                } else {
                    self.attach(slot, handle)
                };
                if let Err(e) = result {
                    self.report(slot, e);
                }
            }
            UiEvent::PickRequested { slot } => {
                if self.resolver.is_pick_pending() {
                    self.report(slot, ComposeError::PickPending);
                } else {
                    let delay = self.config.composition.pick_delay();
                    self.port.show_notice(&format!(
                        "Наведите курсор на окно для {} слота: оно будет выбрано через {} с",
                        slot,
                        delay.as_secs_f32()
                    ));
                    if let Err(e) = self.resolver.begin_pick(slot, self.events.clone()) {
                        self.report(slot, e);
                    }
                }
            }
            UiEvent::CancelPick => {
                self.resolver.cancel_pick();
            }
            UiEvent::PickCompleted { slot, handle } => {
                if !self.resolver.finish_pick(slot) {
                    debug!("Результат выбора для слота '{}' уже не ожидается", slot);
                } else if handle.is_empty() {
                    self.port.show_notice("Под курсором не найдено окно");
                } else {
                    info!("Под курсором окно {}", handle);
                    if let Err(e) = self.attach(slot, handle) {
                        self.report(slot, e);
                    }
                }
            }
            UiEvent::DetachRequested { slot } => self.detach(slot),
            UiEvent::HostLayoutChanged(layout) => {
                self.top_level = layout.top_level;
                self.left.region = layout.left;
                self.right.region = layout.right;
                self.relayout();
            }
            UiEvent::MarkerPointerDown { marker, at } => {
                if let Some(overlay) = self.right.overlay.as_mut() {
                    self.injector.pointer_down(overlay, marker, at);
                }
            }
            UiEvent::MarkerPointerMove { marker, at } => {
                let bounds = self.right.region.size;
                if let Some(overlay) = self.right.overlay.as_mut() {
                    match self.injector.pointer_move(overlay, marker, at, bounds) {
                        Ok(true) => crate::debug_if_enabled!("Маркер {} перемещён", marker),
                        Ok(false) => {}
                        Err(e) => debug!("Не удалось переместить маркер {}: {}", marker, e),
                    }
                }
            }
            UiEvent::MarkerPointerUp { marker } => {
                if let Some(overlay) = self.right.overlay.as_mut() {
                    self.injector.pointer_up(overlay, marker);
                }
            }
            UiEvent::MarkerActivate { marker } => {
                if let Err(e) = self.activate_marker(marker) {
                    self.report(SlotId::Embed, e);
                }
            }
            UiEvent::ForeignWindowChanged { slot, handle, kind } => {
                self.on_foreign_window_changed(slot, handle, kind);
            }
            UiEvent::Shutdown => return ControlFlow::Break(()),
        }

        ControlFlow::Continue(())
    }

    /// Привязать окно к слоту: левый зеркалирует, правый встраивает
    pub fn attach(&mut self, slot: SlotId, handle: WindowHandle) -> Result<()> {
        if handle.is_empty() {
            return ComposeError::empty_handle();
        }
        if !self.port.is_window(handle) {
            return Err(ComposeError::StaleWindow(handle));
        }
        if self.is_own_window(handle) {
            return Err(crate::compose_error!(
                invalid_handle,
                "{} принадлежит самому компоновщику",
                handle
            ));
        }
        let other = match slot {
            SlotId::Mirror => &self.right,
            SlotId::Embed => &self.left,
        };
        if other.session.handle() == handle {
            return Err(crate::compose_error!(
                invalid_handle,
                "{} уже показано в {} слоте",
                handle,
                other.id
            ));
        }

        match slot {
            SlotId::Mirror => self.attach_mirror(handle),
            SlotId::Embed => self.attach_embed(handle),
        }
    }

    fn attach_mirror(&mut self, source: WindowHandle) -> Result<()> {
        if self.left.session.handle() == source {
            self.relayout_mirror();
            return Ok(());
        }

        self.detach(SlotId::Mirror);
        let session = self.mirror.start(source, self.top_level)?;
        let subscription = self.watch(SlotId::Mirror, source);
        self.left.session = SlotSession::Mirror {
            session,
            subscription,
        };
        self.relayout_mirror();
        info!("Левый слот: зеркало {}", source);
        Ok(())
    }

    fn attach_embed(&mut self, child: WindowHandle) -> Result<()> {
        let host = self.right.region.handle;

        if let SlotSession::Embed { session, .. } = &self.right.session {
            if session.child == child {
                self.embed.ensure_embedded(session)?;
                self.relayout_embed();
                self.correct_z_order();
                return Ok(());
            }
        }

        // Предыдущее окно уходит, маркеры остаются
        self.release_embedded();

        let session = match self.embed.embed(child, host) {
            Ok(session) => session,
            Err(e) => {
                self.destroy_overlay();
                return Err(e);
            }
        };
        let subscription = self.watch(SlotId::Embed, child);
        self.right.session = SlotSession::Embed {
            session,
            subscription,
        };

        if self.right.overlay.is_none() {
            match self.injector.create_markers(host, self.right.region.size) {
                Ok(overlay) => self.right.overlay = Some(overlay),
                Err(e) => warn!("Маркеры не созданы: {}", e),
            }
        }

        self.relayout_embed();
        self.correct_z_order();
        info!("Правый слот: встроено {}", child);
        Ok(())
    }

    /// Освободить слот. Для пустого слота ничего не делает.
    pub fn detach(&mut self, slot: SlotId) {
        match slot {
            SlotId::Mirror => {
                if let SlotSession::Mirror {
                    mut session,
                    subscription,
                } = std::mem::take(&mut self.left.session)
                {
                    drop(subscription);
                    self.mirror.stop(&mut session);
                    info!("Левый слот освобождён");
                }
            }
            SlotId::Embed => {
                if !self.right.session.is_empty() {
                    self.release_embedded();
                    info!("Правый слот освобождён");
                }
                self.destroy_overlay();
            }
        }
    }

    /// Пересчитать раскладку обоих слотов и вернуть маркеры наверх
    pub fn relayout(&mut self) {
        self.relayout_mirror();
        self.relayout_embed();
        self.correct_z_order();
    }

    /// Встроенное окно под маркерами. Ошибки только логируются.
    pub fn correct_z_order(&mut self) {
        let SlotSession::Embed { session, .. } = &self.right.session else {
            return;
        };
        let Some(overlay) = self.right.overlay.as_ref() else {
            return;
        };
        if let Err(e) = self.injector.correct_z_order(session.child, overlay) {
            debug!("Не удалось поправить z-order: {}", e);
        }
    }

    /// Остановить выбор и вернуть все чужие окна
    pub fn shutdown(&mut self) {
        self.resolver.cancel_pick();
        self.detach(SlotId::Mirror);
        self.detach(SlotId::Embed);
        info!("Компоновка остановлена");
    }

    fn relayout_mirror(&mut self) {
        let region = self.left.region;
        if let SlotSession::Mirror { session, .. } = &mut self.left.session {
            self.mirror.update_layout(session, region.offset, region.size);
        }
    }

    /// `true`, если встроенное окно пришлось двигать или менять размер
    fn relayout_embed(&mut self) -> bool {
        let region = self.right.region;
        // Свёрнутый хост: окно и маркеры остаются как были до восстановления
        if region.size.is_empty() {
            return false;
        }
        let SlotSession::Embed { session, .. } = &self.right.session else {
            return false;
        };

        let resized = match self.embed.resize_to_host(session.child, region.size) {
            Ok(resized) => {
                if !self.zorder_timer_armed {
                    self.zorder_timer_armed = true;
                    debug!("Первая раскладка встроенного окна, z-order будет поправляться периодически");
                }
                resized
            }
            Err(e) => {
                debug!("Не удалось подогнать {}: {}", session.child, e);
                false
            }
        };

        if let Some(overlay) = self.right.overlay.as_mut() {
            self.injector.reclamp(overlay, region.size);
        }
        resized
    }

    fn on_zorder_tick(&mut self) {
        let child = self.right.session.handle();
        if child.is_empty() {
            return;
        }
        crate::trace_if_enabled!("Тик z-order для {}", child);
        if !self.port.is_window(child) {
            warn!("Встроенное окно {} исчезло без уведомления", child);
            self.detach(SlotId::Embed);
            return;
        }
        self.correct_z_order();
    }

    fn on_foreign_window_changed(&mut self, slot: SlotId, handle: WindowHandle, kind: WindowEventKind) {
        let current = self.slot(slot).session.handle();
        if current.is_empty() || current != handle {
            debug!("Событие {:?} для {} устарело", kind, handle);
            return;
        }

        if kind == WindowEventKind::Destroyed {
            info!("Окно {} уничтожено, {} слот освобождается", handle, slot);
            self.detach(slot);
            return;
        }

        match slot {
            SlotId::Mirror => self.relayout_mirror(),
            SlotId::Embed => {
                let SlotSession::Embed { session, .. } = &self.right.session else {
                    return;
                };
                match self.embed.ensure_embedded(session) {
                    Ok(repaired) => {
                        let resized = self.relayout_embed();
                        if repaired || resized || kind == WindowEventKind::Shown {
                            self.correct_z_order();
                        }
                    }
                    Err(ComposeError::StaleWindow(_)) => self.detach(SlotId::Embed),
                    Err(e) => warn!("Не удалось удержать {} в панели: {}", handle, e),
                }
            }
        }
    }

    fn activate_marker(&mut self, marker: MarkerId) -> Result<Point> {
        let child = self.right.session.handle();
        if child.is_empty() {
            return Err(crate::compose_error!(
                service_unavailable,
                "в правом слоте нет окна"
            ));
        }
        let overlay = self
            .right
            .overlay
            .as_ref()
            .ok_or_else(|| crate::compose_error!(internal, "маркеры не созданы"))?;
        self.injector.activate(overlay, marker, child)
    }

    fn watch(&self, slot: SlotId, handle: WindowHandle) -> Option<Subscription> {
        let events = self.events.clone();
        let subscribed = self.notifier.subscribe(handle, move |kind| {
            let _ = events.send(UiEvent::ForeignWindowChanged { slot, handle, kind });
        });
        match subscribed {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!("Изменения {} отслеживаться не будут: {}", handle, e);
                None
            }
        }
    }

    fn release_embedded(&mut self) {
        if let SlotSession::Embed {
            session,
            subscription,
        } = std::mem::take(&mut self.right.session)
        {
            drop(subscription);
            if let Err(e) = self.embed.release(&session) {
                warn!("Не удалось вернуть {} на рабочий стол: {}", session.child, e);
            }
        }
    }

    fn destroy_overlay(&mut self) {
        if let Some(mut overlay) = self.right.overlay.take() {
            self.injector.destroy(&mut overlay);
        }
    }

    fn destroy_host(&self) {
        if !self.port.is_window(self.top_level) {
            return;
        }
        match self.port.destroy_window(self.top_level) {
            Ok(()) => debug!("Хост-окно {} разрушено", self.top_level),
            Err(e) => warn!("Не удалось разрушить хост-окно {}: {}", self.top_level, e),
        }
    }

    fn is_own_window(&self, handle: WindowHandle) -> bool {
        handle == self.top_level || self.port.root_ancestor(handle) == self.top_level
    }

    fn report(&self, slot: SlotId, error: ComposeError) {
        warn!("Слот '{}': {}", slot, error);
        self.port.show_notice(&format!("Слот '{}': {}", slot, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ui_channel, Rect, Size};
    use crate::platform::{FakeWindowManager, PointerMessage, ZOrder};
    use std::time::Duration;

    struct Harness {
        fake: Arc<FakeWindowManager>,
        controller: CompositionController,
        rx: UiReceiver,
        layout: HostLayout,
    }

    impl Harness {
        fn new() -> Self {
            let fake = Arc::new(FakeWindowManager::new());
            let config = Arc::new(Config::default());
            let (tx, rx) = ui_channel();
            let layout = fake.create_host_window(&config.host).unwrap();
            let controller = CompositionController::new(fake.clone(), config, tx, layout);
            Self {
                fake,
                controller,
                rx,
                layout,
            }
        }

        fn foreign(&self, title: &str) -> WindowHandle {
            self.fake.add_window(title, 42, Rect::new(100, 100, 1060, 820))
        }

        fn send(&mut self, event: UiEvent) {
            let _ = self.controller.handle_event(event);
            self.drain();
        }

        /// Доставить события, которые сгенерировали хуки
        fn drain(&mut self) {
            while let Ok(event) = self.rx.try_recv() {
                let _ = self.controller.handle_event(event);
            }
        }

        fn attach(&mut self, slot: SlotId, handle: WindowHandle) {
            self.send(UiEvent::AttachRequested {
                slot,
                handle_text: handle.to_string(),
            });
        }

        fn panel(&self) -> WindowHandle {
            self.layout.right.handle
        }
    }

    #[test]
    fn test_mirror_attach_fits_source_into_left_panel() {
        let mut h = Harness::new();
        let source = h.fake.add_window("Video", 7, Rect::new(0, 0, 1920, 1080));
        h.attach(SlotId::Mirror, source);

        let SlotSession::Mirror { session, subscription } = &h.controller.slot(SlotId::Mirror).session
        else {
            panic!("левый слот должен зеркалировать");
        };
        assert!(subscription.is_some());
        let thumbnail = h.fake.thumbnail(session.thumbnail).unwrap();
        assert_eq!(thumbnail.destination, h.layout.top_level);
        let props = thumbnail.properties.unwrap();
        assert_eq!(props.destination, Rect::new(0, 0, 796, 900));
        assert_eq!(props.source, Rect::new(0, 0, 1920, 1080));
        assert!(h.fake.notices().is_empty());
    }

    #[test]
    fn test_mirror_replacement_drops_previous_thumbnail() {
        let mut h = Harness::new();
        let first = h.foreign("First");
        let second = h.foreign("Second");
        h.attach(SlotId::Mirror, first);
        h.attach(SlotId::Mirror, second);

        assert_eq!(h.fake.thumbnail_count(), 1);
        assert_eq!(h.fake.hook_count(), 1);
        assert_eq!(h.controller.slot(SlotId::Mirror).session.handle(), second);
    }

    #[test]
    fn test_decimal_and_hex_text_attach_the_same_window() {
        let mut h = Harness::new();
        let source = h.foreign("Source");
        h.send(UiEvent::AttachRequested {
            slot: SlotId::Mirror,
            handle_text: format!(" {} ", source.raw()),
        });
        assert_eq!(h.controller.slot(SlotId::Mirror).session.handle(), source);

        h.send(UiEvent::AttachRequested {
            slot: SlotId::Mirror,
            handle_text: format!("0x{:x}", source.raw()),
        });
        assert_eq!(h.fake.calls("register_thumbnail"), 1);
    }

    #[test]
    fn test_invalid_text_shows_notice_and_keeps_slot_empty() {
        let mut h = Harness::new();
        h.send(UiEvent::AttachRequested {
            slot: SlotId::Embed,
            handle_text: "окно".to_string(),
        });
        h.send(UiEvent::AttachRequested {
            slot: SlotId::Mirror,
            handle_text: "0x7FFF0000".to_string(),
        });

        assert_eq!(h.fake.notices().len(), 2);
        assert!(h.controller.slot(SlotId::Embed).session.is_empty());
        assert!(h.controller.slot(SlotId::Mirror).session.is_empty());
    }

    #[test]
    fn test_own_windows_are_rejected() {
        let mut h = Harness::new();
        let top_level = h.layout.top_level;
        let panel = h.panel();
        h.attach(SlotId::Mirror, top_level);
        h.attach(SlotId::Embed, panel);

        assert_eq!(h.fake.notices().len(), 2);
        assert_eq!(h.fake.calls("register_thumbnail"), 0);
        assert_eq!(h.fake.calls("set_parent"), 0);
    }

    #[test]
    fn test_same_window_cannot_fill_both_slots() {
        let mut h = Harness::new();
        let window = h.foreign("Shared");
        h.attach(SlotId::Mirror, window);
        h.attach(SlotId::Embed, window);

        assert_eq!(h.fake.notices().len(), 1);
        assert!(h.controller.slot(SlotId::Embed).session.is_empty());
    }

    #[test]
    fn test_embed_resizes_child_and_creates_markers_on_top() {
        let mut h = Harness::new();
        let child = h.foreign("Child");
        h.attach(SlotId::Embed, child);

        let panel = h.panel();
        assert_eq!(h.fake.parent(child), panel);
        assert_eq!(h.fake.client_size(child).unwrap(), Size::new(796, 900));

        let overlay = h.controller.slot(SlotId::Embed).overlay.as_ref().unwrap();
        let order = h.fake.children_in_z_order(panel);
        assert_eq!(order.len(), 3);
        assert_eq!(order.last(), Some(&child));
        for marker in &overlay.markers {
            assert!(order[..2].contains(&marker.window));
        }
        assert!(h.controller.is_zorder_timer_armed());
    }

    #[test]
    fn test_replacing_embedded_window_releases_previous() {
        let mut h = Harness::new();
        let first = h.foreign("First");
        let second = h.foreign("Second");
        let first_style = h.fake.style_of(first).unwrap();

        h.attach(SlotId::Embed, first);
        let markers_before: Vec<WindowHandle> = h
            .controller
            .slot(SlotId::Embed)
            .overlay
            .as_ref()
            .unwrap()
            .markers
            .iter()
            .map(|m| m.window)
            .collect();
        h.attach(SlotId::Embed, second);

        assert!(h.fake.parent(first).is_empty());
        assert_eq!(h.fake.style_of(first), Some(first_style));
        assert_eq!(h.fake.parent(second), h.panel());
        assert_eq!(h.fake.hook_count(), 1);

        let markers_after: Vec<WindowHandle> = h
            .controller
            .slot(SlotId::Embed)
            .overlay
            .as_ref()
            .unwrap()
            .markers
            .iter()
            .map(|m| m.window)
            .collect();
        assert_eq!(markers_before, markers_after);
        assert_eq!(h.fake.children_in_z_order(h.panel()).last(), Some(&second));
    }

    #[test]
    fn test_destroyed_window_clears_slot() {
        let mut h = Harness::new();
        let child = h.foreign("Child");
        let source = h.foreign("Source");
        h.attach(SlotId::Embed, child);
        h.attach(SlotId::Mirror, source);

        h.fake.close_window(child);
        h.fake.close_window(source);
        h.drain();

        assert!(h.controller.slot(SlotId::Embed).session.is_empty());
        assert!(h.controller.slot(SlotId::Embed).overlay.is_none());
        assert!(h.controller.slot(SlotId::Mirror).session.is_empty());
        assert_eq!(h.fake.hook_count(), 0);
        assert_eq!(h.fake.thumbnail_count(), 0);
        assert!(h.fake.children_in_z_order(h.panel()).is_empty());
    }

    #[test]
    fn test_stale_notification_is_ignored() {
        let mut h = Harness::new();
        let first = h.foreign("First");
        let second = h.foreign("Second");
        h.attach(SlotId::Embed, first);
        h.attach(SlotId::Embed, second);

        h.send(UiEvent::ForeignWindowChanged {
            slot: SlotId::Embed,
            handle: first,
            kind: WindowEventKind::Destroyed,
        });
        assert_eq!(h.controller.slot(SlotId::Embed).session.handle(), second);
    }

    #[test]
    fn test_embed_failure_leaves_slot_empty() {
        let mut h = Harness::new();
        let child = h.foreign("Child");
        h.fake.fail("set_parent");
        h.attach(SlotId::Embed, child);

        assert_eq!(h.fake.notices().len(), 1);
        assert!(h.controller.slot(SlotId::Embed).session.is_empty());
        assert!(h.controller.slot(SlotId::Embed).overlay.is_none());
        assert_eq!(h.fake.hook_count(), 0);
        assert!(!h.controller.is_zorder_timer_armed());
    }

    #[test]
    fn test_lost_parent_is_repaired_on_notification() {
        let mut h = Harness::new();
        let child = h.foreign("Child");
        h.attach(SlotId::Embed, child);

        h.fake.set_parent(child, WindowHandle::NULL).unwrap();
        h.fake.emit(child, WindowEventKind::LocationChanged);
        h.drain();

        assert_eq!(h.fake.parent(child), h.panel());
        assert_eq!(h.fake.children_in_z_order(h.panel()).last(), Some(&child));
    }

    #[test]
    fn test_host_resize_relayouts_both_slots() {
        let mut h = Harness::new();
        let child = h.foreign("Child");
        let source = h.fake.add_window("Video", 7, Rect::new(0, 0, 1920, 1080));
        h.attach(SlotId::Embed, child);
        h.attach(SlotId::Mirror, source);

        let mut layout = h.layout;
        layout.left.size = Size::new(400, 300);
        layout.right.offset = Point::new(408, 0);
        layout.right.size = Size::new(400, 300);
        h.send(UiEvent::HostLayoutChanged(layout));

        assert_eq!(h.fake.client_size(child).unwrap(), Size::new(400, 300));
        let SlotSession::Mirror { session, .. } = &h.controller.slot(SlotId::Mirror).session else {
            panic!("левый слот должен зеркалировать");
        };
        assert_eq!(session.destination_rect, Some(Rect::new(0, 0, 400, 300)));
        for marker in &h.controller.slot(SlotId::Embed).overlay.as_ref().unwrap().markers {
            assert!(marker.position.x + marker.size.width <= 400);
        }
    }

    #[test]
    fn test_host_resize_puts_markers_back_on_top() {
        let mut h = Harness::new();
        let child = h.foreign("Child");
        h.attach(SlotId::Embed, child);
        h.fake.set_z_order(child, ZOrder::Top).unwrap();
        let before = h.fake.calls("set_z_order");

        let mut layout = h.layout;
        layout.right.size = Size::new(500, 500);
        h.send(UiEvent::HostLayoutChanged(layout));

        assert_eq!(h.fake.calls("set_z_order"), before + 3);
        assert_eq!(h.fake.children_in_z_order(h.panel()).last(), Some(&child));
    }

    #[test]
    fn test_child_resize_notification_corrects_z_order() {
        let mut h = Harness::new();
        let child = h.foreign("Child");
        h.attach(SlotId::Embed, child);

        // Приложение само сменило размер и вылезло поверх маркеров
        h.fake.set_client_size(child, Size::new(300, 200));
        h.fake.set_z_order(child, ZOrder::Top).unwrap();
        h.fake.emit(child, WindowEventKind::LocationChanged);
        h.drain();

        assert_eq!(h.fake.client_size(child).unwrap(), Size::new(796, 900));
        assert_eq!(h.fake.children_in_z_order(h.panel()).last(), Some(&child));
    }

    #[test]
    fn test_minimized_host_keeps_child_and_markers() {
        let mut h = Harness::new();
        let child = h.foreign("Child");
        h.attach(SlotId::Embed, child);
        let marker = MarkerId(0);
        h.send(UiEvent::MarkerPointerDown {
            marker,
            at: Point::new(0, 0),
        });
        h.send(UiEvent::MarkerPointerMove {
            marker,
            at: Point::new(300, 300),
        });
        h.send(UiEvent::MarkerPointerUp { marker });
        let dragged = Point::new(340, 340);
        let first_marker =
            |h: &Harness| h.controller.slot(SlotId::Embed).overlay.as_ref().unwrap().markers[0].clone();
        let position = |h: &Harness| first_marker(h).position;
        assert_eq!(position(&h), dragged);

        let mut minimized = h.layout;
        minimized.left.size = Size::new(0, 0);
        minimized.right.size = Size::new(0, 0);
        h.send(UiEvent::HostLayoutChanged(minimized));
        assert_eq!(h.fake.client_size(child).unwrap(), Size::new(796, 900));
        assert_eq!(position(&h), dragged);

        let restored = h.layout;
        h.send(UiEvent::HostLayoutChanged(restored));
        assert_eq!(position(&h), dragged);
        assert_eq!(h.fake.position_of(first_marker(&h).window), Some(dragged));
    }

    #[test]
    fn test_embedded_child_is_moved_to_panel_origin() {
        let mut h = Harness::new();
        // Размер уже совпадает с панелью, положение нет
        let child = h.fake.add_window("Child", 42, Rect::new(100, 100, 896, 1000));
        h.attach(SlotId::Embed, child);

        assert_eq!(h.fake.position_of(child), Some(Point::default()));
        assert_eq!(h.fake.client_size(child).unwrap(), Size::new(796, 900));
    }

    #[test]
    fn test_marker_drag_and_activate() {
        let mut h = Harness::new();
        let child = h.foreign("Child");
        h.attach(SlotId::Embed, child);
        let marker = MarkerId(0);

        h.send(UiEvent::MarkerPointerDown {
            marker,
            at: Point::new(18, 18),
        });
        h.send(UiEvent::MarkerPointerMove {
            marker,
            at: Point::new(-500, 118),
        });
        h.send(UiEvent::MarkerPointerUp { marker });
        h.send(UiEvent::MarkerActivate { marker });

        let moved = h.controller.slot(SlotId::Embed).overlay.as_ref().unwrap().markers[0].clone();
        assert_eq!(moved.position, Point::new(0, 140));
        assert_eq!(h.fake.position_of(moved.window), Some(Point::new(0, 140)));

        let center = Point::new(18, 158);
        assert_eq!(
            h.fake.posted(child),
            vec![
                (PointerMessage::Move, center),
                (PointerMessage::LeftButtonDown, center),
                (PointerMessage::LeftButtonUp, center),
            ]
        );
    }

    #[test]
    fn test_activate_without_embedded_window_shows_notice() {
        let mut h = Harness::new();
        h.send(UiEvent::MarkerActivate { marker: MarkerId(0) });
        assert_eq!(h.fake.notices().len(), 1);
    }

    #[test]
    fn test_detach_and_shutdown_return_windows() {
        let mut h = Harness::new();
        let child = h.foreign("Child");
        let source = h.foreign("Source");
        h.attach(SlotId::Embed, child);
        h.attach(SlotId::Mirror, source);

        h.send(UiEvent::DetachRequested { slot: SlotId::Mirror });
        assert_eq!(h.fake.thumbnail_count(), 0);

        h.controller.shutdown();
        assert!(h.fake.parent(child).is_empty());
        assert_eq!(h.fake.hook_count(), 0);
        assert!(h.fake.children_in_z_order(h.panel()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pick_flow_attaches_window_under_cursor() {
        let mut h = Harness::new();
        let target = h.fake.add_window("Target", 9, Rect::new(2000, 0, 2400, 400));

        h.send(UiEvent::PickRequested { slot: SlotId::Mirror });
        assert_eq!(h.fake.notices().len(), 1);
        assert!(h.controller.is_pick_pending());

        // Второй запрос, пока первый не завершён
        h.send(UiEvent::PickRequested { slot: SlotId::Embed });
        assert_eq!(h.fake.notices().len(), 2);

        h.fake.set_cursor(Some(Point::new(2100, 100)));
        let event = h.rx.recv().await.unwrap();
        h.send(event);

        assert!(!h.controller.is_pick_pending());
        assert_eq!(h.controller.slot(SlotId::Mirror).session.handle(), target);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_pick_attaches_nothing() {
        let mut h = Harness::new();
        h.fake.add_window("Target", 9, Rect::new(2000, 0, 2400, 400));
        h.fake.set_cursor(Some(Point::new(2100, 100)));

        h.send(UiEvent::PickRequested { slot: SlotId::Embed });
        h.send(UiEvent::CancelPick);
        tokio::time::sleep(Duration::from_secs(3)).await;
        h.drain();

        assert!(h.controller.slot(SlotId::Embed).session.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_corrects_z_order_periodically() {
        let h = Harness::new();
        let child = h.foreign("Child");
        let fake = h.fake.clone();
        let (tx, rx) = ui_channel();
        let config = Arc::new(Config::default());
        let layout = fake.create_host_window(&config.host).unwrap();
        let controller = CompositionController::new(fake.clone(), config, tx.clone(), layout);
        let task = tokio::spawn(controller.run(rx));

        tx.send(UiEvent::AttachRequested {
            slot: SlotId::Embed,
            handle_text: child.to_string(),
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after_attach = fake.calls("set_z_order");
        assert_eq!(after_attach, 3);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(fake.calls("set_z_order") >= after_attach + 6);

        tx.send(UiEvent::Shutdown).unwrap();
        task.await.unwrap().unwrap();
        // Сначала окно возвращено на рабочий стол, потом разрушен хост
        assert!(fake.is_window(child));
        assert!(fake.parent(child).is_empty());
        assert!(!fake.is_window(layout.top_level));
    }
}
