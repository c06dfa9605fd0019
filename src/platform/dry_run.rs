use super::{
    split_host_area, HookId, MarkerSpec, PointerMessage, ThumbnailId, ThumbnailProperties,
    WindowEventSink, WindowManagerPort, WindowStyle, ZOrder,
};
use crate::compose_error;
use crate::config::HostConfig;
use crate::error::{ComposeError, Result};
use crate::events::{
    HostLayout, HostRegion, Point, Rect, Size, WindowEvent, WindowEventKind, WindowHandle,
    WindowInfo,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicIsize, AtomicU64, Ordering};
use tracing::{debug, info};

const DEFAULT_STYLE: u32 = 0x10CF_0000; // WS_OVERLAPPEDWINDOW | WS_VISIBLE

#[derive(Debug, Clone)]
struct FakeWindow {
    title: String,
    pid: u32,
    visible: bool,
    parent: WindowHandle,
    style: WindowStyle,
    /// Положение в клиентских координатах родителя (или экрана для окон верхнего уровня)
    bounds: Rect,
    alpha: Option<u8>,
    transitions_disabled: bool,
    posted: Vec<(PointerMessage, Point)>,
}

/// Состояние миниатюры в эмуляции
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeThumbnail {
    pub destination: WindowHandle,
    pub source: WindowHandle,
    pub properties: Option<ThumbnailProperties>,
}

/// Оконный менеджер в памяти: режим --dry-run и тесты.
///
/// Хранит дерево окон, стопку z-order, миниатюры и хуки. Каждая операция
/// учитывается в счётчике вызовов, а любую можно заставить завершиться ошибкой.
pub struct FakeWindowManager {
    windows: DashMap<WindowHandle, FakeWindow>,
    // Глобальный порядок отрисовки, от переднего к заднему
    z_stack: Mutex<Vec<WindowHandle>>,
    thumbnails: Mutex<HashMap<ThumbnailId, FakeThumbnail>>,
    hooks: Mutex<Vec<(HookId, WindowEventSink)>>,
    notices: Mutex<Vec<String>>,
    cursor: Mutex<Option<Point>>,
    foreground: Mutex<WindowHandle>,
    calls: DashMap<&'static str, usize>,
    failing: Mutex<HashSet<&'static str>>,
    next_handle: AtomicIsize,
    next_thumbnail: AtomicIsize,
    next_hook: AtomicU64,
    verbose: bool,
}

impl Default for FakeWindowManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWindowManager {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
            z_stack: Mutex::new(Vec::new()),
            thumbnails: Mutex::new(HashMap::new()),
            hooks: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
            cursor: Mutex::new(None),
            foreground: Mutex::new(WindowHandle::NULL),
            calls: DashMap::new(),
            failing: Mutex::new(HashSet::new()),
            next_handle: AtomicIsize::new(0x1000),
            next_thumbnail: AtomicIsize::new(1),
            next_hook: AtomicU64::new(1),
            verbose: false,
        }
    }

    /// Эмуляция для --dry-run: несколько «чужих» окон и курсор над одним из них
    pub fn with_demo_windows() -> Self {
        let mut fake = Self::new();
        fake.verbose = true;
        fake.add_window("Terminal - dry_run", 4101, Rect::new(0, 0, 800, 600));
        let browser = fake.add_window("Browser - dry_run", 4102, Rect::new(200, 100, 2120, 1180));
        fake.add_window("Editor - dry_run", 4103, Rect::new(400, 300, 1424, 1068));
        fake.set_cursor(Some(Point::new(1800, 900)));
        info!("Dry-run: эмулируем окна, курсор над {}", browser);
        fake
    }

    /// Добавить видимое окно верхнего уровня поверх остальных
    pub fn add_window(&self, title: &str, pid: u32, bounds: Rect) -> WindowHandle {
        let handle = self.spawn(FakeWindow {
            title: title.to_string(),
            pid,
            visible: true,
            parent: WindowHandle::NULL,
            style: WindowStyle(DEFAULT_STYLE),
            bounds,
            alpha: None,
            transitions_disabled: false,
            posted: Vec::new(),
        });
        self.emit(handle, WindowEventKind::Created);
        handle
    }

    /// Добавить дочернее окно (например, кнопку внутри чужого приложения)
    pub fn add_child(&self, parent: WindowHandle, bounds: Rect) -> WindowHandle {
        self.spawn(FakeWindow {
            title: String::new(),
            pid: self.windows.get(&parent).map(|w| w.pid).unwrap_or(0),
            visible: true,
            parent,
            style: WindowStyle(0x5000_0000), // WS_CHILD | WS_VISIBLE
            bounds,
            alpha: None,
            transitions_disabled: false,
            posted: Vec::new(),
        })
    }

    /// Чужой процесс закрыл окно
    pub fn close_window(&self, handle: WindowHandle) {
        self.windows.remove(&handle);
        self.z_stack.lock().retain(|h| *h != handle);
        self.emit(handle, WindowEventKind::Destroyed);
    }

    pub fn set_visible(&self, handle: WindowHandle, visible: bool) {
        if let Some(mut window) = self.windows.get_mut(&handle) {
            window.visible = visible;
        }
    }

    pub fn set_title(&self, handle: WindowHandle, title: &str) {
        if let Some(mut window) = self.windows.get_mut(&handle) {
            window.title = title.to_string();
        }
    }

    /// Чужое окно само изменило размер клиентской области
    pub fn set_client_size(&self, handle: WindowHandle, size: Size) {
        if let Some(mut window) = self.windows.get_mut(&handle) {
            window.bounds = Rect::from_origin_size(window.bounds.origin(), size);
        }
    }

    pub fn set_cursor(&self, position: Option<Point>) {
        *self.cursor.lock() = position;
    }

    /// Доставить уведомление всем установленным хукам
    pub fn emit(&self, handle: WindowHandle, kind: WindowEventKind) {
        // Копия списка: получатель может сам снять хук
        let sinks: Vec<WindowEventSink> =
            self.hooks.lock().iter().map(|(_, sink)| sink.clone()).collect();
        for sink in sinks {
            sink(WindowEvent::new(handle, kind));
        }
    }

    /// Следующий вызов операции `op` (и все последующие) завершится ошибкой
    pub fn fail(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    pub fn recover(&self, op: &'static str) {
        self.failing.lock().remove(op);
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.calls.get(op).map(|c| *c).unwrap_or(0)
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().clone()
    }

    pub fn thumbnail(&self, id: ThumbnailId) -> Option<FakeThumbnail> {
        self.thumbnails.lock().get(&id).cloned()
    }

    pub fn thumbnail_count(&self) -> usize {
        self.thumbnails.lock().len()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn style_of(&self, handle: WindowHandle) -> Option<WindowStyle> {
        self.windows.get(&handle).map(|w| w.style)
    }

    pub fn position_of(&self, handle: WindowHandle) -> Option<Point> {
        self.windows.get(&handle).map(|w| w.bounds.origin())
    }

    pub fn alpha_of(&self, handle: WindowHandle) -> Option<u8> {
        self.windows.get(&handle).and_then(|w| w.alpha)
    }

    pub fn transitions_disabled(&self, handle: WindowHandle) -> bool {
        self.windows
            .get(&handle)
            .map(|w| w.transitions_disabled)
            .unwrap_or(false)
    }

    pub fn posted(&self, handle: WindowHandle) -> Vec<(PointerMessage, Point)> {
        self.windows
            .get(&handle)
            .map(|w| w.posted.clone())
            .unwrap_or_default()
    }

    pub fn foreground(&self) -> WindowHandle {
        *self.foreground.lock()
    }

    /// Дети `parent` от переднего к заднему
    pub fn children_in_z_order(&self, parent: WindowHandle) -> Vec<WindowHandle> {
        self.z_stack
            .lock()
            .iter()
            .copied()
            .filter(|h| self.windows.get(h).map(|w| w.parent == parent).unwrap_or(false))
            .collect()
    }

    fn spawn(&self, window: FakeWindow) -> WindowHandle {
        let handle = WindowHandle(self.next_handle.fetch_add(0x10, Ordering::Relaxed));
        self.windows.insert(handle, window);
        self.z_stack.lock().insert(0, handle);
        handle
    }

    fn record(&self, op: &'static str) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        if self.verbose {
            debug!("[DRY RUN] {}", op);
        }
        if self.failing.lock().contains(op) {
            return Err(compose_error!(window_manager, "{} отклонён (эмуляция)", op));
        }
        Ok(())
    }

    fn require(&self, handle: WindowHandle) -> Result<()> {
        if handle.is_empty() {
            return ComposeError::empty_handle();
        }
        if !self.windows.contains_key(&handle) {
            return Err(ComposeError::StaleWindow(handle));
        }
        Ok(())
    }

    fn screen_origin(&self, handle: WindowHandle) -> Point {
        let mut origin = Point::default();
        let mut current = handle;
        while let Some(window) = self.windows.get(&current).map(|w| w.clone()) {
            origin = origin + window.bounds.origin();
            current = window.parent;
        }
        origin
    }
}

impl WindowManagerPort for FakeWindowManager {
    fn backend_name(&self) -> &'static str {
        "dry-run"
    }

    fn list_top_level_windows(&self) -> Result<Vec<WindowInfo>> {
        self.record("list_top_level_windows")?;
        let stack = self.z_stack.lock().clone();
        Ok(stack
            .into_iter()
            .filter_map(|handle| {
                let window = self.windows.get(&handle)?;
                let listed = window.parent.is_empty()
                    && window.visible
                    && !window.title.trim().is_empty();
                listed.then(|| WindowInfo::new(handle, window.title.clone()).with_pid(window.pid))
            })
            .collect())
    }

    fn cursor_position(&self) -> Option<Point> {
        *self.cursor.lock()
    }

    fn window_at_point(&self, point: Point) -> WindowHandle {
        let stack = self.z_stack.lock().clone();
        // Дочерние окна вставлены перед родителями, поэтому первое попадание самое глубокое
        stack
            .into_iter()
            .find(|handle| {
                let Some(window) = self.windows.get(handle).map(|w| w.clone()) else {
                    return false;
                };
                let screen = Rect::from_origin_size(self.screen_origin(*handle), window.bounds.size());
                window.visible && screen.contains(point)
            })
            .unwrap_or(WindowHandle::NULL)
    }

    fn root_ancestor(&self, handle: WindowHandle) -> WindowHandle {
        let mut current = handle;
        loop {
            match self.windows.get(&current).map(|w| w.parent) {
                Some(parent) if !parent.is_empty() => current = parent,
                Some(_) => return current,
                None => return WindowHandle::NULL,
            }
        }
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        !handle.is_empty() && self.windows.contains_key(&handle)
    }

    fn parent(&self, handle: WindowHandle) -> WindowHandle {
        self.windows
            .get(&handle)
            .map(|w| w.parent)
            .unwrap_or(WindowHandle::NULL)
    }

    fn register_thumbnail(
        &self,
        destination: WindowHandle,
        source: WindowHandle,
    ) -> Result<ThumbnailId> {
        self.record("register_thumbnail")?;
        self.require(destination)?;
        self.require(source)?;
        let id = ThumbnailId(self.next_thumbnail.fetch_add(1, Ordering::Relaxed));
        self.thumbnails.lock().insert(
            id,
            FakeThumbnail {
                destination,
                source,
                properties: None,
            },
        );
        Ok(id)
    }

    fn unregister_thumbnail(&self, thumbnail: ThumbnailId) -> Result<()> {
        self.record("unregister_thumbnail")?;
        self.thumbnails
            .lock()
            .remove(&thumbnail)
            .map(|_| ())
            .ok_or_else(|| compose_error!(compositor, "миниатюра {:?} не зарегистрирована", thumbnail))
    }

    fn thumbnail_source_size(&self, thumbnail: ThumbnailId) -> Result<Size> {
        self.record("thumbnail_source_size")?;
        let source = self
            .thumbnails
            .lock()
            .get(&thumbnail)
            .map(|t| t.source)
            .ok_or_else(|| compose_error!(compositor, "миниатюра {:?} не зарегистрирована", thumbnail))?;
        self.windows
            .get(&source)
            .map(|w| w.bounds.size())
            .ok_or(ComposeError::StaleWindow(source))
    }

    fn update_thumbnail(&self, thumbnail: ThumbnailId, props: &ThumbnailProperties) -> Result<()> {
        self.record("update_thumbnail")?;
        let mut thumbnails = self.thumbnails.lock();
        let entry = thumbnails
            .get_mut(&thumbnail)
            .ok_or_else(|| compose_error!(compositor, "миниатюра {:?} не зарегистрирована", thumbnail))?;
        entry.properties = Some(*props);
        Ok(())
    }

    fn disable_transitions(&self, handle: WindowHandle) -> Result<()> {
        self.record("disable_transitions")?;
        self.require(handle)?;
        if let Some(mut window) = self.windows.get_mut(&handle) {
            window.transitions_disabled = true;
        }
        Ok(())
    }

    fn window_style(&self, handle: WindowHandle) -> Result<WindowStyle> {
        self.record("window_style")?;
        self.windows
            .get(&handle)
            .map(|w| w.style)
            .ok_or(ComposeError::StaleWindow(handle))
    }

    fn set_window_style(&self, handle: WindowHandle, style: WindowStyle) -> Result<()> {
        self.record("set_window_style")?;
        self.require(handle)?;
        if let Some(mut window) = self.windows.get_mut(&handle) {
            window.style = style;
        }
        Ok(())
    }

    fn set_parent(&self, child: WindowHandle, parent: WindowHandle) -> Result<()> {
        self.record("set_parent")?;
        self.require(child)?;
        if !parent.is_empty() {
            self.require(parent)?;
        }
        if let Some(mut window) = self.windows.get_mut(&child) {
            // Как и SetParent, координаты окна не пересчитываются
            window.parent = parent;
        }
        // Новый ребёнок оказывается поверх соседей
        let mut stack = self.z_stack.lock();
        stack.retain(|h| *h != child);
        stack.insert(0, child);
        Ok(())
    }

    fn refresh_frame(&self, handle: WindowHandle) -> Result<()> {
        self.record("refresh_frame")?;
        self.require(handle)?;
        self.set_visible(handle, true);
        Ok(())
    }

    fn client_size(&self, handle: WindowHandle) -> Result<Size> {
        self.record("client_size")?;
        self.windows
            .get(&handle)
            .map(|w| w.bounds.size())
            .ok_or(ComposeError::StaleWindow(handle))
    }

    fn window_origin(&self, handle: WindowHandle) -> Result<Point> {
        self.record("window_origin")?;
        self.windows
            .get(&handle)
            .map(|w| w.bounds.origin())
            .ok_or(ComposeError::StaleWindow(handle))
    }

    fn resize(&self, handle: WindowHandle, size: Size) -> Result<()> {
        self.record("resize")?;
        self.require(handle)?;
        if let Some(mut window) = self.windows.get_mut(&handle) {
            window.bounds = Rect::from_origin_size(Point::default(), size);
        }
        Ok(())
    }

    fn create_marker(&self, host: WindowHandle, spec: &MarkerSpec) -> Result<WindowHandle> {
        self.record("create_marker")?;
        self.require(host)?;
        let handle = self.spawn(FakeWindow {
            title: spec.label.clone(),
            pid: std::process::id(),
            visible: true,
            parent: host,
            style: WindowStyle(0x5000_0000),
            bounds: Rect::from_origin_size(spec.position, spec.size),
            alpha: Some(spec.alpha),
            transitions_disabled: false,
            posted: Vec::new(),
        });
        Ok(handle)
    }

    fn move_window(&self, handle: WindowHandle, position: Point) -> Result<()> {
        self.record("move_window")?;
        self.require(handle)?;
        if let Some(mut window) = self.windows.get_mut(&handle) {
            window.bounds = Rect::from_origin_size(position, window.bounds.size());
        }
        Ok(())
    }

    fn destroy_window(&self, handle: WindowHandle) -> Result<()> {
        self.record("destroy_window")?;
        self.require(handle)?;

        let mut doomed = vec![handle];
        let mut index = 0;
        while index < doomed.len() {
            let parent = doomed[index];
            doomed.extend(
                self.windows
                    .iter()
                    .filter(|entry| entry.parent == parent)
                    .map(|entry| *entry.key()),
            );
            index += 1;
        }

        for window in &doomed {
            self.windows.remove(window);
        }
        self.z_stack.lock().retain(|h| !doomed.contains(h));
        Ok(())
    }

    fn set_z_order(&self, handle: WindowHandle, order: ZOrder) -> Result<()> {
        self.record("set_z_order")?;
        self.require(handle)?;
        let mut stack = self.z_stack.lock();
        stack.retain(|h| *h != handle);
        match order {
            ZOrder::Top => stack.insert(0, handle),
            ZOrder::Bottom => stack.push(handle),
        }
        Ok(())
    }

    fn set_layered_alpha(&self, handle: WindowHandle, alpha: u8) -> Result<()> {
        self.record("set_layered_alpha")?;
        self.require(handle)?;
        if let Some(mut window) = self.windows.get_mut(&handle) {
            window.alpha = Some(alpha);
        }
        Ok(())
    }

    fn set_foreground(&self, handle: WindowHandle) -> Result<()> {
        self.record("set_foreground")?;
        self.require(handle)?;
        *self.foreground.lock() = handle;
        Ok(())
    }

    fn post_pointer(&self, handle: WindowHandle, message: PointerMessage, at: Point) -> Result<()> {
        self.record("post_pointer")?;
        self.require(handle)?;
        if let Some(mut window) = self.windows.get_mut(&handle) {
            window.posted.push((message, at));
        }
        Ok(())
    }

    fn install_event_hook(&self, sink: WindowEventSink) -> Result<HookId> {
        self.record("install_event_hook")?;
        let id = HookId(self.next_hook.fetch_add(1, Ordering::Relaxed));
        self.hooks.lock().push((id, sink));
        Ok(id)
    }

    fn remove_event_hook(&self, hook: HookId) -> Result<()> {
        self.record("remove_event_hook")?;
        self.hooks.lock().retain(|(id, _)| *id != hook);
        Ok(())
    }

    fn create_host_window(&self, config: &HostConfig) -> Result<HostLayout> {
        self.record("create_host_window")?;
        let client = Size::new(config.width, config.height);
        let top_level = self.add_window(&config.title, std::process::id(), Rect::from_origin_size(Point::default(), client));
        let (left, right) = split_host_area(client, config.gap);
        let left_panel = self.add_child(top_level, left);
        let right_panel = self.add_child(top_level, right);

        Ok(HostLayout {
            top_level,
            left: HostRegion {
                handle: left_panel,
                offset: left.origin(),
                size: left.size(),
            },
            right: HostRegion {
                handle: right_panel,
                offset: right.origin(),
                size: right.size(),
            },
        })
    }

    fn show_notice(&self, message: &str) {
        info!("[DRY RUN] Уведомление оператору: {}", message);
        self.notices.lock().push(message.to_string());
    }

    fn pump_messages(&self) -> bool {
        true
    }
}
