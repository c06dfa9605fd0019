//! WindowManagerPort: граница между логикой компоновки и оконной системой.
//!
//! Сервисы (`crate::services`) обращаются к оконному менеджеру ТОЛЬКО через этот
//! trait. Реальная реализация живёт в `win32` (только Windows), эмуляция в памяти
//! в `dry_run`; она же используется во всех тестах.

mod dry_run;
#[cfg(windows)]
mod win32;

pub use dry_run::{FakeThumbnail, FakeWindowManager};

use crate::config::HostConfig;
use crate::error::Result;
use crate::events::{
    HostLayout, MarkerId, Point, Rect, Rgb, Size, UiSender, WindowEvent, WindowHandle, WindowInfo,
};
use std::fmt;
use std::sync::Arc;

/// Регистрация живой миниатюры DWM
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ThumbnailId(pub isize);

impl ThumbnailId {
    pub const NONE: ThumbnailId = ThumbnailId(0);

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Установленный хук уведомлений оконного менеджера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub u64);

/// Биты стиля окна (GWL_STYLE)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WindowStyle(pub u32);

impl WindowStyle {
    pub const CAPTION: u32 = 0x00C0_0000;
    pub const THICKFRAME: u32 = 0x0004_0000;
    pub const MINIMIZE: u32 = 0x2000_0000;
    pub const MAXIMIZE: u32 = 0x0100_0000;
    pub const SYSMENU: u32 = 0x0008_0000;

    /// Всё, что снимается с окна при встраивании
    pub const DECORATIONS: u32 =
        Self::CAPTION | Self::THICKFRAME | Self::MINIMIZE | Self::MAXIMIZE | Self::SYSMENU;

    pub fn has_decorations(&self) -> bool {
        self.0 & Self::DECORATIONS != 0
    }

    pub fn without_decorations(&self) -> Self {
        Self(self.0 & !Self::DECORATIONS)
    }
}

impl fmt::Display for WindowStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Позиция в стопке соседних окон
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZOrder {
    Top,
    Bottom,
}

/// Синтетическое сообщение указателя, адресованное конкретному окну
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerMessage {
    Move,
    LeftButtonDown,
    LeftButtonUp,
}

/// Свойства миниатюры, передаваемые компоновщику
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailProperties {
    pub destination: Rect,
    pub source: Rect,
    pub visible: bool,
    pub source_client_area_only: bool,
}

/// Описание маркера, который нужно создать поверх встроенного окна
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSpec {
    pub id: MarkerId,
    pub label: String,
    pub color: Rgb,
    pub size: Size,
    pub position: Point,
    pub alpha: u8,
}

/// Получатель уведомлений оконного менеджера.
///
/// Вызывается из насоса сообщений UI-потока в произвольный момент.
pub type WindowEventSink = Arc<dyn Fn(WindowEvent) + Send + Sync>;

/// Возможности оконной системы, нужные движку компоновки
pub trait WindowManagerPort: Send + Sync {
    fn backend_name(&self) -> &'static str;

    // Поиск окон
    fn list_top_level_windows(&self) -> Result<Vec<WindowInfo>>;
    fn cursor_position(&self) -> Option<Point>;
    fn window_at_point(&self, point: Point) -> WindowHandle;
    /// Корневой предок окна; для окна верхнего уровня оно само
    fn root_ancestor(&self, handle: WindowHandle) -> WindowHandle;
    fn is_window(&self, handle: WindowHandle) -> bool;
    /// Текущий родитель; пустой дескриптор, если окно верхнего уровня
    fn parent(&self, handle: WindowHandle) -> WindowHandle;

    // Зеркалирование (миниатюры компоновщика)
    fn register_thumbnail(&self, destination: WindowHandle, source: WindowHandle)
        -> Result<ThumbnailId>;
    fn unregister_thumbnail(&self, thumbnail: ThumbnailId) -> Result<()>;
    fn thumbnail_source_size(&self, thumbnail: ThumbnailId) -> Result<Size>;
    fn update_thumbnail(&self, thumbnail: ThumbnailId, props: &ThumbnailProperties) -> Result<()>;

    // Встраивание
    fn disable_transitions(&self, handle: WindowHandle) -> Result<()>;
    fn window_style(&self, handle: WindowHandle) -> Result<WindowStyle>;
    fn set_window_style(&self, handle: WindowHandle, style: WindowStyle) -> Result<()>;
    /// Пустой `parent` возвращает окно рабочему столу
    fn set_parent(&self, child: WindowHandle, parent: WindowHandle) -> Result<()>;
    /// Применить новый стиль и родителя без перемещения и изменения размера, показать окно
    fn refresh_frame(&self, handle: WindowHandle) -> Result<()>;
    fn client_size(&self, handle: WindowHandle) -> Result<Size>;
    /// Положение окна в клиентских координатах родителя
    fn window_origin(&self, handle: WindowHandle) -> Result<Point>;
    /// Поставить окно в начало координат родителя и задать размер без активации
    /// и WM_WINDOWPOSCHANGING
    fn resize(&self, handle: WindowHandle, size: Size) -> Result<()>;

    // Overlay и ввод
    fn create_marker(&self, host: WindowHandle, spec: &MarkerSpec) -> Result<WindowHandle>;
    fn move_window(&self, handle: WindowHandle, position: Point) -> Result<()>;
    /// Разрушает окно вместе со всеми дочерними
    fn destroy_window(&self, handle: WindowHandle) -> Result<()>;
    /// Сменить место в стопке соседей без активации
    fn set_z_order(&self, handle: WindowHandle, order: ZOrder) -> Result<()>;
    fn set_layered_alpha(&self, handle: WindowHandle, alpha: u8) -> Result<()>;
    fn set_foreground(&self, handle: WindowHandle) -> Result<()>;
    /// Поставить сообщение указателя в очередь окна (в клиентских координатах окна)
    fn post_pointer(&self, handle: WindowHandle, message: PointerMessage, at: Point) -> Result<()>;

    // Уведомления
    fn install_event_hook(&self, sink: WindowEventSink) -> Result<HookId>;
    fn remove_event_hook(&self, hook: HookId) -> Result<()>;

    // Граница с UI
    fn create_host_window(&self, config: &HostConfig) -> Result<HostLayout>;
    fn show_notice(&self, message: &str);
    /// Обработать накопившиеся нативные сообщения. `false`, если хост-окно закрыто.
    fn pump_messages(&self) -> bool;
}

/// Разделить клиентскую область хоста на левую и правую панели
pub fn split_host_area(client: Size, gap: i32) -> (Rect, Rect) {
    let gap = gap.max(0).min(client.width.max(0));
    let left_width = ((client.width - gap) / 2).max(0);
    let right_left = left_width + gap;
    let height = client.height.max(0);

    let left = Rect::new(0, 0, left_width, height);
    let right = Rect::new(right_left, 0, client.width.max(right_left), height);
    (left, right)
}

/// Выбрать реализацию оконного менеджера по флагу dry_run
pub fn create_window_manager(
    events: UiSender,
    dry_run: bool,
) -> Result<Arc<dyn WindowManagerPort>> {
    if dry_run {
        drop(events);
        return Ok(Arc::new(FakeWindowManager::with_demo_windows()));
    }

    #[cfg(windows)]
    {
        Ok(Arc::new(win32::Win32WindowManager::new(events)?))
    }

    #[cfg(not(windows))]
    {
        drop(events);
        Err(crate::compose_error!(
            service_unavailable,
            "Win32 backend доступен только в Windows, используйте --dry-run"
        ))
    }
}
