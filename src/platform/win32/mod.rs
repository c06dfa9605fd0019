//! Реализация `WindowManagerPort` поверх Win32 и DWM.

mod hook;
mod host;

use super::{
    HookId, MarkerSpec, PointerMessage, ThumbnailId, ThumbnailProperties, WindowEventSink,
    WindowManagerPort, WindowStyle, ZOrder,
};
use crate::config::HostConfig;
use crate::error::{ComposeError, Result};
use crate::events::{HostLayout, Point, Rect, Size, UiSender, WindowHandle, WindowInfo};
use std::ffi::c_void;
use tracing::{debug, info, warn};
use windows::Win32::Foundation::{BOOL, COLORREF, HWND, LPARAM, POINT, RECT, TRUE, WPARAM};
use windows::Win32::Graphics::Dwm::{
    DwmQueryThumbnailSourceSize, DwmRegisterThumbnail, DwmSetWindowAttribute,
    DwmUnregisterThumbnail, DwmUpdateThumbnailProperties, DWMWA_TRANSITIONS_FORCEDISABLED,
    DWM_THUMBNAIL_PROPERTIES, DWM_TNP_RECTDESTINATION, DWM_TNP_RECTSOURCE,
    DWM_TNP_SOURCECLIENTAREAONLY, DWM_TNP_VISIBLE,
};
use windows::Win32::Graphics::Gdi::ScreenToClient;
use windows::Win32::UI::HiDpi::{
    SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
};
use windows::Win32::UI::WindowsAndMessaging::{
    DestroyWindow, EnumWindows, GetAncestor, GetClientRect, GetCursorPos, GetDesktopWindow,
    GetWindowLongW, GetWindowRect, GetWindowTextW, GetWindowThreadProcessId, IsWindow, IsWindowVisible,
    PostMessageW, SetForegroundWindow, SetLayeredWindowAttributes, SetParent, SetWindowLongW,
    SetWindowPos, WindowFromPoint, GA_PARENT, GA_ROOT, GWL_EXSTYLE, GWL_STYLE, HWND_BOTTOM, HWND_TOP, LWA_ALPHA,
    SWP_FRAMECHANGED, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSENDCHANGING, SWP_NOSIZE, SWP_NOZORDER,
    SWP_SHOWWINDOW, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MOUSEMOVE, WS_EX_LAYERED,
};

const MK_LBUTTON: usize = 0x0001;

pub(crate) fn to_hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.raw() as *mut c_void)
}

pub(crate) fn from_hwnd(hwnd: HWND) -> WindowHandle {
    WindowHandle(hwnd.0 as isize)
}

/// Строка с завершающим нулём для W-функций
pub(crate) fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

fn to_rect(rect: Rect) -> RECT {
    RECT {
        left: rect.left,
        top: rect.top,
        right: rect.right,
        bottom: rect.bottom,
    }
}

/// lParam сообщений мыши: y в старшем слове, x в младшем
fn pointer_lparam(at: Point) -> LPARAM {
    let packed = ((at.y as u32 & 0xFFFF) << 16) | (at.x as u32 & 0xFFFF);
    LPARAM(packed as isize)
}

/// Расширенный стиль с WS_EX_LAYERED, если флаг слетел
fn restore_layered(ex_style: u32) -> Option<u32> {
    (ex_style & WS_EX_LAYERED.0 == 0).then_some(ex_style | WS_EX_LAYERED.0)
}

pub struct Win32WindowManager;

impl Win32WindowManager {
    pub fn new(events: UiSender) -> Result<Self> {
        // Координаты DWM и SetWindowPos должны совпадать на мониторах с масштабом
        if let Err(e) = unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) } {
            warn!("Не удалось включить per-monitor DPI: {}", e);
        }
        host::register_classes()?;
        host::install_sink(events);
        info!("Win32 backend инициализирован");
        Ok(Self)
    }

    fn require(&self, handle: WindowHandle) -> Result<HWND> {
        if handle.is_empty() {
            return ComposeError::empty_handle();
        }
        let hwnd = to_hwnd(handle);
        if !unsafe { IsWindow(hwnd) }.as_bool() {
            return Err(ComposeError::StaleWindow(handle));
        }
        Ok(hwnd)
    }

    fn window_title(hwnd: HWND) -> String {
        let mut buffer = [0u16; 512];
        let len = unsafe { GetWindowTextW(hwnd, &mut buffer) };
        String::from_utf16_lossy(&buffer[..len.max(0) as usize])
    }
}

unsafe extern "system" fn collect_top_level(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let found = &mut *(lparam.0 as *mut Vec<isize>);
    found.push(hwnd.0 as isize);
    TRUE
}

impl WindowManagerPort for Win32WindowManager {
    fn backend_name(&self) -> &'static str {
        "win32"
    }

    fn list_top_level_windows(&self) -> Result<Vec<WindowInfo>> {
        let mut found: Vec<isize> = Vec::new();
        unsafe {
            EnumWindows(
                Some(collect_top_level),
                LPARAM(&mut found as *mut Vec<isize> as isize),
            )?;
        }

        let windows = found
            .into_iter()
            .filter_map(|raw| {
                let hwnd = to_hwnd(WindowHandle(raw));
                if !unsafe { IsWindowVisible(hwnd) }.as_bool() {
                    return None;
                }
                let title = Self::window_title(hwnd);
                if title.trim().is_empty() {
                    return None;
                }
                let mut pid = 0u32;
                unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid)) };
                Some(WindowInfo::new(WindowHandle(raw), title).with_pid(pid))
            })
            .collect();
        Ok(windows)
    }

    fn cursor_position(&self) -> Option<Point> {
        let mut point = POINT::default();
        unsafe { GetCursorPos(&mut point) }.ok()?;
        Some(Point::new(point.x, point.y))
    }

    fn window_at_point(&self, point: Point) -> WindowHandle {
        let hwnd = unsafe { WindowFromPoint(POINT { x: point.x, y: point.y }) };
        from_hwnd(hwnd)
    }

    fn root_ancestor(&self, handle: WindowHandle) -> WindowHandle {
        if handle.is_empty() {
            return WindowHandle::NULL;
        }
        from_hwnd(unsafe { GetAncestor(to_hwnd(handle), GA_ROOT) })
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        !handle.is_empty() && unsafe { IsWindow(to_hwnd(handle)) }.as_bool()
    }

    fn parent(&self, handle: WindowHandle) -> WindowHandle {
        if handle.is_empty() {
            return WindowHandle::NULL;
        }
        let parent = unsafe { GetAncestor(to_hwnd(handle), GA_PARENT) };
        if parent.0.is_null() || parent == unsafe { GetDesktopWindow() } {
            WindowHandle::NULL
        } else {
            from_hwnd(parent)
        }
    }

    fn register_thumbnail(
        &self,
        destination: WindowHandle,
        source: WindowHandle,
    ) -> Result<ThumbnailId> {
        let destination = self.require(destination)?;
        let source = self.require(source)?;
        let id = unsafe { DwmRegisterThumbnail(destination, source)? };
        debug!("DwmRegisterThumbnail -> 0x{:X}", id);
        Ok(ThumbnailId(id))
    }

    fn unregister_thumbnail(&self, thumbnail: ThumbnailId) -> Result<()> {
        unsafe { DwmUnregisterThumbnail(thumbnail.0)? };
        Ok(())
    }

    fn thumbnail_source_size(&self, thumbnail: ThumbnailId) -> Result<Size> {
        let size = unsafe { DwmQueryThumbnailSourceSize(thumbnail.0)? };
        Ok(Size::new(size.cx, size.cy))
    }

    fn update_thumbnail(&self, thumbnail: ThumbnailId, props: &ThumbnailProperties) -> Result<()> {
        let native = DWM_THUMBNAIL_PROPERTIES {
            dwFlags: DWM_TNP_RECTDESTINATION
                | DWM_TNP_RECTSOURCE
                | DWM_TNP_VISIBLE
                | DWM_TNP_SOURCECLIENTAREAONLY,
            rcDestination: to_rect(props.destination),
            rcSource: to_rect(props.source),
            opacity: 255,
            fVisible: BOOL::from(props.visible),
            fSourceClientAreaOnly: BOOL::from(props.source_client_area_only),
        };
        unsafe { DwmUpdateThumbnailProperties(thumbnail.0, &native)? };
        Ok(())
    }

    fn disable_transitions(&self, handle: WindowHandle) -> Result<()> {
        let hwnd = self.require(handle)?;
        let disabled = TRUE;
        unsafe {
            DwmSetWindowAttribute(
                hwnd,
                DWMWA_TRANSITIONS_FORCEDISABLED,
                &disabled as *const BOOL as *const c_void,
                std::mem::size_of::<BOOL>() as u32,
            )?;
        }
        Ok(())
    }

    fn window_style(&self, handle: WindowHandle) -> Result<WindowStyle> {
        let hwnd = self.require(handle)?;
        let style = unsafe { GetWindowLongW(hwnd, GWL_STYLE) };
        Ok(WindowStyle(style as u32))
    }

    fn set_window_style(&self, handle: WindowHandle, style: WindowStyle) -> Result<()> {
        let hwnd = self.require(handle)?;
        unsafe { SetWindowLongW(hwnd, GWL_STYLE, style.0 as i32) };
        Ok(())
    }

    fn set_parent(&self, child: WindowHandle, parent: WindowHandle) -> Result<()> {
        let hwnd = self.require(child)?;
        let new_parent = if parent.is_empty() {
            HWND::default()
        } else {
            self.require(parent)?
        };

        if let Err(e) = unsafe { SetParent(hwnd, new_parent) } {
            // Пустой предыдущий родитель тоже приходит как ошибка
            if self.parent(child) != parent {
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn refresh_frame(&self, handle: WindowHandle) -> Result<()> {
        let hwnd = self.require(handle)?;
        unsafe {
            SetWindowPos(
                hwnd,
                HWND::default(),
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_FRAMECHANGED | SWP_SHOWWINDOW,
            )?;
        }
        Ok(())
    }

    fn client_size(&self, handle: WindowHandle) -> Result<Size> {
        let hwnd = self.require(handle)?;
        let mut rect = RECT::default();
        unsafe { GetClientRect(hwnd, &mut rect)? };
        Ok(Size::new(rect.right - rect.left, rect.bottom - rect.top))
    }

    fn window_origin(&self, handle: WindowHandle) -> Result<Point> {
        let hwnd = self.require(handle)?;
        let mut rect = RECT::default();
        unsafe { GetWindowRect(hwnd, &mut rect)? };
        let mut origin = POINT {
            x: rect.left,
            y: rect.top,
        };
        let parent = self.parent(handle);
        if !parent.is_empty() && !unsafe { ScreenToClient(to_hwnd(parent), &mut origin) }.as_bool() {
            return Err(crate::compose_error!(
                window_manager,
                "ScreenToClient не удался для {}",
                handle
            ));
        }
        Ok(Point::new(origin.x, origin.y))
    }

    fn resize(&self, handle: WindowHandle, size: Size) -> Result<()> {
        let hwnd = self.require(handle)?;
        unsafe {
            SetWindowPos(
                hwnd,
                HWND::default(),
                0,
                0,
                size.width,
                size.height,
                SWP_NOZORDER | SWP_NOACTIVATE | SWP_NOSENDCHANGING,
            )?;
        }
        Ok(())
    }

    fn create_marker(&self, host: WindowHandle, spec: &MarkerSpec) -> Result<WindowHandle> {
        self.require(host)?;
        host::create_marker(host, spec)
    }

    fn move_window(&self, handle: WindowHandle, position: Point) -> Result<()> {
        let hwnd = self.require(handle)?;
        unsafe {
            SetWindowPos(
                hwnd,
                HWND::default(),
                position.x,
                position.y,
                0,
                0,
                SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE,
            )?;
        }
        Ok(())
    }

    fn destroy_window(&self, handle: WindowHandle) -> Result<()> {
        let hwnd = self.require(handle)?;
        unsafe { DestroyWindow(hwnd)? };
        Ok(())
    }

    fn set_z_order(&self, handle: WindowHandle, order: ZOrder) -> Result<()> {
        let hwnd = self.require(handle)?;
        let insert_after = match order {
            ZOrder::Top => HWND_TOP,
            ZOrder::Bottom => HWND_BOTTOM,
        };
        unsafe {
            SetWindowPos(
                hwnd,
                insert_after,
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE,
            )?;
        }
        Ok(())
    }

    fn set_layered_alpha(&self, handle: WindowHandle, alpha: u8) -> Result<()> {
        let hwnd = self.require(handle)?;
        // Без WS_EX_LAYERED SetLayeredWindowAttributes отказывает
        let ex_style = unsafe { GetWindowLongW(hwnd, GWL_EXSTYLE) } as u32;
        if let Some(restored) = restore_layered(ex_style) {
            debug!("{} потерял WS_EX_LAYERED, возвращаем", handle);
            unsafe { SetWindowLongW(hwnd, GWL_EXSTYLE, restored as i32) };
        }
        unsafe { SetLayeredWindowAttributes(hwnd, COLORREF(0), alpha, LWA_ALPHA)? };
        Ok(())
    }

    fn set_foreground(&self, handle: WindowHandle) -> Result<()> {
        let hwnd = self.require(handle)?;
        if !unsafe { SetForegroundWindow(hwnd) }.as_bool() {
            return Err(crate::compose_error!(
                window_manager,
                "SetForegroundWindow отклонён для {}",
                handle
            ));
        }
        Ok(())
    }

    fn post_pointer(&self, handle: WindowHandle, message: PointerMessage, at: Point) -> Result<()> {
        let hwnd = self.require(handle)?;
        let (msg, buttons) = match message {
            PointerMessage::Move => (WM_MOUSEMOVE, 0),
            PointerMessage::LeftButtonDown => (WM_LBUTTONDOWN, MK_LBUTTON),
            PointerMessage::LeftButtonUp => (WM_LBUTTONUP, 0),
        };
        unsafe { PostMessageW(hwnd, msg, WPARAM(buttons), pointer_lparam(at))? };
        Ok(())
    }

    fn install_event_hook(&self, sink: WindowEventSink) -> Result<HookId> {
        hook::install(sink)
    }

    fn remove_event_hook(&self, hook: HookId) -> Result<()> {
        hook::remove(hook)
    }

    fn create_host_window(&self, config: &HostConfig) -> Result<HostLayout> {
        host::create_host(config)
    }

    fn show_notice(&self, message: &str) {
        host::show_notice(message);
    }

    fn pump_messages(&self) -> bool {
        host::pump()
    }
}
