//! Хост-окно, его панели и окна маркеров.
//!
//! Оконные процедуры не трогают состояние компоновки: они только превращают
//! нативные сообщения в `UiEvent` и кладут их в канал UI-цикла.

use super::{from_hwnd, to_hwnd, wide};
use crate::config::HostConfig;
use crate::error::Result;
use crate::events::{
    HostLayout, HostRegion, MarkerId, Point, Rect, Rgb, SlotId, Size, UiEvent, UiSender,
    WindowHandle,
};
use crate::platform::{split_host_area, MarkerSpec};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::Foundation::{BOOL, COLORREF, HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::{
    BeginPaint, CreateEllipticRgn, CreatePen, CreateSolidBrush, DeleteObject, DrawTextW, Ellipse,
    EndPaint, GetStockObject, SelectObject, SetBkMode, SetTextColor, SetWindowRgn, DKGRAY_BRUSH,
    DT_CENTER, DT_SINGLELINE, DT_VCENTER, HBRUSH, HGDIOBJ, PAINTSTRUCT, PS_SOLID, TRANSPARENT,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    GetCapture, ReleaseCapture, SetCapture, SetFocus, VK_ESCAPE, VK_F1, VK_F2,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetAncestor, GetClientRect,
    LoadCursorW, MessageBoxW, PeekMessageW, RegisterClassW, SetLayeredWindowAttributes,
    SetWindowPos, ShowWindow, TranslateMessage, CS_HREDRAW, CS_VREDRAW, CW_USEDEFAULT, GA_ROOT,
    IDC_ARROW, IDC_HAND, LWA_ALPHA, MB_ICONINFORMATION, MB_OK, MSG, PM_REMOVE, SWP_NOACTIVATE,
    SWP_NOZORDER, SW_SHOW, WINDOW_EX_STYLE, WM_CLOSE, WM_DESTROY, WM_KEYDOWN, WM_LBUTTONDOWN,
    WM_LBUTTONUP, WM_MOUSEMOVE, WM_NCDESTROY, WM_PAINT, WM_QUIT, WM_RBUTTONUP, WM_SIZE, WNDCLASSW,
    WS_CHILD, WS_CLIPCHILDREN, WS_CLIPSIBLINGS, WS_EX_LAYERED, WS_OVERLAPPEDWINDOW, WS_VISIBLE,
};

const HOST_CLASS: &str = "DuoCompositorHost";
const PANEL_CLASS: &str = "DuoCompositorPanel";
const MARKER_CLASS: &str = "DuoCompositorMarker";
const NOTICE_CAPTION: &str = "Duo Compositor";

#[derive(Debug, Clone)]
struct MarkerVisual {
    id: MarkerId,
    label: String,
    color: Rgb,
}

/// Всё, что нужно оконным процедурам. Нативные вызовы под этой блокировкой
/// запрещены: они синхронно заходят обратно в оконную процедуру.
#[derive(Default)]
struct HostState {
    events: Option<UiSender>,
    top_level: isize,
    left: isize,
    right: isize,
    gap: i32,
    markers: HashMap<isize, MarkerVisual>,
}

static STATE: Lazy<Mutex<HostState>> = Lazy::new(|| Mutex::new(HostState::default()));
static CLOSED: AtomicBool = AtomicBool::new(false);
static CLASSES_REGISTERED: AtomicBool = AtomicBool::new(false);

pub fn install_sink(events: UiSender) {
    STATE.lock().events = Some(events);
}

/// `false`, если событие некому доставить
fn emit(event: UiEvent) -> bool {
    let sender = STATE.lock().events.clone();
    match sender {
        Some(sender) => sender.send(event).is_ok(),
        None => {
            debug!("UI-канал ещё не подключён, событие {:?} потеряно", event);
            false
        }
    }
}

pub fn register_classes() -> Result<()> {
    if CLASSES_REGISTERED.load(Ordering::SeqCst) {
        return Ok(());
    }

    unsafe {
        let hinstance = GetModuleHandleW(None)?;
        let background = HBRUSH(GetStockObject(DKGRAY_BRUSH).0);

        for (name, proc_, cursor, brush) in [
            (HOST_CLASS, host_wnd_proc as WndProc, IDC_ARROW, HBRUSH::default()),
            (PANEL_CLASS, panel_wnd_proc as WndProc, IDC_ARROW, background),
            (MARKER_CLASS, marker_wnd_proc as WndProc, IDC_HAND, HBRUSH::default()),
        ] {
            let class_name = wide(name);
            let wc = WNDCLASSW {
                style: CS_HREDRAW | CS_VREDRAW,
                lpfnWndProc: Some(proc_),
                hInstance: hinstance.into(),
                lpszClassName: PCWSTR(class_name.as_ptr()),
                hCursor: LoadCursorW(None, cursor)?,
                hbrBackground: brush,
                ..Default::default()
            };
            if RegisterClassW(&wc) == 0 {
                return Err(windows::core::Error::from_win32().into());
            }
        }
    }

    CLASSES_REGISTERED.store(true, Ordering::SeqCst);
    debug!("Классы окон зарегистрированы");
    Ok(())
}

type WndProc = unsafe extern "system" fn(HWND, u32, WPARAM, LPARAM) -> LRESULT;

pub fn create_host(config: &HostConfig) -> Result<HostLayout> {
    register_classes()?;
    STATE.lock().gap = config.gap;

    let top_level = unsafe {
        let hinstance = GetModuleHandleW(None)?;
        let class_name = wide(HOST_CLASS);
        let title = wide(&config.title);
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            PCWSTR(class_name.as_ptr()),
            PCWSTR(title.as_ptr()),
            WS_OVERLAPPEDWINDOW | WS_CLIPCHILDREN,
            CW_USEDEFAULT,
            CW_USEDEFAULT,
            config.width,
            config.height,
            None,
            None,
            hinstance,
            None,
        )?
    };

    let left = create_panel(top_level)?;
    let right = create_panel(top_level)?;
    {
        let mut state = STATE.lock();
        state.top_level = top_level.0 as isize;
        state.left = left.0 as isize;
        state.right = right.0 as isize;
    }

    unsafe {
        let _ = ShowWindow(top_level, SW_SHOW);
    }
    let layout = layout_panels(top_level)?;
    info!("Хост-окно создано: {}", layout.top_level);
    Ok(layout)
}

fn create_panel(parent: HWND) -> Result<HWND> {
    unsafe {
        let hinstance = GetModuleHandleW(None)?;
        let class_name = wide(PANEL_CLASS);
        let panel = CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            PCWSTR(class_name.as_ptr()),
            PCWSTR::null(),
            WS_CHILD | WS_VISIBLE | WS_CLIPCHILDREN | WS_CLIPSIBLINGS,
            0,
            0,
            0,
            0,
            parent,
            None,
            hinstance,
            None,
        )?;
        Ok(panel)
    }
}

/// Разложить панели по клиентской области хоста
fn layout_panels(top_level: HWND) -> Result<HostLayout> {
    let (left, right, gap) = {
        let state = STATE.lock();
        (state.left, state.right, state.gap)
    };
    if left == 0 || right == 0 {
        return Err(crate::compose_error!(internal, "панели хоста ещё не созданы"));
    }

    let mut client = RECT::default();
    unsafe { GetClientRect(top_level, &mut client)? };
    let client = Size::new(client.right - client.left, client.bottom - client.top);
    let (left_rect, right_rect) = split_host_area(client, gap);

    for (panel, rect) in [(left, left_rect), (right, right_rect)] {
        let size = rect.size();
        unsafe {
            SetWindowPos(
                to_hwnd(WindowHandle(panel)),
                HWND::default(),
                rect.left,
                rect.top,
                size.width,
                size.height,
                SWP_NOZORDER | SWP_NOACTIVATE,
            )?;
        }
    }

    Ok(HostLayout {
        top_level: from_hwnd(top_level),
        left: region(left, left_rect),
        right: region(right, right_rect),
    })
}

fn region(panel: isize, rect: Rect) -> HostRegion {
    HostRegion {
        handle: WindowHandle(panel),
        offset: rect.origin(),
        size: rect.size(),
    }
}

pub fn create_marker(host: WindowHandle, spec: &MarkerSpec) -> Result<WindowHandle> {
    register_classes()?;

    let marker = unsafe {
        let hinstance = GetModuleHandleW(None)?;
        let class_name = wide(MARKER_CLASS);
        let label = wide(&spec.label);
        CreateWindowExW(
            WS_EX_LAYERED,
            PCWSTR(class_name.as_ptr()),
            PCWSTR(label.as_ptr()),
            WS_CHILD | WS_VISIBLE | WS_CLIPSIBLINGS,
            spec.position.x,
            spec.position.y,
            spec.size.width,
            spec.size.height,
            to_hwnd(host),
            None,
            hinstance,
            None,
        )?
    };

    STATE.lock().markers.insert(
        marker.0 as isize,
        MarkerVisual {
            id: spec.id,
            label: spec.label.clone(),
            color: spec.color,
        },
    );

    unsafe {
        SetLayeredWindowAttributes(marker, COLORREF(0), spec.alpha, LWA_ALPHA)?;
        // Круглая форма: регион переходит во владение окна
        let region = CreateEllipticRgn(0, 0, spec.size.width + 1, spec.size.height + 1);
        SetWindowRgn(marker, region, BOOL::from(true));
    }

    debug!("Маркер {} '{}' создан: {:?}", spec.id, spec.label, marker);
    Ok(from_hwnd(marker))
}

pub fn show_notice(message: &str) {
    let owner = to_hwnd(WindowHandle(STATE.lock().top_level));
    unsafe {
        MessageBoxW(
            owner,
            &HSTRING::from(message),
            &HSTRING::from(NOTICE_CAPTION),
            MB_OK | MB_ICONINFORMATION,
        );
    }
}

/// Выбрать все накопившиеся сообщения потока. `false` после закрытия хоста.
pub fn pump() -> bool {
    let mut msg = MSG::default();
    unsafe {
        while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
            if msg.message == WM_QUIT {
                CLOSED.store(true, Ordering::SeqCst);
                break;
            }
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
    !CLOSED.load(Ordering::SeqCst)
}

fn mouse_point(lparam: LPARAM) -> Point {
    let raw = lparam.0 as u32;
    Point::new((raw & 0xFFFF) as i16 as i32, ((raw >> 16) & 0xFFFF) as i16 as i32)
}

unsafe extern "system" fn host_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_SIZE => {
            // Первый WM_SIZE приходит до создания панелей
            if let Ok(layout) = layout_panels(hwnd) {
                emit(UiEvent::HostLayoutChanged(layout));
            }
            LRESULT(0)
        }
        WM_KEYDOWN => {
            let key = wparam.0 as u16;
            if key == VK_F1.0 {
                emit(UiEvent::PickRequested { slot: SlotId::Mirror });
            } else if key == VK_F2.0 {
                emit(UiEvent::PickRequested { slot: SlotId::Embed });
            } else if key == VK_ESCAPE.0 {
                emit(UiEvent::CancelPick);
            }
            LRESULT(0)
        }
        WM_CLOSE => {
            // Хост разрушает контроллер после того, как вернёт чужие окна
            if !emit(UiEvent::Shutdown) {
                let _ = DestroyWindow(hwnd);
            }
            LRESULT(0)
        }
        WM_DESTROY => {
            CLOSED.store(true, Ordering::SeqCst);
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

unsafe extern "system" fn panel_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if msg == WM_LBUTTONDOWN {
        // Клавиши F1/F2/Esc обрабатывает окно верхнего уровня
        let _ = SetFocus(GetAncestor(hwnd, GA_ROOT));
        return LRESULT(0);
    }
    DefWindowProcW(hwnd, msg, wparam, lparam)
}

unsafe extern "system" fn marker_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let visual = STATE.lock().markers.get(&(hwnd.0 as isize)).cloned();

    match (msg, visual) {
        (WM_PAINT, Some(visual)) => {
            paint_marker(hwnd, &visual);
            LRESULT(0)
        }
        (WM_LBUTTONDOWN, Some(visual)) => {
            SetCapture(hwnd);
            emit(UiEvent::MarkerPointerDown {
                marker: visual.id,
                at: mouse_point(lparam),
            });
            LRESULT(0)
        }
        (WM_MOUSEMOVE, Some(visual)) if GetCapture() == hwnd => {
            emit(UiEvent::MarkerPointerMove {
                marker: visual.id,
                at: mouse_point(lparam),
            });
            LRESULT(0)
        }
        (WM_LBUTTONUP, Some(visual)) => {
            if GetCapture() == hwnd {
                let _ = ReleaseCapture();
            }
            emit(UiEvent::MarkerPointerUp { marker: visual.id });
            LRESULT(0)
        }
        (WM_RBUTTONUP, Some(visual)) => {
            emit(UiEvent::MarkerActivate { marker: visual.id });
            LRESULT(0)
        }
        (WM_NCDESTROY, _) => {
            STATE.lock().markers.remove(&(hwnd.0 as isize));
            DefWindowProcW(hwnd, msg, wparam, lparam)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

fn colorref(color: Rgb) -> COLORREF {
    COLORREF(color.to_colorref())
}

fn paint_marker(hwnd: HWND, visual: &MarkerVisual) {
    unsafe {
        let mut ps = PAINTSTRUCT::default();
        let hdc = BeginPaint(hwnd, &mut ps);

        let mut client = RECT::default();
        if GetClientRect(hwnd, &mut client).is_err() {
            warn!("GetClientRect для маркера {} не удался", visual.id);
            let _ = EndPaint(hwnd, &ps);
            return;
        }

        let fill = CreateSolidBrush(colorref(visual.color));
        let ring = CreatePen(PS_SOLID, 2, COLORREF(0x00FF_FFFF));
        let old_brush = SelectObject(hdc, HGDIOBJ(fill.0));
        let old_pen = SelectObject(hdc, HGDIOBJ(ring.0));
        let _ = Ellipse(hdc, client.left + 1, client.top + 1, client.right - 1, client.bottom - 1);

        SetBkMode(hdc, TRANSPARENT);
        SetTextColor(hdc, COLORREF(0x00FF_FFFF));
        let mut text: Vec<u16> = visual.label.encode_utf16().collect();
        DrawTextW(hdc, &mut text, &mut client, DT_CENTER | DT_VCENTER | DT_SINGLELINE);

        SelectObject(hdc, old_brush);
        SelectObject(hdc, old_pen);
        let _ = DeleteObject(HGDIOBJ(fill.0));
        let _ = DeleteObject(HGDIOBJ(ring.0));
        let _ = EndPaint(hwnd, &ps);
    }
}
