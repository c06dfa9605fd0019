//! Глобальный реестр получателей WinEvent.
//!
//! Нативный хук один на процесс: колбэк `WINEVENT_OUTOFCONTEXT` приходит в насос
//! сообщений потока, который его установил, и раздаёт событие всем подписчикам.

use crate::error::Result;
use crate::events::{WindowEvent, WindowEventKind, WindowHandle};
use crate::platform::{HookId, WindowEventSink};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use windows::Win32::Foundation::{HMODULE, HWND};
use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};

const WINEVENT_OUTOFCONTEXT: u32 = 0x0000;
const WINEVENT_SKIPOWNPROCESS: u32 = 0x0002;
const OBJID_WINDOW: i32 = 0;

/// Диапазоны кодов: сворачивание и жизненный цикл/положение объекта
const EVENT_RANGES: [(u32, u32); 2] = [(0x0016, 0x0017), (0x8000, 0x800B)];

static SINKS: Lazy<Mutex<Vec<(HookId, WindowEventSink)>>> = Lazy::new(|| Mutex::new(Vec::new()));
// HWINEVENTHOOK хранится как isize: сырой указатель не Send
static NATIVE_HOOKS: Lazy<Mutex<Vec<isize>>> = Lazy::new(|| Mutex::new(Vec::new()));
static NEXT_HOOK: AtomicU64 = AtomicU64::new(1);

pub fn install(sink: WindowEventSink) -> Result<HookId> {
    let id = HookId(NEXT_HOOK.fetch_add(1, Ordering::Relaxed));
    SINKS.lock().push((id, sink));

    let mut native = NATIVE_HOOKS.lock();
    if native.is_empty() {
        for (min, max) in EVENT_RANGES {
            let hook = unsafe {
                SetWinEventHook(
                    min,
                    max,
                    HMODULE::default(),
                    Some(win_event_proc),
                    0,
                    0,
                    WINEVENT_OUTOFCONTEXT | WINEVENT_SKIPOWNPROCESS,
                )
            };
            if hook.is_invalid() {
                warn!("SetWinEventHook 0x{:04X}..0x{:04X} не установлен", min, max);
                continue;
            }
            native.push(hook.0 as isize);
        }

        if native.is_empty() {
            drop(native);
            SINKS.lock().retain(|(existing, _)| *existing != id);
            return Err(crate::compose_error!(
                window_manager,
                "не удалось установить ни одного WinEvent-хука"
            ));
        }
        info!("WinEvent-хуки установлены: {}", native.len());
    }

    debug!("Подписчик WinEvent {:?} добавлен", id);
    Ok(id)
}

pub fn remove(id: HookId) -> Result<()> {
    let remaining = {
        let mut sinks = SINKS.lock();
        sinks.retain(|(existing, _)| *existing != id);
        sinks.len()
    };

    if remaining == 0 {
        let hooks: Vec<isize> = NATIVE_HOOKS.lock().drain(..).collect();
        for raw in hooks {
            let hook = HWINEVENTHOOK(raw as *mut core::ffi::c_void);
            if !unsafe { UnhookWinEvent(hook) }.as_bool() {
                warn!("UnhookWinEvent не удался для 0x{:X}", raw);
            }
        }
        debug!("Последний подписчик ушёл, WinEvent-хуки сняты");
    }
    Ok(())
}

unsafe extern "system" fn win_event_proc(
    _hook: HWINEVENTHOOK,
    event: u32,
    hwnd: HWND,
    id_object: i32,
    _id_child: i32,
    _event_thread: u32,
    _event_time: u32,
) {
    // События о курсоре, каретке и дочерних объектах не нужны
    if hwnd.0.is_null() || id_object != OBJID_WINDOW {
        return;
    }
    let Some(kind) = WindowEventKind::from_code(event) else {
        return;
    };

    let event = WindowEvent::new(WindowHandle(hwnd.0 as isize), kind);
    // Копия: подписчик может отписаться прямо из колбэка
    let sinks: Vec<WindowEventSink> = SINKS.lock().iter().map(|(_, sink)| sink.clone()).collect();
    for sink in sinks {
        sink(event);
    }
}
