use serde::{Deserialize, Serialize};
use std::fmt;

/// Непрозрачный дескриптор чужого окна верхнего уровня.
///
/// Окно принадлежит другому процессу и может исчезнуть в любой момент,
/// поэтому дескриптор сравнивается только по идентичности.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle(pub isize);

impl WindowHandle {
    pub const NULL: WindowHandle = WindowHandle(0);

    pub fn new(raw: isize) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> isize {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Разбор дескриптора из пользовательского ввода: `0x1A2B` или `6699`.
    ///
    /// Любой мусор даёт пустой дескриптор, ошибка наружу не выбрасывается.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::NULL;
        }

        let (digits, radix) = match text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
        {
            Some(hex) => (hex, 16),
            None => (text, 10),
        };
        // from_str_radix принимает знак, у дескриптора его не бывает
        if digits.starts_with(['+', '-']) {
            return Self::NULL;
        }

        u64::from_str_radix(digits, radix)
            .ok()
            .and_then(|value| isize::try_from(value).ok())
            .map(Self)
            .unwrap_or(Self::NULL)
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// Информация об окне верхнего уровня
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub title: String,
    pub pid: u32,
}

impl WindowInfo {
    pub fn new(handle: WindowHandle, title: String) -> Self {
        Self {
            handle,
            title,
            pid: 0,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }
}

impl fmt::Display for WindowInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [pid {}] \"{}\"", self.handle, self.pid, self.title)
    }
}

/// Уведомление оконного менеджера о чужом окне
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEvent {
    pub handle: WindowHandle,
    pub kind: WindowEventKind,
}

impl WindowEvent {
    pub fn new(handle: WindowHandle, kind: WindowEventKind) -> Self {
        Self { handle, kind }
    }
}

impl fmt::Display for WindowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.handle)
    }
}

/// Тип события окна (коды WinEvent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowEventKind {
    Created,
    Destroyed,
    Shown,
    Hidden,
    LocationChanged,
    MinimizeStart,
    MinimizeEnd,
}

impl WindowEventKind {
    pub const ALL: [WindowEventKind; 7] = [
        WindowEventKind::Created,
        WindowEventKind::Destroyed,
        WindowEventKind::Shown,
        WindowEventKind::Hidden,
        WindowEventKind::LocationChanged,
        WindowEventKind::MinimizeStart,
        WindowEventKind::MinimizeEnd,
    ];

    pub fn code(&self) -> u32 {
        match self {
            WindowEventKind::Created => 0x8000,
            WindowEventKind::Destroyed => 0x8001,
            WindowEventKind::Shown => 0x8002,
            WindowEventKind::Hidden => 0x8003,
            WindowEventKind::LocationChanged => 0x800B,
            WindowEventKind::MinimizeStart => 0x0016,
            WindowEventKind::MinimizeEnd => 0x0017,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.code() == code)
    }
}
