use super::geometry::{Point, Size};
use super::window::{WindowEventKind, WindowHandle};
use std::fmt;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Слот компоновки в хост-окне
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotId {
    /// Левый, неинтерактивный слот (зеркало DWM)
    Mirror,
    /// Правый, интерактивный слот (встраивание через смену родителя)
    Embed,
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotId::Mirror => write!(f, "левый"),
            SlotId::Embed => write!(f, "правый"),
        }
    }
}

/// Индекс маркера в конфигурации overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub u8);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "marker#{}", self.0)
    }
}

/// Область хост-окна, в которую компонуется чужое окно
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostRegion {
    /// Нативный дескриптор панели
    pub handle: WindowHandle,
    /// Смещение панели относительно клиентской области окна верхнего уровня
    pub offset: Point,
    pub size: Size,
}

/// Текущая раскладка хост-окна
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostLayout {
    pub top_level: WindowHandle,
    pub left: HostRegion,
    pub right: HostRegion,
}

impl HostLayout {
    pub fn region(&self, slot: SlotId) -> &HostRegion {
        match slot {
            SlotId::Mirror => &self.left,
            SlotId::Embed => &self.right,
        }
    }
}

/// События UI-цикла. Всё состояние компоновки меняется только в ответ на них.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// Оператор ввёл дескриптор текстом
    AttachRequested { slot: SlotId, handle_text: String },
    /// Оператор попросил выбрать окно под курсором
    PickRequested { slot: SlotId },
    CancelPick,
    /// Задержка выбора истекла, окно под курсором определено
    PickCompleted { slot: SlotId, handle: WindowHandle },
    DetachRequested { slot: SlotId },
    HostLayoutChanged(HostLayout),
    /// Координаты указателя локальные для окна маркера
    MarkerPointerDown { marker: MarkerId, at: Point },
    MarkerPointerMove { marker: MarkerId, at: Point },
    MarkerPointerUp { marker: MarkerId },
    MarkerActivate { marker: MarkerId },
    /// Уведомление о чужом окне, уже перенесённое в UI-поток
    ForeignWindowChanged {
        slot: SlotId,
        handle: WindowHandle,
        kind: WindowEventKind,
    },
    Shutdown,
}

pub type UiSender = UnboundedSender<UiEvent>;
pub type UiReceiver = UnboundedReceiver<UiEvent>;

pub fn ui_channel() -> (UiSender, UiReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Цвет маркера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Разбор `#RRGGBB`
    pub fn parse(text: &str) -> Option<Self> {
        let hex = text.trim().strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Значение в формате COLORREF (0x00BBGGRR)
    pub fn to_colorref(&self) -> u32 {
        (self.b as u32) << 16 | (self.g as u32) << 8 | self.r as u32
    }
}
