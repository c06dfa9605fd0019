use crate::error::{ComposeError, Result};
use crate::events::{Point, Size, WindowHandle};
use crate::platform::{WindowManagerPort, WindowStyle};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Чужое окно, встроенное дочерним окном в панель хоста
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedSession {
    pub child: WindowHandle,
    pub host: WindowHandle,
    /// Стиль до снятия рамки, для возврата окна на рабочий стол
    pub original_style: WindowStyle,
}

/// Detached → Embedded. Обратного перехода нет: сессия заканчивается, когда окно
/// уходит к другому родителю или уничтожается, либо при `release`.
pub struct EmbedSessionManager {
    port: Arc<dyn WindowManagerPort>,
}

impl EmbedSessionManager {
    pub fn new(port: Arc<dyn WindowManagerPort>) -> Self {
        Self { port }
    }

    pub fn embed(&self, child: WindowHandle, host: WindowHandle) -> Result<EmbedSession> {
        if child.is_empty() || host.is_empty() {
            return ComposeError::empty_handle();
        }
        if !self.port.is_window(child) {
            return Err(ComposeError::StaleWindow(child));
        }

        if let Err(e) = self.port.disable_transitions(child) {
            debug!("Не удалось отключить анимации DWM для {}: {}", child, e);
        }

        let original_style = self.port.window_style(child)?;
        let mut changed = false;

        // Одна запись стиля вместо нескольких: каждая запись перерисовывает рамку
        if original_style.has_decorations() {
            self.port
                .set_window_style(child, original_style.without_decorations())?;
            changed = true;
        }

        if self.port.parent(child) == host {
            debug!("{} уже встроено в {}", child, host);
        } else {
            if let Err(e) = self.port.set_parent(child, host) {
                if changed {
                    let _ = self.port.set_window_style(child, original_style);
                }
                return Err(e);
            }
            changed = true;
        }

        if changed {
            if let Err(e) = self.port.refresh_frame(child) {
                warn!("Не удалось обновить рамку {}: {}", child, e);
            }
            info!("Окно {} встроено в {} (стиль был {})", child, host, original_style);
        }

        Ok(EmbedSession {
            child,
            host,
            original_style,
        })
    }

    /// Разместить окно в начале панели и подогнать клиентскую область под неё.
    /// `false`, если окно уже стояло на месте с нужным размером или панель пуста.
    pub fn resize_to_host(&self, child: WindowHandle, size: Size) -> Result<bool> {
        if child.is_empty() {
            return ComposeError::empty_handle();
        }
        // Свёрнутый хост присылает нулевую панель
        if size.is_empty() {
            return Ok(false);
        }

        // SetParent оставляет окну прежние координаты
        let placed = matches!(self.port.window_origin(child), Ok(origin) if origin == Point::default());
        if placed && matches!(self.port.client_size(child), Ok(current) if current == size) {
            return Ok(false);
        }

        self.port.resize(child, size)?;
        debug!("Окно {} подогнано под {}", child, size);
        Ok(true)
    }

    /// Восстановить встраивание, если окно увели из панели. `true`, если пришлось
    /// встраивать заново.
    pub fn ensure_embedded(&self, session: &EmbedSession) -> Result<bool> {
        if session.child.is_empty() || session.host.is_empty() {
            return ComposeError::empty_handle();
        }
        if !self.port.is_window(session.child) {
            return Err(ComposeError::StaleWindow(session.child));
        }

        let parent = self.port.parent(session.child);
        if parent == session.host {
            return Ok(false);
        }

        warn!(
            "Окно {} потеряло родителя {} (сейчас {}), встраиваем заново",
            session.child, session.host, parent
        );
        self.embed(session.child, session.host)?;
        Ok(true)
    }

    /// Вернуть окно на рабочий стол с исходным стилем
    pub fn release(&self, session: &EmbedSession) -> Result<()> {
        if !self.port.is_window(session.child) {
            debug!("Окно {} уже уничтожено, возвращать нечего", session.child);
            return Ok(());
        }
        if self.port.parent(session.child) != session.host {
            debug!("Окно {} уже не в {}", session.child, session.host);
            return Ok(());
        }

        self.port.set_parent(session.child, WindowHandle::NULL)?;
        if let Err(e) = self
            .port
            .set_window_style(session.child, session.original_style)
        {
            warn!("Не удалось вернуть стиль {}: {}", session.child, e);
        }
        let _ = self.port.refresh_frame(session.child);
        info!("Окно {} возвращено на рабочий стол", session.child);
        Ok(())
    }
}
