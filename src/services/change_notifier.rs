use crate::error::{ComposeError, Result};
use crate::events::{WindowEvent, WindowEventKind, WindowHandle};
use crate::platform::{HookId, WindowManagerPort};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Уведомления, на которые подписывается компоновка
const WATCHED: [WindowEventKind; 7] = WindowEventKind::ALL;

/// Подписка на изменения одного чужого окна.
///
/// Колбэк вызывается на UI-потоке только для событий с дескриптором, в точности
/// равным `target`. Паника в колбэке перехватывается и в насос сообщений не уходит.
pub struct ChangeNotifier {
    port: Arc<dyn WindowManagerPort>,
}

impl ChangeNotifier {
    pub fn new(port: Arc<dyn WindowManagerPort>) -> Self {
        Self { port }
    }

    pub fn subscribe<F>(&self, target: WindowHandle, on_changed: F) -> Result<Subscription>
    where
        F: Fn(WindowEventKind) + Send + Sync + 'static,
    {
        if target.is_empty() {
            return ComposeError::empty_handle();
        }

        let sink = Arc::new(move |event: WindowEvent| {
            if event.handle != target || !WATCHED.contains(&event.kind) {
                return;
            }
            let kind = event.kind;
            if catch_unwind(AssertUnwindSafe(|| on_changed(kind))).is_err() {
                warn!("Обработчик события {:?} для {} запаниковал", kind, target);
            }
        });

        let hook = self.port.install_event_hook(sink)?;
        info!("Подписка на изменения {} установлена", target);

        Ok(Subscription {
            port: Arc::clone(&self.port),
            hook: Some(hook),
            target,
        })
    }
}

/// Живая подписка. Снимается явно через `unsubscribe` или при уничтожении.
pub struct Subscription {
    port: Arc<dyn WindowManagerPort>,
    hook: Option<HookId>,
    target: WindowHandle,
}

impl Subscription {
    pub fn target(&self) -> WindowHandle {
        self.target
    }

    pub fn is_active(&self) -> bool {
        self.hook.is_some()
    }

    pub fn unsubscribe(&mut self) {
        let Some(hook) = self.hook.take() else {
            return;
        };
        match self.port.remove_event_hook(hook) {
            Ok(()) => debug!("Подписка на {} снята", self.target),
            Err(e) => warn!("Не удалось снять подписку на {}: {}", self.target, e),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("target", &self.target)
            .field("hook", &self.hook)
            .finish()
    }
}
