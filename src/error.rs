use crate::events::WindowHandle;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(windows)]
    #[error("Ошибка Win32: {0}")]
    Platform(#[from] windows::core::Error),

    #[error("Некорректный дескриптор окна: {0}")]
    InvalidHandle(String),

    #[error("Пустой дескриптор окна")]
    EmptyHandle,

    #[error("Компоновщик отклонил операцию: {0}")]
    Compositor(String),

    #[error("Оконный менеджер отклонил операцию: {0}")]
    WindowManager(String),

    #[error("Окно {0} больше не существует")]
    StaleWindow(WindowHandle),

    #[error("Сервис недоступен: {0}")]
    ServiceUnavailable(String),

    #[error("Выбор окна под курсором уже выполняется")]
    PickPending,

    #[error("Внутренняя ошибка: {0}")]
    Internal(String),
}

impl ComposeError {
    pub fn empty_handle<T>() -> Result<T> {
        Err(ComposeError::EmptyHandle)
    }
}

pub type Result<T> = std::result::Result<T, ComposeError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! compose_error {
    (invalid_handle, $($arg:tt)*) => {
        $crate::error::ComposeError::InvalidHandle(format!($($arg)*))
    };
    (compositor, $($arg:tt)*) => {
        $crate::error::ComposeError::Compositor(format!($($arg)*))
    };
    (window_manager, $($arg:tt)*) => {
        $crate::error::ComposeError::WindowManager(format!($($arg)*))
    };
    (service_unavailable, $($arg:tt)*) => {
        $crate::error::ComposeError::ServiceUnavailable(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::ComposeError::Internal(format!($($arg)*))
    };
}
