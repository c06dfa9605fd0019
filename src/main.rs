use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
mod config;
mod error;
mod events;
mod platform;
mod services;
mod utils;

use config::Config;
use events::{ui_channel, SlotId, UiEvent};
use platform::create_window_manager;
use services::{CompositionController, HandleResolver};

#[derive(Parser, Debug)]
#[command(name = "duo-compositor")]
#[command(about = "Компоновка двух чужих окон в одном хост-окне")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "duo.toml")]
    config: String,

    /// Режим сухого запуска (оконная система эмулируется в памяти)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (перекрывает [logging] из конфигурации)
    #[arg(long)]
    log_level: Option<String>,

    /// Дескриптор окна для левого слота (зеркало), десятичный или 0x...
    #[arg(long)]
    left: Option<String>,

    /// Дескриптор окна для правого слота (встраивание)
    #[arg(long)]
    right: Option<String>,

    /// Выбрать окно для левого слота под курсором
    #[arg(long, conflicts_with = "left")]
    pick_left: bool,

    /// Выбрать окно для правого слота под курсором
    #[arg(long, conflicts_with = "right")]
    pick_right: bool,

    /// Вывести окна верхнего уровня и выйти
    #[arg(long)]
    list: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Загрузка конфигурации
    let config = Arc::new(Config::load(&args.config)?);

    // Инициализация системы логирования
    let directives = args
        .log_level
        .clone()
        .unwrap_or_else(|| format!("{},{}", config.logging.level, config.logging.filter));
    init_tracing(&directives, &config.logging.format)?;

    info!("Запуск Duo Compositor v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - окна эмулируются, реальные действия отключены");
    }

    let (events_tx, events_rx) = ui_channel();
    let port = create_window_manager(events_tx.clone(), args.dry_run)?;
    info!("Оконный менеджер: {}", port.backend_name());

    if args.list {
        let resolver = HandleResolver::new(port.clone(), config.composition.pick_delay());
        for window in resolver.list_top_level_windows()? {
            println!("{}", window);
        }
        return Ok(());
    }

    let layout = port.create_host_window(&config.host)?;
    info!(
        "Хост-окно {}: левая панель {}, правая панель {}",
        layout.top_level, layout.left.size, layout.right.size
    );

    let controller = CompositionController::new(port.clone(), config.clone(), events_tx.clone(), layout);

    // Стартовые команды из аргументов
    let initial = [
        args.left.map(|text| UiEvent::AttachRequested {
            slot: SlotId::Mirror,
            handle_text: text,
        }),
        args.right.map(|text| UiEvent::AttachRequested {
            slot: SlotId::Embed,
            handle_text: text,
        }),
        args.pick_left.then_some(UiEvent::PickRequested { slot: SlotId::Mirror }),
        args.pick_right.then_some(UiEvent::PickRequested { slot: SlotId::Embed }),
    ];
    for event in initial.into_iter().flatten() {
        events_tx.send(event)?;
    }

    // Ожидание сигнала завершения
    let shutdown_tx = events_tx.clone();
    let signal_handle = tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Получен сигнал завершения (Ctrl+C)");
                let _ = shutdown_tx.send(UiEvent::Shutdown);
            }
            Err(err) => {
                error!("Ошибка при ожидании сигнала завершения: {}", err);
            }
        }
    });
    drop(events_tx);

    info!("Все компоненты инициализированы");

    if let Err(e) = controller.run(events_rx).await {
        error!("Цикл компоновки завершился с ошибкой: {}", e);
    }

    signal_handle.abort();
    info!("Duo Compositor завершил работу");
    Ok(())
}

fn init_tracing(directives: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives))?;

    let registry = tracing_subscriber::registry().with(filter);
    if format == "compact" {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    Ok(())
}
