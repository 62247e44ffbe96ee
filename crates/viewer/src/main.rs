// Hide console window on Windows
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

#[cfg(windows)]
mod window;

use anyhow::Result;
use capture_preview_core::{logger, Config, PreviewConfig};

/// `--monitor N` selects a monitor by enumeration index.
fn monitor_arg(args: &[String]) -> Option<usize> {
    args.iter()
        .position(|arg| arg == "--monitor")
        .and_then(|i| args.get(i + 1))
        .and_then(|value| value.parse().ok())
}

/// Fall back to defaults on a bad config file, keeping the error to log once
/// the logger is up.
fn settings_or_default(loaded: Result<PreviewConfig>) -> (PreviewConfig, Option<anyhow::Error>) {
    match loaded {
        Ok(settings) => (settings, None),
        Err(e) => (PreviewConfig::default(), Some(e)),
    }
}

fn main() -> Result<()> {
    let config = Config::new()?;
    let (mut settings, load_error) = settings_or_default(config.load());

    logger::init_logger(
        config.logs_dir.clone(),
        "capture-preview",
        settings.log_retention_count,
        &settings.log_filter,
    )?;

    tracing::info!("=== Capture Preview Session Started ===");
    if let Some(e) = load_error {
        tracing::warn!(error = %format!("{e:#}"), path = %config.config_path().display(), "config unreadable, using defaults");
    }

    let args: Vec<String> = std::env::args().collect();
    if let Some(index) = monitor_arg(&args) {
        settings.last_monitor = Some(index);
    }

    tracing::info!(
        monitor = ?settings.last_monitor,
        cursor = settings.cursor_capture,
        border = settings.border_required,
        "configuration loaded"
    );

    let result = run(&settings);
    match &result {
        Ok(()) => {
            if let Err(e) = config.save(&settings) {
                tracing::warn!(error = %e, "failed to save configuration");
            }
        }
        Err(e) => tracing::error!(error = %e, "preview stopped"),
    }

    tracing::info!("Capture preview shutting down...");
    logger::finalize_logs()?;

    result
}

#[cfg(windows)]
fn run(settings: &PreviewConfig) -> Result<()> {
    use capture_preview_relay::d3d11::{D3d11Device, DirectCompositionTarget, WgcItem};
    use capture_preview_relay::{CaptureItem, CapturePreview, PreviewEvent};
    use crossbeam_channel::RecvTimeoutError;
    use std::sync::Arc;
    use std::time::Duration;
    use windows::Win32::System::WinRT::{RoInitialize, RO_INIT_MULTITHREADED};

    unsafe {
        let _ = RoInitialize(RO_INIT_MULTITHREADED);
    }

    let device = Arc::new(D3d11Device::new()?);
    let item = WgcItem::monitor_or_primary(settings.last_monitor)?;
    let source_size = item.size()?;

    let title = format!("Capture Preview - {}", item.display_name());
    let window = window::PreviewWindow::create(
        &title,
        (source_size.width / 2).max(320),
        (source_size.height / 2).max(180),
    )?;
    let compositor = DirectCompositionTarget::for_window(window.hwnd())?;

    let preview = CapturePreview::new(device, item, settings)?;
    let events = preview.events();
    let _visual = preview.create_surface(&compositor)?;
    preview.start()?;

    // Frames are relayed on the capture worker thread; this loop only keeps
    // the window responsive and reacts to preview events.
    let result = loop {
        if !window.pump() {
            break Ok(());
        }

        match events.recv_timeout(Duration::from_millis(16)) {
            Ok(PreviewEvent::Resized { size }) => tracing::info!(%size, "preview resized"),
            Ok(PreviewEvent::SourceClosed) => {
                tracing::info!("capture source closed");
                break Ok(());
            }
            Ok(PreviewEvent::Faulted { reason }) => {
                break Err(anyhow::anyhow!("frame relay faulted: {}", reason));
            }
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break Ok(()),
        }
    };

    let stats = preview.stats();
    tracing::info!(
        presented = stats.frames_presented,
        resizes = stats.resizes,
        deferred = stats.deferred_frames,
        partial_copies = stats.partial_copies,
        copy_failures = stats.copy_failures,
        present_failures = stats.present_failures,
        "session summary"
    );

    preview.dispose();
    result
}

#[cfg(not(windows))]
fn run(_settings: &PreviewConfig) -> Result<()> {
    anyhow::bail!("Capture preview is only supported on Windows")
}
