use std::io::{self, BufRead, Write};

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vuerunner_bridge::{
    BridgeHandle, Gateway, NativeBridgeEvent, RunnerConfig, SaveDialogOptions,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RunnerConfig::from_env()?;
    let embedded = config.ui_mode.is_embedded();
    let (gateway, mut bridge) = Gateway::spawn(config)?;

    println!("vuerunner-bridge listening on {}", gateway.addr());
    println!("open {}", gateway.launch_url());

    loop {
        tokio::select! {
            event = bridge.next_event() => {
                match event {
                    Some(NativeBridgeEvent::SaveDialog { connection_id, options }) => {
                        let chosen = prompt_save_path(options).await;
                        bridge.enqueue_dialog_result(connection_id, chosen);
                    }
                    Some(NativeBridgeEvent::ClientTerminated) => {
                        info!("page requested termination");
                        break;
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; shutting down");
                bridge.request_shutdown(embedded);
                break;
            }
        }
    }

    cancel_pending_dialogs(&mut bridge);
    tokio::task::spawn_blocking(move || gateway.join()).await??;
    Ok(())
}

/// Stand-in for a native save dialog: asks on the terminal. An empty line
/// cancels.
async fn prompt_save_path(options: SaveDialogOptions) -> String {
    let result = tokio::task::spawn_blocking(move || -> io::Result<String> {
        let mut stderr = io::stderr().lock();
        let title = options.title.as_deref().unwrap_or("Save file");
        writeln!(stderr, "{title}")?;
        if let Some(default_path) = options.default_path.as_deref() {
            writeln!(stderr, "  default: {default_path}")?;
        }
        if let Some(wildcard) = options.wildcard.as_deref() {
            writeln!(stderr, "  filter: {wildcard}")?;
        }
        write!(stderr, "path (empty to cancel): ")?;
        stderr.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await;

    match result {
        Ok(Ok(path)) => path,
        Ok(Err(error)) => {
            warn!(%error, "failed to read save path");
            String::new()
        }
        Err(error) => {
            warn!(%error, "save prompt task failed");
            String::new()
        }
    }
}

/// Answers every dialog request still queued with a cancel so its
/// connection is not left waiting.
fn cancel_pending_dialogs(bridge: &mut BridgeHandle) {
    bridge.drain_events(|bridge, event| {
        if let NativeBridgeEvent::SaveDialog { connection_id, .. } = event {
            bridge.enqueue_dialog_result(connection_id, "");
        }
    });
}
