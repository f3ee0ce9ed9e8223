use super::{MonitorOrchestrator, ShutdownReason};
use crate::error::{MonitorError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

type ShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

impl MonitorOrchestrator {
    /// Run until a signal or a shutdown request arrives, then stop everything
    pub async fn run(&mut self) -> Result<i32> {
        info!("cribwatch is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| MonitorError::system("Shutdown receiver already taken"))?;

        install_signal_handlers(Arc::clone(&self.shutdown_sender));

        let reason = shutdown_receiver
            .await
            .map_err(|_| MonitorError::system("Shutdown channel closed unexpectedly"))?;
        info!("Shutdown initiated by {}", reason);

        let exit_code = self.shutdown().await?.max(reason.exit_code());

        info!("cribwatch shutdown complete");
        Ok(exit_code)
    }
}

fn send_reason(sender: &ShutdownSender, reason: ShutdownReason) {
    if let Some(sender) = sender.lock().take() {
        let _ = sender.send(reason);
    }
}

fn install_signal_handlers(shutdown_sender: ShutdownSender) {
    #[cfg(unix)]
    {
        let sender = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    if sigterm.recv().await.is_some() {
                        info!("Received SIGTERM");
                        send_reason(&sender, ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
                Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
            }
        });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C)");
                send_reason(&shutdown_sender, ShutdownReason::Signal("SIGINT".to_string()));
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });
}
