use crate::error::Result;
use crate::events::{EventBus, MonitorEvent};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Operator request bound to a key, if any
pub fn event_for_key(code: KeyCode) -> Option<MonitorEvent> {
    match code {
        KeyCode::Char(' ') => Some(MonitorEvent::AnalyzeRequested {
            source: "keyboard".to_string(),
        }),
        KeyCode::Char('a') | KeyCode::Char('A') => Some(MonitorEvent::AutoAnalysisToggleRequested),
        KeyCode::Char('k') | KeyCode::Char('K') => Some(MonitorEvent::AcknowledgeRequested),
        KeyCode::Char('q') | KeyCode::Esc => Some(MonitorEvent::ShutdownRequested {
            reason: "User requested via keyboard".to_string(),
        }),
        _ => None,
    }
}

/// Terminal controls: SPACE analyzes once, `a` toggles auto-analysis,
/// `k` acknowledges the alert, `q`/ESC quits
pub struct KeyboardInputHandler {
    event_bus: EventBus,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Keyboard controls: SPACE analyze, a auto-analysis, k acknowledge, q quit");

        let event_bus = self.event_bus.clone();
        let cancellation_token = self.cancellation_token.clone();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            debug!("Raw mode enabled - keyboard handler active");

            while !cancellation_token.is_cancelled() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }

                        match event_for_key(key_event.code) {
                            Some(event) => {
                                let quit = matches!(event, MonitorEvent::ShutdownRequested { .. });
                                info!("Key {:?}: {}", key_event.code, event.description());
                                event_bus.publish(event);
                                if quit {
                                    break;
                                }
                            }
                            None => debug!("Key pressed: {:?}", key_event.code),
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            } else {
                debug!("Raw mode disabled");
            }

            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // Let the polling task notice and restore the terminal
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = disable_raw_mode();

        Ok(())
    }
}
