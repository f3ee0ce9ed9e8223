use std::time::{Duration, SystemTime};

/// Live view loop statistics
#[derive(Debug, Clone, Default)]
pub struct LiveViewStats {
    pub frames_rendered: u64,
    pub render_errors: u64,
    pub slow_loops: u64,
    pub runs_started: u64,
    pub last_loop_duration: Option<Duration>,
    pub last_frame_time: Option<SystemTime>,
}

impl LiveViewStats {
    pub fn record_frame_render(&mut self, loop_duration: Duration) {
        self.frames_rendered += 1;
        self.last_loop_duration = Some(loop_duration);
        self.last_frame_time = Some(SystemTime::now());
    }

    pub fn record_render_error(&mut self) {
        self.render_errors += 1;
    }

    pub fn record_slow_loop(&mut self) {
        self.slow_loops += 1;
    }

    pub fn record_run_started(&mut self) {
        self.runs_started += 1;
    }

    pub fn render_success_rate(&self) -> f64 {
        let attempts = self.frames_rendered + self.render_errors;
        if attempts == 0 {
            0.0
        } else {
            self.frames_rendered as f64 / attempts as f64
        }
    }
}
