use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use crate::config::SLOT_COUNT;
use crate::pipeline::PipelineEvent;
use crate::status::{CameraStatus, StatusBoard};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => Self::Plain,
            Some("pretty") => Self::Pretty,
            _ => Self::Auto,
        }
    }
}

/// Operator view of the status board: one line per camera.
pub struct StatusDisplay {
    board: StatusBoard,
    started: [Option<Instant>; SLOT_COUNT],
    renderer: Renderer,
}

enum Renderer {
    Plain,
    Pretty {
        header: ProgressBar,
        cameras: Vec<ProgressBar>,
        _multi: MultiProgress,
    },
}

impl StatusDisplay {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        let use_pretty = is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => !disable_pretty,
                UiMode::Plain => false,
            };
        let renderer = if use_pretty {
            pretty_renderer()
        } else {
            Renderer::Plain
        };
        Self {
            board: StatusBoard::new(),
            started: Default::default(),
            renderer,
        }
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    pub fn handle(&mut self, event: &PipelineEvent) {
        if let PipelineEvent::RoundStarted { code, slots, .. } = event {
            self.board.apply(event);
            self.started = Default::default();
            self.render_round(code.as_str(), *slots);
            return;
        }
        let Some(cam) = self.board.apply(event) else {
            return;
        };
        let elapsed = match event {
            PipelineEvent::UploadStarted { .. } => {
                self.started[cam] = Some(Instant::now());
                None
            }
            PipelineEvent::UploadFinished { .. } => {
                self.started[cam].take().map(|start| start.elapsed())
            }
            _ => None,
        };
        if let Some(status) = self.board.get(cam) {
            self.render_camera(cam, status, elapsed);
        }
    }

    /// Consume events until every sender is gone.
    pub fn run(mut self, events: Receiver<PipelineEvent>) -> StatusBoard {
        for event in events {
            self.handle(&event);
        }
        if let Renderer::Pretty { header, cameras, .. } = &self.renderer {
            for bar in cameras {
                bar.disable_steady_tick();
                bar.tick();
            }
            header.finish();
        }
        self.board
    }

    fn render_round(&self, code: &str, slots: usize) {
        let line = format!("pallet {} ({} camera(s))", code, slots);
        match &self.renderer {
            Renderer::Plain => eprintln!("==> {}", line),
            Renderer::Pretty {
                header, cameras, ..
            } => {
                header.set_message(line);
                for (cam, bar) in cameras.iter().enumerate() {
                    bar.disable_steady_tick();
                    bar.set_message(format!("cam {}  {}", cam, CameraStatus::Idle));
                }
            }
        }
    }

    fn render_camera(&self, cam: usize, status: &CameraStatus, elapsed: Option<Duration>) {
        let mut line = match status {
            CameraStatus::Idle => format!("cam {}  {}", cam, status),
            CameraStatus::Sending => format!("cam {}  {}", cam, status),
            CameraStatus::Ok(_) => format!("cam {}  ✔ {}", cam, status),
            CameraStatus::Error(_) => format!("cam {}  ✘ {}", cam, status),
        };
        if let Some(elapsed) = elapsed {
            line.push_str(&format!(" [{}]", format_duration(elapsed)));
        }
        match &self.renderer {
            Renderer::Plain => eprintln!("    {}", line),
            Renderer::Pretty { cameras, .. } => {
                if let Some(bar) = cameras.get(cam) {
                    if *status == CameraStatus::Sending {
                        bar.enable_steady_tick(Duration::from_millis(120));
                    } else {
                        bar.disable_steady_tick();
                    }
                    bar.set_message(line);
                }
            }
        }
    }
}

fn pretty_renderer() -> Renderer {
    let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let header = multi.add(ProgressBar::new_spinner());
    header.set_style(
        ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    header.set_message("waiting for scan…");
    let cameras = (0..SLOT_COUNT)
        .map(|cam| {
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(style.clone());
            bar.set_message(format!("cam {}  {}", cam, CameraStatus::Idle));
            bar
        })
        .collect();
    Renderer::Pretty {
        header,
        cameras,
        _multi: multi,
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
