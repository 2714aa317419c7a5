use anyhow::Result;
use clap::Parser;
use colloquy::audio_toolkit::list_input_devices;
use colloquy::{
    ConnectionStatus, SessionController, SessionEvent, Settings, TranscriptSource, TranscriptView,
};
use log::{info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(Parser, Debug)]
#[command(name = "colloquy", about = "Live conversation capture and transcription")]
struct Args {
    /// Path to a JSON settings file.
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Input device name (overrides the settings file).
    #[arg(short, long)]
    device: Option<String>,

    /// Stop the session after this many seconds instead of waiting for
    /// ctrl-c.
    #[arg(long)]
    duration: Option<u64>,

    /// List available input devices and exit.
    #[arg(long)]
    list_devices: bool,
}

/// Live terminal view: committed lines are printed once, the interim line is
/// redrawn in place.
struct Renderer {
    printed: usize,
    interim_width: usize,
    diarized_shown: bool,
}

impl Renderer {
    fn new() -> Self {
        Self {
            printed: 0,
            interim_width: 0,
            diarized_shown: false,
        }
    }

    fn clear_interim(&mut self) {
        if self.interim_width > 0 {
            print!("\r{}\r", " ".repeat(self.interim_width));
            self.interim_width = 0;
        }
    }

    fn draw(&mut self, view: &TranscriptView) {
        self.clear_interim();
        // A diarized replace rewrites history; reprint from the top.
        if view.source == TranscriptSource::Diarized && !self.diarized_shown {
            self.diarized_shown = true;
            self.printed = 0;
            println!("\n--- speaker-attributed transcript ---");
        }
        for item in &view.items[self.printed..] {
            println!("{}: {}", item.speaker, item.text);
        }
        self.printed = view.items.len();
        if let Some(interim) = &view.interim {
            let line = format!("{}: {} …", interim.speaker, interim.text);
            self.interim_width = line.chars().count();
            print!("\r{line}");
            let _ = std::io::stdout().flush();
        }
    }
}

async fn render_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    let mut renderer = Renderer::new();
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::StateChanged {
                status,
                is_recording,
            } => {
                info!("session state: {status:?} (recording: {is_recording})");
                if status == ConnectionStatus::Disconnected {
                    renderer.clear_interim();
                }
            }
            SessionEvent::TranscriptUpdated(view) => renderer.draw(&view),
            SessionEvent::RecoverableError(message) => {
                renderer.clear_interim();
                warn!("{message}");
            }
        }
    }
    renderer.clear_interim();
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_devices {
        for name in list_input_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    let mut settings = Settings::load(args.settings.as_deref())?;
    if args.device.is_some() {
        settings.input_device = args.device;
    }

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (end_tx, end_rx) = oneshot::channel();

    let controller = SessionController::new(settings, event_tx);
    let session = tokio::spawn(controller.run(end_rx));
    let renderer = tokio::spawn(render_events(event_rx));

    match args.duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupted, ending session"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!("duration elapsed, ending session")
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("interrupted, ending session");
        }
    }
    let _ = end_tx.send(());

    let outcome = session.await??;
    renderer.await?;

    println!();
    match outcome.source {
        TranscriptSource::Diarized => info!("handing off diarized transcript"),
        TranscriptSource::Streaming => {
            info!("handing off streaming transcript (diarization unavailable)")
        }
    }
    for line in &outcome.lines {
        println!("{line}");
    }

    Ok(())
}
