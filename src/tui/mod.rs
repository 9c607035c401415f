mod picker;
mod render;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use image::{DynamicImage, RgbaImage};
use ratatui::{backend::CrosstermBackend, Terminal};
use ratatui_image::picker::Picker;
use ratatui_image::protocol::StatefulProtocol;
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::config::ViewerConfig;
use crate::transport::ws::WsTransport;
use crate::viewer::{DisplaySurface, FeedClient};

/// Status lines kept for the history pane
const STATUS_HISTORY: usize = 4;

type TuiClient = FeedClient<WsTransport, TerminalSurface, mpsc::UnboundedSender<String>>;

/// Display surface that renders through ratatui-image
pub struct TerminalSurface {
    picker: Picker,
    protocol: Option<StatefulProtocol>,
    dims: Option<(u32, u32)>,
}

impl TerminalSurface {
    pub fn new(picker: Picker) -> Self {
        Self {
            picker,
            protocol: None,
            dims: None,
        }
    }
}

impl DisplaySurface for TerminalSurface {
    fn set_image(&mut self, image: RgbaImage) {
        self.dims = Some(image.dimensions());
        self.protocol = Some(self.picker.new_resize_protocol(DynamicImage::ImageRgba8(image)));
    }
}

pub(crate) struct StatusHistory {
    lines: VecDeque<(String, String)>,
}

impl StatusHistory {
    fn new() -> Self {
        Self {
            lines: VecDeque::with_capacity(STATUS_HISTORY),
        }
    }

    fn push(&mut self, text: String) {
        if self.lines.len() == STATUS_HISTORY {
            self.lines.pop_front();
        }
        let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
        self.lines.push_back((stamp, text));
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.lines.iter()
    }
}

/// Run the terminal viewer until the user quits
pub async fn run(config: ViewerConfig, force_protocol: Option<&str>) -> Result<()> {
    // Query terminal graphics before raw mode
    let picker = picker::create_picker(force_protocol);
    let tick_interval = config.tick_interval;

    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<String>();
    let mut client = FeedClient::new(config, WsTransport::new(), TerminalSurface::new(picker), status_tx);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut client, &mut status_rx, tick_interval);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    client.disconnect();
    tokio::time::sleep(Duration::from_millis(200)).await;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    client: &mut TuiClient,
    status_rx: &mut mpsc::UnboundedReceiver<String>,
    tick_interval: Duration,
) -> Result<()> {
    let mut history = StatusHistory::new();
    client.start(Instant::now());

    loop {
        client.service(Instant::now());
        while let Ok(text) = status_rx.try_recv() {
            history.push(text);
        }

        terminal.draw(|f| render::draw(f, client, &history))?;

        if !event::poll(tick_interval)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
            KeyCode::Char('c') => client.connect(Instant::now()),
            KeyCode::Char('d') => client.disconnect(),
            _ => {}
        }
    }

    Ok(())
}
