use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use ratatui_image::StatefulImage;
use std::time::Instant;

use super::{StatusHistory, TuiClient};
use crate::viewer::ConnectionState;

pub(crate) fn draw(f: &mut Frame, client: &mut TuiClient, history: &StatusHistory) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(7)])
        .split(f.area());

    let frame_area = chunks[0];
    let status_area = chunks[1];

    let state = client.state();
    let server = client.config().server_uri.clone();
    let shown = client.frames_shown();
    let rejected = client.frames_rejected();
    let last_problem = match (client.last_error(), client.last_close()) {
        (Some(reason), _) => Some(reason.to_string()),
        (None, Some(code)) if !code.is_normal() => Some(format!("closed: {}", code)),
        _ => None,
    };
    let retry_in = client
        .next_retry_at()
        .map(|at| at.saturating_duration_since(Instant::now()));

    // Render image directly in the frame area; a border here makes Sixel/Kitty flicker
    let surface = client.display_mut();
    let dims = surface.dims;
    match surface.protocol.as_mut() {
        Some(protocol) => f.render_stateful_widget(StatefulImage::default(), frame_area, protocol),
        None => {
            let waiting = Paragraph::new(format!("📷 Waiting for frames from {}...", server))
                .style(Style::default().fg(Color::DarkGray))
                .alignment(Alignment::Center);
            f.render_widget(waiting, frame_area);
        }
    }

    let state_color = match state {
        ConnectionState::Connected => Color::Green,
        ConnectionState::Connecting => Color::Yellow,
        ConnectionState::Disconnected => Color::Red,
    };

    let mut summary = vec![
        Span::styled(
            format!("● {}", state),
            Style::default().fg(state_color).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("  frames: {}", shown)),
    ];
    if rejected > 0 {
        summary.push(Span::styled(
            format!("  bad: {}", rejected),
            Style::default().fg(Color::Red),
        ));
    }
    if let Some((w, h)) = dims {
        summary.push(Span::raw(format!("  {}x{}", w, h)));
    }
    if state == ConnectionState::Disconnected {
        if let Some(problem) = last_problem {
            summary.push(Span::styled(
                format!("  ({})", problem),
                Style::default().fg(Color::Red),
            ));
        }
    }
    if let Some(wait) = retry_in {
        summary.push(Span::styled(
            format!("  retry in {:.1}s", wait.as_secs_f32()),
            Style::default().fg(Color::Yellow),
        ));
    }

    let mut lines = vec![Line::from(summary)];
    for (stamp, text) in history.iter() {
        lines.push(Line::from(vec![
            Span::styled(format!("[{}] ", stamp), Style::default().fg(Color::DarkGray)),
            Span::raw(text.clone()),
        ]));
    }

    let status = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", server))
            .title_bottom(" c: connect  d: disconnect  q: quit "),
    );
    f.render_widget(status, status_area);
}
