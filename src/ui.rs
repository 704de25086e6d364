use crate::app::{App, LinkStatus, ToastKind};
use crate::audio::MediaSink;
use crate::gateway;
use crate::model::human_size;
use crate::sequencer::Slot;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use std::time::Duration;

const APP_TITLE_WITH_VERSION: &str = concat!("beardown v", env!("CARGO_PKG_VERSION"), "  ");

#[derive(Clone, Copy)]
struct Palette {
    bg: Color,
    panel_bg: Color,
    panel_alt_bg: Color,
    border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    alert: Color,
    selected_bg: Color,
    ok_bg: Color,
    error_bg: Color,
}

const PALETTE: Palette = Palette {
    bg: Color::Rgb(10, 15, 24),
    panel_bg: Color::Rgb(19, 29, 43),
    panel_alt_bg: Color::Rgb(24, 38, 58),
    border: Color::Rgb(69, 121, 176),
    text: Color::Rgb(214, 228, 248),
    muted: Color::Rgb(149, 173, 204),
    accent: Color::Rgb(100, 203, 184),
    alert: Color::Rgb(249, 174, 88),
    selected_bg: Color::Rgb(34, 55, 82),
    ok_bg: Color::Rgb(28, 84, 66),
    error_bg: Color::Rgb(120, 34, 40),
};

pub fn draw(frame: &mut Frame, app: &App, sink: &dyn MediaSink) {
    let colors = PALETTE;
    frame.render_widget(
        Block::default().style(Style::default().bg(colors.bg)),
        frame.area(),
    );

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    draw_header(frame, app, vertical[0], &colors);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(vertical[1]);

    draw_track_list(frame, app, body[0], &colors);
    draw_now_playing(frame, app, sink, body[1], &colors);

    let timeline = Paragraph::new(Span::styled(
        timeline_line(sink, 26, 14),
        Style::default().fg(colors.text),
    ))
    .block(panel_block(
        "Timeline",
        colors.panel_bg,
        colors.text,
        colors.border,
    ))
    .wrap(Wrap { trim: true });
    frame.render_widget(timeline, vertical[2]);

    draw_footer(frame, app, vertical[3], &colors);

    if let Some(toast) = &app.toast {
        draw_toast(frame, &toast.message, toast.kind, &colors);
    }
}

fn draw_header(frame: &mut Frame, app: &App, area: Rect, colors: &Palette) {
    frame.render_widget(
        panel_block("Status", colors.panel_bg, colors.text, colors.border),
        area,
    );
    let inner = area.inner(Margin {
        vertical: 0,
        horizontal: 1,
    });
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(44), Constraint::Percentage(56)])
        .split(inner);

    let autoplay = if app.sequencer.autoplay() { "on" } else { "off" };
    let left = Paragraph::new(Line::from(vec![
        Span::styled(
            APP_TITLE_WITH_VERSION,
            Style::default()
                .fg(colors.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("Tracks {}", app.sequencer.catalog().len()),
            Style::default().fg(colors.text),
        ),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(
            format!("Autoplay {autoplay}"),
            Style::default().fg(colors.alert),
        ),
    ]));
    frame.render_widget(left, chunks[0]);

    let (link_text, link_color) = match &app.link {
        LinkStatus::Disconnected => (String::from("Disconnected"), colors.muted),
        LinkStatus::Connecting(backend) => (format!("Connecting to {backend}"), colors.alert),
        LinkStatus::Connected(base) => (format!("Connected {base}"), colors.accent),
        LinkStatus::Failed(reason) => (format!("Offline: {reason}"), colors.alert),
    };
    let right = Paragraph::new(Span::styled(link_text, Style::default().fg(link_color)))
        .alignment(Alignment::Right);
    frame.render_widget(right, chunks[1]);
}

fn draw_track_list(frame: &mut Frame, app: &App, area: Rect, colors: &Palette) {
    let current = app.sequencer.current_index();
    let playing = app.sequencer.is_playing();
    let items: Vec<ListItem> = app
        .sequencer
        .catalog()
        .tracks
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let marker = match current {
                Some(current) if current == index && playing => "  > ",
                Some(current) if current == index => "  . ",
                _ => "    ",
            };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(colors.muted)),
                Span::styled(track.path.as_str(), Style::default().fg(colors.text)),
                Span::styled(
                    format!("  {}", human_size(track.size)),
                    Style::default().fg(colors.muted),
                ),
            ]))
        })
        .collect();

    let mut state = ListState::default();
    state.select((!app.sequencer.catalog().is_empty()).then_some(app.selected_row));

    let title = if app.sequencer.catalog().root.is_empty() {
        String::from("Tracks")
    } else {
        format!("Tracks / {}", app.sequencer.catalog().root)
    };
    let list = List::new(items)
        .block(panel_block(
            &title,
            colors.panel_bg,
            colors.text,
            colors.border,
        ))
        .highlight_style(
            Style::default()
                .bg(colors.selected_bg)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("-> ");
    frame.render_stateful_widget(list, area, &mut state);
}

fn draw_now_playing(
    frame: &mut Frame,
    app: &App,
    sink: &dyn MediaSink,
    area: Rect,
    colors: &Palette,
) {
    let track = app.sequencer.current_track();
    let state = match app.sequencer.slot() {
        Slot::Idle => "Idle",
        Slot::Playing { .. } if sink.is_loading() => "Loading",
        Slot::Playing { .. } if sink.is_paused() => "Paused",
        Slot::Playing { .. } => "Playing",
        Slot::Stopped { .. } => "Stopped",
    };
    let position = app
        .sequencer
        .current_index()
        .map(|index| format!("{}/{}", index + 1, app.sequencer.catalog().len()))
        .unwrap_or_else(|| format!("-/{}", app.sequencer.catalog().len()));
    let stream = app
        .sequencer
        .current_stream_url()
        .map(|url| url.to_string())
        .unwrap_or_else(|| String::from("-"));

    let text = vec![
        Line::from(vec![
            Span::styled(
                "Now",
                Style::default()
                    .fg(colors.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("  {}", track.map_or("-", |track| track.path.as_str())),
                Style::default().fg(colors.text),
            ),
        ]),
        Line::from(Span::styled(
            format!("State   {state}"),
            Style::default().fg(colors.alert),
        )),
        Line::from(Span::styled(
            format!("Row     {position}"),
            Style::default().fg(colors.muted),
        )),
        Line::from(Span::styled(
            format!(
                "Size    {}",
                track.map_or_else(|| String::from("-"), |track| human_size(track.size))
            ),
            Style::default().fg(colors.muted),
        )),
        Line::from(Span::styled(
            format!(
                "Save as {}",
                track.map_or_else(|| String::from("-"), gateway::download_name)
            ),
            Style::default().fg(colors.muted),
        )),
        Line::from(""),
        Line::from(Span::styled(
            format!("Stream  {stream}"),
            Style::default().fg(colors.muted),
        )),
        Line::from(Span::styled(
            format!(
                "Output  {}",
                sink.output_name().unwrap_or_else(|| String::from("-"))
            ),
            Style::default().fg(colors.muted),
        )),
    ];
    let block = Paragraph::new(text)
        .block(panel_block(
            "Now Playing",
            colors.panel_alt_bg,
            colors.text,
            colors.border,
        ))
        .wrap(Wrap { trim: true });
    frame.render_widget(block, area);
}

fn draw_footer(frame: &mut Frame, app: &App, area: Rect, colors: &Palette) {
    let line = if app.command_mode {
        Line::from(vec![
            Span::styled(":", Style::default().fg(colors.accent)),
            Span::styled(app.command_buffer.as_str(), Style::default().fg(colors.text)),
            Span::styled("_", Style::default().fg(colors.muted)),
        ])
    } else {
        Line::from(vec![
            Span::styled(
                "Keys: Enter play, Space pause, a autoplay, c connect, d download, : command, q quit",
                Style::default().fg(colors.muted),
            ),
            Span::styled("  |  ", Style::default().fg(colors.muted)),
            Span::styled(app.status.as_str(), Style::default().fg(colors.text)),
        ])
    };
    let footer = Paragraph::new(line).block(panel_block(
        "Message",
        colors.panel_bg,
        colors.text,
        colors.border,
    ));
    frame.render_widget(footer, area);
}

fn draw_toast(frame: &mut Frame, message: &str, kind: ToastKind, colors: &Palette) {
    let area = frame.area();
    let width = (message.chars().count() as u16)
        .saturating_add(4)
        .min(area.width.saturating_sub(2));
    let rect = Rect {
        x: area.x + area.width.saturating_sub(width + 1),
        y: area.y + 1,
        width,
        height: 3.min(area.height),
    };
    let bg = match kind {
        ToastKind::Ok => colors.ok_bg,
        ToastKind::Error => colors.error_bg,
    };

    frame.render_widget(Clear, rect);
    frame.render_widget(
        Paragraph::new(Span::styled(message, Style::default().fg(Color::White)))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(colors.border))
                    .style(Style::default().bg(bg)),
            ),
        rect,
    );
}

fn panel_block(title: &str, bg: Color, text: Color, border: Color) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(text).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(bg))
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

fn progress_bar(ratio: Option<f64>, width: usize) -> String {
    let clamped = ratio.unwrap_or(0.0).clamp(0.0, 1.0);
    let filled = (clamped * width as f64).round() as usize;
    format!(
        "[{}{}]",
        "#".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    )
}

fn timeline_line(sink: &dyn MediaSink, timeline_width: usize, volume_width: usize) -> String {
    let elapsed = sink.position().unwrap_or_default();
    let total = sink.duration();
    let ratio = total.and_then(|duration| {
        let total_secs = duration.as_secs_f64();
        (total_secs > 0.0).then_some(elapsed.as_secs_f64() / total_secs)
    });
    let volume = sink.volume();

    format!(
        "{} / {} {}  |  Vol {} {:>3}%",
        format_duration(elapsed),
        total.map_or_else(|| String::from("--:--"), format_duration),
        progress_bar(ratio, timeline_width),
        progress_bar(Some(f64::from(volume.clamp(0.0, 1.0))), volume_width),
        (volume * 100.0).round() as u16
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_render_as_minutes_and_seconds() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00");
        assert_eq!(format_duration(Duration::from_secs(187)), "03:07");
    }

    #[test]
    fn progress_bar_is_clamped() {
        assert_eq!(progress_bar(None, 4), "[----]");
        assert_eq!(progress_bar(Some(0.5), 4), "[##--]");
        assert_eq!(progress_bar(Some(3.0), 4), "[####]");
    }
}
