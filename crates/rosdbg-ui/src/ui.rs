//! UI rendering logic

use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use rosdbg_core::session::SessionState;

use crate::app::{App, ViewMode};

/// Draw the UI
pub fn draw(frame: &mut Frame, app: &mut App)
{
    // Room for the help line to wrap once
    let footer_height = if app.error_message.is_some() { 5 } else { 4 };
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(footer_height),
    ])
    .split(frame.area());

    draw_header(frame, chunks[0], app);
    match app.view_mode {
        ViewMode::Overview => crate::widgets::draw_overview(frame, chunks[1], app),
        ViewMode::Source => crate::widgets::draw_source(frame, chunks[1], app),
        ViewMode::Modules => crate::widgets::draw_modules(frame, chunks[1], app),
        ViewMode::Memory => crate::widgets::draw_memory(frame, chunks[1], app),
        ViewMode::Traffic => crate::widgets::draw_traffic(frame, chunks[1], app),
        ViewMode::Breakpoints => crate::widgets::draw_breakpoints(frame, chunks[1], app),
    }
    draw_footer(frame, chunks[2], app);
}

/// Title line: mode, run state and location
fn draw_header(frame: &mut Frame, area: Rect, app: &App)
{
    let color = match app.status.state() {
        SessionState::Closed => Color::DarkGray,
        SessionState::Connecting => Color::Yellow,
        SessionState::Stopped => Color::Cyan,
        SessionState::Running => Color::Green,
    };

    let header = Paragraph::new(app.status.title())
        .block(Block::default().borders(Borders::ALL).title("rosdbg"))
        .style(Style::default().fg(color).add_modifier(Modifier::BOLD));

    frame.render_widget(header, area);
}

/// Keys valid in the current run state, plus any error
fn draw_footer(frame: &mut Frame, area: Rect, app: &App)
{
    let run_keys = match app.status.state() {
        SessionState::Running => "b:Break t:Breakpoint o:Disconnect",
        SessionState::Stopped => "g:Go s:Step n:Next m:Memory f:Focus t:Breakpoint o:Disconnect",
        SessionState::Connecting => "o:Cancel",
        SessionState::Closed => "o:Connect",
    };
    let navigation = match app.view_mode {
        ViewMode::Source | ViewMode::Traffic => "↑/↓:Scroll | ",
        ViewMode::Modules => "↑/↓:Navigate | ",
        ViewMode::Overview | ViewMode::Memory | ViewMode::Breakpoints => "",
    };
    let help_text =
        format!("{navigation}1:Overview 2:Source 3:Modules 4:Memory 5:Output 6:Breakpoints | {run_keys} | q:Quit");

    let mut footer_lines = vec![Line::from(help_text)];
    if let Some(ref error) = app.error_message {
        footer_lines.push(Line::from(vec![Span::styled(
            format!("Error: {error}"),
            Style::default().fg(Color::Red),
        )]));
    }

    let footer = Paragraph::new(footer_lines)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .style(Style::default().fg(Color::White))
        .wrap(Wrap { trim: true });

    frame.render_widget(footer, area);
}
