//! Widget components for displaying session information

use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, Wrap};

use crate::app::App;

fn bold(text: &str) -> Cell<'_>
{
    Cell::from(text).style(Style::default().add_modifier(Modifier::BOLD))
}

/// Status and registers on the left, modules on the right
pub fn draw_overview(frame: &mut Frame, area: Rect, app: &mut App)
{
    let columns = Layout::horizontal([Constraint::Length(44), Constraint::Min(0)]).split(area);
    let left = Layout::vertical([Constraint::Length(6), Constraint::Min(0)]).split(columns[0]);

    draw_status(frame, left[0], app);
    draw_registers(frame, left[1], app);
    draw_modules(frame, columns[1], app);
}

fn draw_status(frame: &mut Frame, area: Rect, app: &App)
{
    let label = Style::default().fg(Color::Yellow);
    let location = app.status.location();
    let lines = vec![
        Line::from(vec![
            Span::styled("Connection: ", label),
            Span::raw(app.status.mode().to_string()),
        ]),
        Line::from(vec![
            Span::styled("State: ", label),
            Span::raw(app.status.state().to_string()),
        ]),
        Line::from(vec![
            Span::styled("Location: ", label),
            Span::raw(if location.is_known() { location.to_string() } else { "-".to_string() }),
        ]),
        Line::from(vec![
            Span::styled("Last: ", label),
            Span::raw(app.status.last_event().unwrap_or_default()),
        ]),
    ];

    let status = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Session"))
        .style(Style::default().fg(Color::White));
    frame.render_widget(status, area);
}

/// Register table; values that changed since the previous stop are highlighted
pub fn draw_registers(frame: &mut Frame, area: Rect, app: &App)
{
    let rows: Vec<Row> = app
        .registers
        .rows()
        .into_iter()
        .map(|(name, value, changed)| {
            let style = if changed {
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Row::new(vec![Cell::from(name), Cell::from(format!("0x{value:08x}"))]).style(style)
        })
        .collect();

    if rows.is_empty() {
        let empty = Paragraph::new("Target has not stopped")
            .block(Block::default().borders(Borders::ALL).title("Registers"))
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, area);
        return;
    }

    let table = Table::new(rows, [Constraint::Length(8), Constraint::Length(12)])
        .block(Block::default().borders(Borders::ALL).title("Registers"))
        .header(Row::new(vec![bold("Register"), bold("Value")]));
    frame.render_widget(table, area);
}

/// Loaded modules and their symbol state
pub fn draw_modules(frame: &mut Frame, area: Rect, app: &mut App)
{
    let modules = app.modules.modules();
    let rows: Vec<Row> = modules
        .iter()
        .map(|module| {
            let style = if module.resolved {
                Style::default()
            } else {
                Style::default().fg(Color::DarkGray)
            };
            Row::new(vec![
                Cell::from(module.short_name.clone()),
                Cell::from(module.base.to_string()),
                Cell::from(app.modules.symbol_status(module)),
            ])
            .style(style)
        })
        .collect();

    let table = Table::new(
        rows,
        [Constraint::Length(14), Constraint::Length(12), Constraint::Min(0)],
    )
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Modules ({})", modules.len())),
    )
    .header(Row::new(vec![bold("Name"), bold("Base"), bold("Symbols")]))
    .row_highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    .highlight_symbol(">> ");

    frame.render_stateful_widget(table, area, &mut app.modules_state);
}

/// Current source file centred on the current line
pub fn draw_source(frame: &mut Frame, area: Rect, app: &App)
{
    let location = app.source.location();
    let title = if location.is_known() {
        format!("Source - {location}")
    } else {
        "Source".to_string()
    };
    let block = Block::default().borders(Borders::ALL).title(title);

    let lines = match app.source.lines() {
        Ok(lines) => lines,
        Err(reason) => {
            let message = Paragraph::new(reason)
                .block(block)
                .style(Style::default().fg(Color::DarkGray))
                .wrap(Wrap { trim: true });
            frame.render_widget(message, area);
            return;
        }
    };

    // Keep the current line a third of the way down, then apply the user's scroll
    let height = usize::from(area.height.saturating_sub(2));
    let current = (location.line as usize).saturating_sub(1);
    let first = current.saturating_sub(height / 3) + app.source.scroll();
    let first = first.min(lines.len().saturating_sub(1));

    let text: Vec<Line> = lines
        .iter()
        .enumerate()
        .skip(first)
        .take(height)
        .map(|(index, line)| {
            let has_breakpoint = u32::try_from(index + 1)
                .is_ok_and(|number| app.breakpoints.is_set(&location.file, number));
            let number = if has_breakpoint {
                Span::styled(format!("{:>5}*", index + 1), Style::default().fg(Color::Red))
            } else {
                Span::styled(format!("{:>5} ", index + 1), Style::default().fg(Color::DarkGray))
            };
            if index == current {
                Line::from(vec![
                    number,
                    Span::styled(
                        line.clone(),
                        Style::default().fg(Color::Black).bg(Color::Yellow),
                    ),
                ])
            } else {
                Line::from(vec![number, Span::raw(line.clone())])
            }
        })
        .collect();

    frame.render_widget(Paragraph::new(text).block(block), area);
}

/// Hex dump of the last memory reply
pub fn draw_memory(frame: &mut Frame, area: Rect, app: &App)
{
    let rows: Vec<Row> = app
        .memory
        .rows()
        .into_iter()
        .map(|(address, bytes, text)| {
            Row::new(vec![
                Cell::from(address.to_string()),
                Cell::from(bytes),
                Cell::from(text),
            ])
        })
        .collect();

    if rows.is_empty() {
        let empty = Paragraph::new("No memory read yet. Press 'm' while stopped to read at eip.")
            .block(Block::default().borders(Borders::ALL).title("Memory"))
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, area);
        return;
    }

    let table = Table::new(
        rows,
        [Constraint::Length(12), Constraint::Length(34), Constraint::Min(0)],
    )
    .block(Block::default().borders(Borders::ALL).title("Memory"))
    .header(Row::new(vec![bold("Address"), bold("Bytes"), bold("Text")]));
    frame.render_widget(table, area);
}

/// Breakpoints set on this connection
pub fn draw_breakpoints(frame: &mut Frame, area: Rect, app: &App)
{
    let breakpoints = app.breakpoints.breakpoints();
    if breakpoints.is_empty() {
        let empty = Paragraph::new("No breakpoints. Press 't' in the source view to set one on the current line.")
            .block(Block::default().borders(Borders::ALL).title("Breakpoints"))
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, area);
        return;
    }

    let rows: Vec<Row> = breakpoints
        .iter()
        .map(|breakpoint| {
            Row::new(vec![
                Cell::from(breakpoint.id.to_string()),
                Cell::from(breakpoint.address.to_string()),
                Cell::from(breakpoint.location.to_string()),
            ])
        })
        .collect();
    let table = Table::new(
        rows,
        [Constraint::Length(4), Constraint::Length(12), Constraint::Min(0)],
    )
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Breakpoints ({})", breakpoints.len())),
    )
    .header(Row::new(vec![bold("Id"), bold("Address"), bold("Location")]));
    frame.render_widget(table, area);
}

/// Debug print output of the target, newest at the bottom
pub fn draw_traffic(frame: &mut Frame, area: Rect, app: &App)
{
    let lines = app.traffic.lines();
    let height = usize::from(area.height.saturating_sub(2));
    let end = lines.len().saturating_sub(app.traffic.scrollback());
    let start = end.saturating_sub(height);

    let text: Vec<Line> = lines[start..end].iter().map(|line| Line::from(line.as_str())).collect();
    let title = if app.traffic.scrollback() > 0 {
        format!("Target Output (-{})", app.traffic.scrollback())
    } else {
        "Target Output".to_string()
    };

    let output = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title(title))
        .style(Style::default().fg(Color::White));
    frame.render_widget(output, area);
}
