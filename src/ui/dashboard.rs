use crate::dns::SortBy;
use crate::ui::App;
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
};
use std::io;
use std::time::Duration;

/// Runs the dashboard until the user quits. Blocks on terminal input, call
/// it from a blocking thread.
pub fn run_ui(mut app: App) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()>
where
    <B as ratatui::backend::Backend>::Error: Send + Sync + 'static,
{
    let mut table_state = TableState::default();

    loop {
        terminal.draw(|f| ui(f, app, &mut table_state))?;

        if event::poll(Duration::from_millis(250))?
            && let Event::Key(key) = event::read()?
        {
            if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                break;
            }

            if app.filter_mode {
                match key.code {
                    KeyCode::Enter => app.apply_filter(),
                    KeyCode::Esc => app.exit_filter_mode(),
                    KeyCode::Backspace => app.filter_backspace(),
                    KeyCode::Char(c) => app.filter_input_char(c),
                    _ => {}
                }
                continue;
            }

            match key.code {
                KeyCode::Char('q') => break,
                KeyCode::Char('s') => app.toggle_sort(),
                KeyCode::Char('/') => app.enter_filter_mode(),
                KeyCode::Up | KeyCode::Char('k') => app.scroll_up(),
                KeyCode::Down | KeyCode::Char('j') => app.scroll_down(app.row_count()),
                KeyCode::PageUp => app.page_up(),
                KeyCode::PageDown => app.page_down(app.row_count()),
                KeyCode::Home => app.home(),
                KeyCode::End => app.end(app.row_count()),
                _ => {}
            }
            table_state.select(Some(app.scroll_state));
        }
    }

    Ok(())
}

fn ui(f: &mut Frame, app: &App, table_state: &mut TableState) {
    let mut constraints = vec![Constraint::Length(3), Constraint::Min(0)];
    if app.filter_mode {
        constraints.push(Constraint::Length(3));
    }
    constraints.push(Constraint::Length(3));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(f.area());

    render_header(f, chunks[0], app);
    render_table(f, chunks[1], app, table_state);

    if app.filter_mode {
        render_filter_input(f, chunks[2], app);
        render_footer(f, chunks[3], app);
    } else {
        render_footer(f, chunks[2], app);
    }
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let stats = app.store.stats();

    let title = Line::from(vec![
        Span::styled("DNS Process Monitor", Style::default().fg(Color::Cyan).bold()),
        Span::raw(" | "),
        Span::styled(
            format!("Processes: {}", stats.processes),
            Style::default().fg(Color::Green),
        ),
        Span::raw(" | "),
        Span::styled(
            format!("Queries: {}", stats.records),
            Style::default().fg(Color::Yellow),
        ),
        Span::raw(" | "),
        Span::styled(
            format!("Unattributed: {}", stats.dropped.unattributed),
            Style::default().fg(Color::Red),
        ),
    ]);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White));

    f.render_widget(Paragraph::new(title).block(block), area);
}

fn render_table(f: &mut Frame, area: Rect, app: &App, table_state: &mut TableState) {
    let processes = app.store.processes(app.sort_by, app.active_filter());

    let header_cells = ["Process", "PIDs", "Queries", "Last Domain", "Type", "Last Seen"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).bold()));

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = processes.iter().map(|entry| {
        let last = entry.last_record();
        let cells = vec![
            Cell::from(entry.process_name.clone()),
            Cell::from(entry.pid_list()),
            Cell::from(entry.domains.len().to_string()),
            Cell::from(last.map_or_else(|| "-".to_string(), |r| r.domain.clone())),
            Cell::from(last.map_or_else(|| "-".to_string(), |r| r.query_type.to_string())),
            Cell::from(last.map_or_else(
                || "-".to_string(),
                |r| r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            )),
        ];
        Row::new(cells).height(1)
    });

    let sort_indicator = match app.sort_by {
        SortBy::LastSeen => " [Sort: Time ↓]",
        SortBy::Count => " [Sort: Count ↓]",
        SortBy::Name => " [Sort: Name ↑]",
    };

    let title = match app.active_filter() {
        None => format!("Processes{sort_indicator}"),
        Some(filter) => format!("Processes{sort_indicator} [Filter: {filter}]"),
    };

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(18),
            Constraint::Percentage(14),
            Constraint::Percentage(8),
            Constraint::Percentage(35),
            Constraint::Percentage(7),
            Constraint::Percentage(18),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(Color::White)),
    )
    .row_highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );

    f.render_stateful_widget(table, area, table_state);
}

fn render_filter_input(f: &mut Frame, area: Rect, app: &App) {
    let input_text = Line::from(vec![
        Span::styled("Filter: ", Style::default().fg(Color::Yellow).bold()),
        Span::raw(&app.filter_input),
        Span::styled("█", Style::default().fg(Color::Green)),
    ]);

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Process or domain substring (Enter to apply, Esc to cancel)")
        .border_style(Style::default().fg(Color::Green));

    f.render_widget(Paragraph::new(input_text).block(block), area);
}

fn render_footer(f: &mut Frame, area: Rect, app: &App) {
    let keys: &[(&str, &str)] = if app.filter_mode {
        &[("Enter", "Apply"), ("Esc", "Cancel"), ("Backspace", "Delete")]
    } else {
        &[
            ("q/Ctrl+C", "Quit"),
            ("/", "Filter"),
            ("s", "Sort"),
            ("↑↓/jk", "Navigate"),
        ]
    };

    let mut spans = Vec::new();
    for (i, (key, action)) in keys.iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw(" | "));
        }
        spans.push(Span::styled(*key, Style::default().fg(Color::Cyan)));
        spans.push(Span::raw(format!(" {action}")));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White));

    f.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{CapturedPacket, Correlator, RetentionPolicy};
    use crate::process::ProcessInfo;
    use ratatui::backend::TestBackend;

    fn rendered(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 12)).unwrap();
        let mut table_state = TableState::default();
        terminal
            .draw(|f| ui(f, app, &mut table_state))
            .unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn table_shows_processes_and_last_domain() {
        let correlator = Correlator::new(
            |_port: u16| {
                Some(ProcessInfo {
                    pid: 4242,
                    name: "firefox".to_string(),
                })
            },
            RetentionPolicy::default(),
        );
        correlator.record(&CapturedPacket::query("first.example", 1, 1000));
        correlator.record(&CapturedPacket::query("mozilla.org", 28, 1000));
        let app = App::new(correlator.store());

        let screen = rendered(&app);
        assert!(screen.contains("Processes: 1"));
        assert!(screen.contains("firefox"));
        assert!(screen.contains("4242"));
        assert!(screen.contains("mozilla.org"));
        assert!(screen.contains("AAAA"));
        assert!(!screen.contains("first.example"));
    }

    #[test]
    fn filter_box_appears_in_filter_mode() {
        let correlator = Correlator::new(
            |_port: u16| -> Option<ProcessInfo> { None },
            RetentionPolicy::default(),
        );
        let mut app = App::new(correlator.store());
        app.enter_filter_mode();
        app.filter_input_char('x');

        assert!(rendered(&app).contains("Filter: x"));
    }
}
