use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, Wrap},
};
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;

use crate::browser::{NavigationWatcher, Page};
use crate::forms::FieldWriter;
use crate::panel::{Intent, PanelController, PanelState, PanelView};

const TICK: Duration = Duration::from_millis(100);
const DESCRIPTION_PREVIEW_LINES: usize = 12;

/// Run the panel in the terminal until the user quits. Intents run as
/// background tasks so the view keeps redrawing while a request is out.
pub async fn run_panel<P>(
    panel: Arc<PanelController<P>>,
    watcher: NavigationWatcher,
) -> Result<()>
where
    P: Page + FieldWriter + 'static,
{
    let watch_task = {
        let panel = panel.clone();
        tokio::spawn(async move { panel.watch_navigation(watcher).await })
    };

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &panel).await;

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    watch_task.abort();

    result
}

async fn run_loop<P>(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    panel: &Arc<PanelController<P>>,
) -> Result<()>
where
    P: Page + FieldWriter + 'static,
{
    let mut scroll_offset: u16 = 0;

    loop {
        let view = panel.view();
        terminal.draw(|frame| draw(frame, &view, scroll_offset))?;

        // crossterm blocks; keep the other workers free for intents
        let polled = tokio::task::block_in_place(|| -> std::io::Result<Option<Event>> {
            if event::poll(TICK)? {
                event::read().map(Some)
            } else {
                Ok(None)
            }
        })?;
        let Some(Event::Key(key)) = polled else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        let intent = match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break,
            KeyCode::Char('a') => Intent::Analyze,
            KeyCode::Char('p') => Intent::Apply,
            KeyCode::Char('r') => Intent::Reset,
            KeyCode::Char('h') => Intent::Toggle,
            KeyCode::Char('x') => Intent::Close,
            KeyCode::Char('J') | KeyCode::PageDown => {
                scroll_offset = scroll_offset.saturating_add(3);
                continue;
            }
            KeyCode::Char('K') | KeyCode::PageUp => {
                scroll_offset = scroll_offset.saturating_sub(3);
                continue;
            }
            _ => continue,
        };

        if intent == Intent::Reset {
            scroll_offset = 0;
        }
        let panel = panel.clone();
        tokio::spawn(async move {
            panel.dispatch(intent).await;
        });
    }
    Ok(())
}

fn draw(frame: &mut Frame, view: &PanelView, scroll_offset: u16) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(frame.area());

    // Footer help
    let help = Paragraph::new(
        " a:analyze  p:apply  r:reset  h:hide/show  x:close  J/K:scroll  q:quit",
    )
    .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, chunks[3]);

    if !view.visible {
        let hidden = Paragraph::new("HirePilot panel hidden (h to show)")
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(hidden, chunks[0]);
        return;
    }

    let status_style = match view.state {
        PanelState::Idle => Style::default(),
        PanelState::Analyzing => Style::default().fg(Color::Yellow),
        PanelState::Ready => Style::default().fg(Color::Green),
    };
    let mut status = vec![Span::styled(view.status.clone(), status_style)];
    if view.progress {
        status.push(Span::styled(
            "  Processing...",
            Style::default().fg(Color::DarkGray),
        ));
    }
    let status_widget = Paragraph::new(Line::from(status))
        .block(Block::default().borders(Borders::ALL).title(" HirePilot "));
    frame.render_widget(status_widget, chunks[0]);

    let buttons = Line::from(vec![
        button("Analyze Job", view.analyze_enabled),
        Span::raw("   "),
        button("Auto Apply", view.apply_enabled),
    ]);
    frame.render_widget(
        Paragraph::new(buttons).block(Block::default().borders(Borders::ALL)),
        chunks[1],
    );

    let detail = Paragraph::new(build_detail(view))
        .block(Block::default().borders(Borders::ALL).title(" Job "))
        .wrap(Wrap { trim: false })
        .scroll((scroll_offset, 0));
    frame.render_widget(detail, chunks[2]);
}

fn button(label: &str, enabled: bool) -> Span<'static> {
    let style = if enabled {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Span::styled(format!("[ {} ]", label), style)
}

fn build_detail(view: &PanelView) -> Text<'static> {
    let Some(result) = &view.job else {
        return Text::from(Span::styled(
            "(No job analyzed yet)",
            Style::default().fg(Color::DarkGray),
        ));
    };
    let job = &result.job;

    let mut lines: Vec<Line> = Vec::new();

    // Header
    lines.push(Line::from(Span::styled(
        job.title.clone(),
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(format!("at {}", job.company)));
    if let Some(location) = &job.location {
        lines.push(Line::from(format!("Location: {}", location)));
    }
    lines.push(Line::from(format!("Site: {}", job.site)));
    lines.push(Line::from(format!("URL: {}", job.url)));
    lines.push(Line::from(""));

    lines.push(Line::from(Span::styled(
        "Description",
        Style::default().add_modifier(Modifier::BOLD),
    )));
    let wrapped = textwrap::fill(&job.description, 80);
    let mut description = wrapped.lines();
    for line in description.by_ref().take(DESCRIPTION_PREVIEW_LINES) {
        lines.push(Line::from(format!("  {}", line)));
    }
    if description.next().is_some() {
        lines.push(Line::from(Span::styled(
            "  ...",
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines.push(Line::from(""));

    lines.push(Line::from(Span::styled(
        "Tailored Resume",
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )));
    for line in result.tailored_resume_text.lines() {
        lines.push(Line::from(line.to_string()));
    }

    Text::from(lines)
}
