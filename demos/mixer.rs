//! Interactive zone mixer for an Atmosphere AZM4/AZM8 device.
//!
//! Shows every zone with its name, gain, mute state, and live output meter,
//! all driven by push updates. Gain and mute changes are written back to the
//! device.
//!
//! Usage: mixer <host> [azm4|azm8]

use atlasied_azm::{
    zone_gain, zone_meter, zone_mute, zone_name, AzmClient, DeviceLayout, Format, ParameterStore,
};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;

const GAIN_STEP_PCT: i64 = 2;
const METER_FLOOR_DB: f64 = -60.0;
const METER_WIDTH: usize = 20;

struct App {
    client: AzmClient,
    store: ParameterStore,
    layout: DeviceLayout,
    selected_zone: usize,
    status_message: String,
}

impl App {
    fn new(client: AzmClient, layout: DeviceLayout) -> Self {
        let store = client.store();
        Self {
            client,
            store,
            layout,
            selected_zone: 0,
            status_message: "Use j/k to select a zone, +/- for gain, m for mute, q to quit"
                .to_string(),
        }
    }

    fn select_next(&mut self) {
        self.selected_zone = (self.selected_zone + 1) % self.layout.zones;
    }

    fn select_previous(&mut self) {
        if self.selected_zone == 0 {
            self.selected_zone = self.layout.zones - 1;
        } else {
            self.selected_zone -= 1;
        }
    }

    fn zone_label(&self, zone: usize) -> String {
        match self.store.get_value(&zone_name(zone)) {
            Some(name) => format!("Zone {}: {}", zone, name),
            None => format!("Zone {}", zone),
        }
    }

    fn gain_pct(&self, zone: usize) -> Option<f64> {
        self.store.get_value(&zone_gain(zone))?.as_f64()
    }

    fn muted(&self, zone: usize) -> bool {
        self.store
            .get_value(&zone_mute(zone))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn meter_db(&self, zone: usize) -> Option<f64> {
        self.store.get_value(&zone_meter(zone))?.as_f64()
    }

    async fn adjust_gain(&mut self, delta: i64) -> Result<(), Box<dyn std::error::Error>> {
        let zone = self.selected_zone;
        if let Err(e) = self
            .client
            .bump(zone_gain(zone), delta, Format::Pct)
            .await
        {
            self.status_message = format!("Failed to adjust gain: {}", e);
        } else {
            self.status_message = format!("Zone {} gain {}{}%", zone, if delta >= 0 { "+" } else { "" }, delta);
        }
        Ok(())
    }

    async fn toggle_mute(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let zone = self.selected_zone;
        let new_mute = !self.muted(zone);
        if let Err(e) = self
            .client
            .set(zone_mute(zone), new_mute, Format::Val)
            .await
        {
            self.status_message = format!("Failed to set mute: {}", e);
        } else {
            self.status_message =
                format!("Zone {} mute {}", zone, if new_mute { "ON" } else { "OFF" });
        }
        Ok(())
    }
}

/// Text meter bar scaled from the floor to 0 dBFS.
fn meter_bar(db: Option<f64>) -> String {
    let filled = match db {
        Some(db) => {
            let level = ((db - METER_FLOOR_DB) / -METER_FLOOR_DB).clamp(0.0, 1.0);
            (level * METER_WIDTH as f64).round() as usize
        }
        None => 0,
    };
    let mut bar = String::new();
    for i in 0..METER_WIDTH {
        bar.push(if i < filled { '█' } else { '░' });
    }
    bar
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(f.size());

    render_zones(f, app, chunks[0]);
    render_status(f, app, chunks[1]);
}

fn render_zones(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(format!(
            " {} (j/k select, +/- gain, m mute, q quit) ",
            app.client.host()
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let items: Vec<ListItem> = (0..app.layout.zones)
        .map(|zone| {
            let gain = match app.gain_pct(zone) {
                Some(pct) => format!("{:>3.0}%", pct),
                None => "  ?%".to_string(),
            };
            let mute = if app.muted(zone) {
                Span::styled("MUTE", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
            } else {
                Span::styled("    ", Style::default())
            };
            let meter = app.meter_db(zone);
            let content = vec![
                Line::from(vec![
                    Span::styled(app.zone_label(zone), Style::default().fg(Color::Yellow)),
                ]),
                Line::from(vec![
                    Span::raw("  Gain: "),
                    Span::styled(gain, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
                    Span::raw("   "),
                    mute,
                ]),
                Line::from(vec![
                    Span::raw("  "),
                    Span::styled(meter_bar(meter), Style::default().fg(Color::Green)),
                    Span::raw(match meter {
                        Some(db) => format!(" {:>6.1} dB", db),
                        None => "     -- dB".to_string(),
                    }),
                ]),
                Line::from(""),
            ];
            ListItem::new(content)
        })
        .collect();

    let mut state = ListState::default();
    state.select(Some(app.selected_zone));

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(">> ");

    f.render_stateful_widget(list, area, &mut state);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));

    let text = Paragraph::new(app.status_message.clone())
        .block(block)
        .wrap(Wrap { trim: true });

    f.render_widget(text, area);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let host = match args.next() {
        Some(host) => host,
        None => {
            eprintln!("usage: mixer <host> [azm4|azm8]");
            std::process::exit(2);
        }
    };
    let layout = match args.next().as_deref() {
        Some("azm4") => DeviceLayout::azm4(),
        _ => DeviceLayout::azm8(),
    };

    let mut client = AzmClient::new(&host);
    client.connect().await?;

    // Everything the mixer renders arrives as push updates
    let specs = layout.subscription_specs();
    client.subscribe_many(&specs).await?;
    for (param, fmt) in &specs {
        client.get(param.as_str(), *fmt).await?;
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(client, layout);
    let res = run_app(&mut terminal, &mut app).await;

    app.client.disconnect().await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {}", err);
    }

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        // The store is always current; render straight from it
        terminal.draw(|f| ui(f, app))?;

        // Handle input events (non-blocking)
        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => return Ok(()),
                        KeyCode::Char('j') | KeyCode::Down => app.select_next(),
                        KeyCode::Char('k') | KeyCode::Up => app.select_previous(),
                        KeyCode::Char('+') | KeyCode::Char('=') => {
                            app.adjust_gain(GAIN_STEP_PCT).await?;
                        }
                        KeyCode::Char('-') | KeyCode::Char('_') => {
                            app.adjust_gain(-GAIN_STEP_PCT).await?;
                        }
                        KeyCode::Char('m') => {
                            app.toggle_mute().await?;
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}
