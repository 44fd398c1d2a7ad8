//! Read-only terminal dashboard for the EC fan and temperature registers.
//!
//! Samples on its own clock and keeps its own sample ring, so it shows what
//! the control loop would decide without ever writing to the EC.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Gauge, Paragraph};
use ratatui::{DefaultTerminal, Frame};

use crate::driver::TEMP_CRIT;
use crate::fan::{FanSnapshot, MAX_FAN_STATE};
use crate::platform::{create_ec, create_firmware_info, EmbeddedController};
use crate::profile::{find_profile, ControlConfig, Identity};
use crate::samples::SampleRing;

struct Dashboard {
    ec: Box<dyn EmbeddedController>,
    identity: Identity,
    ctrl: ControlConfig,
    samples: SampleRing,
    snapshot: Option<FanSnapshot>,
    error: Option<String>,
    interval: Duration,
}

impl Dashboard {
    fn sample(&mut self) {
        let reading = self
            .ec
            .read(self.ctrl.tempreg)
            .and_then(|temp| self.ec.read(self.ctrl.fanreg).map(|fan| (temp, fan)));

        match reading {
            Ok((temperature, fan_state)) => {
                self.samples.push(i32::from(temperature));
                self.snapshot = Some(FanSnapshot {
                    temperature,
                    fan_state,
                    smoothed: Some(self.samples.average()),
                });
                self.error = None;
            }
            Err(error) => self.error = Some(error.to_string()),
        }
    }

    fn render(&self, frame: &mut Frame) {
        let [header, temp_area, fan_area, details] = Layout::vertical([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .areas(frame.area());

        frame.render_widget(
            Paragraph::new(format!(
                "{} {} (BIOS {})  q to quit",
                self.identity.vendor, self.identity.product, self.identity.version
            ))
            .block(Block::bordered().title("acerhdf monitor")),
            header,
        );

        let (temp_ratio, temp_label, fan_ratio, fan_label) = match &self.snapshot {
            Some(s) => (
                (f64::from(s.temperature) / TEMP_CRIT as f64).min(1.0),
                format!("{}\u{00B0}C / {}\u{00B0}C critical", s.temperature, TEMP_CRIT),
                (f64::from(s.fan_state) / f64::from(MAX_FAN_STATE)).min(1.0),
                format!("{} / {}", s.fan_state, MAX_FAN_STATE),
            ),
            None => (0.0, "waiting".to_string(), 0.0, "waiting".to_string()),
        };

        frame.render_widget(
            Gauge::default()
                .block(Block::bordered().title("CPU temperature"))
                .gauge_style(Style::default().fg(Color::Red))
                .ratio(temp_ratio)
                .label(temp_label),
            temp_area,
        );
        frame.render_widget(
            Gauge::default()
                .block(Block::bordered().title("Fan register"))
                .gauge_style(Style::default().fg(Color::Cyan))
                .ratio(fan_ratio)
                .label(fan_label),
            fan_area,
        );

        let mut lines = vec![
            Line::from(format!(
                "fanreg {:#04x}  tempreg {:#04x}  refresh {}s",
                self.ctrl.fanreg,
                self.ctrl.tempreg,
                self.interval.as_secs()
            )),
            Line::from(format!("samples: cursor {}", self.samples.cursor())),
        ];
        if let Some(snapshot) = &self.snapshot {
            lines.push(Line::from(snapshot.to_string()));
        }
        if let Some(error) = &self.error {
            lines.push(Line::styled(format!("EC error: {}", error), Style::default().fg(Color::Yellow)));
        }
        frame.render_widget(Paragraph::new(lines).block(Block::bordered().title("Control loop view")), details);
    }
}

fn event_loop(terminal: &mut DefaultTerminal, mut dashboard: Dashboard) -> Result<()> {
    let mut last_sample: Option<Instant> = None;
    loop {
        if last_sample.map_or(true, |t| t.elapsed() >= dashboard.interval) {
            dashboard.sample();
            last_sample = Some(Instant::now());
        }

        terminal.draw(|frame| dashboard.render(frame))?;

        if event::poll(Duration::from_millis(250))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                    return Ok(());
                }
            }
        }
    }
}

pub fn run(interval_secs: u64) -> Result<()> {
    let info = create_firmware_info();
    let identity = Identity::read(&*info)?;
    let profile = find_profile(&identity).ok_or_else(|| {
        anyhow!(
            "unsupported hardware {}/{}/{}",
            identity.vendor,
            identity.product,
            identity.version
        )
    })?;

    let dashboard = Dashboard {
        ec: create_ec(),
        ctrl: ControlConfig::from(profile),
        identity,
        samples: SampleRing::new(),
        snapshot: None,
        error: None,
        interval: Duration::from_secs(interval_secs.max(1)),
    };

    let mut terminal = ratatui::init();
    let result = event_loop(&mut terminal, dashboard);
    ratatui::restore();
    result
}
