use devdeck_core::{HealthState, ProcessState, ThemeConfig};
use ratatui::style::{Color, Modifier, Style};
use tracing::warn;

const DEFAULT_PRIMARY: Color = Color::Indexed(205);
const DEFAULT_SECONDARY: Color = Color::Rgb(0x7d, 0x56, 0xf4);
const DEFAULT_BORDER: Color = Color::Indexed(63);
const DEFAULT_TEXT: Color = Color::Indexed(240);

pub mod icons {
    pub const CURSOR: &str = ">";
    pub const PIN: &str = "^";
    pub const RUNNING: &str = "●";
    pub const STOPPED: &str = "○";
    pub const ERROR: &str = "✗";
}

/// Colors for one run of the dashboard. Built once from the config and passed to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub primary: Color,
    pub secondary: Color,
    pub border: Color,
    pub text: Color,
    pub ok: Color,
    pub warn: Color,
    pub critical: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary: DEFAULT_PRIMARY,
            secondary: DEFAULT_SECONDARY,
            border: DEFAULT_BORDER,
            text: DEFAULT_TEXT,
            ok: Color::Rgb(142, 192, 124),
            warn: Color::Rgb(250, 189, 47),
            critical: Color::Rgb(251, 73, 52),
        }
    }
}

impl Theme {
    pub fn from_config(config: &ThemeConfig) -> Self {
        let base = Theme::default();
        Self {
            primary: parse_color(config.primary.as_deref(), base.primary),
            secondary: parse_color(config.secondary.as_deref(), base.secondary),
            border: parse_color(config.border.as_deref(), base.border),
            text: parse_color(config.text.as_deref(), base.text),
            ..base
        }
    }

    pub fn title(&self) -> Style {
        Style::new().fg(self.primary).add_modifier(Modifier::BOLD)
    }

    pub fn border(&self, focused: bool) -> Style {
        if focused {
            Style::new().fg(self.primary)
        } else {
            Style::new().fg(self.border)
        }
    }

    pub fn selected(&self) -> Style {
        Style::new()
            .fg(self.primary)
            .add_modifier(Modifier::BOLD)
    }

    pub fn muted(&self) -> Style {
        Style::new().fg(self.text)
    }

    pub fn highlight(&self) -> Style {
        Style::new()
            .bg(self.secondary)
            .fg(Color::White)
            .add_modifier(Modifier::BOLD)
    }

    pub fn status_bar(&self) -> Style {
        Style::new().bg(self.secondary).fg(Color::White)
    }

    pub fn state_color(&self, state: ProcessState) -> Color {
        match state {
            ProcessState::Running => self.ok,
            ProcessState::Stopped => self.text,
            ProcessState::Error => self.critical,
        }
    }

    pub fn health_color(&self, health: HealthState) -> Color {
        match health {
            HealthState::Healthy => self.ok,
            HealthState::Starting => self.warn,
            HealthState::Unhealthy => self.critical,
            HealthState::Unchecked => self.text,
        }
    }
}

fn parse_color(raw: Option<&str>, fallback: Color) -> Color {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return fallback;
    };
    match raw.parse::<Color>() {
        Ok(color) => color,
        Err(_) => {
            warn!(color = raw, "unrecognised theme color, using default");
            fallback
        }
    }
}
