use chrono::NaiveDate;
use tracing::warn;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Near,
    Soon,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Urgency {
    pub tier: Tier,
    pub days_until_due: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Rgb(u8, u8, u8),
    White,
    Black,
    /// Whatever the surface normally uses.
    Default,
}

pub const WARNING_RED: Color = Color::Rgb(0xF5, 0x5B, 0x72);
pub const WARNING_YELLOW: Color = Color::Rgb(0xFA, 0xF2, 0xA0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowStyle {
    pub background: Color,
    pub foreground: Color,
}

impl Tier {
    pub fn style(self) -> RowStyle {
        match self {
            Tier::Near => RowStyle {
                background: WARNING_RED,
                foreground: Color::White,
            },
            Tier::Soon => RowStyle {
                background: WARNING_YELLOW,
                foreground: Color::Black,
            },
            Tier::Normal => RowStyle {
                background: Color::Default,
                foreground: Color::Default,
            },
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tier::Near => "near",
            Tier::Soon => "soon",
            Tier::Normal => "normal",
        }
    }
}

/// Inclusive day ceilings for the NEAR and SOON tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub near: i64,
    pub soon: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            near: 60,
            soon: 100,
        }
    }
}

impl Thresholds {
    /// Reads `urgency.near` / `urgency.soon`; bad values fall back to the defaults.
    pub fn from_config(cfg: &Config) -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: i64| match cfg.get(key) {
            None => fallback,
            Some(raw) => raw.trim().parse::<i64>().unwrap_or_else(|_| {
                warn!(key, value = %raw, "invalid urgency threshold; using default");
                fallback
            }),
        };

        let near = read("urgency.near", defaults.near);
        let soon = read("urgency.soon", defaults.soon);
        if near > soon {
            warn!(near, soon, "urgency.near exceeds urgency.soon; using defaults");
            return defaults;
        }
        Self { near, soon }
    }

    pub fn tier_for(&self, days_until_due: i64) -> Tier {
        if days_until_due <= self.near {
            Tier::Near
        } else if days_until_due <= self.soon {
            Tier::Soon
        } else {
            Tier::Normal
        }
    }

    pub fn classify(&self, today: NaiveDate, due_date: NaiveDate) -> Urgency {
        let days_until_due = (due_date - today).num_days();
        Urgency {
            tier: self.tier_for(days_until_due),
            days_until_due,
        }
    }
}

/// Classifies with the default 60/100 day ceilings. Overdue items are NEAR.
pub fn classify(today: NaiveDate, due_date: NaiveDate) -> Urgency {
    Thresholds::default().classify(today, due_date)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 17).expect("valid date")
    }

    fn tier_at(k: i64) -> Tier {
        classify(today(), today() + Duration::days(k)).tier
    }

    #[test]
    fn days_until_due_matches_offset() {
        for k in [-400, -5, -1, 0, 1, 59, 60, 61, 100, 101, 365, 3650] {
            let due = today() + Duration::days(k);
            assert_eq!(classify(today(), due).days_until_due, k, "offset {k}");
        }
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(tier_at(60), Tier::Near);
        assert_eq!(tier_at(61), Tier::Soon);
        assert_eq!(tier_at(100), Tier::Soon);
        assert_eq!(tier_at(101), Tier::Normal);
        assert_eq!(tier_at(-5), Tier::Near);
        assert_eq!(tier_at(0), Tier::Near);
    }

    #[test]
    fn styles_follow_tier() {
        assert_eq!(Tier::Near.style().background, WARNING_RED);
        assert_eq!(Tier::Near.style().foreground, Color::White);
        assert_eq!(Tier::Soon.style().background, WARNING_YELLOW);
        assert_eq!(Tier::Soon.style().foreground, Color::Black);
        assert_eq!(Tier::Normal.style().background, Color::Default);
    }

    #[test]
    fn custom_thresholds_shift_boundaries() {
        let thresholds = Thresholds { near: 7, soon: 30 };
        assert_eq!(thresholds.tier_for(7), Tier::Near);
        assert_eq!(thresholds.tier_for(8), Tier::Soon);
        assert_eq!(thresholds.tier_for(31), Tier::Normal);
    }

    #[test]
    fn thresholds_from_config() {
        let mut cfg = Config::defaults();
        cfg.apply_overrides([("urgency.near".to_string(), "10".to_string())]);
        assert_eq!(Thresholds::from_config(&cfg), Thresholds { near: 10, soon: 100 });

        cfg.apply_overrides([("rc.urgency.soon".to_string(), "5".to_string())]);
        assert_eq!(Thresholds::from_config(&cfg), Thresholds::default());

        cfg.apply_overrides([("urgency.soon".to_string(), "lots".to_string())]);
        assert_eq!(Thresholds::from_config(&cfg), Thresholds { near: 10, soon: 100 });
    }
}
