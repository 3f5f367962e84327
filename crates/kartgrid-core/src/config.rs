//! Grid configuration.

use crate::error::{Error, Result};
use crate::models::{ColumnSpec, DEFAULT_PALETTE};
use std::time::Duration;

/// Default debounce between the last drop of a kart and its remote write.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Configuration for one kart grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridConfig {
    /// Number of columns (lineups)
    pub columns: usize,

    /// Row capacity per column, also the snapshot row limit
    pub rows_limit: usize,

    /// Debounce before a move is persisted
    pub debounce: Duration,

    /// Display colors, cycled when shorter than `columns`
    pub colors: Vec<String>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns: 3,
            rows_limit: 8,
            debounce: DEFAULT_DEBOUNCE,
            colors: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl GridConfig {
    /// Config with `columns` columns and defaults for everything else.
    pub fn with_columns(columns: usize) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    /// Create config from environment variables, falling back to defaults.
    ///
    /// - `KARTGRID_COLUMNS` - column count
    /// - `KARTGRID_ROWS` - rows per column
    /// - `KARTGRID_DEBOUNCE_MS` - debounce in milliseconds
    /// - `KARTGRID_COLORS` - comma separated colors
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let columns = parse_var(&lookup, "KARTGRID_COLUMNS")?.unwrap_or(defaults.columns);
        let rows_limit = parse_var(&lookup, "KARTGRID_ROWS")?.unwrap_or(defaults.rows_limit);
        let debounce = parse_var::<u64>(&lookup, "KARTGRID_DEBOUNCE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.debounce);
        let colors = lookup("KARTGRID_COLORS")
            .map(|s| {
                s.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|c| !c.is_empty())
            .unwrap_or(defaults.colors);

        let config = Self {
            columns,
            rows_limit,
            debounce,
            colors,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the grid cannot display.
    pub fn validate(&self) -> Result<()> {
        if self.columns == 0 {
            return Err(Error::Config("grid needs at least one column".into()));
        }
        if self.rows_limit == 0 {
            return Err(Error::Config("rows_limit must be positive".into()));
        }
        Ok(())
    }

    /// Column descriptions in index order.
    pub fn column_specs(&self) -> Vec<ColumnSpec> {
        (0..self.columns)
            .map(|index| ColumnSpec {
                index,
                color: self.color_for(index),
                capacity: self.rows_limit,
            })
            .collect()
    }

    fn color_for(&self, index: usize) -> String {
        if self.colors.is_empty() {
            DEFAULT_PALETTE[index % DEFAULT_PALETTE.len()].to_string()
        } else {
            self.colors[index % self.colors.len()].clone()
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid {key}: {raw:?}"))),
        None => Ok(None),
    }
}
