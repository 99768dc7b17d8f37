//! Per-dialect query catalogue
//!
//! Each query returns `(result, clock)`: `result` is one InfluxDB line
//! protocol point, `clock` the point's timestamp in epoch milliseconds.
//! Templates carry three placeholders replaced before execution:
//! `##STARTDATE##` and `##ENDDATE##` (epoch seconds) and `##ROWSPERBATCH##`.
//!
//! Every query selects `clock > ##STARTDATE## AND clock <= ##ENDDATE##` and
//! orders by clock first, so adjacent windows never overlap and the last row
//! carries the largest clock.

use std::fmt;
use std::str::FromStr;

use crate::window::Window;

pub const START_PLACEHOLDER: &str = "##STARTDATE##";
pub const END_PLACEHOLDER: &str = "##ENDDATE##";
pub const LIMIT_PLACEHOLDER: &str = "##ROWSPERBATCH##";

/// Stream names with a query in every dialect
pub const STREAMS: &[&str] = &["history", "history_uint", "trends", "trends_uint"];

/// SQL dialect of the Zabbix database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Mysql,
}

impl FromStr for Dialect {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::Mysql),
            other => Err(anyhow::anyhow!(
                "Provider {} is not supported (expected postgresql or mysql)",
                other
            )),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgresql"),
            Dialect::Mysql => write!(f, "mysql"),
        }
    }
}

/// Zabbix value tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueTable {
    History,
    HistoryUint,
    Trends,
    TrendsUint,
}

impl ValueTable {
    fn from_stream(name: &str) -> Option<Self> {
        match name {
            "history" => Some(Self::History),
            "history_uint" => Some(Self::HistoryUint),
            "trends" => Some(Self::Trends),
            "trends_uint" => Some(Self::TrendsUint),
            _ => None,
        }
    }

    fn table(self) -> &'static str {
        match self {
            Self::History => "history",
            Self::HistoryUint => "history_uint",
            Self::Trends => "trends",
            Self::TrendsUint => "trends_uint",
        }
    }

    /// Trends hold hourly aggregates and have no `ns` column
    fn is_trend(self) -> bool {
        matches!(self, Self::Trends | Self::TrendsUint)
    }
}

/// Query template for `stream`, or `None` if the stream is unknown
pub fn template_for(dialect: Dialect, stream: &str) -> Option<String> {
    let table = ValueTable::from_stream(stream)?;
    Some(match dialect {
        Dialect::Postgres => postgres_query(table),
        Dialect::Mysql => mysql_query(table),
    })
}

/// Substitute window bounds and the row limit into a template
pub fn render_query(template: &str, window: &Window, limit: Option<u64>) -> String {
    let limit = limit.unwrap_or(i64::MAX as u64);
    template
        .replace(START_PLACEHOLDER, &window.start_epoch().to_string())
        .replace(END_PLACEHOLDER, &window.end_epoch().to_string())
        .replace(LIMIT_PLACEHOLDER, &limit.to_string())
}

// ============================================================================
// PostgreSQL
// ============================================================================

fn pg_key_param(n: u8) -> String {
    format!(r"coalesce(split_part(substring(ite.key_ FROM '\[(.+)\]'), ',', {n}), '')")
}

/// Item name with `$1`..`$4` replaced by the matching item key parameters
fn pg_measurement() -> String {
    let (p1, p2, p3, p4) = (pg_key_param(1), pg_key_param(2), pg_key_param(3), pg_key_param(4));
    format!(
        r"replace(replace(CASE
    WHEN position('$2' in ite.name) > 0 AND position('$4' in ite.name) > 0
      THEN replace(replace(ite.name, '$2', {p2}), '$4', {p4})
    WHEN position('$1' in ite.name) > 0 AND position('$2' in ite.name) > 0
      THEN replace(replace(ite.name, '$1', {p1}), '$2', {p2})
    WHEN position('$1' in ite.name) > 0 AND position('$3' in ite.name) > 0
      THEN replace(replace(ite.name, '$1', {p1}), '$3', {p3})
    WHEN position('$1' in ite.name) > 0 THEN replace(ite.name, '$1', {p1})
    WHEN position('$2' in ite.name) > 0 THEN replace(ite.name, '$2', {p2})
    WHEN position('$3' in ite.name) > 0 THEN replace(ite.name, '$3', {p3})
    ELSE ite.name
  END, ',', ''), ' ', '\ ')"
    )
}

fn postgres_query(table: ValueTable) -> String {
    let (fields, clock, order) = if table.is_trend() {
        (
            "'value_min=' || CAST(src.value_min AS varchar(32))
  || ',value_avg=' || CAST(src.value_avg AS varchar(32))
  || ',value_max=' || CAST(src.value_max AS varchar(32))",
            "CAST(src.clock AS bigint) * 1000",
            "src.clock ASC, src.itemid ASC",
        )
    } else {
        // Milliseconds are truncated: a row must never report the next second
        (
            "'value=' || CAST(src.value AS varchar(32))",
            "CAST(src.clock * 1000 + floor(src.ns / 1000000.0) AS bigint)",
            "src.clock ASC, src.ns ASC, src.itemid ASC",
        )
    };

    format!(
        r"SELECT
  {measurement}
  || ',host_name=' || replace(hos.name, ' ', '\ ')
  || ',group_name=' || replace(grp.name, ' ', '\ ')
  || ',applications=' || coalesce(replace((SELECT string_agg(app.name, ' | ')
       FROM public.items_applications iap
       INNER JOIN public.applications app ON app.applicationid = iap.applicationid
       WHERE iap.itemid = ite.itemid), ' ', '\ '), 'No\ application')
  || ' ' || {fields}
  || ' ' || CAST({clock} AS varchar(20)) AS result,
  {clock} AS clock
FROM public.{table} src
INNER JOIN public.items ite ON ite.itemid = src.itemid
INNER JOIN public.hosts hos ON hos.hostid = ite.hostid
INNER JOIN public.hosts_groups hg ON hg.hostid = hos.hostid
INNER JOIN public.groups grp ON grp.groupid = hg.groupid
WHERE grp.internal = 0
  AND src.clock > {START_PLACEHOLDER}
  AND src.clock <= {END_PLACEHOLDER}
ORDER BY {order}, grp.groupid ASC
LIMIT {LIMIT_PLACEHOLDER}",
        measurement = pg_measurement(),
        table = table.table(),
    )
}

// ============================================================================
// MySQL
// ============================================================================

fn my_key_param(n: u8) -> String {
    format!(
        r"COALESCE(SUBSTRING_INDEX(SUBSTRING_INDEX(SUBSTRING(ite.key_, LOCATE('[', ite.key_) + 1, CHAR_LENGTH(ite.key_) - LOCATE('[', ite.key_) - 1), ',', {n}), ',', -1), '')"
    )
}

fn my_measurement() -> String {
    let (p1, p2, p3, p4) = (my_key_param(1), my_key_param(2), my_key_param(3), my_key_param(4));
    format!(
        r"REPLACE(REPLACE(CASE
    WHEN LOCATE('$2', ite.name) > 0 AND LOCATE('$4', ite.name) > 0
      THEN REPLACE(REPLACE(ite.name, '$2', {p2}), '$4', {p4})
    WHEN LOCATE('$1', ite.name) > 0 AND LOCATE('$2', ite.name) > 0
      THEN REPLACE(REPLACE(ite.name, '$1', {p1}), '$2', {p2})
    WHEN LOCATE('$1', ite.name) > 0 AND LOCATE('$3', ite.name) > 0
      THEN REPLACE(REPLACE(ite.name, '$1', {p1}), '$3', {p3})
    WHEN LOCATE('$1', ite.name) > 0 THEN REPLACE(ite.name, '$1', {p1})
    WHEN LOCATE('$2', ite.name) > 0 THEN REPLACE(ite.name, '$2', {p2})
    WHEN LOCATE('$3', ite.name) > 0 THEN REPLACE(ite.name, '$3', {p3})
    ELSE ite.name
  END, ',', ''), ' ', '\\ ')"
    )
}

fn mysql_query(table: ValueTable) -> String {
    let (fields, clock, order) = if table.is_trend() {
        (
            "'value_min=', CAST(src.value_min AS CHAR),
    ',value_avg=', CAST(src.value_avg AS CHAR),
    ',value_max=', CAST(src.value_max AS CHAR)",
            "CAST(src.clock AS SIGNED) * 1000",
            "src.clock ASC, src.itemid ASC",
        )
    } else {
        (
            "'value=', CAST(src.value AS CHAR)",
            "CAST(src.clock * 1000 + FLOOR(src.ns / 1000000) AS SIGNED)",
            "src.clock ASC, src.ns ASC, src.itemid ASC",
        )
    };

    format!(
        r"SELECT
  CONCAT(
    {measurement},
    ',host_name=', REPLACE(hos.name, ' ', '\\ '),
    ',group_name=', REPLACE(grp.name, ' ', '\\ '),
    ',applications=', COALESCE(REPLACE((SELECT GROUP_CONCAT(app.name SEPARATOR ' | ')
       FROM items_applications iap
       INNER JOIN applications app ON app.applicationid = iap.applicationid
       WHERE iap.itemid = ite.itemid), ' ', '\\ '), 'No\\ application'),
    ' ', {fields},
    ' ', CAST({clock} AS CHAR)
  ) AS result,
  {clock} AS clock
FROM {table} src
INNER JOIN items ite ON ite.itemid = src.itemid
INNER JOIN hosts hos ON hos.hostid = ite.hostid
INNER JOIN hosts_groups hg ON hg.hostid = hos.hostid
INNER JOIN `groups` grp ON grp.groupid = hg.groupid
WHERE grp.internal = 0
  AND src.clock > {START_PLACEHOLDER}
  AND src.clock <= {END_PLACEHOLDER}
ORDER BY {order}, grp.groupid ASC
LIMIT {LIMIT_PLACEHOLDER}",
        measurement = my_measurement(),
        table = table.table(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn window() -> Window {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Window::new(start, TimeDelta::hours(1)).unwrap()
    }

    #[test]
    fn test_every_stream_has_a_template_in_every_dialect() {
        for dialect in [Dialect::Postgres, Dialect::Mysql] {
            for stream in STREAMS {
                let template = template_for(dialect, stream).unwrap();
                assert!(template.contains(START_PLACEHOLDER), "{dialect} {stream}");
                assert!(template.contains(END_PLACEHOLDER), "{dialect} {stream}");
                assert!(template.contains(LIMIT_PLACEHOLDER), "{dialect} {stream}");
            }
        }
        assert!(template_for(Dialect::Postgres, "events").is_none());
    }

    #[test]
    fn test_window_predicate_is_open_start_closed_end() {
        let query = render_query(
            &template_for(Dialect::Postgres, "history").unwrap(),
            &window(),
            Some(500),
        );

        assert!(query.contains("src.clock > 1704067200"));
        assert!(query.contains("src.clock <= 1704070800"));
        assert!(query.contains("LIMIT 500"));
        assert!(!query.contains("##"));
    }

    #[test]
    fn test_unbounded_limit() {
        let query = render_query(
            &template_for(Dialect::Mysql, "trends").unwrap(),
            &window(),
            None,
        );
        assert!(query.contains(&format!("LIMIT {}", i64::MAX)));
    }

    #[test]
    fn test_history_orders_by_clock_then_ns() {
        let query = template_for(Dialect::Mysql, "history_uint").unwrap();
        assert!(query.contains("ORDER BY src.clock ASC, src.ns ASC, src.itemid ASC"));
        assert!(query.contains("FROM history_uint src"));

        let trends = template_for(Dialect::Postgres, "trends_uint").unwrap();
        assert!(trends.contains("ORDER BY src.clock ASC, src.itemid ASC"));
        assert!(!trends.contains("src.ns"));
    }

    #[test]
    fn test_history_clock_never_rounds_into_next_second() {
        let pg = template_for(Dialect::Postgres, "history").unwrap();
        assert!(pg.contains("src.clock * 1000 + floor(src.ns / 1000000.0)"));

        let my = template_for(Dialect::Mysql, "history_uint").unwrap();
        assert!(my.contains("src.clock * 1000 + FLOOR(src.ns / 1000000)"));

        for dialect in [Dialect::Postgres, Dialect::Mysql] {
            for stream in STREAMS {
                let template = template_for(dialect, stream).unwrap().to_lowercase();
                assert!(!template.contains("round("), "{dialect} {stream}");
            }
        }
    }

    #[test]
    fn test_dialect_from_provider_key() {
        assert_eq!("postgresql".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("MySQL".parse::<Dialect>().unwrap(), Dialect::Mysql);
        assert!("oracle".parse::<Dialect>().is_err());
    }
}
