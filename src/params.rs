//! Typed request parameters.
//!
//! Every endpoint reads its untyped query/form values once, through one of the
//! query structs below, before touching the database.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use url::form_urlencoded;

use crate::StatsError;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%Y%m%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
];

/// Truthy spellings, matched exactly; everything else is false.
pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "y" | "t" | "yes" | "true"
    )
}

pub fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

/// Accepts RFC 3339 timestamps, ISO dates with or without a time part, and a
/// handful of slash and month-name layouts. Date-only input maps to midnight.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamp.naive_local());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Raw parameters of one request: path values, then query string, then form
/// body.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    path: HashMap<String, String>,
    query: HashMap<String, String>,
    form: HashMap<String, String>,
}

impl RequestParams {
    pub fn new(query: Option<&str>, body: &[u8]) -> Self {
        Self {
            path: HashMap::new(),
            query: decode_pairs(query.unwrap_or_default().as_bytes()),
            form: decode_pairs(body),
        }
    }

    pub fn with_path<I, K, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.path
            .extend(values.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// First non-empty value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        [&self.path, &self.query, &self.form]
            .into_iter()
            .filter_map(|source| source.get(name))
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }

    pub fn typed<T>(
        &self,
        name: &str,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Result<Option<T>, StatsError> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => parse(raw)
                .map(Some)
                .ok_or_else(|| StatsError::invalid(name, raw)),
        }
    }

    pub fn date(&self, name: &str) -> Result<Option<NaiveDateTime>, StatsError> {
        self.typed(name, parse_date)
    }

    pub fn int(&self, name: &str) -> Result<Option<i64>, StatsError> {
        self.typed(name, parse_int)
    }

    pub fn flag(&self, name: &str, default: bool) -> bool {
        self.get(name).map(parse_bool).unwrap_or(default)
    }
}

fn decode_pairs(raw: &[u8]) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for (key, value) in form_urlencoded::parse(raw) {
        values.insert(key.into_owned(), value.into_owned());
    }
    values
}

/// Which API an endpoint is about, by id or by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiSelector {
    pub id: Option<i64>,
    pub name: Option<String>,
}

impl ApiSelector {
    pub fn from_params(params: &RequestParams) -> Result<Self, StatsError> {
        Ok(Self {
            id: params.int("api_id")?,
            name: params.get("api_name").map(str::to_owned),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.name.is_none()
    }
}

/// Optional inclusive date window echoed back to the caller when present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub begin: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl DateRange {
    pub fn from_params(params: &RequestParams) -> Result<Self, StatsError> {
        Ok(Self {
            begin: params.date("begin_date")?,
            end: params.date("end_date")?,
        })
    }

    pub fn begin_day(&self) -> Option<NaiveDate> {
        self.begin.map(|stamp| stamp.date())
    }

    pub fn end_day(&self) -> Option<NaiveDate> {
        self.end.map(|stamp| stamp.date())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallsQuery {
    pub range: DateRange,
    pub ignore_internal_keys: bool,
    pub ignore_deprecated: bool,
}

impl CallsQuery {
    pub fn from_params(params: &RequestParams) -> Result<Self, StatsError> {
        Ok(Self {
            range: DateRange::from_params(params)?,
            ignore_internal_keys: params.flag("ignore_internal_keys", true),
            ignore_deprecated: params.flag("ignore_deprecated", false),
        })
    }
}

/// Breakdowns of a single API (yearly, monthly, by endpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakdownQuery {
    pub ignore_internal_keys: bool,
}

impl BreakdownQuery {
    pub fn from_params(params: &RequestParams) -> Self {
        Self {
            ignore_internal_keys: params.flag("ignore_internal_keys", true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedQuery {
    pub range: DateRange,
    pub ignore_internal_keys: bool,
    pub ignore_inactive: bool,
}

impl IssuedQuery {
    pub fn from_params(params: &RequestParams) -> Result<Self, StatsError> {
        Ok(Self {
            range: DateRange::from_params(params)?,
            ignore_internal_keys: params.flag("ignore_internal_keys", true),
            ignore_inactive: params.flag("ignore_inactive", false),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallersQuery {
    pub ignore_internal_keys: bool,
    pub min_calls: Option<i64>,
    pub max_calls: Option<i64>,
    pub top: Option<i64>,
}

impl CallersQuery {
    pub fn from_params(params: &RequestParams) -> Result<Self, StatsError> {
        Ok(Self {
            ignore_internal_keys: params.flag("ignore_internal_keys", true),
            min_calls: params.int("min_calls")?,
            max_calls: params.int("max_calls")?,
            top: params.typed("top", |raw| parse_int(raw).filter(|top| *top >= 0))?,
        })
    }
}

pub const DEFAULT_LEADERBOARD_MIN_CALLS: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderboardQuery {
    pub ignore_internal_keys: bool,
    pub min_calls: i64,
}

impl LeaderboardQuery {
    pub fn from_params(params: &RequestParams) -> Result<Self, StatsError> {
        Ok(Self {
            ignore_internal_keys: params.flag("ignore_internal_keys", true),
            min_calls: params
                .int("min_calls")?
                .unwrap_or(DEFAULT_LEADERBOARD_MIN_CALLS),
        })
    }
}

/// Sortable columns of the key table, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyColumn {
    Key,
    Email,
    Calls,
    LatestCall,
    IssuedOn,
}

impl KeyColumn {
    pub const ALL: [KeyColumn; 5] = [
        KeyColumn::Key,
        KeyColumn::Email,
        KeyColumn::Calls,
        KeyColumn::LatestCall,
        KeyColumn::IssuedOn,
    ];

    pub fn from_index(index: i64) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    pub fn sql(self) -> &'static str {
        match self {
            KeyColumn::Key => "k.key",
            KeyColumn::Email => "k.email",
            KeyColumn::Calls => "calls",
            KeyColumn::LatestCall => "latest_call",
            KeyColumn::IssuedOn => "issued_on",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// jQuery DataTables server-side listing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTableQuery {
    pub display_start: i64,
    pub display_length: Option<i64>,
    pub echo: Option<i64>,
    pub sort: Option<(KeyColumn, SortDirection)>,
    pub search: Option<String>,
}

impl KeyTableQuery {
    pub fn from_params(params: &RequestParams) -> Result<Self, StatsError> {
        let sort_column = match params.int("iSortCol_0")? {
            None => None,
            Some(index) => Some(KeyColumn::from_index(index).ok_or_else(|| {
                StatsError::invalid("iSortCol_0", &index.to_string())
            })?),
        };
        let direction = match params.get("sSortDir_0") {
            Some(dir) if dir.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            _ => SortDirection::Asc,
        };

        Ok(Self {
            display_start: params.int("iDisplayStart")?.unwrap_or(0).max(0),
            display_length: params.int("iDisplayLength")?.filter(|len| *len >= 0),
            echo: params.int("sEcho")?,
            sort: sort_column.map(|column| (column, direction)),
            search: params.get("sSearch").map(str::to_owned),
        })
    }
}
