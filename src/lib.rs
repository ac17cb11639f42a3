use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use thiserror::Error;
use tracing::debug;

pub mod leaderboard;
pub mod params;
pub mod period;

pub use leaderboard::{CallerRecord, LeaderboardEntry, leaderboard_diff};
pub use params::{
    ApiSelector, BreakdownQuery, CallersQuery, CallsQuery, DateRange, IssuedQuery, KeyColumn,
    KeyTableQuery, LeaderboardQuery, RequestParams, SortDirection,
};
use period::CycleSpan;

pub const STATUS_ACTIVE: &str = "A";
pub const STATUS_SUSPENDED: &str = "S";
pub const STATUS_UNACTIVATED: &str = "U";

const REPORTS_SOURCE: &str = r#"
    FROM reports r
    JOIN keys k ON k.key = r.key
    JOIN apis a ON a.id = r.api_id
    WHERE 1 = 1"#;

/// Decides which keys belong to the operator and are hidden from usage
/// numbers by default: keys carrying the `is_internal` flag, plus keys whose
/// email ends with one of the configured suffixes.
#[derive(Debug, Clone, Default)]
pub struct InternalKeyPolicy {
    email_suffixes: Vec<String>,
}

impl InternalKeyPolicy {
    pub fn new<I, S>(email_suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let email_suffixes = email_suffixes
            .into_iter()
            .map(|s| s.into().trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { email_suffixes }
    }

    /// Appends the "external keys only" predicate over the `k` alias.
    fn push_external_only(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        builder.push(" AND k.is_internal = 0");
        for suffix in &self.email_suffixes {
            builder
                .push(r" AND lower(k.email) NOT LIKE ")
                .push_bind(format!("%{}", escape_like(suffix)))
                .push(r" ESCAPE '\'");
        }
    }
}

/// Filters over the joined report rows, applied in a fixed order.
#[derive(Debug, Clone, Copy, Default)]
struct ReportScope {
    api_id: Option<i64>,
    external_only: bool,
    active_apis_only: bool,
    exclude_suspended: bool,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl ReportScope {
    fn push_filters(&self, builder: &mut QueryBuilder<'_, Sqlite>, policy: &InternalKeyPolicy) {
        if let Some(api_id) = self.api_id {
            builder.push(" AND r.api_id = ").push_bind(api_id);
        }
        if self.external_only {
            policy.push_external_only(builder);
        }
        if self.active_apis_only {
            builder.push(" AND a.push_enabled <> 0");
        }
        if self.exclude_suspended {
            builder.push(" AND k.status <> ").push_bind(STATUS_SUSPENDED);
        }
        if let Some(from) = self.from {
            builder.push(" AND date(r.date) >= ").push_bind(from.to_string());
        }
        if let Some(to) = self.to {
            builder.push(" AND date(r.date) <= ").push_bind(to.to_string());
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct KeyScope {
    external_only: bool,
    active_only: bool,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl KeyScope {
    fn from_issued(query: &IssuedQuery) -> Self {
        Self {
            external_only: query.ignore_internal_keys,
            active_only: query.ignore_inactive,
            from: query.range.begin_day(),
            to: query.range.end_day(),
        }
    }

    fn push_filters(&self, builder: &mut QueryBuilder<'_, Sqlite>, policy: &InternalKeyPolicy) {
        if self.external_only {
            policy.push_external_only(builder);
        }
        if self.active_only {
            builder.push(" AND k.status = ").push_bind(STATUS_ACTIVE);
        }
        if let Some(from) = self.from {
            builder
                .push(" AND date(k.issued_on) >= ")
                .push_bind(from.to_string());
        }
        if let Some(to) = self.to {
            builder
                .push(" AND date(k.issued_on) <= ")
                .push_bind(to.to_string());
        }
    }
}

/// Read-only aggregation over the gateway's `apis`, `keys` and `reports`
/// tables.
#[derive(Clone, Debug)]
pub struct HubStats {
    pool: SqlitePool,
    policy: InternalKeyPolicy,
}

impl HubStats {
    pub async fn open(database_path: &str, policy: InternalKeyPolicy) -> Result<Self, StatsError> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool, policy).await
    }

    pub async fn with_pool(pool: SqlitePool, policy: InternalKeyPolicy) -> Result<Self, StatsError> {
        let stats = Self { pool, policy };
        stats.initialize_schema().await?;
        Ok(stats)
    }

    async fn initialize_schema(&self) -> Result<(), StatsError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS apis (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                push_enabled INTEGER NOT NULL DEFAULT 1,
                signing_key TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS keys (
                key TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                issued_on TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'U',
                is_internal INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                api_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                date TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                calls INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (api_id) REFERENCES apis(id),
                FOREIGN KEY (key) REFERENCES keys(key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_reports_api_date ON reports (api_id, date)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_reports_key_date ON reports (key, date)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn list_apis(&self) -> Result<Vec<ApiRecord>, StatsError> {
        let rows = sqlx::query("SELECT id, name, push_enabled FROM apis ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        let apis = rows
            .into_iter()
            .map(|row| -> Result<ApiRecord, sqlx::Error> {
                let push_enabled: i64 = row.try_get("push_enabled")?;
                Ok(ApiRecord {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    push_enabled: push_enabled != 0,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(apis)
    }

    /// Looks the API up by id first, then by name.
    pub async fn resolve_api(&self, selector: &ApiSelector) -> Result<ApiRecord, StatsError> {
        if selector.is_empty() {
            return Err(StatsError::MissingIdentifier);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT id, name, push_enabled FROM apis");
        match (selector.id, selector.name.as_deref()) {
            (Some(id), _) => builder.push(" WHERE id = ").push_bind(id),
            (None, Some(name)) => builder.push(" WHERE name = ").push_bind(name.to_owned()),
            (None, None) => return Err(StatsError::MissingIdentifier),
        };
        builder.push(" LIMIT 1");

        let row = builder
            .build_query_as::<(i64, String, i64)>()
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((id, name, push_enabled)) => Ok(ApiRecord {
                id,
                name,
                push_enabled: push_enabled != 0,
            }),
            None => {
                debug!(?selector, "api lookup missed");
                Err(StatsError::ApiNotFound)
            }
        }
    }

    /// Calls across every API, with a per-API breakdown.
    pub async fn api_calls(&self, query: &CallsQuery) -> Result<CallsSummary, StatsError> {
        let scope = ReportScope {
            external_only: query.ignore_internal_keys,
            active_apis_only: query.ignore_deprecated,
            from: query.range.begin_day(),
            to: query.range.end_day(),
            ..ReportScope::default()
        };

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT a.id AS api_id, a.name AS api_name, COALESCE(SUM(r.calls), 0) AS calls",
        );
        builder.push(REPORTS_SOURCE);
        scope.push_filters(&mut builder, &self.policy);
        builder.push(" GROUP BY a.id, a.name ORDER BY a.id ASC");

        let by_api = builder
            .build_query_as::<(i64, String, i64)>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|(api_id, api_name, calls)| ApiCalls {
                api_id,
                api_name,
                calls,
            })
            .collect::<Vec<_>>();

        Ok(CallsSummary {
            calls: by_api.iter().map(|api| api.calls).sum(),
            by_api,
        })
    }

    pub async fn calls_to_api(&self, api: &ApiRecord, query: &CallsQuery) -> Result<i64, StatsError> {
        let scope = ReportScope {
            api_id: Some(api.id),
            external_only: query.ignore_internal_keys,
            from: query.range.begin_day(),
            to: query.range.end_day(),
            ..ReportScope::default()
        };
        self.sum_calls(&scope).await
    }

    pub async fn calls_to_api_yearly(
        &self,
        api: &ApiRecord,
        query: &BreakdownQuery,
    ) -> Result<YearlyTotals, StatsError> {
        let scope = ReportScope {
            api_id: Some(api.id),
            external_only: query.ignore_internal_keys,
            ..ReportScope::default()
        };

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT CAST(strftime('%Y', r.date) AS INTEGER) AS year, COALESCE(SUM(r.calls), 0) AS calls",
        );
        builder.push(REPORTS_SOURCE);
        scope.push_filters(&mut builder, &self.policy);
        builder.push(" GROUP BY year");

        let grouped: HashMap<i64, i64> = builder
            .build_query_as::<(i64, i64)>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .collect();

        let span = self.issued_year_span().await?;
        Ok(YearlyTotals {
            span,
            total: grouped.values().sum(),
            years: dense_years(span, &grouped),
        })
    }

    pub async fn calls_to_api_monthly(
        &self,
        api: &ApiRecord,
        year: i32,
        query: &BreakdownQuery,
    ) -> Result<MonthlyTotals, StatsError> {
        let (from, to) = period::year_bounds(year)
            .ok_or_else(|| StatsError::invalid("year", &year.to_string()))?;
        let scope = ReportScope {
            api_id: Some(api.id),
            external_only: query.ignore_internal_keys,
            from: Some(from),
            to: Some(to),
            ..ReportScope::default()
        };

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT CAST(strftime('%m', r.date) AS INTEGER) AS month, COALESCE(SUM(r.calls), 0) AS calls",
        );
        builder.push(REPORTS_SOURCE);
        scope.push_filters(&mut builder, &self.policy);
        builder.push(" GROUP BY month");

        let grouped: HashMap<i64, i64> = builder
            .build_query_as::<(i64, i64)>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .collect();

        Ok(MonthlyTotals::dense(year, &grouped))
    }

    pub async fn calls_by_endpoint(
        &self,
        api: &ApiRecord,
        query: &BreakdownQuery,
    ) -> Result<Vec<EndpointCalls>, StatsError> {
        let scope = ReportScope {
            api_id: Some(api.id),
            external_only: query.ignore_internal_keys,
            ..ReportScope::default()
        };

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT r.endpoint AS endpoint, COALESCE(SUM(r.calls), 0) AS calls",
        );
        builder.push(REPORTS_SOURCE);
        scope.push_filters(&mut builder, &self.policy);
        builder.push(" GROUP BY r.endpoint ORDER BY r.endpoint ASC");

        let endpoints = builder
            .build_query_as::<(String, i64)>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|(endpoint, calls)| EndpointCalls { endpoint, calls })
            .collect();

        Ok(endpoints)
    }

    /// Heaviest callers of one API, suspended keys excluded.
    pub async fn callers_of_api(
        &self,
        api: &ApiRecord,
        query: &CallersQuery,
    ) -> Result<Vec<CallerRecord>, StatsError> {
        let scope = ReportScope {
            api_id: Some(api.id),
            external_only: query.ignore_internal_keys,
            exclude_suspended: true,
            ..ReportScope::default()
        };
        self.callers(&scope, query.min_calls, query.max_calls, query.top)
            .await
    }

    /// Callers over `[from, to]`, optionally limited to one API, with at
    /// least `query.min_calls` calls.
    pub async fn callers_in_period(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        api_id: Option<i64>,
        query: &LeaderboardQuery,
    ) -> Result<Vec<CallerRecord>, StatsError> {
        let scope = ReportScope {
            api_id,
            external_only: query.ignore_internal_keys,
            from: Some(from),
            to: Some(to),
            ..ReportScope::default()
        };
        self.callers(&scope, Some(query.min_calls), None, None).await
    }

    pub async fn quarterly_leaderboard(
        &self,
        year: i32,
        month: u32,
        api: Option<&ApiRecord>,
        query: &LeaderboardQuery,
    ) -> Result<QuarterlyLeaderboard, StatsError> {
        let (begin, end) = period::quarter(year, month)
            .ok_or_else(|| StatsError::invalid("month", &month.to_string()))?;
        let (prev_year, prev_month) = period::previous_quarter_start(year, month);
        let (prev_begin, prev_end) = period::quarter(prev_year, prev_month)
            .ok_or_else(|| StatsError::invalid("year", &year.to_string()))?;

        let api_id = api.map(|api| api.id);
        let current = self
            .callers_in_period(begin.date(), end.date(), api_id, query)
            .await?;
        let previous = self
            .callers_in_period(prev_begin.date(), prev_end.date(), api_id, query)
            .await?;

        debug!(
            year,
            month,
            current = current.len(),
            previous = previous.len(),
            "computed quarterly callers"
        );

        Ok(QuarterlyLeaderboard {
            begin: begin.date(),
            end: end.date(),
            entries: leaderboard_diff(&previous, current),
        })
    }

    /// DataTables listing of external keys that have made calls.
    pub async fn key_table(&self, query: &KeyTableQuery) -> Result<KeyTable, StatsError> {
        let total_records = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM keys")
            .fetch_one(&self.pool)
            .await?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM (SELECT k.key");
        self.push_key_table_source(&mut count, query);
        count.push(")");
        let display_records = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT
                k.key AS key,
                k.email AS email,
                COALESCE(SUM(r.calls), 0) AS calls,
                MAX(date(r.date)) AS latest_call,
                date(k.issued_on) AS issued_on"#,
        );
        self.push_key_table_source(&mut builder, query);
        match query.sort {
            Some((column, direction)) => {
                builder
                    .push(" ORDER BY ")
                    .push(column.sql())
                    .push(" ")
                    .push(direction.sql())
                    .push(", k.key ASC");
            }
            None => {
                builder.push(" ORDER BY k.key ASC");
            }
        }
        builder
            .push(" LIMIT ")
            .push_bind(query.display_length.unwrap_or(-1))
            .push(" OFFSET ")
            .push_bind(query.display_start);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let rows = rows
            .into_iter()
            .map(|row| -> Result<KeyRow, sqlx::Error> {
                Ok(KeyRow {
                    key: row.try_get("key")?,
                    email: row.try_get("email")?,
                    calls: row.try_get("calls")?,
                    latest_call: row.try_get("latest_call")?,
                    issued_on: row
                        .try_get::<Option<String>, _>("issued_on")?
                        .unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(KeyTable {
            total_records,
            display_records,
            rows,
        })
    }

    fn push_key_table_source(&self, builder: &mut QueryBuilder<'_, Sqlite>, query: &KeyTableQuery) {
        builder.push(
            r#"
            FROM keys k
            JOIN reports r ON r.key = k.key
            WHERE 1 = 1"#,
        );
        if let Some(search) = query.search.as_deref() {
            let pattern = format!("%{}%", escape_like(&search.to_ascii_lowercase()));
            builder
                .push(r" AND (lower(k.key) LIKE ")
                .push_bind(pattern.clone())
                .push(r" ESCAPE '\' OR lower(k.email) LIKE ")
                .push_bind(pattern)
                .push(r" ESCAPE '\')");
        }
        self.policy.push_external_only(builder);
        builder.push(" GROUP BY k.key, k.email, k.issued_on");
    }

    /// Monthly calls made with one key, zero-filled between its first and
    /// last reported month.
    pub async fn key_calls_by_month(&self, key: &str) -> Result<Vec<KeyMonthCalls>, StatsError> {
        let exists = sqlx::query_scalar::<_, String>("SELECT key FROM keys WHERE key = ? LIMIT 1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StatsError::KeyNotFound);
        }

        let grouped: BTreeMap<(i32, u32), i64> = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT
                CAST(strftime('%Y', date) AS INTEGER) AS year,
                CAST(strftime('%m', date) AS INTEGER) AS month,
                COALESCE(SUM(calls), 0) AS calls
            FROM reports
            WHERE key = ?
            GROUP BY year, month
            "#,
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(year, month, calls)| -> Result<_, sqlx::Error> {
            Ok((decode_year_month(year, month)?, calls))
        })
        .collect::<Result<_, sqlx::Error>>()?;

        let (Some(first), Some(last)) = (
            grouped.keys().next().copied(),
            grouped.keys().next_back().copied(),
        ) else {
            return Ok(Vec::new());
        };

        let months = CycleSpan::months(first, last)
            .iter()
            .map(|(year, month)| KeyMonthCalls {
                year,
                month,
                calls: grouped.get(&(year, month)).copied().unwrap_or(0),
            })
            .collect();

        Ok(months)
    }

    pub async fn keys_issued(&self, query: &IssuedQuery) -> Result<i64, StatsError> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM keys k WHERE 1 = 1");
        KeyScope::from_issued(query).push_filters(&mut builder, &self.policy);
        let issued = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(issued)
    }

    /// Issued keys per year; the date range of `query` is not applied.
    pub async fn keys_issued_yearly(&self, query: &IssuedQuery) -> Result<YearlyTotals, StatsError> {
        let scope = KeyScope {
            from: None,
            to: None,
            ..KeyScope::from_issued(query)
        };

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT CAST(strftime('%Y', k.issued_on) AS INTEGER) AS year, COUNT(*) AS issued FROM keys k WHERE 1 = 1",
        );
        scope.push_filters(&mut builder, &self.policy);
        builder.push(" GROUP BY year");

        let grouped: HashMap<i64, i64> = builder
            .build_query_as::<(i64, i64)>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .collect();

        let span = self.issued_year_span().await?;
        Ok(YearlyTotals {
            span,
            total: grouped.values().sum(),
            years: dense_years(span, &grouped),
        })
    }

    /// Issued keys per month of `year`; the date range of `query` is
    /// replaced by the year bounds.
    pub async fn keys_issued_monthly(
        &self,
        year: i32,
        query: &IssuedQuery,
    ) -> Result<MonthlyTotals, StatsError> {
        let (from, to) = period::year_bounds(year)
            .ok_or_else(|| StatsError::invalid("year", &year.to_string()))?;
        let scope = KeyScope {
            from: Some(from),
            to: Some(to),
            ..KeyScope::from_issued(query)
        };

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT CAST(strftime('%m', k.issued_on) AS INTEGER) AS month, COUNT(*) AS issued FROM keys k WHERE 1 = 1",
        );
        scope.push_filters(&mut builder, &self.policy);
        builder.push(" GROUP BY month");

        let grouped: HashMap<i64, i64> = builder
            .build_query_as::<(i64, i64)>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .collect();

        Ok(MonthlyTotals::dense(year, &grouped))
    }

    /// Earliest and latest year any key was issued, across all keys.
    async fn issued_year_span(&self) -> Result<Option<(i32, i32)>, StatsError> {
        let (earliest, latest) = sqlx::query_as::<_, (Option<String>, Option<String>)>(
            "SELECT MIN(date(issued_on)), MAX(date(issued_on)) FROM keys",
        )
        .fetch_one(&self.pool)
        .await?;

        let year_of = |raw: Option<String>| {
            raw.and_then(|value| NaiveDate::parse_from_str(&value, "%Y-%m-%d").ok())
                .map(|date| period::year_month(date).0)
        };

        Ok(year_of(earliest).zip(year_of(latest)))
    }

    async fn sum_calls(&self, scope: &ReportScope) -> Result<i64, StatsError> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COALESCE(SUM(r.calls), 0)");
        builder.push(REPORTS_SOURCE);
        scope.push_filters(&mut builder, &self.policy);
        let calls = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(calls)
    }

    async fn callers(
        &self,
        scope: &ReportScope,
        min_calls: Option<i64>,
        max_calls: Option<i64>,
        top: Option<i64>,
    ) -> Result<Vec<CallerRecord>, StatsError> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT k.key AS key, k.email AS email, COALESCE(SUM(r.calls), 0) AS calls",
        );
        builder.push(REPORTS_SOURCE);
        scope.push_filters(&mut builder, &self.policy);
        builder.push(" GROUP BY k.key, k.email HAVING 1 = 1");
        if let Some(min_calls) = min_calls {
            builder.push(" AND SUM(r.calls) >= ").push_bind(min_calls);
        }
        if let Some(max_calls) = max_calls {
            builder.push(" AND SUM(r.calls) <= ").push_bind(max_calls);
        }
        builder.push(" ORDER BY calls DESC, k.key ASC");
        if let Some(top) = top {
            builder.push(" LIMIT ").push_bind(top);
        }

        let callers = builder
            .build_query_as::<(String, String, i64)>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|(key, email, calls)| CallerRecord { key, email, calls })
            .collect();

        Ok(callers)
    }
}

/// Narrows SQLite `strftime` integers, rejecting values outside the calendar.
fn decode_year_month(year: i64, month: i64) -> Result<(i32, u32), sqlx::Error> {
    let year = i32::try_from(year).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
    let month = u32::try_from(month).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
    Ok((year, month))
}

fn dense_years(span: Option<(i32, i32)>, grouped: &HashMap<i64, i64>) -> Vec<YearTotal> {
    let Some((earliest, latest)) = span else {
        return Vec::new();
    };
    (earliest..=latest)
        .map(|year| YearTotal {
            year,
            total: grouped.get(&i64::from(year)).copied().unwrap_or(0),
        })
        .collect()
}

/// Escapes `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRecord {
    pub id: i64,
    pub name: String,
    pub push_enabled: bool,
}

impl ApiRecord {
    pub fn deprecated(&self) -> bool {
        !self.push_enabled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiCalls {
    pub api_id: i64,
    pub api_name: String,
    pub calls: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallsSummary {
    pub calls: i64,
    pub by_api: Vec<ApiCalls>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointCalls {
    pub endpoint: String,
    pub calls: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearTotal {
    pub year: i32,
    pub total: i64,
}

/// Per-year totals over the key issuance span, zero-filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearlyTotals {
    /// `(earliest, latest)` issuance year; `None` when no keys exist.
    pub span: Option<(i32, i32)>,
    /// Sum over every year with data, including years outside `span`.
    pub total: i64,
    pub years: Vec<YearTotal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthTotal {
    pub month: u32,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyTotals {
    pub year: i32,
    pub total: i64,
    pub months: Vec<MonthTotal>,
}

impl MonthlyTotals {
    fn dense(year: i32, grouped: &HashMap<i64, i64>) -> Self {
        let months: Vec<MonthTotal> = (1..=12u32)
            .map(|month| MonthTotal {
                month,
                total: grouped.get(&i64::from(month)).copied().unwrap_or(0),
            })
            .collect();
        Self {
            year,
            total: months.iter().map(|m| m.total).sum(),
            months,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyMonthCalls {
    pub year: i32,
    pub month: u32,
    pub calls: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRow {
    pub key: String,
    pub email: String,
    pub calls: i64,
    pub latest_call: String,
    pub issued_on: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTable {
    pub total_records: i64,
    pub display_records: i64,
    pub rows: Vec<KeyRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarterlyLeaderboard {
    pub begin: NaiveDate,
    pub end: NaiveDate,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Unparsable {name} value: {value}")]
    InvalidParameter { name: String, value: String },
    #[error("Must specify API id or name.")]
    MissingIdentifier,
    #[error("The requested API was not found.")]
    ApiNotFound,
    #[error("The requested key was not found.")]
    KeyNotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StatsError {
    pub fn invalid(name: &str, value: &str) -> Self {
        Self::InvalidParameter {
            name: name.to_owned(),
            value: value.to_owned(),
        }
    }
}
