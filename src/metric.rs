//! The canned diagnostic queries each probe mode runs.
//!
//! Every query yields FLOAT columns: one row for direct and rate metrics, two
//! rows (value, then its base) for ratio metrics. Database-scoped queries take
//! the database name as `@P1`.

use std::fmt;

macro_rules! counter_select {
    ($($filter:tt)+) => {
        concat!(
            "SELECT CAST(cntr_value AS FLOAT) FROM sys.dm_os_performance_counters WHERE ",
            $($filter)+
        )
    };
}

/// One counter of the server-wide instance.
macro_rules! server_counter {
    ($name:literal) => {
        counter_select!("counter_name = '", $name, "' AND instance_name = ''")
    };
    ($name:literal, $instance:literal) => {
        counter_select!("counter_name = '", $name, "' AND instance_name = '", $instance, "'")
    };
}

/// A counter whose instance does not matter; the first object wins.
macro_rules! any_counter {
    ($name:literal) => {
        concat!(
            "SELECT TOP (1) CAST(cntr_value AS FLOAT) FROM sys.dm_os_performance_counters WHERE counter_name = '",
            $name,
            "' ORDER BY object_name"
        )
    };
}

/// A ratio counter followed by its base.
macro_rules! server_ratio {
    ($prefix:literal, $instance:literal) => {
        counter_select!(
            "counter_name LIKE '", $prefix, "%' AND instance_name = '", $instance,
            "' ORDER BY counter_name"
        )
    };
}

macro_rules! database_counter {
    ($name:literal) => {
        counter_select!(
            "object_name LIKE '%:Databases%' AND counter_name = '", $name,
            "' AND instance_name = @P1"
        )
    };
}

macro_rules! database_ratio {
    ($prefix:literal) => {
        counter_select!(
            "object_name LIKE '%:Databases%' AND counter_name LIKE '", $prefix,
            "%' AND instance_name = @P1 ORDER BY counter_name"
        )
    };
}

const CONNECTIONS: &str = "SELECT CAST(COUNT(*) AS FLOAT) FROM sys.sysprocesses";

const MEMORY_USED: &str = "SELECT CAST(100 * (1.0 - (available_physical_memory_kb / (total_physical_memory_kb * 1.0))) AS FLOAT) FROM sys.dm_os_sys_memory";

const CPU_UTILIZATION: &str = "SELECT TOP (1) \
    CAST(record.value('(./Record/SchedulerMonitorEvent/SystemHealth/ProcessUtilization)[1]', 'int') AS FLOAT) \
    FROM (SELECT [timestamp], CONVERT(XML, record) AS [record] \
        FROM sys.dm_os_ring_buffers WITH (NOLOCK) \
        WHERE ring_buffer_type = N'RING_BUFFER_SCHEDULER_MONITOR' \
        AND record LIKE N'%<SystemHealth>%') AS x \
    ORDER BY [timestamp] DESC";

/// Which probe binary a metric belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Server,
    Database,
}

impl Family {
    pub fn metrics(self) -> &'static [Metric] {
        match self {
            Self::Server => SERVER_METRICS,
            Self::Database => DATABASE_METRICS,
        }
    }

    pub fn find(self, id: &str) -> Option<&'static Metric> {
        self.metrics().iter().find(|m| m.id == id)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Database => f.write_str("database"),
        }
    }
}

/// How the query result becomes the checked value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Seconds taken to open the connection; no query.
    ConnectTime,
    /// The single value, times the modifier.
    Direct(&'static str),
    /// First row over second row, times the modifier.
    Ratio(&'static str),
    /// Per-second change since the previous run, times the modifier.
    Rate(&'static str),
}

impl Kind {
    pub fn query(self) -> Option<&'static str> {
        match self {
            Self::ConnectTime => None,
            Self::Direct(sql) | Self::Ratio(sql) | Self::Rate(sql) => Some(sql),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metric {
    /// Mode name, selected with `--<id>`.
    pub id: &'static str,
    pub help: &'static str,
    /// Status text; `{}` is replaced by the value.
    pub summary: &'static str,
    pub label: &'static str,
    pub unit: &'static str,
    pub modifier: f64,
    pub kind: Kind,
}

impl Metric {
    const fn new(
        id: &'static str,
        help: &'static str,
        summary: &'static str,
        label: &'static str,
        unit: &'static str,
        kind: Kind,
    ) -> Self {
        Self {
            id,
            help,
            summary,
            label,
            unit,
            modifier: 1.,
            kind,
        }
    }

    const fn percent(self) -> Self {
        Self {
            modifier: 100.,
            ..self
        }
    }
}

pub const TIME_TO_CONNECT: Metric = Metric::new(
    "time2connect",
    "Time to connect to the database",
    "Time to connect was {}s",
    "time",
    "s",
    Kind::ConnectTime,
);

#[rustfmt::skip]
pub static SERVER_METRICS: &[Metric] = &[
    Metric::new("connections", "Number of open connections", "Number of open connections is {}", "connections", "", Kind::Direct(CONNECTIONS)),
    Metric::new("memory", "Used server memory", "Server using {}% of memory", "memory", "%", Kind::Direct(MEMORY_USED)),
    Metric::new("cpu", "Server CPU utilization", "Current CPU utilization is {}%", "cpu", "%", Kind::Direct(CPU_UTILIZATION)),
    Metric::new("bufferhitratio", "Buffer Cache Hit Ratio", "Buffer Cache Hit Ratio is {}%", "buffer_cache_hit_ratio", "%", Kind::Ratio(server_ratio!("Buffer cache hit ratio", ""))).percent(),
    Metric::new("pagelooks", "Page Lookups Per Second", "Page Lookups Per Second is {}", "page_lookups", "", Kind::Rate(server_counter!("Page lookups/sec"))),
    Metric::new("freepages", "Free Pages (Cumulative)", "Free pages is {}", "free_pages", "", Kind::Direct(server_counter!("Free pages"))),
    Metric::new("totalpages", "Total Pages (Cumulative)", "Total pages is {}", "totalpages", "", Kind::Direct(server_counter!("Total pages"))),
    Metric::new("targetpages", "Target Pages", "Target pages are {}", "target_pages", "", Kind::Direct(server_counter!("Target pages"))),
    Metric::new("databasepages", "Database Pages", "Database pages are {}", "database_pages", "", Kind::Direct(server_counter!("Database pages"))),
    Metric::new("stolenpages", "Stolen Pages", "Stolen pages are {}", "stolen_pages", "", Kind::Direct(server_counter!("Stolen pages"))),
    Metric::new("lazywrites", "Lazy Writes / Sec", "Lazy Writes / Sec is {}/sec", "lazy_writes", "", Kind::Rate(server_counter!("Lazy writes/sec"))),
    Metric::new("readahead", "Readahead Pages / Sec", "Readahead Pages / Sec is {}/sec", "readaheads", "", Kind::Rate(server_counter!("Readahead pages/sec"))),
    Metric::new("pagereads", "Page Reads / Sec", "Page Reads / Sec is {}/sec", "page_reads", "", Kind::Rate(server_counter!("Page reads/sec"))),
    Metric::new("checkpoints", "Checkpoint Pages / Sec", "Checkpoint Pages / Sec is {}/sec", "checkpoint_pages", "", Kind::Rate(server_counter!("Checkpoint pages/sec"))),
    Metric::new("pagewrites", "Page Writes / Sec", "Page Writes / Sec is {}/sec", "page_writes", "", Kind::Rate(server_counter!("Page writes/sec"))),
    Metric::new("lockrequests", "Lock Requests / Sec", "Lock Requests / Sec is {}/sec", "lock_requests", "", Kind::Rate(server_counter!("Lock requests/sec", "_Total"))),
    Metric::new("locktimeouts", "Lock Timeouts / Sec", "Lock Timeouts / Sec is {}/sec", "lock_timeouts", "", Kind::Rate(server_counter!("Lock timeouts/sec", "_Total"))),
    Metric::new("deadlocks", "Deadlocks / Sec", "Deadlocks / Sec is {}/sec", "deadlocks", "", Kind::Rate(server_counter!("Number of Deadlocks/sec", "_Total"))),
    Metric::new("lockwaits", "Lockwaits / Sec", "Lockwaits / Sec is {}/sec", "lockwaits", "", Kind::Rate(server_counter!("Lock Waits/sec", "_Total"))),
    Metric::new("lockwait", "Lock Wait Time (ms)", "Lock Wait Time (ms) is {}ms", "lockwait", "ms", Kind::Direct(server_counter!("Lock Wait Time (ms)", "_Total"))),
    Metric::new("averagewait", "Average Wait Time (ms)", "Average Wait Time (ms) is {}ms", "averagewait", "ms", Kind::Ratio(server_ratio!("Average Wait Time", "_Total"))),
    Metric::new("pagesplits", "Page Splits / Sec", "Page Splits / Sec is {}/sec", "page_splits", "", Kind::Rate(any_counter!("Page Splits/sec"))),
    Metric::new("cachehit", "Cache Hit Ratio", "Cache Hit Ratio is {}%", "cache_hit_ratio", "%", Kind::Ratio(server_ratio!("Cache Hit Ratio", "_Total"))).percent(),
    Metric::new("batchreq", "Batch Requests / Sec", "Batch Requests / Sec is {}/sec", "batch_requests", "", Kind::Rate(any_counter!("Batch Requests/sec"))),
    Metric::new("sqlcompilations", "SQL Compilations / Sec", "SQL Compilations / Sec is {}/sec", "sql_compilations", "", Kind::Rate(any_counter!("SQL Compilations/sec"))),
    Metric::new("fullscans", "Full Scans / Sec", "Full Scans / Sec is {}/sec", "full_scans", "", Kind::Rate(any_counter!("Full Scans/sec"))),
    Metric::new("pagelife", "Page Life Expectancy", "Page Life Expectancy is {}s", "page_life_expectancy", "s", Kind::Direct(any_counter!("Page life expectancy"))),
    TIME_TO_CONNECT,
];

#[rustfmt::skip]
pub static DATABASE_METRICS: &[Metric] = &[
    Metric::new("logcachehit", "Log Cache Hit Ratio", "Log Cache Hit Ratio is {}%", "log_cache_hit_ratio", "%", Kind::Ratio(database_ratio!("Log Cache Hit Ratio"))).percent(),
    Metric::new("activetrans", "Active Transactions", "Active Transactions is {}", "active_transactions", "", Kind::Direct(database_counter!("Active Transactions"))),
    Metric::new("logflushes", "Log Flushes Per Second", "Log Flushes Per Second is {}/sec", "log_flushes_per_sec", "", Kind::Rate(database_counter!("Log Flushes/sec"))),
    Metric::new("logfileusage", "Log File Usage", "Log File Usage is {}%", "log_file_usage", "%", Kind::Direct(database_counter!("Percent Log Used"))),
    Metric::new("transpsec", "Transactions Per Second", "Transactions Per Second is {}/sec", "transactions_per_sec", "", Kind::Rate(database_counter!("Transactions/sec"))),
    Metric::new("loggrowths", "Log Growths", "Log Growths is {}", "log_growths", "", Kind::Direct(database_counter!("Log Growths"))),
    Metric::new("logshrinks", "Log Shrinks", "Log Shrinks is {}", "log_shrinks", "", Kind::Direct(database_counter!("Log Shrinks"))),
    Metric::new("logtruncs", "Log Truncations", "Log Truncations is {}", "log_truncations", "", Kind::Direct(database_counter!("Log Truncations"))),
    Metric::new("logwait", "Log Flush Wait Time", "Log Flush Wait Time is {}ms", "log_wait_time", "ms", Kind::Direct(database_counter!("Log Flush Wait Time"))),
    Metric::new("datasize", "Database Size", "Database size is {}KB", "data_size", "KB", Kind::Direct(database_counter!("Data File(s) Size (KB)"))),
    TIME_TO_CONNECT,
];
