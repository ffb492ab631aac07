//! Read raw samples from a SQL Server instance.

use std::time::{Duration, Instant};

use tiberius::{AuthMethod, Client, Config, Row, SqlBrowser};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::error::ProbeError;
use crate::metric::{Kind, Metric};
use crate::rate::Scope;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: Option<u16>,
    pub instance: Option<String>,
    pub user: String,
    pub password: String,
    pub trust_cert: bool,
    /// Applies separately to connecting and to each query.
    pub timeout: Duration,
}

impl ConnectionSettings {
    /// The host as the checks identify it: `host`, `host\instance` or `host:port`.
    pub fn target(&self) -> String {
        match (&self.instance, self.port) {
            (Some(instance), _) => format!("{}\\{}", self.host, instance),
            (None, Some(port)) => format!("{}:{}", self.host, port),
            (None, None) => self.host.clone(),
        }
    }
}

/// What a query produced, before any combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Scalar(f64),
    Pair { numerator: f64, denominator: f64 },
}

/// An open connection to one SQL Server database.
pub struct MssqlProbe {
    client: Client<Compat<TcpStream>>,
    target: String,
    timeout: Duration,
    connect_time: Duration,
}

impl MssqlProbe {
    pub async fn connect(settings: &ConnectionSettings, database: &str) -> Result<Self, ProbeError> {
        let target = settings.target();
        let mut config = Config::new();
        config.host(&settings.host);
        if let Some(port) = settings.port {
            config.port(port);
        }
        if let Some(instance) = &settings.instance {
            config.instance_name(instance);
        }
        config.database(database);
        config.application_name(env!("CARGO_PKG_NAME"));
        config.authentication(AuthMethod::sql_server(&settings.user, &settings.password));
        if settings.trust_cert {
            config.trust_cert();
        }

        let start = Instant::now();
        let client = timeout(settings.timeout, Self::open(config, settings.instance.is_some()))
            .await
            .map_err(|_| ProbeError::Timeout {
                stage: "connect",
                after: settings.timeout,
            })?
            .map_err(|source| ProbeError::Connect {
                target: target.clone(),
                source,
            })?;
        let connect_time = start.elapsed();
        tracing::debug!(%target, database, ?connect_time, "connected");

        Ok(Self {
            client,
            target,
            timeout: settings.timeout,
            connect_time,
        })
    }

    async fn open(config: Config, named_instance: bool) -> tiberius::Result<Client<Compat<TcpStream>>> {
        let tcp = if named_instance {
            TcpStream::connect_named(&config).await?
        } else {
            TcpStream::connect(config.get_addr()).await?
        };
        tcp.set_nodelay(true)?;
        Client::connect(config, tcp.compat_write()).await
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run the metric's query, or report the connect time for
    /// [`Kind::ConnectTime`].
    pub async fn sample(&mut self, metric: &Metric, scope: &Scope) -> Result<Sample, ProbeError> {
        let Some(sql) = metric.kind.query() else {
            return Ok(Sample::Scalar(self.connect_time.as_secs_f64()));
        };

        let after = self.timeout;
        let rows = timeout(after, Self::fetch(&mut self.client, sql, scope))
            .await
            .map_err(|_| ProbeError::Timeout {
                stage: "query",
                after,
            })?
            .map_err(|source| ProbeError::Query {
                metric: metric.id,
                source,
            })?;
        tracing::debug!(metric = metric.id, rows = rows.len(), "query finished");

        let values = rows
            .iter()
            .map(|row| row.try_get::<f64, _>(0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ProbeError::Query {
                metric: metric.id,
                source,
            })?;
        shape(metric, &values)
    }

    async fn fetch(
        client: &mut Client<Compat<TcpStream>>,
        sql: &str,
        scope: &Scope,
    ) -> tiberius::Result<Vec<Row>> {
        match scope {
            Scope::Server => client.query(sql, &[]).await?.into_first_result().await,
            Scope::Database(name) => {
                client
                    .query(sql, &[&name.as_str()])
                    .await?
                    .into_first_result()
                    .await
            }
        }
    }
}

/// Check the rows against what the metric kind expects.
fn shape(metric: &Metric, values: &[Option<f64>]) -> Result<Sample, ProbeError> {
    let row_shape = |detail: String| ProbeError::RowShape {
        metric: metric.id,
        detail,
    };
    match (metric.kind, values) {
        (Kind::Ratio(_), [Some(numerator), Some(denominator)]) => Ok(Sample::Pair {
            numerator: *numerator,
            denominator: *denominator,
        }),
        (Kind::Ratio(_), values) => Err(row_shape(format!(
            "{:?} where a value and its base were expected",
            values
        ))),
        (_, []) => Err(row_shape("no rows".to_owned())),
        (_, [None, ..]) => Err(row_shape("NULL".to_owned())),
        (_, [Some(value), ..]) => Ok(Sample::Scalar(*value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Family;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            host: "db01".into(),
            port: None,
            instance: None,
            user: "nagios".into(),
            password: "secret".into(),
            trust_cert: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[test]
    fn target_includes_instance_or_port() {
        assert_eq!(settings().target(), "db01");
        let s = ConnectionSettings {
            port: Some(1433),
            ..settings()
        };
        assert_eq!(s.target(), "db01:1433");
        let s = ConnectionSettings {
            instance: Some("SQLEXPRESS".into()),
            ..settings()
        };
        assert_eq!(s.target(), "db01\\SQLEXPRESS");
    }

    #[test]
    fn scalar_rows() {
        let m = Family::Server.find("connections").unwrap();
        assert_eq!(shape(m, &[Some(12.)]).unwrap(), Sample::Scalar(12.));
        assert_eq!(shape(m, &[Some(12.), Some(3.)]).unwrap(), Sample::Scalar(12.));
        assert!(matches!(shape(m, &[]), Err(ProbeError::RowShape { .. })));
        assert!(matches!(shape(m, &[None]), Err(ProbeError::RowShape { .. })));
    }

    #[test]
    fn ratio_rows() {
        let m = Family::Server.find("cachehit").unwrap();
        assert_eq!(
            shape(m, &[Some(90.), Some(100.)]).unwrap(),
            Sample::Pair {
                numerator: 90.,
                denominator: 100.
            }
        );
        let bad_rows: [&[Option<f64>]; 3] = [
            &[Some(1.)],
            &[Some(1.), None],
            &[Some(1.), Some(2.), Some(3.)],
        ];
        for bad in bad_rows {
            assert!(matches!(shape(m, bad), Err(ProbeError::RowShape { .. })));
        }
    }
}
