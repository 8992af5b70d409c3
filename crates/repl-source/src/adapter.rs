use std::time::Duration;

use async_trait::async_trait;
use repl_core::{AuthMode, Column, ReplError, SourceConfig, TableIdent, TableSpec, TlsMode};
use tiberius::{AuthMethod, Client, Config as TiberiusConfig, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

use crate::scan::RowChunkStream;

/// Source TCP connects fail closed after this long rather than hanging the
/// run on an unreachable or firewall-black-holed host.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// An open connection to the source database. Reconnecting (on a transient
/// failure, inside [`crate::scan`]'s retry loop) replaces the inner client
/// in place; callers never see a new handle.
pub struct SourceHandle {
    pub(crate) client: Client<Compat<TcpStream>>,
    pub(crate) config: SourceConfig,
}

impl SourceHandle {
    pub(crate) async fn reconnect(&mut self) -> Result<(), ReplError> {
        let client = connect(&self.config).await?;
        self.client = client;
        Ok(())
    }
}

/// An engine-constructed `WHERE` fragment and its human-readable summary
/// (for logging). Built entirely from typed [`repl_core::Value`]s the
/// engine already trusts (watermarks, lookback sets) — never from
/// unsanitized external input.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub where_clause: String,
    pub description: String,
}

impl Predicate {
    pub fn always_true() -> Self {
        Predicate {
            where_clause: "1 = 1".to_string(),
            description: "full scan".to_string(),
        }
    }
}

/// Operations a replication run needs from a source database. Exists so the
/// pipeline and driver can be tested against a fake without a live SQL
/// Server.
#[async_trait]
pub trait SourceAdapter: Send {
    async fn open(config: &SourceConfig) -> Result<SourceHandle, ReplError>
    where
        Self: Sized;

    async fn list_tables(&mut self, excluded_prefixes: &[String]) -> Result<Vec<TableIdent>, ReplError>;

    async fn describe(&mut self, table: &TableIdent) -> Result<Vec<Column>, ReplError>;

    fn scan(
        &mut self,
        spec: &TableSpec,
        predicate: &Predicate,
        order_by: &str,
        chunk_size: usize,
    ) -> RowChunkStream;

    async fn detect_identity(&mut self, table: &TableIdent) -> Result<Option<String>, ReplError>;

    async fn detect_primary_key(&mut self, table: &TableIdent) -> Result<Vec<String>, ReplError>;

    async fn detect_timestamp_column(&mut self, table: &TableIdent) -> Result<Option<String>, ReplError>;

    /// Supplemented: detect a SQL Server `rowversion`/`timestamp` column,
    /// preferred over identity when present (§4.4 step 0).
    async fn detect_row_version_column(&mut self, table: &TableIdent) -> Result<Option<String>, ReplError>;
}

/// `tiberius`-backed implementation of [`SourceAdapter`].
pub struct SqlServerSource {
    pub(crate) handle: SourceHandle,
}

impl SqlServerSource {
    pub fn new(handle: SourceHandle) -> Self {
        Self { handle }
    }
}

pub(crate) async fn connect(config: &SourceConfig) -> Result<Client<Compat<TcpStream>>, ReplError> {
    for tls in &config.source_driver_preference {
        match try_connect(config, *tls).await {
            Ok(client) => return Ok(client),
            Err(e) => {
                warn!(tls = ?tls, error = %e, "source connection attempt failed, trying next TLS mode");
                continue;
            }
        }
    }
    Err(ReplError::Configuration {
        option: "source_driver_preference".to_string(),
        detail: format!(
            "every TLS mode in {:?} was rejected by {}",
            config.source_driver_preference, config.source_host
        ),
    })
}

async fn try_connect(config: &SourceConfig, tls: TlsMode) -> Result<Client<Compat<TcpStream>>, ReplError> {
    let mut tiberius_config = TiberiusConfig::new();
    tiberius_config.host(&config.source_host);
    tiberius_config.database(&config.source_database);

    match config.source_auth_mode {
        AuthMode::Sql => {
            tiberius_config.authentication(AuthMethod::sql_server(
                &config.source_user,
                config.source_password.expose(),
            ));
        }
        AuthMode::WindowsIntegrated => {
            tiberius_config.authentication(AuthMethod::Integrated);
        }
    }

    match tls {
        TlsMode::Required => tiberius_config.encryption(EncryptionLevel::Required),
        TlsMode::Preferred => tiberius_config.encryption(EncryptionLevel::On),
        TlsMode::Off => tiberius_config.encryption(EncryptionLevel::NotSupported),
    };
    tiberius_config.trust_cert();

    let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(tiberius_config.get_addr()))
        .await
        .map_err(|_| ReplError::Connectivity {
            detail: format!(
                "tcp connect to {} timed out after {CONNECT_TIMEOUT:?}",
                config.source_host
            ),
        })?
        .map_err(|e| ReplError::Connectivity {
            detail: format!("tcp connect to {}: {e}", config.source_host),
        })?;
    tcp.set_nodelay(true).ok();

    debug!(host = %config.source_host, ?tls, "connecting to source");
    Client::connect(tiberius_config, tcp.compat_write())
        .await
        .map_err(|e| ReplError::Connectivity {
            detail: format!("tds handshake with {}: {e}", config.source_host),
        })
}

#[async_trait]
impl SourceAdapter for SqlServerSource {
    async fn open(config: &SourceConfig) -> Result<SourceHandle, ReplError> {
        let client = connect(config).await?;
        Ok(SourceHandle {
            client,
            config: config.clone(),
        })
    }

    async fn list_tables(&mut self, excluded_prefixes: &[String]) -> Result<Vec<TableIdent>, ReplError> {
        crate::catalog::list_tables(&mut self.handle, excluded_prefixes).await
    }

    async fn describe(&mut self, table: &TableIdent) -> Result<Vec<Column>, ReplError> {
        crate::catalog::describe(&mut self.handle, table).await
    }

    fn scan(
        &mut self,
        spec: &TableSpec,
        predicate: &Predicate,
        order_by: &str,
        chunk_size: usize,
    ) -> RowChunkStream {
        crate::scan::scan(&mut self.handle, spec, predicate, order_by, chunk_size)
    }

    async fn detect_identity(&mut self, table: &TableIdent) -> Result<Option<String>, ReplError> {
        crate::catalog::detect_identity(&mut self.handle, table).await
    }

    async fn detect_primary_key(&mut self, table: &TableIdent) -> Result<Vec<String>, ReplError> {
        crate::catalog::detect_primary_key(&mut self.handle, table).await
    }

    async fn detect_timestamp_column(&mut self, table: &TableIdent) -> Result<Option<String>, ReplError> {
        crate::catalog::detect_timestamp_column(&mut self.handle, table).await
    }

    async fn detect_row_version_column(&mut self, table: &TableIdent) -> Result<Option<String>, ReplError> {
        crate::catalog::detect_row_version_column(&mut self.handle, table).await
    }
}
