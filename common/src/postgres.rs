use crate::args::PostgresArgs;
use anyhow::{Context, Result, bail};
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, RecyclingMethod};
use postgres::NoTls;
use rustls::{ClientConfig, RootCertStore, pki_types::CertificateDer};
use std::env;
use std::time::Duration;
use tokio_postgres_rustls::MakeRustlsConnect;

pub fn create_pool(pg_args: PostgresArgs) -> Pool {
    let mut tls_connector = None;
    if let Some(ref ca_cert) = pg_args.postgres_ca_cert {
        let extra_roots =
            parse_ca_certs(ca_cert.as_bytes()).expect("Failed to parse CA certificate");
        tls_connector = Some(make_rustls(extra_roots).expect("Failed to create Rustls connector"));
    }
    let mut pg_pool_cfg = PgConfig::new();
    pg_pool_cfg.dbname = Some(pg_args.postgres_database);
    pg_pool_cfg.host = Some(pg_args.postgres_host);
    pg_pool_cfg.port = Some(pg_args.postgres_port);
    pg_pool_cfg.user = Some(pg_args.postgres_username);
    pg_pool_cfg.password = pg_args
        .postgres_password
        .or_else(|| env::var("POSTGRES_PASSWORD").ok());
    pg_pool_cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    if let Some(tls) = tls_connector {
        pg_pool_cfg
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), tls)
            .expect("Failed to create Postgres pool")
    } else {
        pg_pool_cfg
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
            .expect("Failed to create Postgres pool")
    }
}

/// Verify the pool can hand out a working connection, retrying for a while.
/// Exhausting the attempts is fatal for the caller: the process should exit.
pub async fn wait_for_pool(pool: &Pool, attempts: u32) -> Result<()> {
    let mut delay = Duration::from_millis(500);
    for attempt in 1..=attempts {
        match pool.get().await {
            Ok(client) => {
                client
                    .simple_query("SELECT 1")
                    .await
                    .context("postgres liveness query failed")?;
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(attempt, attempts, error = ?e, "postgres not reachable yet");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(10));
            }
        }
    }
    bail!("postgres unreachable after {} attempts", attempts)
}

pub fn make_rustls(certs: Vec<CertificateDer<'_>>) -> Result<MakeRustlsConnect> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().expect("could not load platform certs") {
        roots.add(cert).unwrap();
    }
    for cert in certs {
        roots.add(cert)?;
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(config))
}

fn parse_ca_certs(bytes: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    // If it's PEM, decode all the certs; otherwise treat as raw DER
    if bytes.starts_with(b"-----BEGIN") {
        let mut rd: &[u8] = bytes;
        let mut out = Vec::new();
        for item in rustls_pemfile::read_all(&mut rd) {
            let item = item.map_err(|e| anyhow::anyhow!("failed to parse PEM bundle: {}", e))?;
            if let rustls_pemfile::Item::X509Certificate(der) = item {
                out.push(der);
            }
        }
        if out.is_empty() {
            bail!("no X509 certificates found in provided PEM");
        }
        Ok(out)
    } else {
        Ok(vec![CertificateDer::from(bytes.to_vec())])
    }
}
