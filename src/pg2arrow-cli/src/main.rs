// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Exports a PostgreSQL table or query to a Parquet file.
//!
//! The source is read with `COPY ... TO STDOUT (FORMAT binary)` inside a
//! read-only transaction, so the schema that is resolved and the rows that are
//! copied come from the same snapshot.
//!
//! ```text
//! pg2arrow -d postgresql://localhost/postgres -t minute_bars -o bars.parquet
//! ```

use std::path::PathBuf;
use std::pin::pin;

use anyhow::{bail, Context};
use futures::TryStreamExt;
use pg2arrow::{CopyDecoder, Error, Source, TypeNameMap, TypeResolver};
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod catalog;
mod sink;

#[derive(clap::Parser, Debug)]
#[clap(name = "pg2arrow", about = "Export a PostgreSQL table or query to Parquet.")]
struct Args {
    /// libpq-style connection string.
    #[clap(
        short = 'd',
        long,
        env = "PG2ARROW_CONNINFO",
        default_value = "postgresql://localhost/postgres"
    )]
    conninfo: String,
    /// Query whose result is exported.
    #[clap(short, long, conflicts_with = "table", required_unless_present = "table")]
    query: Option<String>,
    /// Table that is exported in full.
    #[clap(short, long)]
    table: Option<String>,
    /// Parquet file to write.
    #[clap(short, long, default_value = "out.parquet")]
    output: PathBuf,
    #[clap(long, value_enum, default_value_t)]
    compression: sink::Compression,
}

impl Args {
    fn source(&self) -> Result<Source, anyhow::Error> {
        match (&self.query, &self.table) {
            (Some(query), None) => Ok(Source::Query(query.clone())),
            (None, Some(table)) => Ok(Source::Table(table.clone())),
            _ => bail!("exactly one of --query and --table is required"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Args = clap::Parser::parse();
    let source = args.source()?;

    let (client, connection) = tokio_postgres::connect(&args.conninfo, NoTls)
        .await
        .context("connecting to postgres")?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("postgres connection failed: {e}");
        }
    });
    info!("connected");

    client
        .batch_execute("BEGIN READ ONLY")
        .await
        .context("starting transaction")?;
    let batch = export(&client, &source).await?;
    client
        .batch_execute("COMMIT")
        .await
        .context("committing transaction")?;

    let rows = batch.num_rows();
    let batch = batch.into_record_batch();
    let written = sink::write_parquet(&args.output, &batch, args.compression)?;
    info!(
        path = %args.output.display(),
        rows,
        bytes = written,
        "wrote parquet"
    );
    Ok(())
}

async fn export(client: &Client, source: &Source) -> Result<pg2arrow::Batch, anyhow::Error> {
    let snapshot = catalog::load(client, source).await?;
    let desc = TypeResolver::new(&snapshot, TypeNameMap::default())
        .resolve_source(source)
        .with_context(|| format!("resolving the schema of {source}"))?;
    info!(%source, columns = desc.len(), schema = ?desc.arrow_schema(), "resolved schema");

    let mut decoder = CopyDecoder::new(desc).context("building decoder")?;
    let query = format!("COPY ({}) TO STDOUT (FORMAT binary)", source.query());
    let mut stream = pin!(client.copy_out(query.as_str()).await.context("starting copy")?);
    while let Some(chunk) = stream.try_next().await.map_err(Error::stream)? {
        decoder.feed(&chunk)?;
    }
    let rows = decoder.rows();
    let batch = decoder.finish()?;
    info!(rows, "copy finished");
    Ok(batch)
}
