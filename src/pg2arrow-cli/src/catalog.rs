// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Snapshots the parts of `pg_catalog` needed to resolve a source.

use std::collections::{BTreeSet, VecDeque};

use anyhow::Context;
use pg2arrow::{AttributeInfo, MemoryCatalog, Oid, Source, TypeCategory, TypeInfo};
use tokio_postgres::Client;
use tracing::debug;

/// Describes `source` and loads every type reachable from its columns into a
/// [`MemoryCatalog`].
///
/// Types the server does not know are left out, so that resolution reports
/// them as missing metadata.
pub async fn load(client: &Client, source: &Source) -> Result<MemoryCatalog, anyhow::Error> {
    let statement = client
        .prepare(&source.query())
        .await
        .with_context(|| format!("describing {source}"))?;
    let columns: Vec<(String, Oid)> = statement
        .columns()
        .iter()
        .map(|c| (c.name().to_owned(), c.type_().oid()))
        .collect();

    let mut catalog = MemoryCatalog::new();
    let mut seen = BTreeSet::new();
    let mut pending: VecDeque<Oid> = columns.iter().map(|(_, oid)| *oid).collect();
    while let Some(oid) = pending.pop_front() {
        if !seen.insert(oid) {
            continue;
        }
        let Some(info) = load_type(client, oid).await? else {
            continue;
        };
        pending.extend(info.element);
        if let (TypeCategory::Composite, Some(relation)) = (info.category, info.relation) {
            let attributes = load_attributes(client, relation).await?;
            pending.extend(attributes.iter().map(|a| a.type_oid));
            catalog.set_attributes(relation, attributes);
        }
        catalog.insert_type(oid, info);
    }
    debug!(%source, types = seen.len(), "loaded catalog snapshot");

    catalog.add_source(source.clone(), columns);
    Ok(catalog)
}

async fn load_type(client: &Client, oid: Oid) -> Result<Option<TypeInfo>, anyhow::Error> {
    let row = client
        .query_opt(
            "SELECT typname, typtype, typelem, typrelid
            FROM pg_catalog.pg_type
            WHERE oid = $1",
            &[&oid],
        )
        .await
        .with_context(|| format!("looking up type {oid}"))?;
    let Some(row) = row else {
        return Ok(None);
    };

    let name: String = row.try_get("typname")?;
    // `typtype` is a "char", which is always ASCII.
    let typtype = u8::try_from(row.try_get::<_, i8>("typtype")?)?;
    let element: Oid = row.try_get("typelem")?;
    let relation: Oid = row.try_get("typrelid")?;
    debug!(oid, %name, typtype = %char::from(typtype), "looked up type");
    Ok(Some(TypeInfo {
        name,
        category: TypeCategory::from_typtype(typtype),
        element: (element != 0).then_some(element),
        relation: (relation != 0).then_some(relation),
    }))
}

async fn load_attributes(
    client: &Client,
    relation: Oid,
) -> Result<Vec<AttributeInfo>, anyhow::Error> {
    let rows = client
        .query(
            "SELECT attname, atttypid
            FROM pg_catalog.pg_attribute
            WHERE attrelid = $1
                AND attnum > 0::pg_catalog.int2
                AND NOT attisdropped
            ORDER BY attnum",
            &[&relation],
        )
        .await
        .with_context(|| format!("looking up attributes of relation {relation}"))?;

    let live = rows
        .into_iter()
        .map(|row| Ok::<_, anyhow::Error>((row.try_get("attname")?, row.try_get("atttypid")?)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(renumber(live))
}

/// Numbers attributes densely from 1, in the order given.
///
/// Dropped attributes leave holes in `attnum`; the wire format only carries
/// the live ones, in order.
fn renumber(live: Vec<(String, Oid)>) -> Vec<AttributeInfo> {
    live.into_iter()
        .zip(1..)
        .map(|((name, type_oid), position)| AttributeInfo {
            position,
            name,
            type_oid,
        })
        .collect()
}
