// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The metadata interface schema resolution is written against.

use std::collections::BTreeMap;
use std::fmt;

use crate::types::Oid;

/// The `typtype` of a `pg_type` row.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TypeCategory {
    /// `b`: a base type, or an array when the type has an element type.
    Base,
    /// `c`: a composite (row) type.
    Composite,
    /// `e`: an enum type.
    Enum,
    /// Domains, pseudo types, ranges, multiranges, and anything newer.
    Other,
}

impl TypeCategory {
    /// Interprets a `pg_type.typtype` character.
    pub fn from_typtype(typtype: u8) -> Self {
        match typtype {
            b'b' => TypeCategory::Base,
            b'c' => TypeCategory::Composite,
            b'e' => TypeCategory::Enum,
            _ => TypeCategory::Other,
        }
    }
}

/// The parts of a `pg_type` row that resolution depends on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TypeInfo {
    /// `typname`
    pub name: String,
    /// `typtype`
    pub category: TypeCategory,
    /// `typelem`, when non-zero.
    pub element: Option<Oid>,
    /// `typrelid`, when non-zero.
    pub relation: Option<Oid>,
}

/// One attribute of a composite type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeInfo {
    /// 1-based declared position.
    pub position: u32,
    pub name: String,
    pub type_oid: Oid,
}

/// What to export: a table by name or an arbitrary query.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Source {
    /// A table name, optionally schema qualified with `.`. Each part is
    /// matched exactly, including case.
    Table(String),
    Query(String),
}

impl Source {
    /// The query whose result is exported, suitable for embedding in
    /// `COPY (...)`.
    pub fn query(&self) -> String {
        match self {
            Source::Table(name) => format!("SELECT * FROM {}", quote_qualified(name)),
            Source::Query(query) => {
                let mut query = query.trim_end();
                while let Some(rest) = query.strip_suffix(';') {
                    query = rest.trim_end();
                }
                query.to_owned()
            }
        }
    }
}

fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Table(name) => write!(f, "table {name}"),
            Source::Query(query) => write!(f, "query {query:?}"),
        }
    }
}

/// Synchronous access to the catalog of the database being exported.
///
/// Lookups return `Ok(None)` when the catalog has no matching row, and `Err`
/// only when the catalog could not be consulted at all.
pub trait Catalog {
    /// Looks up a row of `pg_type`.
    fn lookup_type(&self, oid: Oid) -> Result<Option<TypeInfo>, anyhow::Error>;

    /// Lists the attributes of the relation backing a composite type.
    fn lookup_composite_attributes(
        &self,
        relation: Oid,
    ) -> Result<Vec<AttributeInfo>, anyhow::Error>;

    /// Returns the ordered `(column name, type oid)` pairs of a source's
    /// result.
    fn describe(&self, source: &Source) -> Result<Vec<(String, Oid)>, anyhow::Error>;
}

impl<C: Catalog + ?Sized> Catalog for &C {
    fn lookup_type(&self, oid: Oid) -> Result<Option<TypeInfo>, anyhow::Error> {
        (**self).lookup_type(oid)
    }

    fn lookup_composite_attributes(
        &self,
        relation: Oid,
    ) -> Result<Vec<AttributeInfo>, anyhow::Error> {
        (**self).lookup_composite_attributes(relation)
    }

    fn describe(&self, source: &Source) -> Result<Vec<(String, Oid)>, anyhow::Error> {
        (**self).describe(source)
    }
}

/// A [`Catalog`] held entirely in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryCatalog {
    types: BTreeMap<Oid, TypeInfo>,
    attributes: BTreeMap<Oid, Vec<AttributeInfo>>,
    sources: BTreeMap<Source, Vec<(String, Oid)>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_type(&mut self, oid: Oid, info: TypeInfo) {
        self.types.insert(oid, info);
    }

    /// Registers a base (non-array) type.
    pub fn add_base(&mut self, oid: Oid, name: &str) -> &mut Self {
        self.insert_type(
            oid,
            TypeInfo {
                name: name.into(),
                category: TypeCategory::Base,
                element: None,
                relation: None,
            },
        );
        self
    }

    /// Registers an array type over `element`.
    pub fn add_array(&mut self, oid: Oid, name: &str, element: Oid) -> &mut Self {
        self.insert_type(
            oid,
            TypeInfo {
                name: name.into(),
                category: TypeCategory::Base,
                element: Some(element),
                relation: None,
            },
        );
        self
    }

    /// Registers an enum type.
    pub fn add_enum(&mut self, oid: Oid, name: &str) -> &mut Self {
        self.insert_type(
            oid,
            TypeInfo {
                name: name.into(),
                category: TypeCategory::Enum,
                element: None,
                relation: None,
            },
        );
        self
    }

    /// Registers a composite type backed by `relation` whose attributes are
    /// `fields`, in declaration order.
    pub fn add_composite(
        &mut self,
        oid: Oid,
        name: &str,
        relation: Oid,
        fields: &[(&str, Oid)],
    ) -> &mut Self {
        self.insert_type(
            oid,
            TypeInfo {
                name: name.into(),
                category: TypeCategory::Composite,
                element: None,
                relation: Some(relation),
            },
        );
        let attributes = fields
            .iter()
            .zip(1..)
            .map(|((name, type_oid), position)| AttributeInfo {
                position,
                name: (*name).into(),
                type_oid: *type_oid,
            })
            .collect();
        self.set_attributes(relation, attributes);
        self
    }

    pub fn set_attributes(&mut self, relation: Oid, attributes: Vec<AttributeInfo>) {
        self.attributes.insert(relation, attributes);
    }

    /// Registers the result shape of `source`.
    pub fn add_source(&mut self, source: Source, columns: Vec<(String, Oid)>) -> &mut Self {
        self.sources.insert(source, columns);
        self
    }
}

impl Catalog for MemoryCatalog {
    fn lookup_type(&self, oid: Oid) -> Result<Option<TypeInfo>, anyhow::Error> {
        Ok(self.types.get(&oid).cloned())
    }

    fn lookup_composite_attributes(
        &self,
        relation: Oid,
    ) -> Result<Vec<AttributeInfo>, anyhow::Error> {
        Ok(self.attributes.get(&relation).cloned().unwrap_or_default())
    }

    fn describe(&self, source: &Source) -> Result<Vec<(String, Oid)>, anyhow::Error> {
        self.sources
            .get(source)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{source} has not been described"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typtype_characters() {
        assert_eq!(TypeCategory::from_typtype(b'b'), TypeCategory::Base);
        assert_eq!(TypeCategory::from_typtype(b'c'), TypeCategory::Composite);
        assert_eq!(TypeCategory::from_typtype(b'e'), TypeCategory::Enum);
        assert_eq!(TypeCategory::from_typtype(b'd'), TypeCategory::Other);
        assert_eq!(TypeCategory::from_typtype(b'r'), TypeCategory::Other);
    }

    #[test]
    fn composite_positions_start_at_one() {
        let mut catalog = MemoryCatalog::new();
        catalog.add_composite(9000, "pair", 9001, &[("a", 23), ("b", 25)]);

        let attrs = catalog.lookup_composite_attributes(9001).unwrap();
        assert_eq!(
            attrs.iter().map(|a| a.position).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(catalog.lookup_composite_attributes(1).unwrap().is_empty());
        assert!(catalog.lookup_type(1).unwrap().is_none());
    }

    #[test]
    fn table_source_query() {
        assert_eq!(
            Source::Table("minute_bars".into()).query(),
            r#"SELECT * FROM "minute_bars""#
        );
        assert_eq!(
            Source::Table("Market.MinuteBars".into()).query(),
            r#"SELECT * FROM "Market"."MinuteBars""#
        );
        assert_eq!(
            Source::Table(r#"odd"name"#.into()).query(),
            r#"SELECT * FROM "odd""name""#
        );
        assert_eq!(
            Source::Query("SELECT 1 ;\n; ".into()).query(),
            "SELECT 1"
        );
        assert_eq!(Source::Query("SELECT ';'".into()).query(), "SELECT ';'");
        assert!(MemoryCatalog::new()
            .describe(&Source::Query("select 1".into()))
            .is_err());
    }
}
