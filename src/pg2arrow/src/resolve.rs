// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Resolution of PostgreSQL types into the columnar type model.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::catalog::{Catalog, Source, TypeCategory};
use crate::error::{CatalogObject, Error};
use crate::types::{ColumnDesc, Oid, RelationDesc, ScalarKind, StructField, TypeDesc, UTC};

/// Maps the `typname` of PostgreSQL base types to scalar kinds.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeNameMap {
    names: BTreeMap<String, ScalarKind>,
}

impl TypeNameMap {
    /// A map that knows no type names at all.
    pub fn empty() -> Self {
        TypeNameMap {
            names: BTreeMap::new(),
        }
    }

    /// Returns a copy of `self` that additionally maps `name` to `kind`.
    pub fn with(mut self, name: &str, kind: ScalarKind) -> Self {
        self.names.insert(name.to_owned(), kind);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ScalarKind> {
        self.names.get(name)
    }
}

impl Default for TypeNameMap {
    fn default() -> Self {
        TypeNameMap::empty()
            .with("bool", ScalarKind::Bool)
            .with("bpchar", ScalarKind::Utf8)
            .with("bytea", ScalarKind::Binary)
            .with("date", ScalarKind::Date32)
            .with("float4", ScalarKind::Float32)
            .with("float8", ScalarKind::Float64)
            .with("int2", ScalarKind::Int16)
            .with("int4", ScalarKind::Int32)
            .with("int8", ScalarKind::Int64)
            .with("interval", ScalarKind::DurationMicros)
            .with("json", ScalarKind::Utf8)
            .with("jsonb", ScalarKind::Binary)
            .with("serial2", ScalarKind::Int16)
            .with("serial4", ScalarKind::Int32)
            .with("serial8", ScalarKind::Int64)
            .with("text", ScalarKind::Utf8)
            .with("time", ScalarKind::Time64Micros)
            .with("timestamp", ScalarKind::TimestampMicros { tz: None })
            .with(
                "timestamptz",
                ScalarKind::TimestampMicros {
                    tz: Some(UTC.into()),
                },
            )
            .with("uuid", ScalarKind::FixedBinary(16))
            .with("varchar", ScalarKind::Utf8)
            .with("xml", ScalarKind::Utf8)
    }
}

/// Turns type OIDs into [`TypeDesc`]s by consulting a [`Catalog`].
///
/// Resolved types are memoized, so a composite or array type shared by many
/// columns costs one round of lookups.
#[derive(Debug)]
pub struct TypeResolver<C> {
    catalog: C,
    names: TypeNameMap,
    resolved: BTreeMap<Oid, TypeDesc>,
    /// Types whose resolution is underway, innermost last.
    stack: Vec<Oid>,
}

impl<C: Catalog> TypeResolver<C> {
    pub fn new(catalog: C, names: TypeNameMap) -> Self {
        TypeResolver {
            catalog,
            names,
            resolved: BTreeMap::new(),
            stack: Vec::new(),
        }
    }

    /// Resolves every result column of `source`.
    pub fn resolve_source(&mut self, source: &Source) -> Result<RelationDesc, Error> {
        let columns = self.catalog.describe(source)?;
        debug!(%source, columns = columns.len(), "describing source");

        let mut desc = Vec::with_capacity(columns.len());
        for (name, oid) in columns {
            let typ = self.resolve(oid)?;
            debug!(column = %name, oid, %typ, "resolved column");
            desc.push(ColumnDesc { name, typ });
        }
        Ok(RelationDesc::new(desc))
    }

    /// Resolves a single type.
    pub fn resolve(&mut self, oid: Oid) -> Result<TypeDesc, Error> {
        if let Some(typ) = self.resolved.get(&oid) {
            return Ok(typ.clone());
        }
        if self.stack.contains(&oid) {
            let mut path = self.stack.clone();
            path.push(oid);
            return Err(Error::CyclicType {
                oid,
                path: join_oids(&path),
            });
        }

        self.stack.push(oid);
        let result = self.resolve_uncached(oid);
        self.stack.pop();

        let typ = result?;
        trace!(oid, %typ, "resolved type");
        self.resolved.insert(oid, typ.clone());
        Ok(typ)
    }

    fn resolve_uncached(&mut self, oid: Oid) -> Result<TypeDesc, Error> {
        let info = self
            .catalog
            .lookup_type(oid)?
            .ok_or(Error::MetadataNotFound(CatalogObject::Type(oid)))?;

        let typ = match info.category {
            TypeCategory::Base => match info.element {
                Some(element) => TypeDesc::List(Box::new(self.resolve(element)?)),
                None => match self.names.get(&info.name) {
                    Some(kind) => TypeDesc::Scalar(kind.clone()),
                    None => TypeDesc::Unsupported {
                        type_name: info.name,
                    },
                },
            },
            TypeCategory::Composite => {
                let relation = info
                    .relation
                    .ok_or(Error::MetadataNotFound(CatalogObject::Attributes(oid)))?;
                TypeDesc::Struct(self.resolve_attributes(relation)?)
            }
            TypeCategory::Enum => TypeDesc::Dictionary,
            TypeCategory::Other => TypeDesc::Unsupported {
                type_name: info.name,
            },
        };
        Ok(typ)
    }

    fn resolve_attributes(&mut self, relation: Oid) -> Result<Vec<StructField>, Error> {
        let mut attributes = self.catalog.lookup_composite_attributes(relation)?;
        if attributes.is_empty() {
            return Err(Error::MetadataNotFound(CatalogObject::Attributes(relation)));
        }
        attributes.sort_by_key(|a| a.position);

        let mut fields = Vec::with_capacity(attributes.len());
        for (attribute, expected) in attributes.into_iter().zip(1..) {
            if attribute.position != expected {
                return Err(Error::MetadataNotFound(CatalogObject::Attribute {
                    relation,
                    position: expected,
                }));
            }
            fields.push(StructField {
                typ: self.resolve(attribute.type_oid)?,
                name: attribute.name,
            });
        }
        Ok(fields)
    }
}

fn join_oids(oids: &[Oid]) -> String {
    oids.iter()
        .map(|oid| oid.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::catalog::{AttributeInfo, MemoryCatalog, TypeInfo};

    fn standard_catalog() -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        catalog
            .add_base(16, "bool")
            .add_base(21, "int2")
            .add_base(23, "int4")
            .add_base(25, "text")
            .add_base(700, "float4")
            .add_base(701, "float8")
            .add_base(1700, "numeric")
            .add_base(2950, "uuid")
            .add_base(1184, "timestamptz")
            .add_array(1007, "_int4", 23)
            .add_array(1021, "_float4", 700);
        catalog
    }

    fn resolver(catalog: &MemoryCatalog) -> TypeResolver<&MemoryCatalog> {
        TypeResolver::new(catalog, TypeNameMap::default())
    }

    #[test]
    fn base_types() {
        let catalog = standard_catalog();
        let mut resolver = resolver(&catalog);
        assert_eq!(
            resolver.resolve(23).unwrap(),
            TypeDesc::Scalar(ScalarKind::Int32)
        );
        assert_eq!(
            resolver.resolve(2950).unwrap(),
            TypeDesc::Scalar(ScalarKind::FixedBinary(16))
        );
        assert_eq!(
            resolver.resolve(1184).unwrap(),
            TypeDesc::Scalar(ScalarKind::TimestampMicros {
                tz: Some(UTC.into())
            })
        );
    }

    #[test]
    fn arrays_become_lists() {
        let catalog = standard_catalog();
        let mut resolver = resolver(&catalog);
        assert_eq!(
            resolver.resolve(1021).unwrap(),
            TypeDesc::List(Box::new(TypeDesc::Scalar(ScalarKind::Float32)))
        );
    }

    #[test]
    fn unknown_base_name_is_unsupported() {
        let catalog = standard_catalog();
        let mut resolver = resolver(&catalog);
        assert_eq!(
            resolver.resolve(1700).unwrap(),
            TypeDesc::Unsupported {
                type_name: "numeric".into()
            }
        );
    }

    #[test]
    fn other_categories_are_unsupported() {
        let mut catalog = standard_catalog();
        catalog.insert_type(
            3904,
            TypeInfo {
                name: "int4range".into(),
                category: TypeCategory::Other,
                element: None,
                relation: None,
            },
        );
        let mut resolver = resolver(&catalog);
        assert!(matches!(
            resolver.resolve(3904).unwrap(),
            TypeDesc::Unsupported { .. }
        ));
    }

    #[test]
    fn enums_become_dictionaries() {
        let mut catalog = standard_catalog();
        catalog.add_enum(50_000, "mood");
        let mut resolver = resolver(&catalog);
        assert_eq!(resolver.resolve(50_000).unwrap(), TypeDesc::Dictionary);
    }

    #[test]
    fn nested_composites() {
        // CREATE TYPE complex AS (r float4[], i float8);
        // CREATE TABLE complex_types (t1 text, t2 float4[], t3 complex[], t4 mood);
        let mut catalog = standard_catalog();
        catalog
            .add_composite(60_000, "complex", 60_001, &[("r", 1021), ("i", 701)])
            .add_array(60_002, "_complex", 60_000)
            .add_enum(60_003, "mood")
            .add_source(
                Source::Table("complex_types".into()),
                vec![
                    ("t1".into(), 25),
                    ("t2".into(), 1021),
                    ("t3".into(), 60_002),
                    ("t4".into(), 60_003),
                ],
            );

        let mut resolver = resolver(&catalog);
        let desc = resolver
            .resolve_source(&Source::Table("complex_types".into()))
            .unwrap();

        let complex = TypeDesc::Struct(vec![
            StructField {
                name: "r".into(),
                typ: TypeDesc::List(Box::new(TypeDesc::Scalar(ScalarKind::Float32))),
            },
            StructField {
                name: "i".into(),
                typ: TypeDesc::Scalar(ScalarKind::Float64),
            },
        ]);
        let expected = RelationDesc::new(vec![
            ColumnDesc {
                name: "t1".into(),
                typ: TypeDesc::Scalar(ScalarKind::Utf8),
            },
            ColumnDesc {
                name: "t2".into(),
                typ: TypeDesc::List(Box::new(TypeDesc::Scalar(ScalarKind::Float32))),
            },
            ColumnDesc {
                name: "t3".into(),
                typ: TypeDesc::List(Box::new(complex)),
            },
            ColumnDesc {
                name: "t4".into(),
                typ: TypeDesc::Dictionary,
            },
        ]);
        assert_eq!(desc, expected);
    }

    #[test]
    fn attributes_are_ordered_by_position() {
        let mut catalog = standard_catalog();
        catalog.insert_type(
            70_000,
            TypeInfo {
                name: "pair".into(),
                category: TypeCategory::Composite,
                element: None,
                relation: Some(70_001),
            },
        );
        catalog.set_attributes(
            70_001,
            vec![
                AttributeInfo {
                    position: 2,
                    name: "second".into(),
                    type_oid: 25,
                },
                AttributeInfo {
                    position: 1,
                    name: "first".into(),
                    type_oid: 23,
                },
            ],
        );
        let mut resolver = resolver(&catalog);
        let TypeDesc::Struct(fields) = resolver.resolve(70_000).unwrap() else {
            panic!("expected a struct");
        };
        assert_eq!(fields[0].name, "first");
        assert_eq!(fields[1].name, "second");
    }

    #[test]
    fn attribute_gaps_are_missing_metadata() {
        let mut catalog = standard_catalog();
        catalog.insert_type(
            70_000,
            TypeInfo {
                name: "pair".into(),
                category: TypeCategory::Composite,
                element: None,
                relation: Some(70_001),
            },
        );
        catalog.set_attributes(
            70_001,
            vec![AttributeInfo {
                position: 2,
                name: "second".into(),
                type_oid: 25,
            }],
        );
        let mut resolver = resolver(&catalog);
        assert!(matches!(
            resolver.resolve(70_000),
            Err(Error::MetadataNotFound(CatalogObject::Attribute {
                relation: 70_001,
                position: 1
            }))
        ));
    }

    #[test]
    fn missing_type_is_an_error() {
        let mut catalog = standard_catalog();
        catalog.add_array(80_000, "_ghost", 80_001);
        let mut resolver = resolver(&catalog);
        assert!(matches!(
            resolver.resolve(80_000),
            Err(Error::MetadataNotFound(CatalogObject::Type(80_001)))
        ));
    }

    #[test]
    fn composite_without_attributes_is_an_error() {
        let mut catalog = standard_catalog();
        catalog.add_composite(80_000, "empty", 80_001, &[]);
        let mut resolver = resolver(&catalog);
        assert!(matches!(
            resolver.resolve(80_000),
            Err(Error::MetadataNotFound(CatalogObject::Attributes(80_001)))
        ));
    }

    #[test]
    fn self_referential_composites_are_rejected() {
        // node AS (value int4, children node[])
        let mut catalog = standard_catalog();
        catalog
            .add_composite(90_000, "node", 90_001, &[("value", 23), ("children", 90_002)])
            .add_array(90_002, "_node", 90_000);
        let mut resolver = resolver(&catalog);
        match resolver.resolve(90_000) {
            Err(Error::CyclicType { oid, path }) => {
                assert_eq!(oid, 90_000);
                assert_eq!(path, "90000 -> 90002 -> 90000");
            }
            other => panic!("expected a cycle error, got {other:?}"),
        }
    }

    #[test]
    fn custom_name_map() {
        let catalog = standard_catalog();
        let names = TypeNameMap::empty().with("numeric", ScalarKind::Utf8);
        let mut resolver = TypeResolver::new(&catalog, names);
        assert_eq!(
            resolver.resolve(1700).unwrap(),
            TypeDesc::Scalar(ScalarKind::Utf8)
        );
        assert!(matches!(
            resolver.resolve(23).unwrap(),
            TypeDesc::Unsupported { .. }
        ));
    }

    /// Counts type lookups to observe memoization.
    struct CountingCatalog {
        inner: MemoryCatalog,
        lookups: Cell<usize>,
    }

    impl Catalog for CountingCatalog {
        fn lookup_type(&self, oid: Oid) -> Result<Option<TypeInfo>, anyhow::Error> {
            self.lookups.set(self.lookups.get() + 1);
            self.inner.lookup_type(oid)
        }

        fn lookup_composite_attributes(
            &self,
            relation: Oid,
        ) -> Result<Vec<AttributeInfo>, anyhow::Error> {
            self.inner.lookup_composite_attributes(relation)
        }

        fn describe(&self, source: &Source) -> Result<Vec<(String, Oid)>, anyhow::Error> {
            self.inner.describe(source)
        }
    }

    #[test]
    fn shared_types_are_looked_up_once() {
        let mut inner = standard_catalog();
        inner.add_source(
            Source::Query("select a, b, c".into()),
            vec![("a".into(), 1007), ("b".into(), 1007), ("c".into(), 23)],
        );
        let catalog = CountingCatalog {
            inner,
            lookups: Cell::new(0),
        };
        let mut resolver = TypeResolver::new(&catalog, TypeNameMap::default());
        let desc = resolver
            .resolve_source(&Source::Query("select a, b, c".into()))
            .unwrap();
        assert_eq!(desc.len(), 3);
        // _int4 and int4, each once.
        assert_eq!(catalog.lookups.get(), 2);
    }
}
