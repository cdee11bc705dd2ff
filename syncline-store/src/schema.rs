//! Class metadata: registration specs and the in-memory registry.
//!
//! Classes are registered by the application (and by the cache core for its
//! internal anchor classes) when a store is opened. The name → id mapping
//! is persisted so keys stay stable across reopen; everything else about a
//! class is redeclared on each registration.

use std::collections::HashMap;
use syncline_types::{ClassId, RelStrength};

/// A single declared property of an object or relationship class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: String,
    /// Read-only (server-calculated) properties are stripped from sync
    /// payloads.
    pub read_only: bool,
}

/// One end of a relationship class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelEndDef {
    /// Accepted endpoint class; `None` accepts any object class.
    pub class: Option<ClassId>,
    /// At-most-one multiplicity on this end (drives upsert-on-relate).
    pub at_most_one: bool,
}

impl RelEndDef {
    #[must_use]
    pub fn any() -> Self {
        Self {
            class: None,
            at_most_one: false,
        }
    }

    #[must_use]
    pub fn of(class: ClassId) -> Self {
        Self {
            class: Some(class),
            at_most_one: false,
        }
    }

    #[must_use]
    pub fn at_most_one(mut self) -> Self {
        self.at_most_one = true;
        self
    }
}

/// What kind of records a class describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassKind {
    Object,
    Relationship {
        strength: RelStrength,
        source: RelEndDef,
        target: RelEndDef,
    },
}

/// Registered metadata of one class.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub id: ClassId,
    pub schema: String,
    pub name: String,
    pub base: Option<ClassId>,
    pub properties: Vec<PropertyDef>,
    pub kind: ClassKind,
}

impl ClassDef {
    /// `"Schema.Class"` form used for lookup and diagnostics.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    #[must_use]
    pub fn is_relationship(&self) -> bool {
        matches!(self.kind, ClassKind::Relationship { .. })
    }

    /// Names of properties a sync payload may carry.
    pub fn writable_properties(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|p| !p.read_only)
            .map(|p| p.name.as_str())
    }
}

/// Declaration of an object class for registration.
#[derive(Debug, Clone)]
pub struct ClassSpec {
    pub schema: String,
    pub name: String,
    pub base: Option<ClassId>,
    pub properties: Vec<PropertyDef>,
}

impl ClassSpec {
    #[must_use]
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            base: None,
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn base(mut self, base: ClassId) -> Self {
        self.base = Some(base);
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            read_only: false,
        });
        self
    }

    #[must_use]
    pub fn read_only_property(mut self, name: impl Into<String>) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            read_only: true,
        });
        self
    }
}

/// Declaration of a relationship class for registration.
#[derive(Debug, Clone)]
pub struct RelationshipSpec {
    pub schema: String,
    pub name: String,
    pub base: Option<ClassId>,
    pub strength: RelStrength,
    pub source: RelEndDef,
    pub target: RelEndDef,
    pub properties: Vec<PropertyDef>,
}

impl RelationshipSpec {
    #[must_use]
    pub fn new(schema: impl Into<String>, name: impl Into<String>, strength: RelStrength) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            base: None,
            strength,
            source: RelEndDef::any(),
            target: RelEndDef::any(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn base(mut self, base: ClassId) -> Self {
        self.base = Some(base);
        self
    }

    #[must_use]
    pub fn source(mut self, end: RelEndDef) -> Self {
        self.source = end;
        self
    }

    #[must_use]
    pub fn target(mut self, end: RelEndDef) -> Self {
        self.target = end;
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            read_only: false,
        });
        self
    }
}

/// In-memory class registry with persisted id assignment.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    by_id: HashMap<ClassId, ClassDef>,
    by_name: HashMap<String, ClassId>,
}

impl Registry {
    pub fn insert(&mut self, def: ClassDef) {
        self.by_name.insert(def.full_name(), def.id);
        self.by_id.insert(def.id, def);
    }

    pub fn get(&self, id: ClassId) -> Option<&ClassDef> {
        self.by_id.get(&id)
    }

    pub fn find(&self, full_name: &str) -> Option<&ClassDef> {
        self.by_name.get(full_name).and_then(|id| self.by_id.get(id))
    }

    /// True if `class` equals `ancestor` or derives from it via base links.
    pub fn is_or_derives_from(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.by_id.get(&id).and_then(|def| def.base);
        }
        false
    }
}
