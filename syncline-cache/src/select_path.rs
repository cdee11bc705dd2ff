//! Select-clause path specifications.
//!
//! Only the minimal path matching needed for partial-vs-full caching
//! decisions lives here: a specification describes which related instances
//! a query selected and whether it selected all of their properties. A
//! fetched node's actual arrival path (the chain of
//! (relationship class, direction, target class) steps from a top-level
//! result) is compared against the specifications to decide whether the
//! fetch provably covered the node's full property set.

use syncline_store::ObjectStore;
use syncline_types::{ClassId, RelDirection};

/// One step of a select path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectStep {
    pub rel_class: ClassId,
    pub direction: RelDirection,
    pub target_class: ClassId,
    /// Accept relationship classes derived from `rel_class`.
    pub rel_polymorphic: bool,
    /// Accept target classes derived from `target_class`.
    pub target_polymorphic: bool,
}

impl SelectStep {
    #[must_use]
    pub fn new(rel_class: ClassId, direction: RelDirection, target_class: ClassId) -> Self {
        Self {
            rel_class,
            direction,
            target_class,
            rel_polymorphic: false,
            target_polymorphic: false,
        }
    }

    #[must_use]
    pub fn polymorphic(mut self) -> Self {
        self.rel_polymorphic = true;
        self.target_polymorphic = true;
        self
    }

    #[must_use]
    pub fn rel_polymorphic(mut self) -> Self {
        self.rel_polymorphic = true;
        self
    }

    #[must_use]
    pub fn target_polymorphic(mut self) -> Self {
        self.target_polymorphic = true;
        self
    }
}

/// Which properties a select path carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectProps {
    /// `*`: every property of the target.
    All,
    /// An explicit subset (possibly just the id).
    Some(Vec<String>),
}

impl SelectProps {
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, SelectProps::All)
    }
}

/// A parsed select path: steps from a top-level result plus the selected
/// property set at the end of the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectPathSpec {
    pub steps: Vec<SelectStep>,
    pub props: SelectProps,
}

impl SelectPathSpec {
    /// `*` with an empty path: all properties of every top-level node.
    #[must_use]
    pub fn select_all() -> Self {
        Self {
            steps: Vec::new(),
            props: SelectProps::All,
        }
    }

    /// A related-instance path with the given property selection.
    #[must_use]
    pub fn related(steps: Vec<SelectStep>, props: SelectProps) -> Self {
        Self { steps, props }
    }

    /// True if this specification selects all properties for a node whose
    /// arrival path is `actual`.
    pub fn covers_fully(
        &self,
        store: &ObjectStore,
        actual: &[(ClassId, RelDirection, ClassId)],
    ) -> bool {
        if !self.props.is_all() || self.steps.len() != actual.len() {
            return false;
        }
        self.steps
            .iter()
            .zip(actual)
            .all(|(step, &(rel, direction, target))| {
                step.direction == direction
                    && class_matches(store, rel, step.rel_class, step.rel_polymorphic)
                    && class_matches(store, target, step.target_class, step.target_polymorphic)
            })
    }
}

fn class_matches(store: &ObjectStore, actual: ClassId, spec: ClassId, polymorphic: bool) -> bool {
    if polymorphic {
        store.is_or_derives_from(actual, spec)
    } else {
        actual == spec
    }
}

/// The active select paths of one fetch.
#[derive(Debug, Clone, Default)]
pub struct SelectPaths {
    specs: Vec<SelectPathSpec>,
}

impl SelectPaths {
    #[must_use]
    pub fn new(specs: Vec<SelectPathSpec>) -> Self {
        Self { specs }
    }

    /// True if any active path selects the full property set for the
    /// given arrival path.
    pub fn covers_fully(
        &self,
        store: &ObjectStore,
        actual: &[(ClassId, RelDirection, ClassId)],
    ) -> bool {
        self.specs
            .iter()
            .any(|spec| spec.covers_fully(store, actual))
    }
}
