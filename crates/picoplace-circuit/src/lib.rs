//! Typed element store for rendered circuit documents.
//!
//! A rendered circuit is a flat list of *records*: electrical `source_*`
//! records, physical `pcb_*` records, diagram `schematic_*` records and
//! diagnostic `error` records. Every record is addressed by a generated id of
//! the form `<kind>_<n>` and references the records it depends on by id.
//!
//! [`CircuitDb`] keeps one [`Table`] per record kind and is the only place the
//! render pipeline reads from and writes to. The serialised form is a JSON array
//! of objects tagged with `type`, see [`CircuitElement`].

pub mod error;
pub mod geometry;
pub mod pcb;
pub mod schematic;
pub mod source;

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::{CircuitDbError, CircuitError, ErrorType, Severity};
pub use geometry::{point_in_polygon, Bounds, LayerRef, Point, Size};
pub use pcb::*;
pub use schematic::*;
pub use source::*;

/// A row of a [`Table`].
pub trait Record: Clone + std::fmt::Debug + Serialize + DeserializeOwned {
    const KIND: ElementKind;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Prefix used when generating ids for new rows.
    fn id_prefix(&self) -> String {
        Self::KIND.as_str().to_string()
    }

    /// Move physical geometry by `delta`.
    fn translate_pcb(&mut self, _delta: Point) {}

    /// Move diagram geometry by `delta`.
    fn translate_schematic(&mut self, _delta: Point) {}
}

/// Implements [`Record`] for a struct whose primary key lives in `$id_field`.
#[macro_export]
macro_rules! impl_record {
    ($ty:ty, $kind:expr, $id_field:ident) => {
        impl $crate::Record for $ty {
            const KIND: $crate::ElementKind = $kind;

            fn id(&self) -> &str {
                &self.$id_field
            }

            fn set_id(&mut self, id: String) {
                self.$id_field = id;
            }
        }
    };
}

/// Rows of a single record kind, in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table<T> {
    rows: Vec<T>,
    next_index: usize,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            next_index: 0,
        }
    }
}

impl<T: Record> Table<T> {
    /// Insert a row, assigning it a fresh id. Returns the id.
    pub fn insert(&mut self, mut row: T) -> String {
        let id = self.reserve_id(&row.id_prefix());
        row.set_id(id.clone());
        self.rows.push(row);
        id
    }

    /// Allocate an id without inserting anything.
    pub fn reserve_id(&mut self, prefix: &str) -> String {
        let id = format!("{}_{}", prefix, self.next_index);
        self.next_index += 1;
        id
    }

    /// Insert a row that already carries an id.
    pub fn push_with_id(&mut self, row: T) -> Result<(), CircuitDbError> {
        if self.get(row.id()).is_some() {
            return Err(CircuitDbError::DuplicateId(row.id().to_string()));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.rows.iter().find(|r| r.id() == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.rows.iter_mut().find(|r| r.id() == id)
    }

    /// Apply `f` to the row with `id`. Returns false if it does not exist.
    pub fn update(&mut self, id: &str, f: impl FnOnce(&mut T)) -> bool {
        match self.get_mut(id) {
            Some(row) => {
                f(row);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<T> {
        let pos = self.rows.iter().position(|r| r.id() == id)?;
        Some(self.rows.remove(pos))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.rows.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.rows.iter_mut()
    }

    pub fn list(&self) -> &[T] {
        &self.rows
    }

    pub fn filter<'a>(&'a self, pred: impl Fn(&T) -> bool + 'a) -> impl Iterator<Item = &'a T> + 'a {
        self.rows.iter().filter(move |r| pred(r))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Address of a record inside a [`CircuitDb`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementKey {
    pub kind: ElementKind,
    pub id: String,
}

impl ElementKey {
    pub fn new(kind: ElementKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ElementKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

macro_rules! circuit_records {
    ($( $variant:ident => $field:ident : $ty:ty = $tag:literal ),* $(,)?) => {
        /// Every record kind the store knows about.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum ElementKind {
            $( $variant, )*
        }

        impl ElementKind {
            pub const ALL: &'static [ElementKind] = &[ $( ElementKind::$variant, )* ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( ElementKind::$variant => $tag, )*
                }
            }
        }

        /// A single record of any kind, tagged by `type` when serialised.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "type")]
        pub enum CircuitElement {
            $(
                #[serde(rename = $tag)]
                $variant($ty),
            )*
        }

        impl CircuitElement {
            pub fn kind(&self) -> ElementKind {
                match self {
                    $( CircuitElement::$variant(_) => ElementKind::$variant, )*
                }
            }

            pub fn id(&self) -> &str {
                match self {
                    $( CircuitElement::$variant(r) => r.id(), )*
                }
            }

            pub fn key(&self) -> ElementKey {
                ElementKey::new(self.kind(), self.id())
            }

            fn id_prefix(&self) -> String {
                match self {
                    $( CircuitElement::$variant(r) => r.id_prefix(), )*
                }
            }

            pub fn translate_pcb(&mut self, delta: Point) {
                match self {
                    $( CircuitElement::$variant(r) => r.translate_pcb(delta), )*
                }
            }

            pub fn translate_schematic(&mut self, delta: Point) {
                match self {
                    $( CircuitElement::$variant(r) => r.translate_schematic(delta), )*
                }
            }
        }

        /// The element store for one render run.
        #[derive(Debug, Clone, Default)]
        pub struct CircuitDb {
            $( pub $field: Table<$ty>, )*
        }

        impl CircuitDb {
            /// All records, grouped by kind in a fixed order.
            pub fn to_elements(&self) -> Vec<CircuitElement> {
                let mut out = Vec::new();
                $( out.extend(self.$field.iter().cloned().map(CircuitElement::$variant)); )*
                out
            }

            pub fn len(&self) -> usize {
                0 $( + self.$field.len() )*
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            pub fn get(&self, key: &ElementKey) -> Option<CircuitElement> {
                match key.kind {
                    $( ElementKind::$variant => self.$field.get(&key.id).cloned().map(CircuitElement::$variant), )*
                }
            }

            /// Insert an element, assigning a fresh id.
            pub fn insert(&mut self, element: CircuitElement) -> ElementKey {
                match element {
                    $( CircuitElement::$variant(r) => ElementKey::new(ElementKind::$variant, self.$field.insert(r)), )*
                }
            }

            pub fn remove(&mut self, key: &ElementKey) -> bool {
                match key.kind {
                    $( ElementKind::$variant => self.$field.remove(&key.id).is_some(), )*
                }
            }

            /// Translate the record at `key` in both domains.
            pub fn translate(&mut self, key: &ElementKey, pcb: Point, schematic: Point) -> bool {
                match key.kind {
                    $(
                        ElementKind::$variant => self.$field.update(&key.id, |r| {
                            r.translate_pcb(pcb);
                            r.translate_schematic(schematic);
                        }),
                    )*
                }
            }

            fn reserve_id(&mut self, kind: ElementKind, prefix: &str) -> String {
                match kind {
                    $( ElementKind::$variant => self.$field.reserve_id(prefix), )*
                }
            }

            fn push_element(&mut self, element: CircuitElement) -> Result<ElementKey, CircuitDbError> {
                let key = element.key();
                match element {
                    $( CircuitElement::$variant(r) => self.$field.push_with_id(r)?, )*
                }
                Ok(key)
            }
        }
    };
}

circuit_records! {
    SourceComponent => source_component: SourceComponent = "source_component",
    SourcePort => source_port: SourcePort = "source_port",
    SourceNet => source_net: SourceNet = "source_net",
    SourceTrace => source_trace: SourceTrace = "source_trace",
    SourceGroup => source_group: SourceGroup = "source_group",
    PcbBoard => pcb_board: PcbBoard = "pcb_board",
    PcbGroup => pcb_group: PcbGroup = "pcb_group",
    PcbComponent => pcb_component: PcbComponent = "pcb_component",
    PcbSmtpad => pcb_smtpad: PcbSmtPad = "pcb_smtpad",
    PcbPlatedHole => pcb_plated_hole: PcbPlatedHole = "pcb_plated_hole",
    PcbHole => pcb_hole: PcbHole = "pcb_hole",
    PcbPort => pcb_port: PcbPort = "pcb_port",
    PcbTrace => pcb_trace: PcbTrace = "pcb_trace",
    PcbVia => pcb_via: PcbVia = "pcb_via",
    PcbCopperPour => pcb_copper_pour: PcbCopperPour = "pcb_copper_pour",
    SchematicComponent => schematic_component: SchematicComponent = "schematic_component",
    SchematicPort => schematic_port: SchematicPort = "schematic_port",
    SchematicTrace => schematic_trace: SchematicTrace = "schematic_trace",
    SchematicNetLabel => schematic_net_label: SchematicNetLabel = "schematic_net_label",
    Error => error: CircuitError = "error",
}

impl CircuitDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from previously serialised elements, keeping their ids.
    pub fn from_elements(
        elements: impl IntoIterator<Item = CircuitElement>,
    ) -> Result<Self, CircuitDbError> {
        let mut db = CircuitDb::new();
        for element in elements {
            db.push_element(element)?;
        }
        Ok(db)
    }

    pub fn to_json(&self) -> Result<Value, CircuitDbError> {
        Ok(serde_json::to_value(self.to_elements())?)
    }

    /// Insert `elements` under freshly generated ids.
    ///
    /// Every `*_id` / `*_ids` field that points at another spliced element is
    /// rewritten to the new id, and `*_key` fields prefixed by a spliced id get
    /// the new prefix. References to ids outside the spliced set are kept.
    pub fn splice(&mut self, elements: &[CircuitElement]) -> Result<Vec<ElementKey>, CircuitDbError> {
        let mut ids: HashMap<String, String> = HashMap::new();
        for element in elements {
            let new_id = self.reserve_id(element.kind(), &element.id_prefix());
            ids.insert(element.id().to_string(), new_id);
        }

        // Longest first so prefix rewrites pick the most specific id.
        let mut prefixes: Vec<(&String, &String)> = ids.iter().collect();
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));

        let mut keys = Vec::with_capacity(elements.len());
        for element in elements {
            let mut value = serde_json::to_value(element)?;
            remap_ids(&mut value, &ids, &prefixes);
            let remapped: CircuitElement = serde_json::from_value(value)?;
            keys.push(self.push_element(remapped)?);
        }
        Ok(keys)
    }

    /// All error-severity diagnostics.
    pub fn errors(&self) -> impl Iterator<Item = &CircuitError> {
        self.error.iter().filter(|e| e.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CircuitError> {
        self.error.iter().filter(|e| e.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn errors_of_type(&self, error_type: ErrorType) -> impl Iterator<Item = &CircuitError> {
        self.error.iter().filter(move |e| e.error_type == error_type)
    }

    pub fn source_ports_of(&self, source_component_id: &str) -> impl Iterator<Item = &SourcePort> {
        let id = source_component_id.to_string();
        self.source_port
            .iter()
            .filter(move |p| p.source_component_id.as_deref() == Some(id.as_str()))
    }

    pub fn pcb_port_for_source_port(&self, source_port_id: &str) -> Option<&PcbPort> {
        self.pcb_port.iter().find(|p| p.source_port_id == source_port_id)
    }

    pub fn schematic_port_for_source_port(&self, source_port_id: &str) -> Option<&SchematicPort> {
        self.schematic_port
            .iter()
            .find(|p| p.source_port_id == source_port_id)
    }

    pub fn pcb_trace_for_source_trace(&self, source_trace_id: &str) -> Option<&PcbTrace> {
        self.pcb_trace
            .iter()
            .find(|t| t.source_trace_id.as_deref() == Some(source_trace_id))
    }

    pub fn source_net_by_name(&self, name: &str, subcircuit_id: Option<&str>) -> Option<&SourceNet> {
        self.source_net
            .iter()
            .find(|n| n.name == name && n.subcircuit_id.as_deref() == subcircuit_id)
    }
}

fn remap_ids(value: &mut Value, ids: &HashMap<String, String>, prefixes: &[(&String, &String)]) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if key.ends_with("_id") {
                    if let Value::String(s) = field {
                        if let Some(new_id) = ids.get(s.as_str()) {
                            *s = new_id.clone();
                        }
                    } else {
                        remap_ids(field, ids, prefixes);
                    }
                } else if key.ends_with("_ids") {
                    if let Value::Array(items) = field {
                        for item in items {
                            if let Value::String(s) = item {
                                if let Some(new_id) = ids.get(s.as_str()) {
                                    *s = new_id.clone();
                                }
                            }
                        }
                    }
                } else if key.ends_with("_key") {
                    if let Value::String(s) = field {
                        if let Some((old, new)) = prefixes
                            .iter()
                            .find(|(old, _)| s.starts_with(&format!("{old}_")))
                        {
                            *s = format!("{}{}", new, &s[old.len()..]);
                        }
                    }
                } else {
                    remap_ids(field, ids, prefixes);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                remap_ids(item, ids, prefixes);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resistor(name: &str) -> SourceComponent {
        SourceComponent::new("simple_resistor", name)
    }

    #[test]
    fn insert_assigns_sequential_ids() {
        let mut db = CircuitDb::new();
        let a = db.source_component.insert(resistor("R1"));
        let b = db.source_component.insert(resistor("R2"));
        assert_eq!(a, "source_component_0");
        assert_eq!(b, "source_component_1");
        assert_eq!(db.source_component.get(&b).map(|c| c.name.as_str()), Some("R2"));
    }

    #[test]
    fn removed_ids_are_not_reused() {
        let mut db = CircuitDb::new();
        let a = db.source_component.insert(resistor("R1"));
        assert!(db.remove(&ElementKey::new(ElementKind::SourceComponent, &a)));
        let b = db.source_component.insert(resistor("R1"));
        assert_ne!(a, b);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn error_ids_use_error_type_prefix() {
        let mut db = CircuitDb::new();
        let id = db.error.insert(CircuitError::new(
            ErrorType::PcbTraceError,
            "overlap",
        ));
        assert_eq!(id, "pcb_trace_error_0");
        assert!(db.has_errors());
    }

    #[test]
    fn elements_serialize_with_type_tag() {
        let mut db = CircuitDb::new();
        let mut r1 = resistor("R1");
        r1.value = Some("1k".into());
        db.source_component.insert(r1);
        insta::assert_json_snapshot!(db.to_json().unwrap(), @r#"
        [
          {
            "ftype": "simple_resistor",
            "name": "R1",
            "source_component_id": "source_component_0",
            "type": "source_component",
            "value": "1k"
          }
        ]
        "#);
    }

    #[test]
    fn splice_remaps_internal_references_and_keys() {
        let mut inner = CircuitDb::new();
        let group = inner.source_group.insert(SourceGroup::new("sub", true));
        let comp_id = inner.source_component.insert(resistor("R1"));
        let mut port = SourcePort::new("pin1", Some(1));
        port.source_component_id = Some(comp_id.clone());
        port.subcircuit_id = Some(group.clone());
        port.subcircuit_connectivity_map_key = Some(format!("{group}_connectivity_net0"));
        inner.source_port.insert(port);

        let mut outer = CircuitDb::new();
        outer.source_group.insert(SourceGroup::new("main", true));
        outer.source_component.insert(resistor("R9"));

        let keys = outer.splice(&inner.to_elements()).unwrap();
        assert_eq!(keys.len(), 3);

        let spliced_port = outer.source_port.iter().next().unwrap();
        assert_eq!(spliced_port.source_component_id.as_deref(), Some("source_component_1"));
        assert_eq!(spliced_port.subcircuit_id.as_deref(), Some("source_group_1"));
        assert_eq!(
            spliced_port.subcircuit_connectivity_map_key.as_deref(),
            Some("source_group_1_connectivity_net0")
        );
    }

    #[test]
    fn translate_moves_physical_records_only() {
        let mut db = CircuitDb::new();
        let id = db.pcb_port.insert(PcbPort::new("source_port_0", Point::new(1.0, 2.0), vec![LayerRef::Top]));
        let key = ElementKey::new(ElementKind::PcbPort, id.clone());
        db.translate(&key, Point::new(10.0, 0.0), Point::new(99.0, 99.0));
        let port = db.pcb_port.get(&id).unwrap();
        assert_eq!((port.x, port.y), (11.0, 2.0));
    }
}
