//! Parts-sourcing boundary.

use std::collections::BTreeMap;

use anyhow::Result;

/// What a lookup knows about a component.
#[derive(Debug, Clone, PartialEq)]
pub struct PartsQuery {
    pub ftype: String,
    pub name: String,
    pub value: Option<String>,
    pub footprint: Option<String>,
    pub manufacturer_part_number: Option<String>,
}

/// Supplier -> part numbers.
pub type SupplierPartNumbers = BTreeMap<String, Vec<String>>;

pub trait PartsProvider {
    /// `Ok(None)` when the provider has nothing for this component.
    fn lookup(&self, query: &PartsQuery) -> Result<Option<SupplierPartNumbers>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPartsProvider;

impl PartsProvider for NoopPartsProvider {
    fn lookup(&self, _query: &PartsQuery) -> Result<Option<SupplierPartNumbers>> {
        Ok(None)
    }
}
