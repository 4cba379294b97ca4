//! Diagnostic records and store errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ElementKind, Point, Record};

#[derive(Debug, Error)]
pub enum CircuitDbError {
    #[error("duplicate element id `{0}`")]
    DuplicateId(String),

    #[error("failed to (de)serialize element: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Kind of failure a diagnostic reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    SourceTraceNotConnectedError,
    SourceTraceMalformedError,
    PcbTraceMissingPortError,
    PcbAutoroutingError,
    PcbTraceError,
    PcbTraceOutsideBoardError,
    PcbTraceWarning,
    PcbPortNotMatchedError,
    PcbPortNotConnectedError,
    PcbComponentOutsideBoardError,
    PcbViaClearanceError,
    PcbFootprintOverlapError,
    PcbMissingFootprintError,
    PartsLookupWarning,
    UnknownError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::SourceTraceNotConnectedError => "source_trace_not_connected_error",
            ErrorType::SourceTraceMalformedError => "source_trace_malformed_error",
            ErrorType::PcbTraceMissingPortError => "pcb_trace_missing_port_error",
            ErrorType::PcbAutoroutingError => "pcb_autorouting_error",
            ErrorType::PcbTraceError => "pcb_trace_error",
            ErrorType::PcbTraceOutsideBoardError => "pcb_trace_outside_board_error",
            ErrorType::PcbTraceWarning => "pcb_trace_warning",
            ErrorType::PcbPortNotMatchedError => "pcb_port_not_matched_error",
            ErrorType::PcbPortNotConnectedError => "pcb_port_not_connected_error",
            ErrorType::PcbComponentOutsideBoardError => "pcb_component_outside_board_error",
            ErrorType::PcbViaClearanceError => "pcb_via_clearance_error",
            ErrorType::PcbFootprintOverlapError => "pcb_footprint_overlap_error",
            ErrorType::PcbMissingFootprintError => "pcb_missing_footprint_error",
            ErrorType::PartsLookupWarning => "parts_lookup_warning",
            ErrorType::UnknownError => "unknown_error",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorType::PcbTraceWarning | ErrorType::PartsLookupWarning => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A diagnostic stored alongside the rendered records.
///
/// The optional id lists let tooling correlate the diagnostic back to the
/// offending records without re-running the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitError {
    pub error_id: String,
    pub error_type: ErrorType,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_component_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_port_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pcb_trace_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pcb_port_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pcb_component_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pcb_via_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pcb_smtpad_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl CircuitError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_id: String::new(),
            error_type,
            severity: error_type.default_severity(),
            message: message.into(),
            source_trace_id: None,
            source_component_id: None,
            source_port_ids: Vec::new(),
            pcb_trace_ids: Vec::new(),
            pcb_port_ids: Vec::new(),
            pcb_component_ids: Vec::new(),
            pcb_via_ids: Vec::new(),
            pcb_smtpad_ids: Vec::new(),
            center: None,
            subcircuit_id: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_source_trace(mut self, id: impl Into<String>) -> Self {
        self.source_trace_id = Some(id.into());
        self
    }

    pub fn with_source_component(mut self, id: impl Into<String>) -> Self {
        self.source_component_id = Some(id.into());
        self
    }

    pub fn with_source_ports(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.source_port_ids.extend(ids);
        self
    }

    pub fn with_pcb_traces(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.pcb_trace_ids.extend(ids);
        self
    }

    pub fn with_pcb_ports(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.pcb_port_ids.extend(ids);
        self
    }

    pub fn with_pcb_components(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.pcb_component_ids.extend(ids);
        self
    }

    pub fn with_pcb_vias(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.pcb_via_ids.extend(ids);
        self
    }

    pub fn with_pcb_smtpads(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.pcb_smtpad_ids.extend(ids);
        self
    }

    pub fn with_center(mut self, center: Point) -> Self {
        self.center = Some(center);
        self
    }

    pub fn with_subcircuit(mut self, id: Option<String>) -> Self {
        self.subcircuit_id = id;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for CircuitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl Record for CircuitError {
    const KIND: ElementKind = ElementKind::Error;

    fn id(&self) -> &str {
        &self.error_id
    }

    fn set_id(&mut self, id: String) {
        self.error_id = id;
    }

    fn id_prefix(&self) -> String {
        self.error_type.as_str().to_string()
    }

    fn translate_pcb(&mut self, delta: Point) {
        if let Some(center) = &mut self.center {
            *center = *center + delta;
        }
    }
}
