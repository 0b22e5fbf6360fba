// catalog.rs — Block definition catalog
//
// Holds the fixed external facts about every node type: its ports with base
// types, its constraint templates, whether it reads previous-frame state, and
// (for conversion blocks) the `AdapterSpec` the adapter registry is built
// from. Definitions are loaded from JSON whose port types are written in the
// type notation (`float:phase01@?C`). The standard library ships embedded.
//
// Preconditions: none.
// Postconditions: every stored definition has unique port names, template
//   constraints that only name its own ports, and well-formed adapter ports.
// Failure modes: I/O, JSON and notation errors, duplicates, malformed adapters,
//   fixed templates producing an invalid (payload, unit) pair → `CatalogError`.
// Side effects: `load_file` reads from disk.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::sha256_hex;
use crate::types::{Axis, PayloadType, PortType, Temporality, TypeError, Unit};

const STD_BLOCKS_JSON: &str = include_str!("../catalog/std_blocks.json");

// ── Data types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDir {
    Input,
    Output,
}

/// A declared port with its base (possibly polymorphic) type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: PortType,
}

/// Type axis a template constraint talks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisKind {
    Payload,
    Unit,
    Cardinality,
}

/// Constraint template attached to a block definition.
///
/// Ports sharing a variable name are already equal on that axis; `Equal`
/// is for relating ports that use different variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintTemplate {
    Equal { axis: AxisKind, ports: Vec<String> },
    ZipBroadcast { ports: Vec<String> },
    /// Pins the concrete axes of `type` onto `port`; variable axes of `type`
    /// leave the declared axis alone.
    Fixed {
        port: String,
        #[serde(rename = "type")]
        ty: PortType,
    },
}

/// The pure conversion an adapter block performs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdapterKernel {
    Scale { factor: f64 },
    Affine { scale: f64, offset: f64 },
    /// Reinterpretation with no arithmetic (e.g. int count → float).
    Cast,
}

impl AdapterKernel {
    /// Apply the conversion to one scalar lane.
    pub fn eval(&self, x: f64) -> f64 {
        match *self {
            AdapterKernel::Scale { factor } => x * factor,
            AdapterKernel::Affine { scale, offset } => x * scale + offset,
            AdapterKernel::Cast => x,
        }
    }
}

/// Marks a block definition as adapter-eligible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSpec {
    #[serde(default = "default_adapter_cost")]
    pub cost: u32,
    pub kernel: AdapterKernel,
}

fn default_adapter_cost() -> u32 {
    1
}

/// Metadata for one node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDef {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<PortDef>,
    #[serde(default)]
    pub outputs: Vec<PortDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ConstraintTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<AdapterSpec>,
    /// Reads state from the previous frame (unit delay); cuts instantaneous
    /// dependency through this block.
    #[serde(default, skip_serializing_if = "is_false")]
    pub reads_previous_frame: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl BlockDef {
    /// Look up a port by name in either direction.
    pub fn port(&self, name: &str) -> Option<(PortDir, &PortDef)> {
        self.inputs
            .iter()
            .find(|p| p.name == name)
            .map(|p| (PortDir::Input, p))
            .or_else(|| {
                self.outputs
                    .iter()
                    .find(|p| p.name == name)
                    .map(|p| (PortDir::Output, p))
            })
    }

    /// All ports, inputs first, in declaration order.
    pub fn ports(&self) -> impl Iterator<Item = (PortDir, &PortDef)> {
        self.inputs
            .iter()
            .map(|p| (PortDir::Input, p))
            .chain(self.outputs.iter().map(|p| (PortDir::Output, p)))
    }

    /// Ports listed in zip-broadcast templates.
    pub fn zip_members(&self) -> BTreeSet<&str> {
        self.constraints
            .iter()
            .filter_map(|c| match c {
                ConstraintTemplate::ZipBroadcast { ports } => Some(ports),
                ConstraintTemplate::Equal { .. } | ConstraintTemplate::Fixed { .. } => None,
            })
            .flatten()
            .map(|p| p.as_str())
            .collect()
    }

    /// Declared type of `port` with every `Fixed` template applied.
    pub fn base_type(&self, port: &PortDef) -> PortType {
        let mut ty = port.ty.clone();
        for template in &self.constraints {
            if let ConstraintTemplate::Fixed { port: name, ty: pin } = template {
                if *name == port.name {
                    pin_axes(&mut ty, pin);
                }
            }
        }
        ty
    }

    /// Whether a `Fixed` template gives `port` a concrete cardinality.
    pub fn pins_cardinality(&self, port: &str) -> bool {
        self.constraints.iter().any(|template| {
            matches!(
                template,
                ConstraintTemplate::Fixed { port: name, ty: pin }
                    if name == port && !pin.cardinality.is_var()
            )
        })
    }
}

/// Notation cannot express an unset temporality, so only a `!discrete` pin
/// changes it; a pin without one keeps the declared temporality.
fn pin_axes(ty: &mut PortType, pin: &PortType) {
    if !pin.payload.is_var() {
        ty.payload = pin.payload.clone();
    }
    if !pin.unit.is_var() {
        ty.unit = pin.unit.clone();
    }
    if !pin.cardinality.is_var() {
        ty.cardinality = pin.cardinality.clone();
    }
    if pin.temporality != Temporality::default() {
        ty.temporality = pin.temporality;
    }
}

/// Payload/unit/temporality pattern of one adapter side. `None` matches any.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypePattern {
    pub payload: Option<PayloadType>,
    pub unit: Option<Unit>,
    pub temporality: Temporality,
}

impl TypePattern {
    fn from_port(ty: &PortType) -> Self {
        TypePattern {
            payload: ty.payload.as_inst().copied(),
            unit: ty.unit.as_inst().copied(),
            temporality: ty.temporality,
        }
    }
}

/// Errors that can occur while building a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{origin}: malformed catalog JSON: {source}")]
    Json {
        origin: String,
        source: serde_json::Error,
    },
    #[error("duplicate block '{name}'")]
    DuplicateBlock { name: String },
    #[error("block '{block}': duplicate port '{port}'")]
    DuplicatePort { block: String, port: String },
    #[error("block '{block}': constraint names unknown port '{port}'")]
    UnknownTemplatePort { block: String, port: String },
    #[error("block '{block}': invalid adapter: {message}")]
    InvalidAdapter { block: String, message: String },
    #[error("block '{block}': fixed type for port '{port}' is invalid: {source}")]
    InvalidFixed {
        block: String,
        port: String,
        source: TypeError,
    },
}

/// On-disk catalog file layout.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    blocks: Vec<BlockDef>,
}

// ── Catalog ─────────────────────────────────────────────────────────────────

/// Immutable-after-construction table of block definitions, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct BlockCatalog {
    blocks: BTreeMap<String, BlockDef>,
}

impl BlockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The embedded standard block library.
    pub fn standard() -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        catalog.load_json_str(STD_BLOCKS_JSON, "<std>")?;
        Ok(catalog)
    }

    /// Validate and add one definition.
    pub fn insert(&mut self, def: BlockDef) -> Result<(), CatalogError> {
        if self.blocks.contains_key(&def.name) {
            return Err(CatalogError::DuplicateBlock { name: def.name });
        }
        validate_block(&def)?;
        self.blocks.insert(def.name.clone(), def);
        Ok(())
    }

    /// Load definitions from JSON text. Returns the number of blocks added.
    pub fn load_json_str(&mut self, text: &str, origin: &str) -> Result<usize, CatalogError> {
        let file: CatalogFile =
            serde_json::from_str(text).map_err(|source| CatalogError::Json {
                origin: origin.to_string(),
                source,
            })?;
        let count = file.blocks.len();
        for def in file.blocks {
            self.insert(def)?;
        }
        Ok(count)
    }

    /// Load definitions from a JSON file. Returns the number of blocks added.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_json_str(&text, &path.display().to_string())
    }

    pub fn lookup(&self, name: &str) -> Option<&BlockDef> {
        self.blocks.get(name)
    }

    /// Definitions in name order.
    pub fn blocks(&self) -> impl Iterator<Item = &BlockDef> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Compact JSON with blocks in name order; stable across runs and load order.
    pub fn canonical_json(&self) -> String {
        let file = CatalogFile {
            blocks: self.blocks.values().cloned().collect(),
        };
        serde_json::to_string(&file).unwrap_or_default()
    }

    /// Pretty JSON for `--emit catalog`.
    pub fn pretty_json(&self) -> String {
        let file = CatalogFile {
            blocks: self.blocks.values().cloned().collect(),
        };
        serde_json::to_string_pretty(&file).unwrap_or_default()
    }

    /// SHA-256 of `canonical_json()`.
    pub fn fingerprint(&self) -> String {
        sha256_hex(self.canonical_json().as_bytes())
    }
}

/// Input/output patterns of an adapter block, derived from its port types.
pub fn adapter_patterns(def: &BlockDef) -> Option<(TypePattern, TypePattern)> {
    def.adapter.as_ref()?;
    let input = def.inputs.first()?;
    let output = def.outputs.first()?;
    Some((
        TypePattern::from_port(&input.ty),
        TypePattern::from_port(&output.ty),
    ))
}

// ── Validation ──────────────────────────────────────────────────────────────

fn validate_block(def: &BlockDef) -> Result<(), CatalogError> {
    let mut seen = BTreeSet::new();
    for (_, port) in def.ports() {
        if !seen.insert(port.name.as_str()) {
            return Err(CatalogError::DuplicatePort {
                block: def.name.clone(),
                port: port.name.clone(),
            });
        }
    }

    for constraint in &def.constraints {
        let ports = match constraint {
            ConstraintTemplate::Equal { ports, .. } => ports.as_slice(),
            ConstraintTemplate::ZipBroadcast { ports } => ports.as_slice(),
            ConstraintTemplate::Fixed { port, .. } => std::slice::from_ref(port),
        };
        for port in ports {
            if !seen.contains(port.as_str()) {
                return Err(CatalogError::UnknownTemplatePort {
                    block: def.name.clone(),
                    port: port.clone(),
                });
            }
        }
    }

    for (_, port) in def.ports() {
        let ty = def.base_type(port);
        PortType::new(ty.payload, ty.unit, ty.cardinality, ty.temporality).map_err(|source| {
            CatalogError::InvalidFixed {
                block: def.name.clone(),
                port: port.name.clone(),
                source,
            }
        })?;
    }

    if def.adapter.is_some() {
        validate_adapter(def)?;
    }
    Ok(())
}

/// Adapters are one-in/one-out and must preserve cardinality, which the
/// definition guarantees by sharing one cardinality variable across both ports.
fn validate_adapter(def: &BlockDef) -> Result<(), CatalogError> {
    let invalid = |message: &str| CatalogError::InvalidAdapter {
        block: def.name.clone(),
        message: message.to_string(),
    };

    if def.inputs.len() != 1 || def.outputs.len() != 1 {
        return Err(invalid("adapters need exactly one input and one output"));
    }
    if !def.constraints.is_empty() || def.reads_previous_frame {
        return Err(invalid("adapters cannot carry constraints or state"));
    }
    let (input, output) = (&def.inputs[0].ty, &def.outputs[0].ty);
    match (&input.cardinality, &output.cardinality) {
        (Axis::Var(a), Axis::Var(b)) if a == b => {}
        _ => {
            return Err(invalid(
                "input and output must share one cardinality variable",
            ))
        }
    }
    if input.temporality != output.temporality {
        return Err(invalid("adapters cannot change temporality"));
    }
    // A variable payload must flow through unchanged.
    if input.payload.is_var() != output.payload.is_var() {
        return Err(invalid("payload must be fixed on both sides or shared"));
    }
    if let (Axis::Var(a), Axis::Var(b)) = (&input.payload, &output.payload) {
        if a != b {
            return Err(invalid("payload variable must be shared"));
        }
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────
