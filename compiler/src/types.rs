// types.rs — Canonical type system
//
// Closed vocabulary of payload kinds, units and extent axes, plus the
// (payload, unit) validity table. `CanonicalType` is the fully concrete type
// handed to the backend; `PortType` is the inference-time type whose payload,
// unit and cardinality axes may still be variables.
//
// Preconditions: none (types only).
// Postconditions: every constructed CanonicalType, and every PortType whose
//   payload and unit are both concrete, satisfies the validity table.
// Failure modes: invalid (payload, unit) pairs → `TypeError::InvalidPayloadUnitPair`,
//   raised at construction time.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::{parse_port_type, NotationError};

// ── Payload ─────────────────────────────────────────────────────────────────

/// Structural kind of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    Float,
    Int,
    Vec2,
    Vec3,
    Color,
    Bool,
    Shape,
}

impl PayloadType {
    pub const ALL: [PayloadType; 7] = [
        PayloadType::Float,
        PayloadType::Int,
        PayloadType::Vec2,
        PayloadType::Vec3,
        PayloadType::Color,
        PayloadType::Bool,
        PayloadType::Shape,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PayloadType::Float => "float",
            PayloadType::Int => "int",
            PayloadType::Vec2 => "vec2",
            PayloadType::Vec3 => "vec3",
            PayloadType::Color => "color",
            PayloadType::Bool => "bool",
            PayloadType::Shape => "shape",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    /// Units that may legally tag a value of this payload.
    pub fn allowed_units(self) -> &'static [Unit] {
        match self {
            PayloadType::Float => &[
                Unit::Scalar,
                Unit::Norm01,
                Unit::Phase01,
                Unit::Radians,
                Unit::Degrees,
                Unit::Ms,
                Unit::Seconds,
            ],
            PayloadType::Int => &[Unit::Count, Unit::Ms],
            PayloadType::Vec2 => &[Unit::Ndc2, Unit::World2, Unit::Scalar],
            PayloadType::Vec3 => &[Unit::Ndc3, Unit::World3, Unit::Scalar],
            PayloadType::Color => &[Unit::Rgba01],
            PayloadType::Bool | PayloadType::Shape => &[Unit::None],
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Unit ────────────────────────────────────────────────────────────────────

/// Semantic tag distinguishing otherwise-identical payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// Dimensionless scalar.
    Scalar,
    /// Normalized to [0, 1].
    Norm01,
    /// Cyclic phase in [0, 1).
    Phase01,
    Radians,
    Degrees,
    Ms,
    Seconds,
    /// Integer count.
    Count,
    /// Normalized device coordinates, 2D.
    Ndc2,
    World2,
    Ndc3,
    World3,
    /// Color channels in [0, 1].
    Rgba01,
    None,
}

impl Unit {
    pub const ALL: [Unit; 14] = [
        Unit::Scalar,
        Unit::Norm01,
        Unit::Phase01,
        Unit::Radians,
        Unit::Degrees,
        Unit::Ms,
        Unit::Seconds,
        Unit::Count,
        Unit::Ndc2,
        Unit::World2,
        Unit::Ndc3,
        Unit::World3,
        Unit::Rgba01,
        Unit::None,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Unit::Scalar => "scalar",
            Unit::Norm01 => "norm01",
            Unit::Phase01 => "phase01",
            Unit::Radians => "radians",
            Unit::Degrees => "degrees",
            Unit::Ms => "ms",
            Unit::Seconds => "seconds",
            Unit::Count => "count",
            Unit::Ndc2 => "ndc2",
            Unit::World2 => "world2",
            Unit::Ndc3 => "ndc3",
            Unit::World3 => "world3",
            Unit::Rgba01 => "rgba01",
            Unit::None => "none",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|u| u.name() == name)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check a (payload, unit) pair against the validity table.
pub fn is_valid_pair(payload: PayloadType, unit: Unit) -> bool {
    payload.allowed_units().contains(&unit)
}

fn allowed_units_text(payload: &PayloadType) -> String {
    payload
        .allowed_units()
        .iter()
        .map(|u| u.name())
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Extent axes ─────────────────────────────────────────────────────────────

/// Named instance domain a many-valued port is tied to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceRef(pub String);

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How many values a port carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cardinality {
    /// Compile-time constant; no per-frame value.
    Zero,
    One,
    Many(InstanceRef),
}

impl Cardinality {
    pub fn many(instance: impl Into<String>) -> Self {
        Cardinality::Many(InstanceRef(instance.into()))
    }

    pub fn instance(&self) -> Option<&InstanceRef> {
        match self {
            Cardinality::Many(inst) => Some(inst),
            Cardinality::Zero | Cardinality::One => None,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::Zero => f.write_str("zero"),
            Cardinality::One => f.write_str("one"),
            Cardinality::Many(inst) => write!(f, "many({})", inst),
        }
    }
}

impl Serialize for Cardinality {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temporality {
    #[default]
    Continuous,
    Discrete,
}

impl Temporality {
    pub fn name(self) -> &'static str {
        match self {
            Temporality::Continuous => "continuous",
            Temporality::Discrete => "discrete",
        }
    }
}

// The remaining axes have a single inhabitant in the current scope.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Binding {
    #[default]
    Unbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Perspective {
    #[default]
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Branch {
    #[default]
    Main,
}

/// Bundle of independent extent axes of a concrete type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Extent {
    pub cardinality: Cardinality,
    pub temporality: Temporality,
    pub binding: Binding,
    pub perspective: Perspective,
    pub branch: Branch,
}

impl Extent {
    pub fn new(cardinality: Cardinality, temporality: Temporality) -> Self {
        Extent {
            cardinality,
            temporality,
            binding: Binding::default(),
            perspective: Perspective::default(),
            branch: Branch::default(),
        }
    }
}

// ── Axis variables ──────────────────────────────────────────────────────────

/// One axis of a port type: an instantiated value or a named variable.
///
/// Variable names are scoped to the block instance that declares them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis<T> {
    Inst(T),
    Var(String),
}

impl<T> Axis<T> {
    pub fn var(name: impl Into<String>) -> Self {
        Axis::Var(name.into())
    }

    pub fn as_inst(&self) -> Option<&T> {
        match self {
            Axis::Inst(v) => Some(v),
            Axis::Var(_) => None,
        }
    }

    pub fn var_name(&self) -> Option<&str> {
        match self {
            Axis::Inst(_) => None,
            Axis::Var(name) => Some(name),
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Axis::Var(_))
    }
}

impl<T: fmt::Display> fmt::Display for Axis<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Inst(v) => write!(f, "{}", v),
            Axis::Var(name) => write!(f, "?{}", name),
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("unit '{unit}' is not valid for payload '{payload}' (allowed: {})", allowed_units_text(.payload))]
    InvalidPayloadUnitPair { payload: PayloadType, unit: Unit },
    #[error("type '{0}' has unresolved axis variables")]
    NotConcrete(String),
}

// ── CanonicalType ───────────────────────────────────────────────────────────

/// Fully concrete type of a single port value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalType {
    payload: PayloadType,
    unit: Unit,
    extent: Extent,
}

impl CanonicalType {
    pub fn new(payload: PayloadType, unit: Unit, extent: Extent) -> Result<Self, TypeError> {
        if !is_valid_pair(payload, unit) {
            return Err(TypeError::InvalidPayloadUnitPair { payload, unit });
        }
        Ok(CanonicalType {
            payload,
            unit,
            extent,
        })
    }

    /// A single-valued continuous type.
    pub fn signal(payload: PayloadType, unit: Unit) -> Result<Self, TypeError> {
        Self::new(payload, unit, Extent::new(Cardinality::One, Temporality::Continuous))
    }

    /// A many-valued continuous type tied to `instance`.
    pub fn field(
        payload: PayloadType,
        unit: Unit,
        instance: impl Into<String>,
    ) -> Result<Self, TypeError> {
        Self::new(
            payload,
            unit,
            Extent::new(Cardinality::many(instance), Temporality::Continuous),
        )
    }

    pub fn payload(&self) -> PayloadType {
        self.payload
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    pub fn cardinality(&self) -> &Cardinality {
        &self.extent.cardinality
    }

    pub fn same_payload(&self, other: &CanonicalType) -> bool {
        self.payload == other.payload
    }

    pub fn same_unit(&self, other: &CanonicalType) -> bool {
        self.unit == other.unit
    }

    pub fn same_cardinality(&self, other: &CanonicalType) -> bool {
        self.extent.cardinality == other.extent.cardinality
    }

    pub fn same_extent(&self, other: &CanonicalType) -> bool {
        self.extent == other.extent
    }

    /// Replace the cardinality axis; payload/unit validity is unaffected.
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.extent.cardinality = cardinality;
        self
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", PortType::from(self))
    }
}

impl From<CanonicalType> for String {
    fn from(ty: CanonicalType) -> String {
        ty.to_string()
    }
}

impl TryFrom<String> for CanonicalType {
    type Error = NotationError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        let port = parse_port_type(&text)?;
        port.to_canonical().map_err(|e| NotationError::Invalid {
            text: text.clone(),
            message: e.to_string(),
        })
    }
}

// ── PortType ────────────────────────────────────────────────────────────────

/// Inference-time type of a port as declared by a block template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortType {
    pub payload: Axis<PayloadType>,
    pub unit: Axis<Unit>,
    pub cardinality: Axis<Cardinality>,
    pub temporality: Temporality,
}

impl PortType {
    /// Build a port type, validating the (payload, unit) pair when both are known.
    pub fn new(
        payload: Axis<PayloadType>,
        unit: Axis<Unit>,
        cardinality: Axis<Cardinality>,
        temporality: Temporality,
    ) -> Result<Self, TypeError> {
        if let (Axis::Inst(p), Axis::Inst(u)) = (&payload, &unit) {
            if !is_valid_pair(*p, *u) {
                return Err(TypeError::InvalidPayloadUnitPair {
                    payload: *p,
                    unit: *u,
                });
            }
        }
        Ok(PortType {
            payload,
            unit,
            cardinality,
            temporality,
        })
    }

    /// Fully variable port type: payload `?T`, unit `?U`, cardinality `?C`.
    pub fn polymorphic(payload_var: &str, unit_var: &str, card_var: &str) -> Self {
        PortType {
            payload: Axis::var(payload_var),
            unit: Axis::var(unit_var),
            cardinality: Axis::var(card_var),
            temporality: Temporality::Continuous,
        }
    }

    pub fn is_concrete(&self) -> bool {
        !self.payload.is_var() && !self.unit.is_var() && !self.cardinality.is_var()
    }

    pub fn to_canonical(&self) -> Result<CanonicalType, TypeError> {
        match (&self.payload, &self.unit, &self.cardinality) {
            (Axis::Inst(p), Axis::Inst(u), Axis::Inst(c)) => {
                CanonicalType::new(*p, *u, Extent::new(c.clone(), self.temporality))
            }
            _ => Err(TypeError::NotConcrete(self.to_string())),
        }
    }
}

impl From<&CanonicalType> for PortType {
    fn from(ty: &CanonicalType) -> Self {
        PortType {
            payload: Axis::Inst(ty.payload),
            unit: Axis::Inst(ty.unit),
            cardinality: Axis::Inst(ty.extent.cardinality.clone()),
            temporality: ty.extent.temporality,
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.payload, self.unit)?;
        if self.cardinality != Axis::Inst(Cardinality::One) {
            write!(f, "@{}", self.cardinality)?;
        }
        if self.temporality != Temporality::Continuous {
            write!(f, "!{}", self.temporality.name())?;
        }
        Ok(())
    }
}

impl From<PortType> for String {
    fn from(ty: PortType) -> String {
        ty.to_string()
    }
}

impl TryFrom<String> for PortType {
    type Error = NotationError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        parse_port_type(&text)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
