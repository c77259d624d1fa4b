use std::fmt;

use serde::{Deserialize, Serialize};

/// Element types carried by `dtype` attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    Float16,
    BFloat16,
    Float32,
    Float64,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::Float16 => "float16",
            DataType::BFloat16 => "bfloat16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let dtype = match name {
            "bool" => DataType::Bool,
            "int8" => DataType::Int8,
            "int16" => DataType::Int16,
            "int32" => DataType::Int32,
            "int64" => DataType::Int64,
            "uint8" => DataType::UInt8,
            "float16" => DataType::Float16,
            "bfloat16" => DataType::BFloat16,
            "float32" => DataType::Float32,
            "float64" => DataType::Float64,
            _ => return None,
        };
        Some(dtype)
    }
}

/// Placement tag attached to constant-producing operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Place {
    Undefined,
    Cpu,
    Gpu(u32),
    Custom(String),
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Undefined => f.write_str("undefined"),
            Place::Cpu => f.write_str("cpu"),
            Place::Gpu(device) => write!(f, "gpu:{device}"),
            Place::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Kind tag used by operation schemas to declare attribute types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrKind {
    Bool,
    I32,
    I64,
    F32,
    F64,
    IntArray,
    DataType,
    Place,
    Str,
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrKind::Bool => "bool",
            AttrKind::I32 => "i32",
            AttrKind::I64 => "i64",
            AttrKind::F32 => "f32",
            AttrKind::F64 => "f64",
            AttrKind::IntArray => "int_array",
            AttrKind::DataType => "dtype",
            AttrKind::Place => "place",
            AttrKind::Str => "str",
        };
        f.write_str(name)
    }
}

/// Typed attribute value attached to an operation.
///
/// Floating-point payloads are stored as raw bit patterns so that equality,
/// hashing and copying are exact: a value captured by a source pattern and
/// copied into a result operation keeps its encoding. The text form prints
/// NaNs other than the canonical quiet NaN as `nan:0x<bits>` for the same
/// reason.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Attribute {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    IntArray(Vec<i64>),
    DataType(DataType),
    Place(Place),
    Str(String),
}

impl Attribute {
    pub fn f32(value: f32) -> Self {
        Attribute::F32(value.to_bits())
    }

    pub fn f64(value: f64) -> Self {
        Attribute::F64(value.to_bits())
    }

    pub fn int_array(values: impl Into<Vec<i64>>) -> Self {
        Attribute::IntArray(values.into())
    }

    pub fn kind(&self) -> AttrKind {
        match self {
            Attribute::Bool(_) => AttrKind::Bool,
            Attribute::I32(_) => AttrKind::I32,
            Attribute::I64(_) => AttrKind::I64,
            Attribute::F32(_) => AttrKind::F32,
            Attribute::F64(_) => AttrKind::F64,
            Attribute::IntArray(_) => AttrKind::IntArray,
            Attribute::DataType(_) => AttrKind::DataType,
            Attribute::Place(_) => AttrKind::Place,
            Attribute::Str(_) => AttrKind::Str,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Attribute::I32(value) => Some(i64::from(*value)),
            Attribute::I64(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the floating-point value, widening `F32` payloads.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Attribute::F32(bits) => Some(f64::from(f32::from_bits(*bits))),
            Attribute::F64(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i64]> {
        match self {
            Attribute::IntArray(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_data_type(&self) -> Option<DataType> {
        match self {
            Attribute::DataType(dtype) => Some(*dtype),
            _ => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Bool(value) => write!(f, "{value}"),
            Attribute::I32(value) => write!(f, "{value} : i32"),
            Attribute::I64(value) => write!(f, "{value}"),
            Attribute::F32(bits) if is_nan_payload_f32(*bits) => {
                write!(f, "nan:{bits:#010x} : f32")
            }
            Attribute::F32(bits) => write!(f, "{:?} : f32", f32::from_bits(*bits)),
            Attribute::F64(bits) if is_nan_payload_f64(*bits) => write!(f, "nan:{bits:#018x}"),
            Attribute::F64(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
            Attribute::IntArray(values) => {
                f.write_str("[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Attribute::DataType(dtype) => write!(f, "dtype<{}>", dtype.name()),
            Attribute::Place(place) => write!(f, "place<{place}>"),
            Attribute::Str(value) => write!(f, "{value:?}"),
        }
    }
}

/// NaN whose bits differ from the canonical quiet NaN that `"NaN"` parses to.
fn is_nan_payload_f32(bits: u32) -> bool {
    f32::from_bits(bits).is_nan() && bits != f32::NAN.to_bits()
}

fn is_nan_payload_f64(bits: u64) -> bool {
    f64::from_bits(bits).is_nan() && bits != f64::NAN.to_bits()
}
