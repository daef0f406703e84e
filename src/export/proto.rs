//! ONNX protobuf messages (subset of `onnx.proto` needed for tree ensembles)
//!
//! Field tags follow `onnx/onnx.proto`. Messages and fields this crate never
//! writes (tensors, sparse tensors, functions, training info) are left out;
//! decoding skips them.

use prost::{Enumeration, Message, Oneof};

/// `TensorProto.DataType.FLOAT`
pub const ELEM_FLOAT: i32 = 1;
/// `TensorProto.DataType.INT64`
pub const ELEM_INT64: i32 = 7;

pub const ML_DOMAIN: &str = "ai.onnx.ml";

#[derive(Clone, PartialEq, Message)]
pub struct ModelProto {
    #[prost(int64, tag = "1")]
    pub ir_version: i64,
    #[prost(string, tag = "2")]
    pub producer_name: String,
    #[prost(string, tag = "3")]
    pub producer_version: String,
    #[prost(string, tag = "4")]
    pub domain: String,
    #[prost(int64, tag = "5")]
    pub model_version: i64,
    #[prost(string, tag = "6")]
    pub doc_string: String,
    #[prost(message, optional, tag = "7")]
    pub graph: Option<GraphProto>,
    #[prost(message, repeated, tag = "8")]
    pub opset_import: Vec<OperatorSetIdProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct OperatorSetIdProto {
    #[prost(string, tag = "1")]
    pub domain: String,
    #[prost(int64, tag = "2")]
    pub version: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct GraphProto {
    #[prost(message, repeated, tag = "1")]
    pub node: Vec<NodeProto>,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "10")]
    pub doc_string: String,
    #[prost(message, repeated, tag = "11")]
    pub input: Vec<ValueInfoProto>,
    #[prost(message, repeated, tag = "12")]
    pub output: Vec<ValueInfoProto>,
    #[prost(message, repeated, tag = "13")]
    pub value_info: Vec<ValueInfoProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct NodeProto {
    #[prost(string, repeated, tag = "1")]
    pub input: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub output: Vec<String>,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub op_type: String,
    #[prost(message, repeated, tag = "5")]
    pub attribute: Vec<AttributeProto>,
    #[prost(string, tag = "6")]
    pub doc_string: String,
    #[prost(string, tag = "7")]
    pub domain: String,
}

impl NodeProto {
    pub fn attr(&self, name: &str) -> Option<&AttributeProto> {
        self.attribute.iter().find(|a| a.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum AttributeType {
    Undefined = 0,
    Float = 1,
    Int = 2,
    String = 3,
    Tensor = 4,
    Graph = 5,
    Floats = 6,
    Ints = 7,
    Strings = 8,
}

#[derive(Clone, PartialEq, Message)]
pub struct AttributeProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(float, tag = "2")]
    pub f: f32,
    #[prost(int64, tag = "3")]
    pub i: i64,
    #[prost(bytes = "vec", tag = "4")]
    pub s: Vec<u8>,
    #[prost(float, repeated, packed = "false", tag = "7")]
    pub floats: Vec<f32>,
    #[prost(int64, repeated, packed = "false", tag = "8")]
    pub ints: Vec<i64>,
    #[prost(bytes = "vec", repeated, tag = "9")]
    pub strings: Vec<Vec<u8>>,
    #[prost(enumeration = "AttributeType", tag = "20")]
    pub r#type: i32,
}

impl AttributeProto {
    fn named(name: &str, kind: AttributeType) -> Self {
        Self {
            name: name.to_string(),
            r#type: kind as i32,
            ..Default::default()
        }
    }

    pub fn int(name: &str, value: i64) -> Self {
        Self { i: value, ..Self::named(name, AttributeType::Int) }
    }

    pub fn string(name: &str, value: &str) -> Self {
        Self { s: value.as_bytes().to_vec(), ..Self::named(name, AttributeType::String) }
    }

    pub fn floats(name: &str, values: Vec<f32>) -> Self {
        Self { floats: values, ..Self::named(name, AttributeType::Floats) }
    }

    pub fn ints(name: &str, values: Vec<i64>) -> Self {
        Self { ints: values, ..Self::named(name, AttributeType::Ints) }
    }

    pub fn strings(name: &str, values: &[&str]) -> Self {
        Self {
            strings: values.iter().map(|s| s.as_bytes().to_vec()).collect(),
            ..Self::named(name, AttributeType::Strings)
        }
    }

    /// `s` as UTF-8 (lossy)
    pub fn as_str(&self) -> String {
        String::from_utf8_lossy(&self.s).into_owned()
    }

    pub fn as_strings(&self) -> Vec<String> {
        self.strings.iter().map(|s| String::from_utf8_lossy(s).into_owned()).collect()
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ValueInfoProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub r#type: Option<TypeProto>,
    #[prost(string, tag = "3")]
    pub doc_string: String,
}

impl ValueInfoProto {
    /// Tensor value with `None` dims written as the symbolic batch dimension `N`
    pub fn tensor(name: &str, elem_type: i32, dims: &[Option<i64>]) -> Self {
        let dim = dims
            .iter()
            .map(|d| TensorShapeDimension {
                denotation: String::new(),
                value: Some(match d {
                    Some(v) => tensor_shape_dimension::Value::DimValue(*v),
                    None => tensor_shape_dimension::Value::DimParam("N".to_string()),
                }),
            })
            .collect();

        Self {
            name: name.to_string(),
            r#type: Some(TypeProto {
                denotation: String::new(),
                value: Some(type_proto::Value::TensorType(TypeProtoTensor {
                    elem_type,
                    shape: Some(TensorShapeProto { dim }),
                })),
            }),
            doc_string: String::new(),
        }
    }

    /// Element type and dims (`None` for symbolic dims) of a tensor value
    pub fn tensor_shape(&self) -> Option<(i32, Vec<Option<i64>>)> {
        let Some(type_proto::Value::TensorType(tensor)) = self.r#type.as_ref()?.value.as_ref() else {
            return None;
        };
        let dims = tensor
            .shape
            .as_ref()?
            .dim
            .iter()
            .map(|d| match d.value {
                Some(tensor_shape_dimension::Value::DimValue(v)) => Some(v),
                _ => None,
            })
            .collect();
        Some((tensor.elem_type, dims))
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct TypeProto {
    #[prost(string, tag = "6")]
    pub denotation: String,
    #[prost(oneof = "type_proto::Value", tags = "1")]
    pub value: Option<type_proto::Value>,
}

pub mod type_proto {
    use super::*;

    #[derive(Clone, PartialEq, Oneof)]
    pub enum Value {
        #[prost(message, tag = "1")]
        TensorType(TypeProtoTensor),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct TypeProtoTensor {
    #[prost(int32, tag = "1")]
    pub elem_type: i32,
    #[prost(message, optional, tag = "2")]
    pub shape: Option<TensorShapeProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TensorShapeProto {
    #[prost(message, repeated, tag = "1")]
    pub dim: Vec<TensorShapeDimension>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TensorShapeDimension {
    #[prost(string, tag = "3")]
    pub denotation: String,
    #[prost(oneof = "tensor_shape_dimension::Value", tags = "1, 2")]
    pub value: Option<tensor_shape_dimension::Value>,
}

pub mod tensor_shape_dimension {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Value {
        #[prost(int64, tag = "1")]
        DimValue(i64),
        #[prost(string, tag = "2")]
        DimParam(String),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_wire_roundtrip() {
        let attr = AttributeProto::floats("nodes_values", vec![0.5, -1.25]);
        let bytes = attr.encode_to_vec();
        let decoded = AttributeProto::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, attr);
        assert_eq!(decoded.r#type(), AttributeType::Floats);
    }

    #[test]
    fn test_ir_version_encoding() {
        let model = ModelProto { ir_version: 7, ..Default::default() };
        // tag 1, varint wire type, value 7
        assert_eq!(model.encode_to_vec(), vec![0x08, 0x07]);
    }

    #[test]
    fn test_tensor_shape() {
        let info = ValueInfoProto::tensor("float_input", ELEM_FLOAT, &[None, Some(5)]);
        let (elem, dims) = info.tensor_shape().unwrap();
        assert_eq!(elem, ELEM_FLOAT);
        assert_eq!(dims, vec![None, Some(5)]);
    }
}
