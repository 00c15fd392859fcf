//! Field codec: live values to portable values and back
//!
//! The codec is pure. Everything that needs the outside world, namely the
//! translation of live handles to stable ids and back, goes through the
//! `ReferenceEncoder` / `ReferenceDecoder` seams supplied by the caller.
//!
//! ## Rules
//!
//! - A tag that does not match the declared type is a `TypeMismatch`
//! - `Optional(T)` admits `Null`; references are always nullable
//! - List order is preserved; map keys come out sorted
//! - Composites deeper than the nesting limit fail with `NestingTooDeep`

use crate::error::{Error, Result};
use crate::limits::MAX_NESTING_DEPTH;
use crate::path::FieldPath;
use crate::types::{EntityHandle, EntityTypeId};
use crate::value::{EntityRef, FieldType, FieldValue, Value};
use std::collections::BTreeMap;

// =============================================================================
// Reference seams
// =============================================================================

/// Translates live handles into portable references during capture
pub trait ReferenceEncoder {
    /// Produce the reference for `handle`
    ///
    /// `Ok(None)` encodes the field as `Null`.
    fn encode_reference(
        &mut self,
        handle: EntityHandle,
        path: &FieldPath,
    ) -> Result<Option<EntityRef>>;
}

/// Resolves portable references into live handles during restore
pub trait ReferenceDecoder {
    /// Resolve `reference` found at `path`
    ///
    /// `Ok(None)` means the target is not known yet. The codec then yields
    /// `Value::Entity(None)`; the decoder is responsible for remembering the
    /// pending reference if it wants to patch it later.
    fn decode_reference(
        &mut self,
        reference: &EntityRef,
        path: &FieldPath,
    ) -> Result<Option<EntityHandle>>;
}

/// Encoder for values that must not contain references
///
/// Any reference reaching it fails with a type mismatch.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReferences;

impl ReferenceEncoder for NoReferences {
    fn encode_reference(
        &mut self,
        _handle: EntityHandle,
        path: &FieldPath,
    ) -> Result<Option<EntityRef>> {
        Err(Error::type_mismatch(path, "value without references", "Reference"))
    }
}

impl ReferenceDecoder for NoReferences {
    fn decode_reference(
        &mut self,
        _reference: &EntityRef,
        path: &FieldPath,
    ) -> Result<Option<EntityHandle>> {
        Err(Error::type_mismatch(path, "value without references", "Reference"))
    }
}

// =============================================================================
// Encode / Decode / Check
// =============================================================================

/// Encode a live value as a portable value of type `ty`
pub fn encode(
    value: &Value,
    ty: &FieldType,
    path: &FieldPath,
    refs: &mut dyn ReferenceEncoder,
) -> Result<FieldValue> {
    encode_with_limit(value, ty, path, refs, MAX_NESTING_DEPTH)
}

/// Encode with an explicit nesting limit
pub fn encode_with_limit(
    value: &Value,
    ty: &FieldType,
    path: &FieldPath,
    refs: &mut dyn ReferenceEncoder,
    max_depth: usize,
) -> Result<FieldValue> {
    match (ty, value) {
        (FieldType::Optional(_), Value::Null) => Ok(FieldValue::Null),
        (FieldType::Optional(inner), v) => encode_with_limit(v, inner, path, refs, max_depth),

        (FieldType::Bool, Value::Bool(b)) => Ok(FieldValue::Bool(*b)),
        (FieldType::Int, Value::Int(i)) => Ok(FieldValue::Int(*i)),
        (FieldType::Float, Value::Float(f)) => Ok(FieldValue::Float(*f)),
        (FieldType::String, Value::String(s)) => Ok(FieldValue::String(s.clone())),
        (FieldType::Bytes, Value::Bytes(b)) => Ok(FieldValue::Bytes(b.clone())),

        (FieldType::List(inner), Value::List(items)) => {
            enter_composite(path, max_depth)?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(encode_with_limit(item, inner, &path.index(i), refs, max_depth)?);
            }
            Ok(FieldValue::List(out))
        }
        (FieldType::Map(inner), Value::Map(entries)) => {
            enter_composite(path, max_depth)?;
            let mut out = BTreeMap::new();
            for (key, item) in entries {
                let encoded = encode_with_limit(item, inner, &path.key(key.as_str()), refs, max_depth)?;
                out.insert(key.clone(), encoded);
            }
            Ok(FieldValue::Map(out))
        }

        (FieldType::Reference(_), Value::Null | Value::Entity(None)) => Ok(FieldValue::Null),
        (FieldType::Reference(expected), Value::Entity(Some(handle))) => {
            match refs.encode_reference(*handle, path)? {
                Some(reference) => {
                    check_target(expected.as_ref(), &reference.target_type, ty, path)?;
                    Ok(FieldValue::Reference(reference))
                }
                None => Ok(FieldValue::Null),
            }
        }

        (ty, v) => Err(Error::type_mismatch(path, ty, v.type_name())),
    }
}

/// Decode a portable value of type `ty` into a live value
pub fn decode(
    value: &FieldValue,
    ty: &FieldType,
    path: &FieldPath,
    refs: &mut dyn ReferenceDecoder,
) -> Result<Value> {
    decode_with_limit(value, ty, path, refs, MAX_NESTING_DEPTH)
}

/// Decode with an explicit nesting limit
pub fn decode_with_limit(
    value: &FieldValue,
    ty: &FieldType,
    path: &FieldPath,
    refs: &mut dyn ReferenceDecoder,
    max_depth: usize,
) -> Result<Value> {
    match (ty, value) {
        (FieldType::Optional(_), FieldValue::Null) => Ok(Value::Null),
        (FieldType::Optional(inner), v) => decode_with_limit(v, inner, path, refs, max_depth),

        (FieldType::Bool, FieldValue::Bool(b)) => Ok(Value::Bool(*b)),
        (FieldType::Int, FieldValue::Int(i)) => Ok(Value::Int(*i)),
        (FieldType::Float, FieldValue::Float(f)) => Ok(Value::Float(*f)),
        (FieldType::String, FieldValue::String(s)) => Ok(Value::String(s.clone())),
        (FieldType::Bytes, FieldValue::Bytes(b)) => Ok(Value::Bytes(b.clone())),

        (FieldType::List(inner), FieldValue::List(items)) => {
            enter_composite(path, max_depth)?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(decode_with_limit(item, inner, &path.index(i), refs, max_depth)?);
            }
            Ok(Value::List(out))
        }
        (FieldType::Map(inner), FieldValue::Map(entries)) => {
            enter_composite(path, max_depth)?;
            let mut out = BTreeMap::new();
            for (key, item) in entries {
                let decoded = decode_with_limit(item, inner, &path.key(key.as_str()), refs, max_depth)?;
                out.insert(key.clone(), decoded);
            }
            Ok(Value::Map(out))
        }

        (FieldType::Reference(_), FieldValue::Null) => Ok(Value::Entity(None)),
        (FieldType::Reference(expected), FieldValue::Reference(reference)) => {
            check_target(expected.as_ref(), &reference.target_type, ty, path)?;
            Ok(Value::Entity(refs.decode_reference(reference, path)?))
        }

        (ty, v) => Err(Error::type_mismatch(path, ty, v.type_name())),
    }
}

/// Verify that a portable value conforms to `ty` without decoding it
pub fn check(value: &FieldValue, ty: &FieldType, path: &FieldPath) -> Result<()> {
    check_with_limit(value, ty, path, MAX_NESTING_DEPTH)
}

fn check_with_limit(
    value: &FieldValue,
    ty: &FieldType,
    path: &FieldPath,
    max_depth: usize,
) -> Result<()> {
    match (ty, value) {
        (FieldType::Optional(_), FieldValue::Null) => Ok(()),
        (FieldType::Optional(inner), v) => check_with_limit(v, inner, path, max_depth),
        (FieldType::Bool, FieldValue::Bool(_))
        | (FieldType::Int, FieldValue::Int(_))
        | (FieldType::Float, FieldValue::Float(_))
        | (FieldType::String, FieldValue::String(_))
        | (FieldType::Bytes, FieldValue::Bytes(_))
        | (FieldType::Reference(_), FieldValue::Null) => Ok(()),
        (FieldType::List(inner), FieldValue::List(items)) => {
            enter_composite(path, max_depth)?;
            for (i, item) in items.iter().enumerate() {
                check_with_limit(item, inner, &path.index(i), max_depth)?;
            }
            Ok(())
        }
        (FieldType::Map(inner), FieldValue::Map(entries)) => {
            enter_composite(path, max_depth)?;
            for (key, item) in entries {
                check_with_limit(item, inner, &path.key(key.as_str()), max_depth)?;
            }
            Ok(())
        }
        (FieldType::Reference(expected), FieldValue::Reference(reference)) => {
            check_target(expected.as_ref(), &reference.target_type, ty, path)
        }
        (ty, v) => Err(Error::type_mismatch(path, ty, v.type_name())),
    }
}

fn enter_composite(path: &FieldPath, max_depth: usize) -> Result<()> {
    if path.depth() >= max_depth {
        return Err(Error::NestingTooDeep {
            path: path.to_string(),
            limit: max_depth,
        });
    }
    Ok(())
}

fn check_target(
    expected: Option<&EntityTypeId>,
    found: &EntityTypeId,
    ty: &FieldType,
    path: &FieldPath,
) -> Result<()> {
    match expected {
        Some(expected) if expected != found => Err(Error::type_mismatch(
            path,
            ty,
            format!("Reference<{}>", found),
        )),
        _ => Ok(()),
    }
}

// =============================================================================
// Native conversions
// =============================================================================

/// Conversion between native Rust types and live values
///
/// Entity implementations use this to read and write their fields with the
/// same mismatch semantics as the codec.
pub trait FieldCodec: Sized {
    /// Declared field type for this native type
    fn field_type() -> FieldType;

    /// Convert to a live value
    fn to_value(&self) -> Value;

    /// Convert from a live value
    fn from_value(value: &Value, path: &FieldPath) -> Result<Self>;
}

impl FieldCodec for bool {
    fn field_type() -> FieldType {
        FieldType::Bool
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value, path: &FieldPath) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::type_mismatch(path, "Bool", other.type_name())),
        }
    }
}

impl FieldCodec for i64 {
    fn field_type() -> FieldType {
        FieldType::Int
    }

    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn from_value(value: &Value, path: &FieldPath) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            other => Err(Error::type_mismatch(path, "Int", other.type_name())),
        }
    }
}

macro_rules! narrow_int_codec {
    ($ty:ty, $label:literal) => {
        impl FieldCodec for $ty {
            fn field_type() -> FieldType {
                FieldType::Int
            }

            fn to_value(&self) -> Value {
                Value::Int(i64::from(*self))
            }

            fn from_value(value: &Value, path: &FieldPath) -> Result<Self> {
                match value {
                    Value::Int(i) => <$ty>::try_from(*i).map_err(|_| {
                        Error::type_mismatch(path, $label, format!("Int({})", i))
                    }),
                    other => Err(Error::type_mismatch(path, "Int", other.type_name())),
                }
            }
        }
    };
}

narrow_int_codec!(i32, "Int in i32 range");
narrow_int_codec!(u32, "Int in u32 range");

impl FieldCodec for f64 {
    fn field_type() -> FieldType {
        FieldType::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: &Value, path: &FieldPath) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            other => Err(Error::type_mismatch(path, "Float", other.type_name())),
        }
    }
}

impl FieldCodec for f32 {
    fn field_type() -> FieldType {
        FieldType::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    /// Finite values beyond `f32::MAX` are rejected rather than saturated
    /// to infinity; infinities and NaN carry over.
    fn from_value(value: &Value, path: &FieldPath) -> Result<Self> {
        match value {
            Value::Float(f) => {
                let narrowed = *f as f32;
                if f.is_finite() && !narrowed.is_finite() {
                    return Err(Error::type_mismatch(
                        path,
                        "Float in f32 range",
                        format!("Float({})", f),
                    ));
                }
                Ok(narrowed)
            }
            other => Err(Error::type_mismatch(path, "Float", other.type_name())),
        }
    }
}

impl FieldCodec for String {
    fn field_type() -> FieldType {
        FieldType::String
    }

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: &Value, path: &FieldPath) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(Error::type_mismatch(path, "String", other.type_name())),
        }
    }
}

impl FieldCodec for Vec<u8> {
    fn field_type() -> FieldType {
        FieldType::Bytes
    }

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: &Value, path: &FieldPath) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            other => Err(Error::type_mismatch(path, "Bytes", other.type_name())),
        }
    }
}

impl<T: FieldCodec> FieldCodec for Vec<T> {
    fn field_type() -> FieldType {
        FieldType::list(T::field_type())
    }

    fn to_value(&self) -> Value {
        Value::List(self.iter().map(FieldCodec::to_value).collect())
    }

    fn from_value(value: &Value, path: &FieldPath) -> Result<Self> {
        match value {
            Value::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| T::from_value(item, &path.index(i)))
                .collect(),
            other => Err(Error::type_mismatch(
                path,
                Self::field_type(),
                other.type_name(),
            )),
        }
    }
}

impl<T: FieldCodec> FieldCodec for BTreeMap<String, T> {
    fn field_type() -> FieldType {
        FieldType::map(T::field_type())
    }

    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
        )
    }

    fn from_value(value: &Value, path: &FieldPath) -> Result<Self> {
        match value {
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), T::from_value(v, &path.key(k.as_str()))?)))
                .collect(),
            other => Err(Error::type_mismatch(
                path,
                Self::field_type(),
                other.type_name(),
            )),
        }
    }
}

impl<T: FieldCodec> FieldCodec for Option<T> {
    fn field_type() -> FieldType {
        FieldType::optional(T::field_type())
    }

    fn to_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: &Value, path: &FieldPath) -> Result<Self> {
        match value {
            // An unset reference reads as None
            Value::Null | Value::Entity(None) => Ok(None),
            other => T::from_value(other, path).map(Some),
        }
    }
}

impl FieldCodec for EntityHandle {
    fn field_type() -> FieldType {
        FieldType::any_reference()
    }

    fn to_value(&self) -> Value {
        Value::Entity(Some(*self))
    }

    fn from_value(value: &Value, path: &FieldPath) -> Result<Self> {
        match value {
            Value::Entity(Some(handle)) => Ok(*handle),
            Value::Entity(None) => Err(Error::type_mismatch(path, "Reference", "unset Reference")),
            other => Err(Error::type_mismatch(path, "Reference", other.type_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StableId;
    use std::collections::HashMap;

    /// Encoder/decoder backed by a fixed handle <-> id map
    #[derive(Default)]
    struct MapRefs {
        ids: HashMap<EntityHandle, EntityRef>,
        pending: Vec<(String, StableId)>,
    }

    impl MapRefs {
        fn with(handle: u64, type_id: &str) -> (Self, StableId) {
            let id = StableId::new();
            let mut refs = MapRefs::default();
            refs.ids
                .insert(EntityHandle::new(handle), EntityRef::new(type_id.into(), id));
            (refs, id)
        }
    }

    impl ReferenceEncoder for MapRefs {
        fn encode_reference(
            &mut self,
            handle: EntityHandle,
            _path: &FieldPath,
        ) -> Result<Option<EntityRef>> {
            Ok(self.ids.get(&handle).cloned())
        }
    }

    impl ReferenceDecoder for MapRefs {
        fn decode_reference(
            &mut self,
            reference: &EntityRef,
            path: &FieldPath,
        ) -> Result<Option<EntityHandle>> {
            let found = self
                .ids
                .iter()
                .find(|(_, r)| r.id == reference.id)
                .map(|(h, _)| *h);
            if found.is_none() {
                self.pending.push((path.to_string(), reference.id));
            }
            Ok(found)
        }
    }

    fn root() -> FieldPath {
        FieldPath::field("f")
    }

    #[test]
    fn test_scalar_encode_decode() {
        let cases = vec![
            (Value::Bool(true), FieldType::Bool),
            (Value::Int(-7), FieldType::Int),
            (Value::Float(0.25), FieldType::Float),
            (Value::from("hi"), FieldType::String),
            (Value::Bytes(vec![0, 1, 2]), FieldType::Bytes),
        ];
        for (value, ty) in cases {
            let encoded = encode(&value, &ty, &root(), &mut NoReferences).unwrap();
            let decoded = decode(&encoded, &ty, &root(), &mut NoReferences).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_int_not_accepted_for_float() {
        let err = encode(&Value::Int(1), &FieldType::Float, &root(), &mut NoReferences)
            .unwrap_err();
        match err {
            Error::TypeMismatch {
                path,
                expected,
                found,
            } => {
                assert_eq!(path, "f");
                assert_eq!(expected, "Float");
                assert_eq!(found, "Int");
            }
            other => panic!("unexpected error {other:?}"),
        }

        let err = decode(&FieldValue::Int(1), &FieldType::Float, &root(), &mut NoReferences)
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_mismatch_path_points_inside_list() {
        let ty = FieldType::list(FieldType::Int);
        let value = FieldValue::List(vec![
            FieldValue::Int(1),
            FieldValue::Int(2),
            FieldValue::Float(3.0),
        ]);
        let err = check(&value, &ty, &FieldPath::field("inventory")).unwrap_err();
        match err {
            Error::TypeMismatch { path, .. } => assert_eq!(path, "inventory[2]"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_optional_admits_null() {
        let ty = FieldType::optional(FieldType::String);
        let encoded = encode(&Value::Null, &ty, &root(), &mut NoReferences).unwrap();
        assert_eq!(encoded, FieldValue::Null);
        assert!(check(&FieldValue::Null, &FieldType::String, &root()).is_err());
    }

    #[test]
    fn test_map_output_sorted() {
        let mut entries = BTreeMap::new();
        entries.insert("z".to_string(), Value::Int(1));
        entries.insert("a".to_string(), Value::Int(2));
        let encoded = encode(
            &Value::Map(entries),
            &FieldType::map(FieldType::Int),
            &root(),
            &mut NoReferences,
        )
        .unwrap();
        match encoded {
            FieldValue::Map(m) => {
                let keys: Vec<_> = m.keys().cloned().collect();
                assert_eq!(keys, vec!["a", "z"]);
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn test_reference_round_trip() {
        let (mut refs, id) = MapRefs::with(4, "door");
        let ty = FieldType::reference("door");
        let encoded = encode(&Value::from(EntityHandle::new(4)), &ty, &root(), &mut refs).unwrap();
        assert_eq!(encoded.as_reference().unwrap().id, id);

        let decoded = decode(&encoded, &ty, &root(), &mut refs).unwrap();
        assert_eq!(decoded, Value::Entity(Some(EntityHandle::new(4))));
    }

    #[test]
    fn test_reference_target_type_checked() {
        let (mut refs, _) = MapRefs::with(4, "npc");
        let ty = FieldType::reference("door");
        let err = encode(&Value::from(EntityHandle::new(4)), &ty, &root(), &mut refs).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));

        let any = FieldType::any_reference();
        assert!(encode(&Value::from(EntityHandle::new(4)), &any, &root(), &mut refs).is_ok());
    }

    #[test]
    fn test_unresolved_reference_yields_placeholder() {
        let mut refs = MapRefs::default();
        let target = StableId::new();
        let value = FieldValue::Reference(EntityRef::new("npc".into(), target));
        let decoded = decode(&value, &FieldType::any_reference(), &root(), &mut refs).unwrap();
        assert_eq!(decoded, Value::Entity(None));
        assert_eq!(refs.pending, vec![("f".to_string(), target)]);
    }

    #[test]
    fn test_null_reference_round_trip() {
        let ty = FieldType::any_reference();
        let encoded = encode(&Value::Entity(None), &ty, &root(), &mut NoReferences).unwrap();
        assert_eq!(encoded, FieldValue::Null);
        let decoded = decode(&encoded, &ty, &root(), &mut NoReferences).unwrap();
        assert_eq!(decoded, Value::Entity(None));
    }

    #[test]
    fn test_nesting_limit() {
        let mut ty = FieldType::Int;
        let mut value = Value::Int(0);
        for _ in 0..5 {
            ty = FieldType::list(ty);
            value = Value::List(vec![value]);
        }
        let err = encode_with_limit(&value, &ty, &root(), &mut NoReferences, 4).unwrap_err();
        assert!(matches!(err, Error::NestingTooDeep { limit: 4, .. }));
        assert!(encode_with_limit(&value, &ty, &root(), &mut NoReferences, 5).is_ok());
    }

    #[test]
    fn test_native_codec() {
        let path = root();
        assert_eq!(i32::from_value(&Value::Int(5), &path).unwrap(), 5);
        assert!(i32::from_value(&Value::Int(i64::MAX), &path).is_err());
        assert!(u32::from_value(&Value::Int(-1), &path).is_err());
        assert!(f64::from_value(&Value::Int(1), &path).is_err());

        let names = vec!["a".to_string(), "b".to_string()];
        let value = names.to_value();
        assert_eq!(Vec::<String>::from_value(&value, &path).unwrap(), names);
        assert_eq!(Vec::<String>::field_type(), FieldType::list(FieldType::String));

        let bytes = vec![1u8, 2, 3];
        assert_eq!(bytes.to_value(), Value::Bytes(bytes.clone()));

        let none: Option<EntityHandle> = None;
        assert_eq!(none.to_value(), Value::Null);
        assert_eq!(
            Option::<EntityHandle>::from_value(&Value::Entity(None), &path).unwrap(),
            None
        );
    }

    #[test]
    fn test_f32_narrowing() {
        let path = root();
        assert_eq!(f32::from_value(&Value::Float(1.5), &path).unwrap(), 1.5f32);
        assert_eq!(f32::from_value(&f32::MAX.to_value(), &path).unwrap(), f32::MAX);
        assert_eq!(
            f32::from_value(&Value::Float(f64::NEG_INFINITY), &path).unwrap(),
            f32::NEG_INFINITY
        );
        assert!(f32::from_value(&Value::Float(f64::NAN), &path).unwrap().is_nan());

        let err = f32::from_value(&Value::Float(1.0e300), &path).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert!(f32::from_value(&Value::Float(-1.0e39), &path).is_err());
    }
}
