use crate::*;

fn roundtrip(value: &Value) -> Result<Value> {
    decode(&encode(value)?)
}

// ============================================================================
//  SCALAR TESTS (Happy Path)
// ============================================================================

#[test]
fn test_scalar_roundtrip() -> Result<()> {
    for value in [
        Value::Nil,
        Value::Bool(true),
        Value::Bool(false),
        Value::Int(0),
        Value::Int(i64::MIN),
        Value::Int(i64::MAX),
        Value::Float(-0.5),
        Value::Float(f64::MAX),
    ] {
        assert_eq!(roundtrip(&value)?, value);
    }
    Ok(())
}

#[test]
fn test_blob_roundtrip() -> Result<()> {
    let text = Value::from("héllo, wörld");
    assert_eq!(roundtrip(&text)?, text);

    let empty = Value::from("");
    assert_eq!(roundtrip(&empty)?, empty);

    let bytes = Value::Bytes(vec![0, 1, 2, 0xFF]);
    assert_eq!(roundtrip(&bytes)?, bytes);
    Ok(())
}

#[test]
fn test_int_wire_layout() -> Result<()> {
    let bytes = encode(&Value::Int(5))?;
    assert_eq!(bytes, [0x0A, 5, 0, 0, 0, 0, 0, 0, 0]);
    Ok(())
}

#[test]
fn test_nan_survives() -> Result<()> {
    let Value::Float(x) = roundtrip(&Value::Float(f64::NAN))? else {
        panic!("expected a float");
    };
    assert!(x.is_nan());
    Ok(())
}

// ============================================================================
//  CONTAINER TESTS
// ============================================================================

#[test]
fn test_nested_list_roundtrip() -> Result<()> {
    let value = Value::List(vec![
        Value::Int(0),
        Value::List(vec![Value::from("a"), Value::List(vec![])]),
        Value::Nil,
    ]);
    assert_eq!(roundtrip(&value)?, value);
    Ok(())
}

#[test]
fn test_map_keeps_order_and_duplicates() -> Result<()> {
    let value = Value::Map(vec![
        ("z".into(), Value::Int(1)),
        ("a".into(), Value::List(vec![Value::Bool(true)])),
        ("z".into(), Value::Int(2)),
    ]);
    let back = roundtrip(&value)?;
    assert_eq!(back, value);
    assert_eq!(back.get("z"), Some(&Value::Int(1)));
    assert_eq!(back.get("missing"), None);
    Ok(())
}

#[test]
fn test_list_length_is_backpatched() -> Result<()> {
    let bytes = encode(&Value::List(vec![Value::Nil, Value::Bool(true)]))?;
    assert_eq!(bytes, [0x20, 2, 0, 0, 0, 0x0E, 0x01]);
    Ok(())
}

#[test]
fn test_depth_limit_is_symmetric() -> Result<()> {
    let mut deep = Value::Nil;
    for _ in 0..MAX_DEPTH {
        deep = Value::List(vec![deep]);
    }
    assert_eq!(roundtrip(&deep)?, deep);

    let too_deep = Value::List(vec![deep]);
    assert_eq!(encode(&too_deep), Err(Error::RecursionLimitExceeded));
    Ok(())
}

// ============================================================================
//  HOSTILE INPUT TESTS
// ============================================================================

#[test]
fn test_empty_input() {
    assert_eq!(decode(&[]), Err(Error::UnexpectedEnd));
}

#[test]
fn test_invalid_tag() {
    assert_eq!(decode(&[0x7F]), Err(Error::InvalidTag(0x7F)));
}

#[test]
fn test_bare_variant_rejected() {
    assert_eq!(decode(&[0x33, 0, 0, 0, 0]), Err(Error::InvalidTag(0x33)));
}

#[test]
fn test_truncated_int() {
    assert_eq!(decode(&[0x0A, 1, 2, 3]), Err(Error::UnexpectedEnd));
}

#[test]
fn test_length_past_end() {
    // String claims 4 GiB.
    assert_eq!(decode(&[0x10, 0xFF, 0xFF, 0xFF, 0xFF, b'a']), Err(Error::UnexpectedEnd));
}

#[test]
fn test_child_cannot_escape_parent() {
    // List body is 2 bytes, but the string inside claims 3.
    let bytes = [0x20, 2, 0, 0, 0, 0x10, 3, 0, 0, 0, b'a', b'b', b'c'];
    assert_eq!(decode(&bytes), Err(Error::UnexpectedEnd));
}

#[test]
fn test_invalid_utf8() {
    assert_eq!(decode(&[0x10, 2, 0, 0, 0, 0xC3, 0x28]), Err(Error::InvalidUtf8));
}

#[test]
fn test_trailing_bytes() -> Result<()> {
    let mut bytes = encode(&Value::Int(1))?;
    bytes.extend_from_slice(&[0x0E, 0x0E]);
    assert_eq!(decode(&bytes), Err(Error::TrailingBytes(2)));
    Ok(())
}

#[test]
fn test_hostile_nesting() {
    // Each level claims exactly the rest of the buffer.
    let levels = MAX_DEPTH + 8;
    let mut bytes = Vec::new();
    for level in 0..levels {
        let body = ((levels - level - 1) * 5) as u32;
        bytes.push(0x20);
        bytes.extend_from_slice(&body.to_le_bytes());
    }
    assert_eq!(decode(&bytes), Err(Error::RecursionLimitExceeded));
}

#[test]
fn test_map_entry_must_be_variant() {
    let bytes = [0x21, 1, 0, 0, 0, 0x0E];
    assert!(matches!(decode(&bytes), Err(Error::Malformed(_))));
}

#[test]
fn test_map_entry_with_two_payloads() {
    let bytes = [
        0x21, 13, 0, 0, 0, // map
        0x33, 8, 0, 0, 0, // entry
        0x10, 1, 0, 0, 0, b'k', // key
        0x0E, 0x0E, // two payloads
    ];
    assert!(matches!(decode(&bytes), Err(Error::Malformed(_))));
}

// ============================================================================
//  CONVERSION TESTS
// ============================================================================

#[test]
fn test_into_value() {
    assert_eq!(Value::from(7i32), Value::Int(7));
    assert_eq!(Value::from(7u32), Value::Int(7));
    assert_eq!(Value::from(1.5f32), Value::Float(1.5));
    assert_eq!(Value::from(None::<i64>), Value::Nil);
    assert_eq!(Value::from(Some("x")), Value::Str("x".into()));
    assert_eq!(Value::from(vec![Value::Nil]), Value::List(vec![Value::Nil]));
}

#[test]
fn test_try_from_value() -> Result<()> {
    assert_eq!(i64::try_from(Value::Int(-3))?, -3);
    assert_eq!(String::try_from(Value::from("s"))?, "s");
    assert_eq!(Vec::<u8>::try_from(Value::Bytes(vec![9]))?, vec![9]);
    assert_eq!(
        bool::try_from(Value::Int(1)),
        Err(Error::TypeMismatch { expected: TypeTag::Bool, found: TypeTag::Int })
    );
    assert_eq!(i32::try_from(Value::Int(i64::MAX)), Err(Error::OutOfRange(i64::MAX)));
    assert_eq!(u32::try_from(Value::Int(-1)), Err(Error::OutOfRange(-1)));
    Ok(())
}

#[test]
fn test_type_tags() {
    assert_eq!(Value::Nil.type_tag(), TypeTag::Nil);
    assert_eq!(Value::Map(vec![]).type_tag(), TypeTag::Map);
    assert_eq!(TypeTag::Str.to_string(), "string");
}
