use super::ids::UnitId;

/// Byte order for multi-byte scalar unpacking/packing, set per-field by
/// `&byteorder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
  #[default]
  Big,
  Little,
}

/// Bit order for bitfield extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
  #[default]
  Lsb0,
  Msb0,
}

/// One named sub-range of a bitfield integer, e.g. `lo: 0..3`.
#[derive(Debug, Clone)]
pub struct BitRange {
  pub name: String,
  pub lo:   u8,
  pub hi:   u8,
}

/// A source type as seen by [crate::type_layout::TypeLayout].
/// Resolving a textual type expression into this enum is the job of the
/// external AST builder; the core only ever consumes already-resolved
/// `ValueType`s.
#[derive(Debug, Clone)]
pub enum ValueType {
  Bool,
  U8,
  U16,
  U32,
  U64,
  I8,
  I16,
  I32,
  I64,
  /// A variable-length or fixed-length byte string.
  Bytes,
  /// An integer storage type further decomposed into named bit ranges.
  Bitfield { storage: Box<ValueType>, order: BitOrder, ranges: Vec<BitRange> },
  /// A fixed tuple of member types, used for e.g. `&ipv4`/`&ipv6` addresses
  /// and other structural literals.
  Tuple(Vec<ValueType>),
  /// A reference to another unit, used by `ChildGrammar` productions.
  UnitRef(UnitId),
  /// A runtime sink handle.

  Sink,
  /// A homogeneous repeated container (`Counter`/`Loop` bodies), e.g. an
  /// array of `UnitRef` or scalar elements.
  Container(Box<ValueType>),
}

impl ValueType {
  pub fn is_scalar(&self) -> bool {
    matches!(
      self,
      ValueType::Bool
        | ValueType::U8
        | ValueType::U16
        | ValueType::U32
        | ValueType::U64
        | ValueType::I8
        | ValueType::I16
        | ValueType::I32
        | ValueType::I64
    )
  }

  /// Byte width on the wire, where statically known (scalars and bitfields
  /// over scalars); `None` for variable-length types.
  pub fn byte_width(&self) -> Option<u32> {
    match self {
      ValueType::Bool | ValueType::U8 | ValueType::I8 => Some(1),
      ValueType::U16 | ValueType::I16 => Some(2),
      ValueType::U32 | ValueType::I32 => Some(4),
      ValueType::U64 | ValueType::I64 => Some(8),
      ValueType::Bitfield { storage, .. } => storage.byte_width(),
      ValueType::Tuple(members) => members.iter().map(ValueType::byte_width).sum(),
      _ => None,
    }
  }

  /// The IR scalar/struct type name this value type lowers to. Concrete
  /// struct/array lowering for `Tuple`/`Container`/`UnitRef` is done by
  /// `TypeLayout` itself; this only names the leaf scalar types.
  pub fn scalar_ir_name(&self) -> &'static str {
    match self {
      ValueType::Bool => "bool",
      ValueType::U8 => "u8",
      ValueType::U16 => "u16",
      ValueType::U32 => "u32",
      ValueType::U64 => "u64",
      ValueType::I8 => "i8",
      ValueType::I16 => "i16",
      ValueType::I32 => "i32",
      ValueType::I64 => "i64",
      ValueType::Bytes => "bytes",
      ValueType::Sink => "sink",
      _ => "ptr",
    }
  }
}
