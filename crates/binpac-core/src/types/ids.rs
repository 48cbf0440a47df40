use std::hash::{Hash, Hasher};

/// FNV-1a, used to derive stable id keys from hashable source data.
pub fn hash_id_value_u64<T: Hash>(value: T) -> u64 {
  struct Fnv1a(u64);
  impl Hasher for Fnv1a {
    fn finish(&self) -> u64 {
      self.0
    }
    fn write(&mut self, bytes: &[u8]) {
      for b in bytes {
        self.0 ^= *b as u64;
        self.0 = self.0.wrapping_mul(0x100000001b3);
      }
    }
  }
  let mut h = Fnv1a(0xcbf29ce484222325);
  value.hash(&mut h);
  h.finish()
}

macro_rules! id_type {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct $name(pub u64);

    impl From<&str> for $name {
      fn from(s: &str) -> Self {
        $name(hash_id_value_u64(s))
      }
    }

    impl From<&String> for $name {
      fn from(s: &String) -> Self {
        $name(hash_id_value_u64(s.as_str()))
      }
    }

    impl std::fmt::Display for $name {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_string())
      }
    }
  };
}

id_type!(
  /// Globally unique identifier of a [crate::types::unit::Unit] within a
  /// compilation.
  UnitId
);
id_type!(
  /// Identifier of a field, variable, property, or global hook within a
  /// unit.
  FieldId
);
id_type!(
  /// Unique symbol attached to one grammar production node.
  ProductionSymbol
);
id_type!(
  /// Mangled hook identifier.
  HookId
);
