//! The resolved-AST data model the code generator core consumes: units,
//! items, grammar productions, and the error taxonomy they can raise.
//! Construction of these values from source text is out of scope for the
//! core; see `binpac_grammar` for the fixture builder that assembles them.
pub mod error;
pub mod ids;
pub mod item;
pub mod production;
pub mod unit;
pub mod value_type;

pub use error::*;
pub use ids::*;
pub use item::*;
pub use production::*;
pub use unit::*;
pub use value_type::*;
