//! Shared value types passed across the [crate::IrBuilder] boundary.

/// The descriptor record registered with the runtime at module init for
/// every exported unit.
#[derive(Debug, Clone)]
pub struct ParserDescriptor<Func, Type> {
  pub name:        String,
  pub description: String,
  pub ports:       Vec<u32>,
  pub mime_types:  Vec<String>,
  pub params:      u32,
  pub parse_func:  Option<Func>,
  pub resume_func: Option<Func>,
  pub parse_func_sink:  Option<Func>,
  pub resume_func_sink: Option<Func>,
  pub compose_func: Option<Func>,
  pub new_func:     Func,
  pub type_info:    Option<Type>,
}

impl<Func, Type> ParserDescriptor<Func, Type> {
  pub fn new(name: impl Into<String>, new_func: Func) -> Self {
    Self {
      name: name.into(),
      description: "No description.".to_string(),
      ports: Vec::new(),
      mime_types: Vec::new(),
      params: 0,
      parse_func: None,
      resume_func: None,
      parse_func_sink: None,
      resume_func_sink: None,
      compose_func: None,
      new_func,
      type_info: None,
    }
  }
}
