use std::collections::HashMap;

/// Mangled hook identifier, stable within one compilation so separately
/// emitted hook trampolines link to the same dispatch table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(pub u64);

/// `(priority, group)` pair controlling dispatch order and group-disable
/// short-circuiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority {
  pub priority: i32,
  pub group:    i32,
}

type ParseHookFn = dyn Fn();
type ForeachHookFn = dyn Fn() -> bool;

struct Registered<F: ?Sized> {
  priority: Priority,
  /// Insertion order, used to keep same-priority dispatch stable.
  seq:      u32,
  implementation: Box<F>,
}

/// Per-compilation append-only registry of hook implementations, keyed by
/// [HookId]. Conceptually global state of the compiler but deliberately
/// scoped to one `CodeGen` instance rather than a process-wide singleton.
#[derive(Default)]
pub struct HookTable {
  parse_hooks:   HashMap<HookId, Vec<Registered<ParseHookFn>>>,
  foreach_hooks: HashMap<HookId, Vec<Registered<ForeachHookFn>>>,
  disabled_groups: std::collections::HashSet<i32>,
  seq: u32,
}

impl HookTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register_parse_hook(&mut self, id: HookId, priority: Priority, implementation: impl Fn() + 'static) {
    let seq = self.next_seq();
    self.parse_hooks.entry(id).or_default().push(Registered { priority, seq, implementation: Box::new(implementation) });
  }

  pub fn register_foreach_hook(&mut self, id: HookId, priority: Priority, implementation: impl Fn() -> bool + 'static) {
    let seq = self.next_seq();
    self.foreach_hooks.entry(id).or_default().push(Registered { priority, seq, implementation: Box::new(implementation) });
  }

  pub fn disable_group(&mut self, group: i32) {
    self.disabled_groups.insert(group);
  }

  fn next_seq(&mut self) -> u32 {
    self.seq += 1;
    self.seq
  }

  fn ordered<F: ?Sized>(disabled: &std::collections::HashSet<i32>, regs: &[Registered<F>]) -> Vec<&Registered<F>> {
    let mut live: Vec<_> = regs.iter().filter(|r| !disabled.contains(&r.priority.group)).collect();
    live.sort_by(|a, b| b.priority.priority.cmp(&a.priority.priority).then(a.seq.cmp(&b.seq)));
    live
  }

  /// Runs every registered implementation for `id` in descending-priority,
  /// stable order. A disabled group's hook is simply skipped.
  pub fn run_parse_hooks(&self, id: HookId) {
    if let Some(regs) = self.parse_hooks.get(&id) {
      for r in Self::ordered(&self.disabled_groups, regs) {
        (r.implementation)();
      }
    }
  }

  /// Runs every registered `foreach` implementation for `id`, OR-reducing
  /// their `stop` results. A field whose own hooks are disabled by the
  /// recursion guard never invokes any implementation and reports `false`.
  pub fn run_foreach_hooks(&self, id: HookId, hooks_enabled: bool) -> bool {
    if !hooks_enabled {
      return false;
    }
    match self.foreach_hooks.get(&id) {
      Some(regs) => Self::ordered(&self.disabled_groups, regs).into_iter().map(|r| (r.implementation)()).fold(false, |a, b| a || b),
      None => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{cell::RefCell, rc::Rc};

  #[test]
  fn dispatches_in_descending_priority_order_stably() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let mut t = HookTable::new();
    let id = HookId(1);

    let o1 = order.clone();
    t.register_parse_hook(id, Priority { priority: 5, group: 0 }, move || o1.borrow_mut().push("low"));
    let o2 = order.clone();
    t.register_parse_hook(id, Priority { priority: 10, group: 0 }, move || o2.borrow_mut().push("high"));
    let o3 = order.clone();
    t.register_parse_hook(id, Priority { priority: 10, group: 0 }, move || o3.borrow_mut().push("high2"));

    t.run_parse_hooks(id);

    assert_eq!(*order.borrow(), vec!["high", "high2", "low"]);
  }

  #[test]
  fn disabled_group_short_circuits() {
    let mut t = HookTable::new();
    let id = HookId(2);
    t.register_foreach_hook(id, Priority { priority: 0, group: 9 }, || true);
    t.disable_group(9);
    assert_eq!(t.run_foreach_hooks(id, true), false);
  }

  #[test]
  fn disabled_field_hooks_never_invoke_and_never_stop() {
    let mut t = HookTable::new();
    let id = HookId(3);
    t.register_foreach_hook(id, Priority { priority: 0, group: 0 }, || true);
    assert_eq!(t.run_foreach_hooks(id, false), false);
  }
}
