/// Compilation-scoped configuration, assembled by the driver from CLI flags
/// or a build script and threaded through [super::Journal] for the lifetime
/// of one [crate::codegen::CodeGen::compile] call.
///
/// Mirrors spec §6's option table directly; field names match the option
/// names so a driver can map flags onto them without translation.
#[derive(Debug, Clone)]
pub struct CodeGenConfig {
  /// Verbosity level for `binpac`/`binpac-verbose`/`binpac-trace` IR trace
  /// calls. `0` emits none.
  pub debug: u32,
  /// Profiler start/stop wrapping level around each parse function. `0`
  /// emits none.
  pub profile: u32,
  /// If `false`, parser entry points are registered as null function
  /// pointers rather than emitted.
  pub generate_parsers: bool,
  /// If `false`, composer entry points are registered as null function
  /// pointers rather than emitted.
  pub generate_composers: bool,
  /// Run the `IrBuilder`'s verifier before returning the finished module.
  pub verify: bool,
  /// Library import search paths consumed by the AST builder; carried
  /// through unused by the core itself, since grammar construction is out
  /// of scope here.
  pub libdirs_pac2: Vec<String>,
  pub libdirs_hlt:  Vec<String>,
}

impl Default for CodeGenConfig {
  fn default() -> Self {
    Self {
      debug: 0,
      profile: 0,
      generate_parsers: true,
      generate_composers: true,
      verify: false,
      libdirs_pac2: Vec::new(),
      libdirs_hlt: Vec::new(),
    }
  }
}

impl CodeGenConfig {
  pub fn new() -> Self {
    Self::default()
  }

  /// A config tuned for a production build: no trace/profile overhead, but
  /// the emitted module is verified before being handed back.
  pub fn release() -> Self {
    Self { verify: true, ..Self::default() }
  }

  /// A config tuned for diagnosing a misbehaving grammar: maximum trace
  /// verbosity and profiling, composers skipped to keep the listing
  /// focused on parsing.
  pub fn debug_trace() -> Self {
    Self { debug: 3, profile: 1, generate_composers: false, verify: true, ..Self::default() }
  }

  pub fn with_debug(mut self, level: u32) -> Self {
    self.debug = level;
    self
  }

  pub fn with_profile(mut self, level: u32) -> Self {
    self.profile = level;
    self
  }

  pub fn parsers_only(mut self) -> Self {
    self.generate_composers = false;
    self
  }

  pub fn composers_only(mut self) -> Self {
    self.generate_parsers = false;
    self
  }

  pub fn with_verify(mut self, enable: bool) -> Self {
    self.verify = enable;
    self
  }

  pub fn add_libdir_pac2(mut self, dir: impl Into<String>) -> Self {
    self.libdirs_pac2.push(dir.into());
    self
  }

  pub fn add_libdir_hlt(mut self, dir: impl Into<String>) -> Self {
    self.libdirs_hlt.push(dir.into());
    self
  }
}
