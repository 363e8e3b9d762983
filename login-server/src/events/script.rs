/// Opaque reference to a callback closure owned by the scripting runtime.
/// The event registry never inspects it; it only ever hands it back to the
/// `ScriptEngine` that issued it.
pub type CallbackHandle = i64;

/// Identifies a module's isolated global scope inside the scripting
/// runtime. Swapped in for the duration of every call into that module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxEnv(pub i64);

/// A single named argument passed to a scripted handler.
#[derive(Debug, Clone)]
pub enum ScriptValue {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    /// A connection handle, looked up by id through the bridge rather than
    /// carrying the connection itself.
    ConnectionId(u64),
}

/// Arguments are passed as a single named table of `(name, value)` pairs,
/// exactly as the scripting bridge exposes them to handlers.
pub type EventArgs = Vec<(&'static str, ScriptValue)>;

/// The scripting runtime: a sandboxed interpreter that owns handler
/// closures referenced by the opaque handles above. This is an external
/// collaborator — the hard core only ever calls through this trait, never
/// embeds an interpreter directly.
pub trait ScriptEngine: Send {
    /// Creates a fresh sandbox environment for a newly loaded module.
    fn new_sandbox(&mut self) -> SandboxEnv;

    /// Loads `path` into `env`, making its globals (including any handler
    /// functions referenced later by `CallbackHandle`) visible there.
    fn load_file(&mut self, env: SandboxEnv, path: &str) -> Result<(), String>;

    /// Calls the module's `init` function if one was defined, under `env`.
    fn call_init(&mut self, env: SandboxEnv);

    /// Calls the module's `terminate` function if one was defined.
    fn call_terminate(&mut self, env: SandboxEnv);

    /// Invokes `handle` under `env` with `args`, discarding any result.
    fn invoke_no_ret(&mut self, env: SandboxEnv, handle: CallbackHandle, args: &EventArgs);

    /// Invokes `handle` under `env`, collecting up to `n_results` return
    /// values.
    fn invoke_collect(
        &mut self,
        env: SandboxEnv,
        handle: CallbackHandle,
        args: &EventArgs,
        n_results: usize,
    ) -> Vec<ScriptValue>;

    /// Invokes `handle` under `env` with a pre-built table reference
    /// (`table_ref`), returning the first value as an integer if the
    /// handler produced one.
    fn invoke_table_ref(
        &mut self,
        env: SandboxEnv,
        handle: CallbackHandle,
        table_ref: i64,
    ) -> Option<i64>;

    /// Releases a handle back to the runtime once its subscription is torn
    /// down.
    fn release(&mut self, handle: CallbackHandle);
}

/// A trivial engine used by tests and stand-alone runs: handlers are
/// ordinary Rust closures registered ahead of time and looked up by
/// handle. Production deployments are expected to back this trait with a
/// real sandboxed interpreter.
#[derive(Default)]
pub struct NullScriptEngine {
    next_handle: CallbackHandle,
    next_sandbox: i64,
}

impl NullScriptEngine {
    pub fn new() -> Self {
        NullScriptEngine { next_handle: 1, next_sandbox: 1 }
    }

    pub fn alloc_handle(&mut self) -> CallbackHandle {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }
}

impl ScriptEngine for NullScriptEngine {
    fn new_sandbox(&mut self) -> SandboxEnv {
        let env = SandboxEnv(self.next_sandbox);
        self.next_sandbox += 1;
        env
    }

    fn load_file(&mut self, _env: SandboxEnv, _path: &str) -> Result<(), String> {
        Ok(())
    }

    fn call_init(&mut self, _env: SandboxEnv) {}

    fn call_terminate(&mut self, _env: SandboxEnv) {}

    fn invoke_no_ret(&mut self, _env: SandboxEnv, _handle: CallbackHandle, _args: &EventArgs) {}

    fn invoke_collect(
        &mut self,
        _env: SandboxEnv,
        _handle: CallbackHandle,
        _args: &EventArgs,
        _n_results: usize,
    ) -> Vec<ScriptValue> {
        Vec::new()
    }

    fn invoke_table_ref(
        &mut self,
        _env: SandboxEnv,
        _handle: CallbackHandle,
        _table_ref: i64,
    ) -> Option<i64> {
        None
    }

    fn release(&mut self, _handle: CallbackHandle) {}
}
