use camino::{Utf8Path, Utf8PathBuf};

use crate::pipeline::{BuiltChain, Chain};

/// Atomic reference-counted string type used for task identifiers.
pub(crate) type ArcStr = std::sync::Arc<str>;

/// A 32-byte BLAKE3 hash used for content-addressed file names.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The environment mode which toggles every conditional transform step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Env {
    /// Unminified output with source maps.
    Dev,
    /// Minified, suffix-renamed output without source maps.
    #[default]
    Prod,
}

impl Env {
    pub fn is_dev(self) -> bool {
        self == Env::Dev
    }

    pub fn is_prod(self) -> bool {
        self == Env::Prod
    }
}

impl std::fmt::Display for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Env::Dev => f.write_str("dev"),
            Env::Prod => f.write_str("prod"),
        }
    }
}

impl std::str::FromStr for Env {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Env::Dev),
            "prod" | "production" => Ok(Env::Prod),
            other => Err(format!("unknown environment '{other}', expected 'dev' or 'prod'")),
        }
    }
}

/// What happens to a task when one of its files fails a transform step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Report the file through the log and keep processing the rest.
    #[default]
    Continue,
    /// Report the file, keep processing, then fail the task as a whole.
    Fail,
}

/// Read-only configuration for one invocation of the runner.
///
/// The context is resolved once at startup and handed by reference to every
/// task, so nothing inside the task graph depends on process-wide state.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Environment mode.
    pub env: Env,
    /// Root of the source tree (e.g. `./app`).
    pub src: Utf8PathBuf,
    /// Root of the destination tree (e.g. `./public`).
    pub dest: Utf8PathBuf,
    /// Root of third-party packages (e.g. `./bower_components`).
    pub vendor: Utf8PathBuf,
    /// Per-file error policy.
    pub policy: ErrorPolicy,
    /// Port of the development server.
    pub port: u16,
    /// Port of the live-reload socket, once watching.
    pub reload: Option<u16>,
}

impl RunContext {
    pub fn new(env: Env) -> Self {
        Self {
            env,
            src: Utf8PathBuf::from("./app"),
            dest: Utf8PathBuf::from("./public"),
            vendor: Utf8PathBuf::from("./bower_components"),
            policy: ErrorPolicy::default(),
            port: 8080,
            reload: None,
        }
    }

    pub fn with_roots(
        mut self,
        src: impl Into<Utf8PathBuf>,
        dest: impl Into<Utf8PathBuf>,
        vendor: impl Into<Utf8PathBuf>,
    ) -> Self {
        self.src = src.into();
        self.dest = dest.into();
        self.vendor = vendor.into();
        self
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Path inside the source tree.
    pub fn src(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.src.join(path)
    }

    /// Path inside the destination tree.
    pub fn dest(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.dest.join(path)
    }

    /// Path inside the vendor tree.
    pub fn vendor(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.vendor.join(path)
    }

    /// Script reloading the page whenever the live-reload socket signals a
    /// finished rebuild. `None` until watch mode opened the socket.
    pub fn reload_script(&self) -> Option<String> {
        self.reload.map(|port| {
            format!(
                r#"(() => {{
  const socket = new WebSocket(`ws://${{location.hostname || "localhost"}}:{port}`);
  socket.addEventListener("message", () => location.reload());
}})();
"#
            )
        })
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(Env::default())
    }
}

/// The context passed to every task execution.
pub struct TaskContext<'a> {
    /// The resolved run configuration.
    pub ctx: &'a RunContext,
    /// Name of the running task.
    pub name: &'a str,
    /// Tracing span assigned to this task.
    pub span: tracing::Span,
}

impl TaskContext<'_> {
    /// Specialises a chain for this run. Files processed by the chain are
    /// counted on the task's progress bar.
    pub fn chain(&self, chain: &Chain) -> BuiltChain {
        let built = chain.build(self.ctx).progress(self.span.clone());
        tracing::trace!(task = self.name, steps = ?built.step_names(), "chain built");
        built
    }
}

impl std::ops::Deref for TaskContext<'_> {
    type Target = RunContext;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse() {
        assert_eq!("dev".parse::<Env>().unwrap(), Env::Dev);
        assert_eq!("PROD".parse::<Env>().unwrap(), Env::Prod);
        assert_eq!("production".parse::<Env>().unwrap(), Env::Prod);
        assert!("staging".parse::<Env>().is_err());
    }

    #[test]
    fn test_default_env_is_prod() {
        let ctx = RunContext::default();
        assert!(ctx.env.is_prod());
        assert_eq!(ctx.dest("styles"), Utf8PathBuf::from("./public/styles"));
    }

    #[test]
    fn test_hash_hex() {
        let hex = Hash32::hash(b"abc").to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("6437b3ac"));
    }

    #[test]
    fn test_reload_script() {
        let mut ctx = RunContext::default();
        assert_eq!(ctx.port, 8080);
        assert!(ctx.reload_script().is_none());

        ctx.reload = Some(1337);
        let script = ctx.reload_script().unwrap();
        assert!(script.contains(":1337`"));
        assert!(script.contains("location.reload()"));
    }

    #[test]
    fn test_task_chain_keeps_predicates() {
        use crate::pipeline::Step;
        use crate::transform::Rename;

        let ctx = RunContext::new(Env::Dev);
        let task = TaskContext {
            ctx: &ctx,
            name: "styles",
            span: tracing::Span::none(),
        };
        let chain = Chain::new()
            .step(Step::each(Rename::suffix(".min")).when(Env::Prod))
            .step(Step::each(Rename::extension("css")));

        assert_eq!(task.chain(&chain).step_names(), vec!["rename"]);
    }
}
