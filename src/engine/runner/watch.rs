//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: uses the `notify` crate to monitor the static roots
//!    of every watch binding. Events are debounced so that a burst of saves
//!    produces a single batch.
//! 2. **Run queue**: every batch is matched against the binding patterns and
//!    each matching binding is pushed onto a coalescing queue, drained by a
//!    single worker thread which runs the bound flow.
//! 3. **Live reload**: browser tabs connect to a WebSocket served with
//!    `tungstenite`; after every successful run the string `"reload"` is
//!    sent to each of them.

use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use glob::Pattern;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use tungstenite::{Message, WebSocket};

use super::queue::RunQueue;
use crate::blueprint::{Runner, WatchBinding};
use crate::core::RunContext;
use crate::engine::Flow;
use crate::error::WatchError;

const DEBOUNCE: Duration = Duration::from_millis(250);

type Watcher = Debouncer<RecommendedWatcher, RecommendedCache>;

/// Watches the bindings of `runner` until the process is interrupted.
/// Binding patterns are resolved against the source root.
pub(crate) fn watch(runner: &Runner, mut ctx: RunContext, serve: bool) -> Result<(), WatchError> {
    let live = LiveReload::listen(ctx.port.saturating_add(1))?;
    ctx.reload = Some(live.port());
    tracing::info!(port = live.port(), "live reload listening");

    #[cfg(feature = "server")]
    if serve {
        super::http::start(&ctx)?;
    }
    #[cfg(not(feature = "server"))]
    if serve {
        tracing::warn!("built without the `server` feature, not serving files");
    }

    let watchlist = Watchlist::new(&ctx, runner.watches());
    let (tx, rx) = channel();
    let _watcher = subscribe(&watchlist, DEBOUNCE, tx)?;

    tracing::info!("waiting for changes...");
    drive(runner, &ctx, &watchlist, rx, |flow| {
        live.broadcast(flow);
    });

    Ok(())
}

/// Browser tabs waiting for a reload signal.
pub(crate) struct LiveReload {
    port: u16,
    tabs: Mutex<Vec<WebSocket<TcpStream>>>,
}

impl LiveReload {
    /// Accepts connections on `preferred`, or on any free port when that one
    /// is taken.
    pub(crate) fn listen(preferred: u16) -> std::io::Result<Arc<Self>> {
        let listener = TcpListener::bind(("127.0.0.1", preferred))
            .or_else(|_| TcpListener::bind(("127.0.0.1", 0)))?;

        let live = Arc::new(Self {
            port: listener.local_addr()?.port(),
            tabs: Mutex::default(),
        });

        let accepting = live.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let handshake = match stream {
                    Ok(stream) => tungstenite::accept(stream),
                    Err(e) => {
                        tracing::debug!("reload connection failed: {e}");
                        continue;
                    }
                };

                match handshake {
                    Ok(socket) => accepting.tabs().push(socket),
                    Err(e) => tracing::debug!("reload handshake failed: {e}"),
                }
            }
        });

        Ok(live)
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    fn tabs(&self) -> MutexGuard<'_, Vec<WebSocket<TcpStream>>> {
        self.tabs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signals every tab, forgetting the ones that went away. Returns the
    /// number of tabs reached.
    pub(crate) fn broadcast(&self, flow: &Flow) -> usize {
        let mut tabs = self.tabs();
        tabs.retain_mut(|socket| match socket.send(Message::text("reload")) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("dropping reload client: {e}");
                false
            }
        });

        tracing::debug!(tabs = tabs.len(), "reloading after {flow}");
        tabs.len()
    }
}

/// The directories to watch and the binding patterns their events are
/// matched against.
pub(crate) struct Watchlist {
    roots: Vec<Utf8PathBuf>,
    patterns: Vec<(Pattern, usize)>,
}

impl Watchlist {
    /// Resolves every binding against the source root. Bindings whose static
    /// root doesn't exist are logged and left out.
    pub(crate) fn new(ctx: &RunContext, bindings: &[WatchBinding]) -> Self {
        let mut roots = Vec::new();
        let mut patterns = Vec::new();

        for (index, binding) in bindings.iter().enumerate() {
            let glob = ctx.src(&binding.pattern);
            match resolve_watch_path(&glob) {
                Ok((root, pattern)) => {
                    roots.push(root);
                    patterns.push((pattern, index));
                }
                Err(e) => tracing::warn!("not watching {glob}: {e}"),
            }
        }

        // A recursive watch on a directory covers everything below it.
        roots.sort();
        roots.dedup_by(|later, kept| later.starts_with(&*kept));

        Self { roots, patterns }
    }

    /// Indices of the bindings matching a changed path.
    pub(crate) fn matches<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = usize> + 'a {
        self.patterns
            .iter()
            .filter(move |(pattern, _)| pattern.matches_path(path))
            .map(|(_, index)| *index)
    }
}

fn subscribe(
    watchlist: &Watchlist,
    debounce: Duration,
    tx: Sender<DebounceEventResult>,
) -> Result<Watcher, WatchError> {
    let mut watcher = new_debouncer(debounce, None, tx)?;

    for root in &watchlist.roots {
        tracing::info!("watching {}", style(root).cyan());
        watcher.watch(root, RecursiveMode::Recursive)?;
    }

    Ok(watcher)
}

/// Runs the bound flows for every batch of `events`, one run at a time,
/// until the events end. `on_success` is called after each successful run.
fn drive<E, F>(runner: &Runner, ctx: &RunContext, watchlist: &Watchlist, events: E, on_success: F)
where
    E: IntoIterator<Item = DebounceEventResult>,
    F: Fn(&Flow) + Sync,
{
    let queue = RunQueue::new();

    thread::scope(|s| {
        let worker = s.spawn(|| {
            while let Some(index) = queue.pop() {
                let flow = &runner.watches()[index].flow;
                tracing::info!("change detected, running {}", style(flow).yellow());

                match runner.run_flow(ctx, flow) {
                    Ok(report) if report.is_success() => {
                        tracing::info!("{report}");
                        on_success(flow);
                    }
                    Ok(report) => tracing::warn!("{report}"),
                    Err(e) => tracing::error!("{e}"),
                }
            }
        });

        for result in events {
            let batch = match result {
                Ok(batch) => batch,
                Err(errors) => {
                    for e in errors {
                        tracing::error!("watch error: {e}");
                    }
                    continue;
                }
            };

            for path in batch.iter().flat_map(|debounced| &debounced.event.paths) {
                for index in watchlist.matches(path) {
                    if queue.push(index) {
                        tracing::debug!(path = %path.display(), "queued {}", runner.watches()[index].flow);
                    }
                }
            }
        }

        queue.close();
        if worker.join().is_err() {
            tracing::error!("watch worker panicked");
        }
    });
}

/// Splits a glob into a canonicalized static root path (for watching) and a
/// compiled absolute pattern (for matching events).
pub(crate) fn resolve_watch_path(glob: &Utf8Path) -> Result<(Utf8PathBuf, Pattern), WatchError> {
    let components: Vec<_> = glob.components().collect();
    let split = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root: Utf8PathBuf = components.iter().take(split).collect();
    let suffix: Utf8PathBuf = components.iter().skip(split).collect();

    let root = root
        .canonicalize_utf8()
        .map_err(|e| WatchError::Resolve(format!("{glob}: {e}")))?;

    // A concrete file is watched through its parent, so that editors
    // replacing the file atomically are still noticed.
    let (watch_root, pattern) = if suffix.as_str().is_empty() && root.is_file() {
        let parent = root.parent().unwrap_or(&root).to_path_buf();
        (parent, root)
    } else {
        let pattern = root.join(&suffix);
        (root, pattern)
    };

    let pattern = Pattern::new(pattern.as_str())?;

    Ok((watch_root, pattern))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;
    use crate::blueprint::Blueprint;
    use crate::engine::Task;
    use crate::pipeline::Outcome;

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf())
            .unwrap()
            .canonicalize_utf8()
            .unwrap();
        (dir, root)
    }

    fn context(root: &Utf8Path) -> RunContext {
        RunContext::default().with_roots(root.join("app"), root.join("public"), root.join("vendor"))
    }

    fn counting(id: &str, runs: &Arc<AtomicUsize>, busy: Duration) -> Task {
        let runs = runs.clone();
        Task::new(id, move |_| {
            thread::sleep(busy);
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::default())
        })
    }

    fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() {
            assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_concrete_file() {
        let (_dir, root) = tempdir();
        fs::write(root.join("style.scss"), "").unwrap();

        let (watch, pattern) = resolve_watch_path(&root.join("style.scss")).unwrap();

        assert_eq!(watch, root);
        assert_eq!(pattern.as_str(), root.join("style.scss"));
    }

    #[test]
    fn test_directory_wildcard() {
        let (_dir, root) = tempdir();
        fs::create_dir_all(root.join("styles/helper")).unwrap();

        let (watch, pattern) = resolve_watch_path(&root.join("styles/**/*.scss")).unwrap();

        assert_eq!(watch, root.join("styles"));
        assert_eq!(pattern.as_str(), root.join("styles/**/*.scss"));
        assert!(pattern.matches_path(root.join("styles/helper/_sprite.scss").as_std_path()));
        assert!(!pattern.matches_path(root.join("styles/readme.md").as_std_path()));
    }

    #[test]
    fn test_missing_root() {
        let (_dir, root) = tempdir();
        assert!(matches!(
            resolve_watch_path(&root.join("icons/*.svg")),
            Err(WatchError::Resolve(_))
        ));
    }

    #[test]
    fn test_watchlist_roots_and_matches() {
        let (_dir, root) = tempdir();
        let ctx = context(&root);
        for dir in ["styles", "styles-legacy", "images/sprite/2x", "icons"] {
            fs::create_dir_all(ctx.src(dir)).unwrap();
        }

        let bindings: Vec<_> = [
            "styles/**/*.scss",
            "images/**/*",
            "images/sprite/2x/**/*",
            "icons/*.svg",
            "styles-legacy/*.css",
            "scripts/**/*.coffee",
        ]
        .into_iter()
        .map(|pattern| WatchBinding {
            pattern: pattern.into(),
            flow: Flow::task("noop"),
        })
        .collect();

        let watchlist = Watchlist::new(&ctx, &bindings);

        // `scripts` doesn't exist, the sprite directory is below `images`
        // and `styles-legacy` is a sibling of `styles`.
        assert_eq!(
            watchlist.roots,
            vec![ctx.src("icons"), ctx.src("images"), ctx.src("styles"), ctx.src("styles-legacy")]
        );

        let sprite = ctx.src("images/sprite/2x/a.png");
        assert_eq!(watchlist.matches(sprite.as_std_path()).collect::<Vec<_>>(), vec![1, 2]);

        let helper = ctx.src("styles/helper/_sprite.scss");
        assert_eq!(watchlist.matches(helper.as_std_path()).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_live_reload_reaches_tabs() {
        let live = LiveReload::listen(0).unwrap();
        assert_eq!(live.broadcast(&Flow::task("styles")), 0);

        let (mut tab, _) = tungstenite::connect(format!("ws://127.0.0.1:{}", live.port())).unwrap();
        wait_for("the tab to register", || live.tabs().len() == 1);

        assert_eq!(live.broadcast(&Flow::task("styles")), 1);
        assert_eq!(tab.read().unwrap(), Message::text("reload"));

        drop(tab);
        // The closed tab is noticed on one of the next sends at the latest.
        wait_for("the closed tab to be dropped", || live.broadcast(&Flow::task("styles")) == 0);
    }

    #[test]
    fn test_changes_run_bound_flow_and_coalesce() {
        let (_dir, root) = tempdir();
        let ctx = context(&root);
        fs::create_dir_all(ctx.src("styles")).unwrap();
        fs::create_dir_all(ctx.src("icons")).unwrap();
        fs::write(ctx.src("styles/style.scss"), "a {}").unwrap();

        let styles = Arc::new(AtomicUsize::new(0));
        let icons = Arc::new(AtomicUsize::new(0));

        let mut blueprint = Blueprint::new();
        blueprint
            .register_batch([
                counting("styles", &styles, Duration::from_millis(800)),
                counting("iconfont", &icons, Duration::ZERO),
            ])
            .unwrap()
            .watch("styles/**/*.scss", "styles")
            .watch("icons/*.svg", "iconfont");
        let runner = blueprint.finish().unwrap();

        let watchlist = Watchlist::new(&ctx, runner.watches());
        let (tx, rx) = channel();
        let watcher = subscribe(&watchlist, Duration::from_millis(50), tx).unwrap();
        let reloads = AtomicUsize::new(0);

        thread::scope(|s| {
            let (runner, ctx, watchlist, reloads) = (&runner, &ctx, &watchlist, &reloads);
            let driver = s.spawn(move || {
                // Ends once the tree has been quiet for a while.
                let events = std::iter::from_fn(|| rx.recv_timeout(Duration::from_secs(2)).ok());
                drive(runner, ctx, watchlist, events, |_| {
                    reloads.fetch_add(1, Ordering::SeqCst);
                });
            });

            // The first save starts a run. The other two arrive while it is
            // busy and are folded into a single rerun.
            for color in ["red", "green", "blue"] {
                fs::write(ctx.src("styles/style.scss"), format!("a {{ color: {color}; }}")).unwrap();
                thread::sleep(Duration::from_millis(200));
            }

            driver.join().unwrap();
        });
        drop(watcher);

        assert_eq!(styles.load(Ordering::SeqCst), 2);
        assert_eq!(icons.load(Ordering::SeqCst), 0);
        assert_eq!(reloads.load(Ordering::SeqCst), 2);
    }
}
