use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::modules::Module;
use crate::requirements::{Partition, ResourceRequirement};
use crate::resources::ResourcePool;

#[derive(Debug, Clone)]
pub enum ExecEvent {
    ModuleStarted {
        id: String,
    },
    ModuleLog {
        id: String,
        line: String,
    },
    ModuleSkipped {
        id: String,
        reason: String,
    },
    ModuleFinished {
        id: String,
        ok: bool,
        error: Option<String>,
        elapsed_ms: u128,
    },
    RunDone {
        ok: bool,
        error: Option<String>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

pub struct NullSink;

impl ExecSink for NullSink {
    fn emit(&self, _ev: ExecEvent) {}
}

#[derive(Default)]
pub struct StdoutSink {
    state: Mutex<StdoutSinkState>,
}

#[derive(Default)]
struct StdoutSinkState {
    started_at: Option<Instant>,
    started: usize,
    ok: usize,
    failed: usize,
    skipped: Vec<String>,
    log_lines: usize,
}

impl ExecSink for StdoutSink {
    fn emit(&self, ev: ExecEvent) {
        let mut summary = None::<String>;
        match ev {
            ExecEvent::ModuleStarted { id } => {
                if let Ok(mut s) = self.state.lock() {
                    s.started = s.started.saturating_add(1);
                    if s.started_at.is_none() {
                        s.started_at = Some(Instant::now());
                    }
                }
                println!("RUN: {id}");
            }
            ExecEvent::ModuleLog { id, line } => {
                if let Ok(mut s) = self.state.lock() {
                    s.log_lines = s.log_lines.saturating_add(1);
                }
                println!("[{id}] {line}");
            }
            ExecEvent::ModuleSkipped { id, reason } => {
                if let Ok(mut s) = self.state.lock() {
                    s.skipped.push(id.clone());
                }
                println!("SKIP: {id} ({reason})");
            }
            ExecEvent::ModuleFinished {
                id,
                ok,
                error,
                elapsed_ms,
            } => {
                if let Ok(mut s) = self.state.lock() {
                    if ok {
                        s.ok = s.ok.saturating_add(1);
                    } else {
                        s.failed = s.failed.saturating_add(1);
                    }
                }
                if ok {
                    println!("DONE: {id} ({elapsed_ms}ms)");
                } else {
                    println!("FAIL: {id} ({elapsed_ms}ms) {}", error.unwrap_or_default());
                }
            }
            ExecEvent::RunDone { ok, error } => {
                if let Ok(mut s) = self.state.lock() {
                    let wall = s.started_at.map(|t| t.elapsed()).unwrap_or_default();
                    let mut out = String::from("SUMMARY:\n");
                    out.push_str(&format!("  status: {}\n", if ok { "ok" } else { "failed" }));
                    out.push_str(&format!(
                        "  modules: started={} ok={} failed={} skipped={}\n",
                        s.started,
                        s.ok,
                        s.failed,
                        s.skipped.len()
                    ));
                    if !s.skipped.is_empty() {
                        out.push_str(&format!("  skipped: {}\n", s.skipped.join(", ")));
                    }
                    out.push_str(&format!("  logs: {}\n", s.log_lines));
                    out.push_str(&format!("  elapsed_ms: {}\n", wall.as_millis()));
                    if let Some(e) = error {
                        out.push_str(&format!("  error: {e}\n"));
                    }
                    summary = Some(out);
                    *s = StdoutSinkState::default();
                }
            }
        }
        if let Some(s) = summary {
            print!("{s}");
        }
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }
}

impl ExecSink for ChannelSink {
    fn emit(&self, ev: ExecEvent) {
        let _ = self.tx.send(ev);
    }
}

#[derive(Clone)]
pub struct ExecCtx {
    pub dry_run: bool,
    pub sink: Arc<dyn ExecSink>,
    pub current_module: Option<String>,
    touched: Vec<PathBuf>,
}

impl ExecCtx {
    pub fn new(dry_run: bool, sink: Arc<dyn ExecSink>) -> Self {
        Self {
            dry_run,
            sink,
            current_module: None,
            touched: Vec::new(),
        }
    }

    pub fn set_module(&mut self, id: impl Into<String>) {
        self.current_module = Some(id.into());
        self.touched.clear();
    }

    pub fn log(&self, msg: &str) {
        let id = self
            .current_module
            .clone()
            .unwrap_or_else(|| "<none>".into());
        self.sink.emit(ExecEvent::ModuleLog {
            id,
            line: msg.to_string(),
        });
    }

    pub fn record_touched(&mut self, path: &Path) {
        if !self.touched.iter().any(|p| p == path) {
            self.touched.push(path.to_path_buf());
        }
    }

    pub fn touched(&self) -> &[PathBuf] {
        &self.touched
    }
}

/// Host-owned, ordered set of modules. Registration order is run order.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn Module>>,
}

impl ModuleRegistry {
    pub fn add(&mut self, module: Box<dyn Module>) -> Result<()> {
        let id = module.id();
        if self.get(id).is_some() {
            return Err(Error::msg(format!("duplicate module id '{id}'")));
        }
        module
            .requirements()
            .validate()
            .map_err(|e| Error::msg(format!("module '{id}' has an invalid declaration: {e}")))?;
        self.modules.push(module);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&dyn Module> {
        self.modules
            .iter()
            .find(|m| m.id() == id)
            .map(|m| &**m as &dyn Module)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Module> {
        self.modules.iter().map(|m| &**m as &dyn Module)
    }

    /// Union of the declarations of every module enabled in `doc`.
    pub fn combined_requirements(&self, doc: &ConfigDoc) -> Result<ResourceRequirement> {
        let mut out = ResourceRequirement::default();
        for m in self.iter() {
            if doc.module_enabled(m.id())? {
                out.merge(&m.requirements());
            }
        }
        Ok(out)
    }
}

pub fn builtin_registry() -> Result<ModuleRegistry> {
    let mut reg = ModuleRegistry::default();
    for m in crate::modules::builtin_modules() {
        reg.add(m)?;
    }
    Ok(reg)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleStatus {
    Injected,
    Skipped,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct TouchedFile {
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub id: String,
    pub status: ModuleStatus,
    pub reason: Option<String>,
    pub requirements: ResourceRequirement,
    pub missing: Vec<Partition>,
    pub files: Vec<TouchedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: String,
    pub dry_run: bool,
    pub modules: Vec<ModuleReport>,
}

impl RunReport {
    pub fn module(&self, id: &str) -> Option<&ModuleReport> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        let s = serde_json::to_string_pretty(self)
            .map_err(|e| Error::msg(format!("json encode error: {e}")))?;
        fs::write(path, s).map_err(|e| Error::io_at(path, e))
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    let data = fs::read(path).map_err(|e| Error::io_at(path, e))?;
    Ok(hex::encode(Sha256::digest(&data)))
}

fn join_partitions(ps: &[Partition]) -> String {
    ps.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ")
}

fn skip_reason(
    strict: bool,
    req: &ResourceRequirement,
    missing: &[Partition],
    pool: &ResourcePool,
) -> Option<String> {
    if strict && !missing.is_empty() {
        return Some(format!(
            "declared resources unavailable: {}",
            join_partitions(missing)
        ));
    }
    if !req.is_empty() && !pool.satisfies_any(req) {
        return Some("none of the declared resources are available".into());
    }
    None
}

/// Run every enabled module once, in registry order, sequentially.
///
/// The first module error stops the run and is returned unchanged; files a
/// module already appended to stay as written.
pub fn execute(
    doc: &ConfigDoc,
    reg: &ModuleRegistry,
    pool: &mut ResourcePool,
    ctx: &mut ExecCtx,
) -> Result<RunReport> {
    let host = doc.host()?;
    let mut reports = Vec::new();

    for module in reg.iter() {
        let id = module.id();
        let req = module.requirements();

        if !doc.module_enabled(id)? {
            ctx.sink.emit(ExecEvent::ModuleSkipped {
                id: id.into(),
                reason: "disabled".into(),
            });
            reports.push(ModuleReport {
                id: id.into(),
                status: ModuleStatus::Disabled,
                reason: None,
                requirements: req,
                missing: Vec::new(),
                files: Vec::new(),
            });
            continue;
        }

        let missing = pool.missing_for(&req);
        if !missing.is_empty() {
            tracing::warn!(
                module = id,
                missing = %join_partitions(&missing),
                "host cannot supply every declared resource"
            );
        }

        if let Some(reason) = skip_reason(host.strict, &req, &missing, pool) {
            tracing::info!(module = id, %reason, "module skipped");
            ctx.sink.emit(ExecEvent::ModuleSkipped {
                id: id.into(),
                reason: reason.clone(),
            });
            reports.push(ModuleReport {
                id: id.into(),
                status: ModuleStatus::Skipped,
                reason: Some(reason),
                requirements: req,
                missing,
                files: Vec::new(),
            });
            continue;
        }

        ctx.sink.emit(ExecEvent::ModuleStarted { id: id.into() });
        ctx.set_module(id);
        tracing::info!(module = id, dry_run = ctx.dry_run, "injecting");

        let start = Instant::now();
        let res = {
            let mut prepared = pool.prepare_for(&req);
            module.inject(&mut prepared, ctx)
        };
        let elapsed_ms = start.elapsed().as_millis();

        if let Err(e) = res {
            ctx.sink.emit(ExecEvent::ModuleFinished {
                id: id.into(),
                ok: false,
                error: Some(e.to_string()),
                elapsed_ms,
            });
            ctx.sink.emit(ExecEvent::RunDone {
                ok: false,
                error: Some(format!("module '{id}' failed: {e}")),
            });
            return Err(e);
        }

        let mut files = Vec::new();
        for path in ctx.touched() {
            files.push(TouchedFile {
                path: path.clone(),
                sha256: sha256_file(path)?,
            });
        }

        ctx.sink.emit(ExecEvent::ModuleFinished {
            id: id.into(),
            ok: true,
            error: None,
            elapsed_ms,
        });
        reports.push(ModuleReport {
            id: id.into(),
            status: ModuleStatus::Injected,
            reason: None,
            requirements: req,
            missing,
            files,
        });
    }

    ctx.sink.emit(ExecEvent::RunDone {
        ok: true,
        error: None,
    });

    let report = RunReport {
        generated_at: chrono::Local::now().to_rfc3339(),
        dry_run: ctx.dry_run,
        modules: reports,
    };
    if let Some(raw) = host.report.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let ws = crate::workspace::load_paths(doc)?;
        let path = ws.resolve_config_path(raw)?;
        report.write_json(&path)?;
        tracing::info!(path = %path.display(), "wrote run report");
    }
    Ok(report)
}
