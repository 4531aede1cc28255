/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Ark Enclave Runtime.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use regex::Regex;
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxViolation {
    #[error("SandboxViolation: path '{0}' resolves outside the sandbox root")]
    PathEscape(String),
    #[error("SandboxViolation: access to protected path '{0}' denied")]
    ProtectedPath(String),
    #[error("SandboxViolation: cannot resolve path '{0}'")]
    Unresolvable(String),
    #[error("SandboxViolation: command '{0}' is not in the whitelist")]
    CommandDenied(String),
    #[error("SandboxViolation: empty command vector")]
    EmptyCommand,
    #[error("SandboxViolation: capability '{0}' not granted")]
    MissingCapability(Capability),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Exec,
    FsRead,
    FsWrite,
    Net,
    Crypto,
}

impl Capability {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim() {
            "exec" => Some(Capability::Exec),
            "fs_read" => Some(Capability::FsRead),
            "fs_write" => Some(Capability::FsWrite),
            "net" => Some(Capability::Net),
            "crypto" => Some(Capability::Crypto),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Capability::Exec => "exec",
            Capability::FsRead => "fs_read",
            Capability::FsWrite => "fs_write",
            Capability::Net => "net",
            Capability::Crypto => "crypto",
        };
        write!(f, "{}", tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// Binaries an untrusted program may spawn unless ARK_UNSAFE_EXEC overrides.
/// HARDENED: no interpreters, no compilers, no VCS.
pub const DEFAULT_WHITELIST: &[&str] = &["ls", "grep", "cat", "echo", "date", "whoami", "clear"];

/// Paths that stay off-limits even with fs capabilities granted, matched as
/// anchored patterns against the root-relative canonical path.
const PROTECTED_PATTERNS: &[&str] = &[
    r"^\.git(/|$)",
    r"^target(/|$)",
    r"^core(/|$)",
    r"^src(/|$)",
    r"^meta(/|$)",
    r"^web(/|$)",
    r"^Cargo\.toml$",
    r"^Cargo\.lock$",
    r"^Dockerfile$",
    r"^README\.md$",
    r"^LICENSE$",
];

const DEFAULT_MAX_OUTPUT_KB: usize = 64;
const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CAPS: &[Capability] = &[Capability::FsRead, Capability::Crypto];

pub const TRUNCATION_MARKER: &str = "[truncated]";

/// Immutable per-process capability policy. Constructed once (from the
/// environment or explicitly in a harness) and read by every effectful
/// intrinsic.
#[derive(Debug, Clone)]
pub struct Policy {
    capabilities: HashSet<Capability>,
    root: PathBuf,
    protected: Vec<Regex>,
    command_whitelist: Vec<String>,
    pub max_output_kb: usize,
    pub exec_timeout: Duration,
    allow_unsafe_exec: bool,
}

impl Policy {
    pub fn new(root: impl Into<PathBuf>, caps: &[Capability]) -> Self {
        let root: PathBuf = root.into();
        // Canonicalize eagerly so containment checks compare like with like.
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Policy {
            capabilities: caps.iter().copied().collect(),
            root,
            protected: default_protected(),
            command_whitelist: DEFAULT_WHITELIST.iter().map(|s| s.to_string()).collect(),
            max_output_kb: DEFAULT_MAX_OUTPUT_KB,
            exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            allow_unsafe_exec: false,
        }
    }

    /// Read the process-wide policy from the environment:
    /// ARK_CAPS, ARK_UNSAFE_EXEC, ARK_MAX_OUTPUT_KB, ARK_EXEC_TIMEOUT_SECS.
    pub fn from_env() -> Self {
        let root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let caps: Vec<Capability> = match env::var("ARK_CAPS") {
            Ok(raw) => raw.split(',').filter_map(Capability::parse).collect(),
            Err(_) => DEFAULT_CAPS.to_vec(),
        };
        let mut policy = Policy::new(root, &caps);

        if env::var("ARK_UNSAFE_EXEC").unwrap_or_default() == "true" {
            policy.allow_unsafe_exec = true;
        }
        if let Ok(kb) = env::var("ARK_MAX_OUTPUT_KB") {
            if let Ok(kb) = kb.parse::<usize>() {
                policy.max_output_kb = kb;
            }
        }
        if let Ok(secs) = env::var("ARK_EXEC_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                policy.exec_timeout = Duration::from_secs(secs);
            }
        }
        policy
    }

    pub fn with_whitelist(mut self, whitelist: Vec<String>) -> Self {
        self.command_whitelist = whitelist;
        self
    }

    pub fn with_max_output_kb(mut self, kb: usize) -> Self {
        self.max_output_kb = kb;
        self
    }

    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn with_unsafe_exec(mut self, allow: bool) -> Self {
        self.allow_unsafe_exec = allow;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn check_capability(&self, cap: Capability) -> Result<(), SandboxViolation> {
        if self.capabilities.contains(&cap) {
            Ok(())
        } else {
            eprintln!(
                "[Ark:Sandbox] Security Violation: capability '{}' not granted.",
                cap
            );
            Err(SandboxViolation::MissingCapability(cap))
        }
    }

    /// Resolve `path` to a canonical absolute form and enforce containment,
    /// protected patterns, and the fs capability for `mode`. Callers must
    /// perform I/O on the returned canonical path, never the literal one.
    pub fn check_path(&self, path: &str, mode: AccessMode) -> Result<PathBuf, SandboxViolation> {
        match mode {
            AccessMode::Read => self.check_capability(Capability::FsRead)?,
            AccessMode::Write => self.check_capability(Capability::FsWrite)?,
        }

        let canonical = self.resolve(path)?;
        if !canonical.starts_with(&self.root) {
            eprintln!(
                "[Ark:Sandbox] Security Violation: path '{}' resolves outside the sandbox root.",
                path
            );
            return Err(SandboxViolation::PathEscape(path.to_string()));
        }

        if let Ok(rel) = canonical.strip_prefix(&self.root) {
            let rel_str = rel.to_string_lossy();
            for pattern in &self.protected {
                if pattern.is_match(&rel_str) {
                    eprintln!(
                        "[Ark:FS] Security Violation: access to protected path '{}' denied.",
                        rel_str
                    );
                    return Err(SandboxViolation::ProtectedPath(rel_str.into_owned()));
                }
            }
        }

        Ok(canonical)
    }

    /// Exact whitelist match on the command's file name. No prefix matching,
    /// and the argument vector is never reassembled into a shell string.
    pub fn check_command(&self, argv: &[String]) -> Result<(), SandboxViolation> {
        let program = argv.first().ok_or(SandboxViolation::EmptyCommand)?;
        if self.allow_unsafe_exec {
            eprintln!("[Ark:Exec] WARNING: command whitelist bypassed (ARK_UNSAFE_EXEC=true).");
            return Ok(());
        }
        let name = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");
        if !self.command_whitelist.iter().any(|w| w == name) {
            eprintln!(
                "[Ark:Exec] Security Violation: command '{}' is not in the whitelist.",
                program
            );
            return Err(SandboxViolation::CommandDenied(program.clone()));
        }
        Ok(())
    }

    /// Canonicalize, falling back to the nearest existing parent for paths
    /// that do not exist yet (a write target is created by the caller, so the
    /// parent directory must already resolve inside the sandbox).
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxViolation> {
        let p = Path::new(path);
        let abs = if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        };

        if abs.exists() {
            return std::fs::canonicalize(&abs)
                .map_err(|_| SandboxViolation::Unresolvable(path.to_string()));
        }

        let parent = abs
            .parent()
            .ok_or_else(|| SandboxViolation::Unresolvable(path.to_string()))?;
        let file = abs
            .file_name()
            .ok_or_else(|| SandboxViolation::Unresolvable(path.to_string()))?;
        let canonical_parent = std::fs::canonicalize(parent)
            .map_err(|_| SandboxViolation::Unresolvable(path.to_string()))?;
        Ok(canonical_parent.join(file))
    }
}

fn default_protected() -> Vec<Regex> {
    PROTECTED_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
}

/// Captured result of a sandboxed subprocess. Truncation and timeout are
/// reported as metadata, never as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
    pub truncated: bool,
    pub timed_out: bool,
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("{0}")]
    Sandbox(#[from] SandboxViolation),
    #[error("RuntimeError: failed to run '{0}': {1}")]
    Spawn(String, std::io::Error),
}

/// Clip a captured stream at `limit` bytes, appending the truncation marker.
pub fn apply_limit(mut bytes: Vec<u8>, limit: usize) -> (String, bool) {
    if bytes.len() <= limit {
        return (String::from_utf8_lossy(&bytes).into_owned(), false);
    }
    bytes.truncate(limit);
    let mut s = String::from_utf8_lossy(&bytes).into_owned();
    s.push('\n');
    s.push_str(TRUNCATION_MARKER);
    (s, true)
}

/// Run a whitelisted command with a discrete argv vector, capturing output up
/// to the policy limit and killing the child at the policy timeout.
pub fn run_command(policy: &Policy, argv: &[String]) -> Result<CapturedOutput, ExecError> {
    policy.check_capability(Capability::Exec)?;
    policy.check_command(argv)?;

    let program = &argv[0];
    eprintln!("[Ark:Exec] {} {:?}", program, &argv[1..]);

    let mut child = Command::new(program)
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ExecError::Spawn(program.clone(), e))?;

    let limit = policy.max_output_kb * 1024;
    // Store one byte past the limit so truncation is detectable; keep
    // draining past that so the child never blocks on a full pipe.
    let out_handle = child.stdout.take().map(|s| capture_stream(s, limit + 1));
    let err_handle = child.stderr.take().map(|s| capture_stream(s, limit + 1));

    let (status, timed_out) = wait_with_timeout(&mut child, policy.exec_timeout, program)
        .map_err(|e| ExecError::Spawn(program.clone(), e))?;

    let raw_out = out_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let raw_err = err_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    let (stdout, out_truncated) = apply_limit(raw_out, limit);
    let (stderr, err_truncated) = apply_limit(raw_err, limit);

    Ok(CapturedOutput {
        stdout,
        stderr,
        status,
        truncated: out_truncated || err_truncated,
        timed_out,
    })
}

fn capture_stream<R: Read + Send + 'static>(mut reader: R, cap: usize) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut stored = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stored.len() < cap {
                        let take = (cap - stored.len()).min(n);
                        stored.extend_from_slice(&buf[..take]);
                    }
                }
            }
        }
        stored
    })
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    program: &str,
) -> std::io::Result<(i32, bool)> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status.code().unwrap_or(-1), false));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            eprintln!(
                "[Ark:Exec] '{}' exceeded the {}s timeout and was terminated.",
                program,
                timeout.as_secs()
            );
            return Ok((-1, true));
        }
        thread::sleep(Duration::from_millis(10));
    }
}
