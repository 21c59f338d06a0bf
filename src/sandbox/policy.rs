//! Isolation levels and the capability lists they grant

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Named policy for custom component source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    Strict,
    #[default]
    Moderate,
    #[serde(alias = "disabled")]
    Permissive,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Moderate => write!(f, "moderate"),
            Self::Permissive => write!(f, "permissive"),
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "moderate" => Ok(Self::Moderate),
            "permissive" | "disabled" => Ok(Self::Permissive),
            other => Err(format!(
                "unknown isolation level '{}' (expected strict, moderate or permissive)",
                other
            )),
        }
    }
}

/// Data and collection utilities every level may import
const SAFE_MODULES: &[&str] = &[
    "__future__", "abc", "base64", "bisect", "collections", "contextlib", "copy", "csv",
    "dataclasses", "datetime", "decimal", "enum", "fractions", "functools", "hashlib", "heapq",
    "html", "itertools", "json", "math", "numbers", "operator", "random", "re", "statistics",
    "string", "textwrap", "time", "typing", "typing_extensions", "uuid", "warnings", "zoneinfo",
];

const PROCESS_MODULES: &[&str] = &[
    "os", "sys", "subprocess", "multiprocessing", "signal", "ctypes", "cffi", "pty", "resource",
    "posix", "nt", "platform",
];

const FILESYSTEM_MODULES: &[&str] = &[
    "shutil", "pathlib", "glob", "fileinput", "zipfile", "tarfile", "sqlite3", "mmap",
];

const NETWORK_MODULES: &[&str] = &[
    "socket", "ssl", "requests", "httpx", "urllib", "urllib3", "http", "aiohttp", "ftplib",
    "smtplib", "telnetlib", "websockets", "xmlrpc",
];

const DYNAMIC_MODULES: &[&str] = &[
    "importlib", "builtins", "runpy", "code", "codeop", "pickle", "marshal", "shelve", "imp",
    "pkgutil", "zipimport",
];

/// Only blocked at `Strict`
const STRICT_MODULES: &[&str] = &[
    "asyncio", "threading", "concurrent", "tempfile", "io", "inspect", "gc", "sysconfig",
];

const DYNAMIC_BUILTINS: &[&str] = &["eval", "exec", "compile", "__import__", "globals", "breakpoint"];

const ESCAPE_NAMES: &[&str] = &[
    "__builtins__", "__subclasses__", "__globals__", "__code__", "__self__", "__dict__",
];

const STRICT_BUILTINS: &[&str] = &["open", "input", "getattr", "setattr", "delattr", "vars", "locals"];

/// Extra capability rules layered on top of a level's defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverrides {
    pub extra_allowed_modules: Vec<String>,
    pub extra_blocked_modules: Vec<String>,
    pub extra_blocked_builtins: Vec<String>,
}

/// Capability list applied to custom component source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationPolicy {
    pub level: IsolationLevel,
    pub allowed_modules: BTreeSet<String>,
    /// Module name -> rule that blocks it
    pub blocked_modules: BTreeMap<String, String>,
    /// Builtin name -> rule that blocks it
    pub blocked_builtins: BTreeMap<String, String>,
    /// Reject any module that is not in `allowed_modules`
    pub deny_unlisted_modules: bool,
}

impl IsolationPolicy {
    /// Default capability list for a level
    pub fn for_level(level: IsolationLevel) -> Self {
        let mut policy = Self {
            level,
            allowed_modules: SAFE_MODULES.iter().map(|m| m.to_string()).collect(),
            blocked_modules: BTreeMap::new(),
            blocked_builtins: BTreeMap::new(),
            deny_unlisted_modules: false,
        };

        if level == IsolationLevel::Permissive {
            return policy;
        }

        policy.block_modules(PROCESS_MODULES, "process access");
        policy.block_modules(FILESYSTEM_MODULES, "filesystem access");
        policy.block_modules(NETWORK_MODULES, "network access");
        policy.block_modules(DYNAMIC_MODULES, "dynamic evaluation");
        policy.block_builtins(DYNAMIC_BUILTINS, "dynamic evaluation");
        policy.block_builtins(ESCAPE_NAMES, "introspection escape");

        if level == IsolationLevel::Strict {
            policy.block_modules(STRICT_MODULES, "restricted at strict isolation");
            policy.block_builtins(STRICT_BUILTINS, "restricted at strict isolation");
            policy.deny_unlisted_modules = true;
        }

        policy
    }

    pub fn with_overrides(mut self, overrides: &PolicyOverrides) -> Self {
        for module in &overrides.extra_allowed_modules {
            self.blocked_modules.remove(module);
            self.allowed_modules.insert(module.clone());
        }
        for module in &overrides.extra_blocked_modules {
            self.allowed_modules.remove(module);
            self.blocked_modules
                .insert(module.clone(), "blocked by configuration".to_string());
        }
        for builtin in &overrides.extra_blocked_builtins {
            self.blocked_builtins
                .insert(builtin.clone(), "blocked by configuration".to_string());
        }
        self
    }

    fn block_modules(&mut self, modules: &[&str], rule: &str) {
        for module in modules {
            self.blocked_modules.insert(module.to_string(), rule.to_string());
        }
    }

    fn block_builtins(&mut self, builtins: &[&str], rule: &str) {
        for builtin in builtins {
            self.blocked_builtins.insert(builtin.to_string(), rule.to_string());
        }
    }

    /// Check a (possibly dotted) module path; returns the violated rule
    pub fn check_module(&self, module: &str) -> Result<(), String> {
        let root = module.split('.').next().unwrap_or(module);

        if let Some(rule) = self
            .blocked_modules
            .get(module)
            .or_else(|| self.blocked_modules.get(root))
        {
            return Err(rule.clone());
        }

        if self.deny_unlisted_modules
            && !self.allowed_modules.contains(module)
            && !self.allowed_modules.contains(root)
        {
            return Err(format!("not on the {} allow-list", self.level));
        }

        Ok(())
    }

    /// Check a builtin or dunder name; returns the violated rule
    pub fn check_builtin(&self, name: &str) -> Result<(), String> {
        match self.blocked_builtins.get(name) {
            Some(rule) => Err(rule.clone()),
            None => Ok(()),
        }
    }
}

impl Default for IsolationPolicy {
    fn default() -> Self {
        Self::for_level(IsolationLevel::default())
    }
}
