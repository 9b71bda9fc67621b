/// Turning a contract source or precompiled artifacts into bytecode plus interface
use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use bytes::Bytes;
use glob::glob;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use super::contract_utils::{introspect, parse_abi_str, parse_abi_value, AbiParseError, Interface};

#[derive(Debug, Clone)]
pub struct CompiledContract {
    pub name: String,
    pub interface: Interface,
    pub bytecode: Bytes,
}

#[derive(thiserror::Error, Debug)]
pub enum CompileError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} has no `pragma solidity` directive", .0.display())]
    NoPragma(PathBuf),
    #[error("source requires solc {required}, found {found}")]
    VersionMismatch { required: String, found: String },
    #[error("solc failed: {0}")]
    Solc(String),
    #[error("no deployable contract{}", .0.as_ref().map(|n| format!(" named {}", n)).unwrap_or_default())]
    NoContract(Option<String>),
    #[error("invalid bytecode for {0}")]
    Bytecode(String),
    #[error(transparent)]
    Abi(#[from] AbiParseError),
}

pub trait CompilerService {
    fn compile(&self, path: &Path) -> Result<CompiledContract, CompileError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SolcVersion(pub u32, pub u32, pub u32);

impl SolcVersion {
    fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.').map(|p| p.parse::<u32>().ok());
        Some(Self(parts.next()??, parts.next()??, parts.next()??))
    }
}

impl fmt::Display for SolcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// A `pragma solidity` constraint: operator plus version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pragma {
    pub op: String,
    pub version: SolcVersion,
}

impl Pragma {
    pub fn parse(source: &str) -> Option<Self> {
        let re = Regex::new(r"pragma solidity\s*(\^|>=|<=|>|<|=)?\s*([0-9]+\.[0-9]+\.[0-9]+)\s*;").ok()?;
        let caps = re.captures(source)?;
        Some(Self {
            op: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
            version: SolcVersion::parse(&caps[2])?,
        })
    }

    pub fn accepts(&self, found: SolcVersion) -> bool {
        let want = self.version;
        match self.op.as_str() {
            // caret locks the left-most non-zero component
            "^" if want.0 == 0 => found.0 == 0 && found.1 == want.1 && found >= want,
            "^" => found.0 == want.0 && found >= want,
            ">=" => found >= want,
            ">" => found > want,
            "<=" => found <= want,
            "<" => found < want,
            _ => found == want,
        }
    }
}

impl fmt::Display for Pragma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.version)
    }
}

fn read(path: &Path) -> Result<String, CompileError> {
    fs::read_to_string(path).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn decode_bytecode(name: &str, hex_code: &str) -> Result<Bytes, CompileError> {
    let code = hex::decode(hex_code.trim().trim_start_matches("0x"))
        .map_err(|_| CompileError::Bytecode(name.to_string()))?;
    Ok(Bytes::from(code))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Drives a local `solc` binary
pub struct SolcCompiler {
    pub solc: String,
    pub contract: Option<String>,
}

impl SolcCompiler {
    pub fn new(solc: String, contract: Option<String>) -> Self {
        Self { solc, contract }
    }

    fn run(&self, args: &[&str]) -> Result<String, CompileError> {
        let output = Command::new(&self.solc)
            .args(args)
            .output()
            .map_err(|e| CompileError::Solc(format!("cannot run {}: {}", self.solc, e)))?;
        if !output.status.success() {
            return Err(CompileError::Solc(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub fn version(&self) -> Result<SolcVersion, CompileError> {
        let out = self.run(&["--version"])?;
        parse_solc_version(&out).ok_or_else(|| CompileError::Solc(format!("unrecognized version output: {}", out.trim())))
    }
}

pub fn parse_solc_version(output: &str) -> Option<SolcVersion> {
    let re = Regex::new(r"Version:\s*([0-9]+\.[0-9]+\.[0-9]+)").ok()?;
    SolcVersion::parse(&re.captures(output)?[1])
}

/// Pick a contract out of `solc --combined-json abi,bin` output: the requested name,
/// else the one named like the source file, else the first with bytecode.
pub fn select_contract(combined: &Value, stem: &str, wanted: Option<&str>) -> Result<CompiledContract, CompileError> {
    let contracts = combined["contracts"]
        .as_object()
        .ok_or_else(|| CompileError::Solc("combined json has no contracts".to_string()))?;
    let mut candidates: Vec<(String, &Value)> = contracts
        .iter()
        .map(|(key, v)| (key.rsplit(':').next().unwrap_or(key).to_string(), v))
        .filter(|(_, v)| v["bin"].as_str().map(|b| !b.is_empty()).unwrap_or(false))
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    let chosen = match wanted {
        Some(name) => candidates.iter().find(|(n, _)| n == name),
        None => candidates
            .iter()
            .find(|(n, _)| n == stem)
            .or_else(|| candidates.first()),
    };
    let (name, info) = chosen
        .map(|(n, v)| (n.clone(), *v))
        .ok_or_else(|| CompileError::NoContract(wanted.map(str::to_string)))?;
    let entries = parse_abi_value(&info["abi"]).map_err(AbiParseError::Json)?;
    let interface = introspect(&entries).map_err(AbiParseError::Schema)?;
    Ok(CompiledContract {
        bytecode: decode_bytecode(&name, info["bin"].as_str().unwrap_or_default())?,
        name,
        interface,
    })
}

impl CompilerService for SolcCompiler {
    fn compile(&self, path: &Path) -> Result<CompiledContract, CompileError> {
        let source = read(path)?;
        let pragma = Pragma::parse(&source).ok_or_else(|| CompileError::NoPragma(path.to_path_buf()))?;
        let found = self.version()?;
        if !pragma.accepts(found) {
            return Err(CompileError::VersionMismatch {
                required: pragma.to_string(),
                found: found.to_string(),
            });
        }
        info!("Compiling {} with solc {}", path.display(), found);
        let path_str = path.to_string_lossy();
        let out = self.run(&[
            "--combined-json",
            "abi,bin",
            "--optimize",
            "--optimize-runs",
            "200",
            path_str.as_ref(),
        ])?;
        let combined: Value = serde_json::from_str(&out).map_err(|e| CompileError::Solc(e.to_string()))?;
        select_contract(&combined, &file_stem(path), self.contract.as_deref())
    }
}

/// Loads `<Name>.abi` + `<Name>.bin` pairs produced ahead of time
pub struct ArtifactLoader {
    pub contract: Option<String>,
}

impl ArtifactLoader {
    pub fn new(contract: Option<String>) -> Self {
        Self { contract }
    }

    /// Stems that have both an `.abi` and a non-empty `.bin` next to them
    fn stems_in(&self, dir: &Path) -> Vec<PathBuf> {
        let pattern = format!("{}/*.abi", dir.display());
        let mut stems = vec![];
        for entry in glob(&pattern).into_iter().flatten().flatten() {
            let stem = entry.with_extension("");
            let bin = stem.with_extension("bin");
            if fs::metadata(&bin).map(|m| m.len() > 0).unwrap_or(false) {
                stems.push(stem);
            }
        }
        stems.sort();
        stems
    }

    fn load(&self, stem: &Path) -> Result<CompiledContract, CompileError> {
        let name = file_stem(stem);
        debug!("Loading artifacts for {}", name);
        let interface = parse_abi_str(&read(&stem.with_extension("abi"))?)?;
        let bytecode = decode_bytecode(&name, &read(&stem.with_extension("bin"))?)?;
        if bytecode.is_empty() {
            return Err(CompileError::NoContract(Some(name)));
        }
        Ok(CompiledContract {
            name,
            interface,
            bytecode,
        })
    }
}

impl CompilerService for ArtifactLoader {
    fn compile(&self, path: &Path) -> Result<CompiledContract, CompileError> {
        if path.is_dir() {
            let stems = self.stems_in(path);
            let stem = match &self.contract {
                Some(name) => stems.iter().find(|s| file_stem(s) == *name),
                None => stems.first(),
            };
            let stem = stem.ok_or_else(|| CompileError::NoContract(self.contract.clone()))?;
            return self.load(stem);
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("abi") | Some("bin") => self.load(&path.with_extension("")),
            _ => self.load(path),
        }
    }
}

/// `.sol` sources go through solc, anything else is treated as artifacts
pub fn compiler_for(path: &Path, solc: String, contract: Option<String>) -> Box<dyn CompilerService> {
    if path.extension().and_then(|e| e.to_str()) == Some("sol") {
        Box::new(SolcCompiler::new(solc, contract))
    } else {
        Box::new(ArtifactLoader::new(contract))
    }
}
