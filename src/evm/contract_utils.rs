/// Derive the callable surface of a contract from its ABI
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    abi::{ParamType, SchemaError},
    types::keccak256,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberKind {
    Constructor,
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutability {
    Payable,
    NonPayable,
    /// `view` and `pure`
    View,
}

/// One constructor or public function of the target contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallableMember {
    pub name: String,
    pub kind: MemberKind,
    /// (parameter name, declared type), in declaration order
    pub params: Vec<(String, ParamType)>,
    pub mutability: Mutability,
}

impl CallableMember {
    pub fn is_payable(&self) -> bool {
        self.mutability == Mutability::Payable
    }

    pub fn param_types(&self) -> impl Iterator<Item = &ParamType> {
        self.params.iter().map(|(_, ty)| ty)
    }

    /// `name(type1,type2)` with canonical type names
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.param_types().join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        set_hash(&self.signature(), &mut out);
        out
    }
}

/// First `out.len()` bytes of the keccak256 of `name`
pub fn set_hash(name: &str, out: &mut [u8]) {
    let hash = keccak256(name.as_bytes());
    out.copy_from_slice(&hash[..out.len()]);
}

/// Raw ABI entry as emitted by the compiler
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbiEntry {
    #[serde(rename = "type", default = "default_entry_type")]
    pub entry_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    pub state_mutability: Option<String>,
    // pre-0.5 compilers
    pub payable: Option<bool>,
    pub constant: Option<bool>,
}

fn default_entry_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl AbiEntry {
    fn mutability(&self) -> Mutability {
        match self.state_mutability.as_deref() {
            Some("payable") => Mutability::Payable,
            Some("view") | Some("pure") => Mutability::View,
            Some(_) => Mutability::NonPayable,
            None if self.payable == Some(true) => Mutability::Payable,
            None if self.constant == Some(true) => Mutability::View,
            None => Mutability::NonPayable,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AbiParseError {
    #[error("invalid ABI json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// The ordered callable members of one contract
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub members: Vec<CallableMember>,
}

impl Interface {
    pub fn constructor(&self) -> Option<&CallableMember> {
        self.members.iter().find(|m| m.kind == MemberKind::Constructor)
    }

    /// Functions in declaration order
    pub fn functions(&self) -> impl Iterator<Item = &CallableMember> {
        self.members.iter().filter(|m| m.kind == MemberKind::Function)
    }
}

/// Map ABI entries to callable members. Events, errors, `fallback` and `receive`
/// are not callable by name and are dropped.
pub fn introspect(entries: &[AbiEntry]) -> Result<Interface, SchemaError> {
    let mut members = Vec::new();
    for entry in entries {
        let (kind, name) = match entry.entry_type.as_str() {
            "function" => (MemberKind::Function, entry.name.clone()),
            "constructor" => (MemberKind::Constructor, "constructor".to_string()),
            other => {
                debug!("skipping ABI entry {} of type {}", entry.name, other);
                continue;
            }
        };
        let params = entry
            .inputs
            .iter()
            .enumerate()
            .map(|(idx, input)| {
                let ty = ParamType::parse(&input.ty).ok_or_else(|| SchemaError {
                    member: name.clone(),
                    param: if input.name.is_empty() {
                        format!("#{}", idx)
                    } else {
                        input.name.clone()
                    },
                    ty: input.ty.clone(),
                })?;
                Ok((input.name.clone(), ty))
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;
        members.push(CallableMember {
            name,
            kind,
            params,
            mutability: entry.mutability(),
        });
    }
    Ok(Interface { members })
}

/// Parse ABI json. Old `solc --combined-json` emits the ABI as a string holding json.
pub fn parse_abi_value(value: &Value) -> Result<Vec<AbiEntry>, serde_json::Error> {
    match value {
        Value::String(s) => serde_json::from_str(s),
        other => serde_json::from_value(other.clone()),
    }
}

pub fn parse_abi_str(data: &str) -> Result<Interface, AbiParseError> {
    let value: Value = serde_json::from_str(data)?;
    let entries = parse_abi_value(&value)?;
    Ok(introspect(&entries)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VAULT_ABI: &str = r#"[
        {"type":"constructor","inputs":[{"name":"owner","type":"address"}],"stateMutability":"nonpayable"},
        {"type":"event","name":"Deposit","inputs":[{"name":"who","type":"address","indexed":true}]},
        {"type":"function","name":"deposit","inputs":[],"outputs":[],"stateMutability":"payable"},
        {"type":"function","name":"withdraw","inputs":[{"name":"amount","type":"uint"}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"balanceOf","inputs":[{"name":"","type":"address"}],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
        {"type":"receive","stateMutability":"payable"},
        {"type":"fallback","stateMutability":"nonpayable"}
    ]"#;

    #[test]
    fn test_introspect_order_and_kinds() {
        let interface = parse_abi_str(VAULT_ABI).unwrap();
        let names = interface.members.iter().map(|m| m.name.as_str()).collect_vec();
        assert_eq!(names, vec!["constructor", "deposit", "withdraw", "balanceOf"]);
        assert_eq!(interface.constructor().unwrap().params[0].1, ParamType::Address);
        assert_eq!(interface.functions().count(), 3);
        assert!(interface.members[1].is_payable());
        assert_eq!(interface.members[3].mutability, Mutability::View);
    }

    #[test]
    fn test_signature_uses_canonical_types() {
        let interface = parse_abi_str(VAULT_ABI).unwrap();
        let withdraw = &interface.members[2];
        assert_eq!(withdraw.signature(), "withdraw(uint256)");
    }

    #[test]
    fn test_selector() {
        let member = CallableMember {
            name: "transfer".to_string(),
            kind: MemberKind::Function,
            params: vec![
                ("to".to_string(), ParamType::Address),
                ("amount".to_string(), ParamType::Uint(256)),
            ],
            mutability: Mutability::NonPayable,
        };
        assert_eq!(hex::encode(member.selector()), "a9059cbb");
    }

    #[test]
    fn test_rejects_composite_types() {
        let abi = r#"[{"type":"function","name":"batch","inputs":[{"name":"to","type":"address[]"}],"stateMutability":"nonpayable"}]"#;
        match parse_abi_str(abi) {
            Err(AbiParseError::Schema(err)) => {
                assert_eq!(err.member, "batch");
                assert_eq!(err.param, "to");
                assert_eq!(err.ty, "address[]");
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_legacy_mutability_flags() {
        let abi = r#"[
            {"type":"function","name":"pay","inputs":[],"payable":true,"constant":false},
            {"type":"function","name":"get","inputs":[],"payable":false,"constant":true}
        ]"#;
        let interface = parse_abi_str(abi).unwrap();
        assert_eq!(interface.members[0].mutability, Mutability::Payable);
        assert_eq!(interface.members[1].mutability, Mutability::View);
    }

    #[test]
    fn test_stringified_abi() {
        let value = Value::String(VAULT_ABI.to_string());
        let entries = parse_abi_value(&value).unwrap();
        assert_eq!(introspect(&entries).unwrap().members.len(), 4);
    }
}
