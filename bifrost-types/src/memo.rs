// Copyright (c) Bifrost Contributors
// SPDX-License-Identifier: Apache-2.0

//! The memo grammar. The memo is the sole control channel between users and
//! the network: `verb[:arg1[:arg2[:arg3]]]`, verbs case-insensitive,
//! addresses and hashes case-sensitive.

use crate::asset::Asset;
use crate::chain::Address;
use crate::tx::TxId;
use crate::TypeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_BASIS_POINTS: u64 = 10_000;

/// Parsed user intent carried by a transaction memo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Memo {
    Create {
        asset: Asset,
    },
    Add {
        asset: Asset,
    },
    Stake {
        asset: Asset,
        /// Required when staking from a chain the asset does not live on.
        cross_chain_address: Option<Address>,
    },
    Withdraw {
        asset: Asset,
        /// Share to withdraw, in basis points of 10_000. `None` means all.
        basis_points: Option<u64>,
    },
    Swap {
        asset: Asset,
        destination: Option<Address>,
        /// Price protection: minimum output, 0 disables.
        slip_limit: u64,
    },
    Outbound {
        in_hash: TxId,
    },
    Refund {
        in_hash: TxId,
    },
    Bond {
        node_address: Address,
    },
    Leave,
    Migrate {
        block_height: i64,
    },
    YggdrasilFund {
        block_height: i64,
    },
    YggdrasilReturn {
        block_height: i64,
    },
    Ragnarok,
    Reserve,
    Gas,
    Admin {
        key: String,
        value: String,
    },
}

impl Memo {
    /// Default memo attached to an outbound that answers `in_hash`.
    pub fn outbound(in_hash: TxId) -> Memo {
        Memo::Outbound { in_hash }
    }

    /// Inbound verbs: user intents that arrive on deposits.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            Memo::Create { .. }
                | Memo::Add { .. }
                | Memo::Stake { .. }
                | Memo::Withdraw { .. }
                | Memo::Swap { .. }
                | Memo::Bond { .. }
                | Memo::Leave
                | Memo::Reserve
                | Memo::Gas
        )
    }

    /// Outbound verbs: only ever written by the network itself.
    pub fn is_outbound(&self) -> bool {
        matches!(self, Memo::Outbound { .. } | Memo::Refund { .. })
    }

    /// Vault-internal moves that never pay the network transaction fee.
    pub fn is_fee_exempt(&self) -> bool {
        matches!(
            self,
            Memo::YggdrasilFund { .. }
                | Memo::YggdrasilReturn { .. }
                | Memo::Migrate { .. }
                | Memo::Ragnarok
        )
    }

    pub fn is_yggdrasil_return(&self) -> bool {
        matches!(self, Memo::YggdrasilReturn { .. })
    }

    pub fn is_migrate(&self) -> bool {
        matches!(self, Memo::Migrate { .. })
    }

    pub fn block_height(&self) -> i64 {
        match self {
            Memo::Migrate { block_height }
            | Memo::YggdrasilFund { block_height }
            | Memo::YggdrasilReturn { block_height } => *block_height,
            _ => 0,
        }
    }
}

fn parse_asset(part: Option<&str>) -> Result<Asset, TypeError> {
    let s = part.ok_or_else(|| TypeError::InvalidMemo("missing asset".to_string()))?;
    s.parse()
        .map_err(|_| TypeError::InvalidMemo(format!("invalid asset: {s}")))
}

/// Destination addresses inside memos are only shape-checked here; full
/// validation belongs to the chain adapter.
fn parse_addr(s: &str) -> Result<Address, TypeError> {
    if s.len() < 8 || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(TypeError::InvalidMemo(format!("invalid address: {s}")));
    }
    Ok(Address::new(s))
}

fn parse_uint(s: &str, what: &str) -> Result<u64, TypeError> {
    s.parse::<u64>()
        .map_err(|_| TypeError::InvalidMemo(format!("invalid {what}: {s}")))
}

fn parse_height(part: Option<&str>) -> Result<i64, TypeError> {
    match part {
        None | Some("") => Ok(0),
        Some(s) => s
            .parse::<i64>()
            .map_err(|_| TypeError::InvalidMemo(format!("invalid block height: {s}"))),
    }
}

impl FromStr for Memo {
    type Err = TypeError;

    fn from_str(memo: &str) -> Result<Self, Self::Err> {
        if memo.is_empty() {
            return Err(TypeError::InvalidMemo("empty memo".to_string()));
        }
        let parts: Vec<&str> = memo.split(':').collect();
        let verb = parts[0].to_ascii_lowercase();
        let arg = |i: usize| parts.get(i).copied().filter(|s| !s.is_empty());

        match verb.as_str() {
            "create" | "c" => Ok(Memo::Create {
                asset: parse_asset(arg(1))?,
            }),
            "add" | "%" => Ok(Memo::Add {
                asset: parse_asset(arg(1))?,
            }),
            "stake" | "+" => Ok(Memo::Stake {
                asset: parse_asset(arg(1))?,
                cross_chain_address: arg(2).map(parse_addr).transpose()?,
            }),
            "withdraw" | "-" => {
                let asset = parse_asset(arg(1))?;
                let basis_points = match arg(2) {
                    None => None,
                    Some(s) => {
                        let bp = parse_uint(s, "basis points")?;
                        if bp > MAX_BASIS_POINTS {
                            return Err(TypeError::InvalidMemo(format!(
                                "basis points {bp} above {MAX_BASIS_POINTS}"
                            )));
                        }
                        Some(bp)
                    }
                };
                Ok(Memo::Withdraw {
                    asset,
                    basis_points,
                })
            }
            "swap" | "=" => {
                let destination = arg(2).map(parse_addr).transpose()?;
                // a slip limit without a destination has nothing to protect
                let slip_limit = match (&destination, arg(3)) {
                    (Some(_), Some(s)) => parse_uint(s, "slip limit")?,
                    _ => 0,
                };
                Ok(Memo::Swap {
                    asset: parse_asset(arg(1))?,
                    destination,
                    slip_limit,
                })
            }
            "outbound" => Ok(Memo::Outbound {
                in_hash: TxId::new(
                    arg(1).ok_or_else(|| TypeError::InvalidMemo("missing tx hash".to_string()))?,
                ),
            }),
            "refund" => Ok(Memo::Refund {
                in_hash: TxId::new(
                    arg(1).ok_or_else(|| TypeError::InvalidMemo("missing tx hash".to_string()))?,
                ),
            }),
            "bond" => Ok(Memo::Bond {
                node_address: parse_addr(
                    arg(1)
                        .ok_or_else(|| TypeError::InvalidMemo("missing node address".to_string()))?,
                )?,
            }),
            "leave" => Ok(Memo::Leave),
            "migrate" => Ok(Memo::Migrate {
                block_height: parse_height(arg(1))?,
            }),
            "yggdrasil+" => Ok(Memo::YggdrasilFund {
                block_height: parse_height(arg(1))?,
            }),
            "yggdrasil-" => Ok(Memo::YggdrasilReturn {
                block_height: parse_height(arg(1))?,
            }),
            "ragnarok" => Ok(Memo::Ragnarok),
            "reserve" => Ok(Memo::Reserve),
            "gas" => Ok(Memo::Gas),
            "admin" | "!" => {
                // admin:key:NAME:VALUE
                let cmd = arg(1)
                    .ok_or_else(|| TypeError::InvalidMemo("missing admin command".to_string()))?;
                if !cmd.eq_ignore_ascii_case("key") {
                    return Err(TypeError::InvalidMemo(format!("bogus admin command: {cmd}")));
                }
                let key = arg(2)
                    .ok_or_else(|| TypeError::InvalidMemo("missing admin key".to_string()))?;
                let value = arg(3)
                    .ok_or_else(|| TypeError::InvalidMemo("missing admin value".to_string()))?;
                Ok(Memo::Admin {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            }
            _ => Err(TypeError::InvalidMemo(format!("unknown verb: {}", parts[0]))),
        }
    }
}

impl fmt::Display for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Memo::Create { asset } => write!(f, "create:{asset}"),
            Memo::Add { asset } => write!(f, "add:{asset}"),
            Memo::Stake {
                asset,
                cross_chain_address,
            } => match cross_chain_address {
                Some(addr) => write!(f, "stake:{asset}:{addr}"),
                None => write!(f, "stake:{asset}"),
            },
            Memo::Withdraw {
                asset,
                basis_points,
            } => match basis_points {
                Some(bp) => write!(f, "withdraw:{asset}:{bp}"),
                None => write!(f, "withdraw:{asset}"),
            },
            Memo::Swap {
                asset,
                destination,
                slip_limit,
            } => match (destination, slip_limit) {
                (Some(dest), 0) => write!(f, "swap:{asset}:{dest}"),
                (Some(dest), limit) => write!(f, "swap:{asset}:{dest}:{limit}"),
                (None, _) => write!(f, "swap:{asset}"),
            },
            Memo::Outbound { in_hash } => write!(f, "outbound:{in_hash}"),
            Memo::Refund { in_hash } => write!(f, "refund:{in_hash}"),
            Memo::Bond { node_address } => write!(f, "bond:{node_address}"),
            Memo::Leave => write!(f, "leave"),
            Memo::Migrate { block_height } => match block_height {
                0 => write!(f, "migrate"),
                h => write!(f, "migrate:{h}"),
            },
            Memo::YggdrasilFund { block_height } => match block_height {
                0 => write!(f, "yggdrasil+"),
                h => write!(f, "yggdrasil+:{h}"),
            },
            Memo::YggdrasilReturn { block_height } => match block_height {
                0 => write!(f, "yggdrasil-"),
                h => write!(f, "yggdrasil-:{h}"),
            },
            Memo::Ragnarok => write!(f, "ragnarok"),
            Memo::Reserve => write!(f, "reserve"),
            Memo::Gas => write!(f, "gas"),
            Memo::Admin { key, value } => write!(f, "admin:key:{key}:{value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_abbreviated() {
        let memo: Memo = "c:RUNE-1BA".parse().unwrap();
        assert!(matches!(memo, Memo::Create { ref asset } if asset.to_string() == "BNB.RUNE-1BA"));

        let memo: Memo = "%:RUNE-1BA".parse().unwrap();
        assert!(matches!(memo, Memo::Add { .. }));

        let memo: Memo = "+:RUNE-1BA".parse().unwrap();
        assert!(matches!(memo, Memo::Stake { .. }));

        let memo: Memo = "-:RUNE-1BA:25".parse().unwrap();
        assert!(matches!(
            memo,
            Memo::Withdraw {
                basis_points: Some(25),
                ..
            }
        ));

        let memo: Memo = "=:RUNE-1BA:bnb1lejrrtta9cgr49fuh7ktu3sddhe0ff7wenlpn6:870000000"
            .parse()
            .unwrap();
        match memo {
            Memo::Swap {
                asset,
                destination,
                slip_limit,
            } => {
                assert_eq!(asset.to_string(), "BNB.RUNE-1BA");
                assert_eq!(
                    destination.unwrap().as_str(),
                    "bnb1lejrrtta9cgr49fuh7ktu3sddhe0ff7wenlpn6"
                );
                assert_eq!(slip_limit, 870000000);
            }
            other => panic!("expected swap memo, got {other:?}"),
        }
    }

    #[test]
    fn test_swap_optional_slip() {
        let memo: Memo = "=:RUNE-1BA:bnb1lejrrtta9cgr49fuh7ktu3sddhe0ff7wenlpn6"
            .parse()
            .unwrap();
        assert!(matches!(memo, Memo::Swap { slip_limit: 0, .. }));

        // trailing colon with an empty slip limit is accepted as zero
        let memo: Memo = "=:RUNE-1BA:bnb1lejrrtta9cgr49fuh7ktu3sddhe0ff7wenlpn6:"
            .parse()
            .unwrap();
        assert!(matches!(memo, Memo::Swap { slip_limit: 0, .. }));
    }

    #[test]
    fn test_parse_verbs() {
        assert!(matches!("leave:whatever".parse::<Memo>().unwrap(), Memo::Leave));
        assert!(matches!("gas".parse::<Memo>().unwrap(), Memo::Gas));
        assert!(matches!("reserve".parse::<Memo>().unwrap(), Memo::Reserve));
        assert!(matches!("ragnarok".parse::<Memo>().unwrap(), Memo::Ragnarok));
        assert!(matches!(
            "yggdrasil+".parse::<Memo>().unwrap(),
            Memo::YggdrasilFund { block_height: 0 }
        ));
        assert!(matches!(
            "yggdrasil-:120".parse::<Memo>().unwrap(),
            Memo::YggdrasilReturn { block_height: 120 }
        ));
        assert!(matches!(
            "migrate".parse::<Memo>().unwrap(),
            Memo::Migrate { block_height: 0 }
        ));
        assert!(matches!(
            "MIGRATE:42".parse::<Memo>().unwrap(),
            Memo::Migrate { block_height: 42 }
        ));
        assert!(matches!(
            "outbound:A1F9".parse::<Memo>().unwrap(),
            Memo::Outbound { .. }
        ));
    }

    #[test]
    fn test_parse_failures() {
        assert!("".parse::<Memo>().is_err());
        assert!("bogus".parse::<Memo>().is_err());
        // missing symbol
        assert!("CREATE".parse::<Memo>().is_err());
        assert!("c:".parse::<Memo>().is_err());
        // withdraw basis points are optional but must be numeric and bounded
        assert!("-:bnb".parse::<Memo>().is_ok());
        assert!("-:bnb:twenty-two".parse::<Memo>().is_err());
        assert!("-:bnb:10001".parse::<Memo>().is_err());
        // bad destination (underscore)
        assert!("=:bnb:bad_DES:5".parse::<Memo>().is_err());
        // bad slip limit
        assert!("=:bnb:bnb1lejrrtta9cgr49fuh7ktu3sddhe0ff7wenlpn6:five"
            .parse::<Memo>()
            .is_err());
        // admin needs a known command plus key and value
        assert!("!:key:val".parse::<Memo>().is_err());
        assert!("!:bogus:key:value".parse::<Memo>().is_err());
        assert!("!:key:name:value".parse::<Memo>().is_ok());
        assert!("nextpool:whatever".parse::<Memo>().is_err());
    }

    #[test]
    fn test_round_trip_every_verb() {
        let memos = vec![
            "create:BNB.RUNE-1BA",
            "add:BNB.BNB",
            "stake:BNB.BNB:bnb1lejrrtta9cgr49fuh7ktu3sddhe0ff7wenlpn6",
            "stake:BNB.BNB",
            "withdraw:BNB.BNB:5000",
            "withdraw:BNB.BNB",
            "swap:BNB.RUNE-A1F:bnb1lejrrtta9cgr49fuh7ktu3sddhe0ff7wenlpn6:870000000",
            "swap:BNB.RUNE-A1F:bnb1lejrrtta9cgr49fuh7ktu3sddhe0ff7wenlpn6",
            "outbound:A1F9C2",
            "refund:A1F9C2",
            "bond:thor1xd4j3gk9frpxh8r22skss2lu6vhr9pii12345",
            "leave",
            "migrate:240",
            "yggdrasil+:240",
            "yggdrasil-:240",
            "ragnarok",
            "reserve",
            "gas",
            "admin:key:name:value",
        ];
        for raw in memos {
            let memo: Memo = raw.parse().unwrap();
            let formatted = memo.to_string();
            let reparsed: Memo = formatted.parse().unwrap();
            assert_eq!(memo, reparsed, "round trip failed for {raw}");
        }
    }

    #[test]
    fn test_classification() {
        let swap: Memo = "swap:BNB.BNB:bnb1lejrrtta9cgr49fuh7ktu3sddhe0ff7wenlpn6"
            .parse()
            .unwrap();
        assert!(swap.is_inbound() && !swap.is_outbound() && !swap.is_fee_exempt());

        let outbound: Memo = "outbound:A1".parse().unwrap();
        assert!(outbound.is_outbound() && !outbound.is_inbound());

        for raw in ["migrate:1", "yggdrasil+:1", "yggdrasil-:1", "ragnarok"] {
            let memo: Memo = raw.parse().unwrap();
            assert!(memo.is_fee_exempt(), "{raw} should be fee exempt");
            assert!(!memo.is_inbound());
        }
    }
}
