//! Display helpers for EVM chain ids and client version strings.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainInfo {
    pub id: u64,
    pub label: &'static str,
    pub currency: &'static str,
}

const KNOWN_CHAINS: &[ChainInfo] = &[
    ChainInfo {
        id: 1,
        label: "Mainnet",
        currency: "ETH",
    },
    ChainInfo {
        id: 3,
        label: "Ropsten",
        currency: "ETH",
    },
    ChainInfo {
        id: 42,
        label: "Kovan",
        currency: "ETH",
    },
    ChainInfo {
        id: 4,
        label: "Rinkeby",
        currency: "ETH",
    },
    ChainInfo {
        id: 56,
        label: "Binance Smart Chain Mainnet",
        currency: "BNB",
    },
];

pub fn chain_info(chain_id: u64) -> Option<&'static ChainInfo> {
    KNOWN_CHAINS.iter().find(|chain| chain.id == chain_id)
}

/// Label shown for a chain id, falling back to the raw id for unknown networks.
pub fn chain_label(chain_id: u64) -> String {
    chain_info(chain_id)
        .map(|chain| chain.label.to_string())
        .unwrap_or_else(|| format!("chain {chain_id}"))
}

/// Shortens a `web3_clientVersion` string, e.g.
/// `Geth/v1.10.3-stable/linux-amd64/go1.16` becomes `Geth 1.10.3`.
pub fn client_label(client_version: &str) -> String {
    let segments: Vec<&str> = client_version.trim().split('/').collect();
    let client = segments.first().copied().unwrap_or_default();
    let version_segment = segments
        .get(1)
        .or_else(|| segments.last())
        .copied()
        .unwrap_or_default();

    let version: String = version_segment
        .split('-')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '.')
        .collect();

    if version.is_empty() {
        client.to_string()
    } else {
        format!("{client} {version}")
    }
}

pub fn format_with_commas(number: u64) -> String {
    let digits = number.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
