use crate::domain::model::{CepCandidate, NormalizedAddress, Specificity};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static CEP_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}-\d{3}$").expect("valid CEP regex"));

/// 文字中出現的 CEP 形狀（XXXXX-XXX 或 XXXXXXXX）
static CEP_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{5}-?\d{3})\b").expect("valid CEP token regex"));

/// 各州的 CEP 前五碼範圍（含端點）
const STATE_RANGES: &[(&str, &[(u32, u32)])] = &[
    ("SP", &[(1000, 19999)]),
    ("RJ", &[(20000, 28999)]),
    ("ES", &[(29000, 29999)]),
    ("MG", &[(30000, 39999)]),
    ("BA", &[(40000, 48999)]),
    ("SE", &[(49000, 49999)]),
    ("PE", &[(50000, 56999)]),
    ("AL", &[(57000, 57999)]),
    ("PB", &[(58000, 58999)]),
    ("RN", &[(59000, 59999)]),
    ("CE", &[(60000, 63999)]),
    ("PI", &[(64000, 64999)]),
    ("MA", &[(65000, 65999)]),
    ("PA", &[(66000, 68899)]),
    ("AP", &[(68900, 68999)]),
    ("AM", &[(69000, 69299), (69400, 69899)]),
    ("RR", &[(69300, 69399)]),
    ("AC", &[(69900, 69999)]),
    ("DF", &[(70000, 72799), (73000, 73699)]),
    ("GO", &[(72800, 72999), (73700, 76799)]),
    ("RO", &[(76800, 76999)]),
    ("TO", &[(77000, 77999)]),
    ("MT", &[(78000, 78899)]),
    ("MS", &[(79000, 79999)]),
    ("PR", &[(80000, 87999)]),
    ("SC", &[(88000, 89999)]),
    ("RS", &[(90000, 99999)]),
];

const BUILTIN_PLACEHOLDERS: &[&str] = &["12345-678", "01234-567", "99999-000"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Format,
    UnknownState(String),
    OutOfRange { state: String, prefix: String },
    Placeholder,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Format => write!(f, "format"),
            Rejection::UnknownState(state) => write!(f, "unknown state {}", state),
            Rejection::OutOfRange { state, prefix } => {
                write!(f, "prefix {} outside {} range", prefix, state)
            }
            Rejection::Placeholder => write!(f, "placeholder"),
        }
    }
}

pub fn state_ranges(state: &str) -> Option<&'static [(u32, u32)]> {
    STATE_RANGES
        .iter()
        .find(|(uf, _)| *uf == state)
        .map(|(_, ranges)| *ranges)
}

pub fn prefix_in_state(cep: &str, state: &str) -> bool {
    let Some(ranges) = state_ranges(state) else {
        return false;
    };
    let Some(prefix) = cep.get(..5).and_then(|p| p.parse::<u32>().ok()) else {
        return false;
    };
    ranges
        .iter()
        .any(|(start, end)| prefix >= *start && prefix <= *end)
}

/// 州範圍的最小值，作為城市層級最後的退路
pub fn state_floor(state: &str) -> Option<String> {
    state_ranges(state)
        .and_then(|ranges| ranges.first())
        .map(|(start, _)| format!("{:05}-000", start))
}

/// 「09781330」「09781-330」→「09781-330」
pub fn sanitize_cep(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 8 {
        Some(format!("{}-{}", &digits[..5], &digits[5..]))
    } else {
        None
    }
}

/// 依出現順序擷取文字中的 CEP
pub fn extract_ceps(text: &str) -> Vec<String> {
    CEP_TOKEN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| sanitize_cep(m.as_str()))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    extra_placeholders: Vec<String>,
}

impl Validator {
    pub fn new(extra_placeholders: Vec<String>) -> Self {
        Self {
            extra_placeholders: extra_placeholders
                .iter()
                .filter_map(|p| sanitize_cep(p))
                .collect(),
        }
    }

    pub fn is_placeholder(&self, cep: &str) -> bool {
        let digits: Vec<char> = cep.chars().filter(|c| c.is_ascii_digit()).collect();
        let repeated = digits.first().is_some_and(|d| digits.iter().all(|c| c == d));
        repeated
            || BUILTIN_PLACEHOLDERS.contains(&cep)
            || self.extra_placeholders.iter().any(|p| p == cep)
    }

    pub fn validate(
        &self,
        candidate: &CepCandidate,
        address: &NormalizedAddress,
    ) -> Result<(), Rejection> {
        if !CEP_FORMAT.is_match(&candidate.value) {
            return Err(Rejection::Format);
        }

        if state_ranges(&address.state).is_none() {
            return Err(Rejection::UnknownState(address.state.clone()));
        }

        if !prefix_in_state(&candidate.value, &address.state) {
            return Err(Rejection::OutOfRange {
                state: address.state.clone(),
                prefix: candidate.value[..5].to_string(),
            });
        }

        if candidate.specificity != Specificity::CityLevel && self.is_placeholder(&candidate.value)
        {
            return Err(Rejection::Placeholder);
        }

        Ok(())
    }
}

/// 多個候選時：精確度高者優先，相同時取較早（優先序較高）的 provider。
/// 意見不一致只記錄審計日誌，不阻擋結果。
pub fn arbitrate(candidates: &[CepCandidate]) -> Option<CepCandidate> {
    let chosen = candidates
        .iter()
        .enumerate()
        .min_by_key(|(index, candidate)| (std::cmp::Reverse(candidate.specificity.rank()), *index))
        .map(|(_, candidate)| candidate.clone())?;

    for other in candidates.iter().filter(|c| c.value != chosen.value) {
        tracing::warn!(
            target: "cep_audit",
            "⚖️ Disagreement: kept {} from {} ({}), discarded {} from {} ({})",
            chosen.value,
            chosen.source,
            chosen.specificity,
            other.value,
            other.source,
            other.specificity
        );
    }

    Some(chosen)
}
