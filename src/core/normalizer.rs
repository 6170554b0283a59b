//! 地址正規化
//!
//! 去除變音符號、統一大寫、移除描述性雜訊、展開常見縮寫。
//! 所有函式都是純函式且具冪等性，輸出直接作為快取鍵使用。

use crate::domain::model::{Address, NormalizedAddress};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// 從此詞之後整段截斷
const CLAUSE_MARKERS: &[&str] = &["BAIRRO", "CEP", "SEGURADO", "MATRICULA", "REFERENCIA"];

/// 後面接編號或單一字母時視為補充資訊（樓層、房號）並截斷
const COMPLEMENT_MARKERS: &[&str] = &[
    "SALA", "SL", "APTO", "APT", "AP", "APARTAMENTO", "CONJUNTO", "CONJ", "CJ", "BLOCO", "BL",
    "ANDAR", "LOJA", "LJ", "TERREO", "BOX",
];

const DROPPED_TOKENS: &[&str] = &["NR"];

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("AV", "AVENIDA"),
    ("AVN", "AVENIDA"),
    ("TRAV", "TRAVESSA"),
    ("TV", "TRAVESSA"),
    ("AL", "ALAMEDA"),
    ("PC", "PRACA"),
    ("PCA", "PRACA"),
    ("ROD", "RODOVIA"),
    ("EST", "ESTRADA"),
    ("DR", "DOUTOR"),
    ("DRA", "DOUTORA"),
    ("PROF", "PROFESSOR"),
    ("PROFA", "PROFESSORA"),
    ("CEL", "CORONEL"),
    ("STA", "SANTA"),
    ("STO", "SANTO"),
    ("GAL", "GENERAL"),
    ("GEN", "GENERAL"),
    ("SEN", "SENADOR"),
    ("VER", "VEREADOR"),
    ("MAL", "MARECHAL"),
    ("PRES", "PRESIDENTE"),
    ("ENG", "ENGENHEIRO"),
    ("CAP", "CAPITAO"),
    ("DEP", "DEPUTADO"),
];

/// 只在開頭位置展開（單字母縮寫容易誤判）
const LEADING_ABBREVIATIONS: &[(&str, &str)] = &[("R", "RUA")];

const CITY_PREFIXES: &[&str] = &["MUNICIPIO", "MUN", "CIDADE", "CID"];
const CITY_PREFIX_LINKS: &[&str] = &["DE", "DO", "DA"];

/// 正規化任意地址文字
pub fn normalize(raw: &str) -> String {
    let folded = fold_ascii_upper(raw);

    let tokens: Vec<&str> = folded
        .split_whitespace()
        .filter(|token| !DROPPED_TOKENS.contains(token))
        .collect();

    let cut = noise_cut_index(&tokens);

    tokens[..cut]
        .iter()
        .enumerate()
        .map(|(index, token)| expand_abbreviation(index, token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 城市名稱：額外移除「MUNICIPIO DE」等前綴與結尾的 UF
pub fn normalize_city(raw: &str, state: &str) -> String {
    let normalized = normalize(raw);
    let mut tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();

    while tokens.len() > 1 && CITY_PREFIXES.contains(&tokens[0]) {
        tokens.remove(0);
        if tokens.len() > 1 && CITY_PREFIX_LINKS.contains(&tokens[0]) {
            tokens.remove(0);
        }
    }

    let state = state.trim().to_ascii_uppercase();
    while tokens.len() > 1 && !state.is_empty() && tokens.last() == Some(&state.as_str()) {
        tokens.pop();
    }

    tokens.join(" ")
}

/// 門牌號碼只保留第一段數字
pub fn normalize_number(raw: &str) -> String {
    raw.chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect()
}

pub fn normalize_address(address: &Address) -> NormalizedAddress {
    let state = address
        .state()
        .map(|s| s.trim().to_ascii_uppercase())
        .unwrap_or_default();

    let (street_raw, number_raw) = split_street_and_number(address);

    let number = number_raw.map(|n| normalize_number(&n)).unwrap_or_default();

    let mut street = street_raw.map(|s| normalize(&s)).unwrap_or_default();
    // 「RUA TOMAS ACIOLI 721」與門牌相同的尾碼
    if !number.is_empty() {
        if let Some(stripped) = street.strip_suffix(&format!(" {}", number)) {
            street = stripped.to_string();
        }
    }

    NormalizedAddress {
        street,
        number,
        complement: address.complement().map(normalize).unwrap_or_default(),
        neighborhood: address.neighborhood().map(normalize).unwrap_or_default(),
        city: address
            .city()
            .map(|c| normalize_city(c, &state))
            .unwrap_or_default(),
        state,
        record_key: address.record_key().map(|k| k.trim().to_string()),
    }
}

/// 街道欄位為空時改用原始文字；「Rua Perrella, 331」拆成街道與門牌
fn split_street_and_number(address: &Address) -> (Option<String>, Option<String>) {
    let source = address.street().or(address.raw());
    let explicit_number = address.number().map(str::to_string);

    match source {
        Some(text) => match text.split_once(',') {
            Some((street, rest)) => {
                let number = explicit_number.or_else(|| {
                    let digits = normalize_number(rest);
                    (!digits.is_empty()).then_some(digits)
                });
                (Some(street.to_string()), number)
            }
            None => (Some(text.to_string()), explicit_number),
        },
        None => (None, explicit_number),
    }
}

fn fold_ascii_upper(raw: &str) -> String {
    raw.nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                ' '
            }
        })
        .collect()
}

fn noise_cut_index(tokens: &[&str]) -> usize {
    for (index, token) in tokens.iter().enumerate().skip(1) {
        if CLAUSE_MARKERS.contains(token) {
            return index;
        }
        if COMPLEMENT_MARKERS.contains(token) {
            if let Some(next) = tokens.get(index + 1) {
                if next.chars().any(|c| c.is_ascii_digit()) || next.len() == 1 {
                    return index;
                }
            }
        }
    }
    tokens.len()
}

fn expand_abbreviation(index: usize, token: &str) -> String {
    if index == 0 {
        if let Some((_, full)) = LEADING_ABBREVIATIONS.iter().find(|(abbr, _)| *abbr == token) {
            return (*full).to_string();
        }
    }
    ABBREVIATIONS
        .iter()
        .find(|(abbr, _)| *abbr == token)
        .map(|(_, full)| (*full).to_string())
        .unwrap_or_else(|| token.to_string())
}
