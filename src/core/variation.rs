//! 街道名稱變體，由精確到寬鬆排序。

pub const MAX_VARIANTS: usize = 5;

/// 取前 N 個有意義的詞
const SIGNIFICANT_TOKENS: usize = 2;

/// 目錄服務（ViaCEP 等）要求的最短查詢長度
const MIN_VARIANT_LEN: usize = 3;

const QUALIFIERS: &[&str] = &[
    "RUA", "AVENIDA", "TRAVESSA", "ALAMEDA", "PRACA", "RODOVIA", "ESTRADA", "LARGO", "VIELA",
    "BECO", "LADEIRA", "VIA", "PASSAGEM",
];

const TITLES: &[&str] = &[
    "DOUTOR", "DOUTORA", "PROFESSOR", "PROFESSORA", "CORONEL", "GENERAL", "SENADOR", "VEREADOR",
    "MARECHAL", "PRESIDENTE", "DEPUTADO", "ENGENHEIRO", "CAPITAO", "MAJOR", "TENENTE", "PADRE",
    "DOM", "FREI", "MONSENHOR", "COMENDADOR", "BARAO", "VISCONDE", "DONA",
];

const STOP_WORDS: &[&str] = &["DE", "DA", "DO", "DOS", "DAS", "E"];

/// 一次性消耗的變體序列
#[derive(Debug)]
pub struct Variations {
    inner: std::vec::IntoIter<String>,
}

impl Variations {
    /// 非變體型 provider 只用一個值（可能是空字串）
    pub fn single(value: &str) -> Self {
        Self {
            inner: vec![value.to_string()].into_iter(),
        }
    }

    pub fn empty() -> Self {
        Self {
            inner: Vec::new().into_iter(),
        }
    }
}

impl Iterator for Variations {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Variations {}

/// 依序產生：完整名稱、去掉類型詞、去掉頭銜、前 N 個有意義的詞、最長的核心詞
pub fn generate(normalized_street: &str) -> Variations {
    let tokens: Vec<&str> = normalized_street.split_whitespace().collect();
    if tokens.is_empty() {
        return Variations::empty();
    }

    let mut candidates: Vec<String> = Vec::with_capacity(MAX_VARIANTS);
    candidates.push(tokens.join(" "));

    let without_qualifier: Vec<&str> = match tokens.first() {
        Some(first) if QUALIFIERS.contains(first) && tokens.len() > 1 => tokens[1..].to_vec(),
        _ => tokens.clone(),
    };
    candidates.push(without_qualifier.join(" "));

    let core: Vec<&str> = without_qualifier
        .iter()
        .copied()
        .filter(|token| !TITLES.contains(token))
        .collect();
    let core = if core.is_empty() {
        without_qualifier.clone()
    } else {
        core
    };
    candidates.push(core.join(" "));

    let significant: Vec<&str> = core
        .iter()
        .copied()
        .filter(|token| !STOP_WORDS.contains(token))
        .take(SIGNIFICANT_TOKENS)
        .collect();
    candidates.push(significant.join(" "));

    if let Some(longest) = core
        .iter()
        .copied()
        .filter(|token| token.len() >= 4 && !token.chars().all(|c| c.is_ascii_digit()))
        .fold(None::<&str>, |best, token| match best {
            Some(b) if b.len() >= token.len() => Some(b),
            _ => Some(token),
        })
    {
        candidates.push(longest.to_string());
    }

    let mut variants: Vec<String> = Vec::with_capacity(MAX_VARIANTS);
    for candidate in candidates {
        if candidate.len() >= MIN_VARIANT_LEN && !variants.contains(&candidate) {
            variants.push(candidate);
        }
        if variants.len() == MAX_VARIANTS {
            break;
        }
    }

    Variations {
        inner: variants.into_iter(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_orders_from_specific_to_broad() {
        let variants: Vec<String> = generate("RUA SAO JOAO DEL REY").collect();
        assert_eq!(
            variants,
            vec!["RUA SAO JOAO DEL REY", "SAO JOAO DEL REY", "SAO JOAO", "JOAO"]
        );
    }

    #[test]
    fn test_generate_strips_titles() {
        let variants: Vec<String> = generate("RUA DOUTOR BERNARDO RIBEIRO VIANNA").collect();
        assert_eq!(variants[0], "RUA DOUTOR BERNARDO RIBEIRO VIANNA");
        assert_eq!(variants[1], "DOUTOR BERNARDO RIBEIRO VIANNA");
        assert_eq!(variants[2], "BERNARDO RIBEIRO VIANNA");
        assert_eq!(variants[3], "BERNARDO RIBEIRO");
        assert_eq!(variants[4], "BERNARDO");
    }

    #[test]
    fn test_generate_is_bounded_and_unique() {
        let samples = [
            "AVENIDA PRESIDENTE DOUTOR CORONEL JOAQUIM DA SILVA DOS SANTOS",
            "RUA PERRELLA",
            "RUA 7",
            "PRACA",
            "X",
        ];
        for sample in samples {
            let variants: Vec<String> = generate(sample).collect();
            assert!(variants.len() <= MAX_VARIANTS);
            let mut deduped = variants.clone();
            deduped.dedup();
            assert_eq!(deduped.len(), variants.len());
            assert!(variants.iter().all(|v| v.len() >= MIN_VARIANT_LEN));
        }
    }

    #[test]
    fn test_generate_empty_street_yields_nothing() {
        assert_eq!(generate("").count(), 0);
        assert_eq!(generate("   ").count(), 0);
    }

    #[test]
    fn test_variations_are_consumed_once() {
        let mut variants = generate("RUA PERRELLA");
        assert_eq!(variants.len(), 2);
        assert_eq!(variants.next().as_deref(), Some("RUA PERRELLA"));
        assert_eq!(variants.next().as_deref(), Some("PERRELLA"));
        assert_eq!(variants.next(), None);
        assert_eq!(variants.next(), None);
    }

    #[test]
    fn test_single_keeps_empty_value() {
        let variants: Vec<String> = Variations::single("").collect();
        assert_eq!(variants, vec![String::new()]);
    }
}
