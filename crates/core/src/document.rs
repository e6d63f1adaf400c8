//! Brazilian tax documents (CPF for people, CNPJ for companies).
//!
//! Inputs arrive formatted (`529.982.247-25`, `11.222.333/0001-81`) or bare.
//! They are stored bare, so uniqueness checks compare like with like.

use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Cpf,
    Cnpj,
}

/// Strip punctuation and validate length + check digits.
pub fn normalize_document(input: &str) -> Result<(DocumentKind, String), DomainError> {
    let digits: String = input
        .chars()
        .filter(|c| !matches!(c, '.' | '-' | '/' | ' '))
        .collect();

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DomainError::validation("document must contain only digits"));
    }

    let kind = match digits.len() {
        11 => DocumentKind::Cpf,
        14 => DocumentKind::Cnpj,
        _ => {
            return Err(DomainError::validation(
                "document must be a CPF (11 digits) or CNPJ (14 digits)",
            ));
        }
    };

    let d: Vec<u32> = digits.bytes().map(|b| u32::from(b - b'0')).collect();
    if d.iter().all(|&x| x == d[0]) {
        return Err(DomainError::validation("document check digits are invalid"));
    }

    let ok = match kind {
        DocumentKind::Cpf => cpf_check(&d),
        DocumentKind::Cnpj => cnpj_check(&d),
    };
    if !ok {
        return Err(DomainError::validation("document check digits are invalid"));
    }

    Ok((kind, digits))
}

/// Like [`normalize_document`] but only accepts a CNPJ.
pub fn normalize_cnpj(input: &str) -> Result<String, DomainError> {
    match normalize_document(input)? {
        (DocumentKind::Cnpj, digits) => Ok(digits),
        (DocumentKind::Cpf, _) => Err(DomainError::validation("a CNPJ (14 digits) is required")),
    }
}

/// Like [`normalize_document`] but only accepts a CPF.
pub fn normalize_cpf(input: &str) -> Result<String, DomainError> {
    match normalize_document(input)? {
        (DocumentKind::Cpf, digits) => Ok(digits),
        (DocumentKind::Cnpj, _) => Err(DomainError::validation("a CPF (11 digits) is required")),
    }
}

/// Brazilian state code: exactly two ASCII letters, stored uppercase.
pub fn normalize_state(input: &str) -> Result<String, DomainError> {
    let s = input.trim();
    if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(DomainError::validation("state must be a two-letter code"));
    }
    Ok(s.to_ascii_uppercase())
}

fn cpf_check(d: &[u32]) -> bool {
    [9usize, 10].iter().all(|&n| {
        let sum: u32 = (0..n).map(|i| d[i] * (n as u32 + 1 - i as u32)).sum();
        (sum * 10) % 11 % 10 == d[n]
    })
}

fn cnpj_check(d: &[u32]) -> bool {
    const W1: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    const W2: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

    let digit = |weights: &[u32]| {
        let sum: u32 = weights.iter().zip(d).map(|(w, x)| w * x).sum();
        match sum % 11 {
            0 | 1 => 0,
            r => 11 - r,
        }
    };

    digit(&W1) == d[12] && digit(&W2) == d[13]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Appends the mod-11 check digit, weighting from `first_weight` down.
    fn push_check_digit(digits: &mut Vec<u32>, first_weight: u32, fold: fn(u32) -> u32) {
        let sum: u32 = digits
            .iter()
            .enumerate()
            .map(|(i, x)| x * weight(first_weight, i))
            .sum();
        digits.push(fold(sum % 11));
    }

    // CNPJ weights wrap from 2 back to 9.
    fn weight(first: u32, i: usize) -> u32 {
        let w = i64::from(first) - i as i64;
        (if w >= 2 { w } else { w + 8 }) as u32
    }

    fn cpf_fold(r: u32) -> u32 {
        if r < 2 { 0 } else { 11 - r }
    }

    fn render(digits: &[u32]) -> String {
        digits.iter().map(|d| char::from_digit(*d, 10).unwrap_or('0')).collect()
    }

    fn valid_cpf(body: &[u32]) -> Vec<u32> {
        let mut d = body.to_vec();
        push_check_digit(&mut d, 10, cpf_fold);
        push_check_digit(&mut d, 11, cpf_fold);
        d
    }

    fn valid_cnpj(body: &[u32]) -> Vec<u32> {
        let mut d = body.to_vec();
        push_check_digit(&mut d, 5, cpf_fold);
        push_check_digit(&mut d, 6, cpf_fold);
        d
    }

    proptest! {
        #[test]
        fn computed_cpf_check_digits_validate(
            body in proptest::collection::vec(0u32..10, 9),
            slot in 9usize..11,
            bump in 1u32..10,
        ) {
            prop_assume!(body.iter().any(|&x| x != body[0]));
            let digits = valid_cpf(&body);
            let doc = render(&digits);
            prop_assert_eq!(normalize_document(&doc), Ok((DocumentKind::Cpf, doc.clone())));

            let mut tampered = digits.clone();
            tampered[slot] = (tampered[slot] + bump) % 10;
            prop_assert!(normalize_document(&render(&tampered)).is_err());
        }

        #[test]
        fn computed_cnpj_check_digits_validate(
            body in proptest::collection::vec(0u32..10, 12),
            slot in 12usize..14,
            bump in 1u32..10,
        ) {
            prop_assume!(body.iter().any(|&x| x != body[0]));
            let digits = valid_cnpj(&body);
            let doc = render(&digits);
            prop_assert_eq!(normalize_document(&doc), Ok((DocumentKind::Cnpj, doc.clone())));

            let mut tampered = digits.clone();
            tampered[slot] = (tampered[slot] + bump) % 10;
            prop_assert!(normalize_document(&render(&tampered)).is_err());
        }
    }

    #[test]
    fn accepts_formatted_cpf_and_cnpj() {
        assert_eq!(
            normalize_document("529.982.247-25").unwrap(),
            (DocumentKind::Cpf, "52998224725".to_string())
        );
        assert_eq!(
            normalize_document("11.222.333/0001-81").unwrap(),
            (DocumentKind::Cnpj, "11222333000181".to_string())
        );
    }

    #[test]
    fn rejects_bad_check_digits_and_repeated_digits() {
        assert!(normalize_document("529.982.247-26").is_err());
        assert!(normalize_document("111.111.111-11").is_err());
        assert!(normalize_document("11.222.333/0001-82").is_err());
        assert!(normalize_document("1234").is_err());
        assert!(normalize_document("abc").is_err());
    }

    #[test]
    fn kind_specific_helpers() {
        assert!(normalize_cnpj("529.982.247-25").is_err());
        assert!(normalize_cpf("11.222.333/0001-81").is_err());
        assert_eq!(normalize_cpf("111.444.777-35").unwrap(), "11144477735");
    }

    #[test]
    fn state_codes() {
        assert_eq!(normalize_state(" sp ").unwrap(), "SP");
        assert!(normalize_state("SPX").is_err());
        assert!(normalize_state("1A").is_err());
    }
}
