//! # Confusion Variant Module
//!
//! Generates alternate folio candidates by substituting digits Tesseract
//! commonly confuses on thermal receipt paper. One substitution per position,
//! never combinatorial across positions, so the candidate list stays small
//! enough to probe against branch ledgers.
//!
//! This component is intentionally standalone: the registration flow does not
//! consult it today (pending a product decision on fuzzy retry), but its
//! behavior is specified and tested.

/// Maximum number of candidates returned, original included
const MAX_VARIANTS: usize = 5;

/// Digit pairs commonly swapped by OCR, in substitution priority order
const CONFUSION_TABLE: &[(char, &[char])] = &[
    ('5', &['8', '6']),
    ('8', &['5', '0']),
    ('0', &['8']),
    ('1', &['7']),
    ('6', &['5']),
    ('3', &['8']),
    ('7', &['1']),
];

/// Produce the ordered candidate list for a digit string.
///
/// The original is always first. For each position, each confusion-table
/// substitution for the digit at that position yields one variant; duplicates
/// are dropped and the list is capped at five entries. Non-digit input gets
/// no variants beyond itself.
pub fn confusion_variants(number: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::with_capacity(MAX_VARIANTS);
    candidates.push(number.to_string());

    if !number.chars().all(|c| c.is_ascii_digit()) {
        return candidates;
    }

    let chars: Vec<char> = number.chars().collect();
    'outer: for (position, original) in chars.iter().enumerate() {
        let Some((_, replacements)) = CONFUSION_TABLE.iter().find(|(d, _)| d == original) else {
            continue;
        };
        for replacement in replacements.iter() {
            let mut variant = chars.clone();
            variant[position] = *replacement;
            let variant: String = variant.into_iter().collect();
            if !candidates.contains(&variant) {
                candidates.push(variant);
                if candidates.len() >= MAX_VARIANTS {
                    break 'outer;
                }
            }
        }
    }

    candidates
}
