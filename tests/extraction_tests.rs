#[cfg(test)]
mod tests {
    use beach_market_contest::extraction::FolioExtractor;

    fn extract(text: &str) -> Option<String> {
        FolioExtractor::new().extract(text)
    }

    #[test]
    fn test_labeled_number_extracted_regardless_of_noise() {
        let noisy = "SUPERMERCADO BEACH MARKET\nRUT 76.123.456-7\nN° 123456\nTOTAL $12.990";
        assert_eq!(extract(noisy), Some("123456".to_string()));
    }

    #[test]
    fn test_label_variants() {
        assert_eq!(extract("N 887654"), Some("887654".to_string()));
        assert_eq!(extract("No 887654"), Some("887654".to_string()));
        assert_eq!(extract("NO: 887654"), Some("887654".to_string()));
        assert_eq!(extract("N°887654"), Some("887654".to_string()));
    }

    #[test]
    fn test_boleta_label() {
        assert_eq!(
            extract("BOLETA ELECTRONICA 445566 GRACIAS POR SU COMPRA"),
            Some("445566".to_string())
        );
        assert_eq!(extract("boleta n° 445566"), Some("445566".to_string()));
    }

    #[test]
    fn test_folio_label() {
        assert_eq!(extract("FOLIO: 70012345"), Some("70012345".to_string()));
    }

    #[test]
    fn test_numero_label() {
        assert_eq!(extract("NUMERO 556677"), Some("556677".to_string()));
        assert_eq!(extract("NUM-556677"), Some("556677".to_string()));
    }

    #[test]
    fn test_label_beats_longer_bare_run() {
        // A labeled folio wins even when a longer digit run (the RUT-less
        // phone number) appears earlier in the text
        let text = "FONO 987654321 ... N° 55667";
        assert_eq!(extract(text), Some("55667".to_string()));
    }

    #[test]
    fn test_seven_digit_run_without_label() {
        assert_eq!(extract("TOTAL 123 REF 7654321"), Some("7654321".to_string()));
    }

    #[test]
    fn test_exact_six_and_five_digit_runs() {
        assert_eq!(extract("ref 445566 fin"), Some("445566".to_string()));
        assert_eq!(extract("ref 44556 fin"), Some("44556".to_string()));
    }

    #[test]
    fn test_longest_digit_run_fallback() {
        // No label anywhere: the longest run of length >= 4 wins
        let text = "xx 123 yy 98765 zz 4321";
        assert_eq!(extract(text), Some("98765".to_string()));
    }

    #[test]
    fn test_fallback_tie_broken_by_first_occurrence() {
        let text = "aa 1234 bb 5678";
        assert_eq!(extract(text), Some("1234".to_string()));
    }

    #[test]
    fn test_short_runs_only_returns_none() {
        assert_eq!(extract("total 123 vuelto 45"), None);
    }

    #[test]
    fn test_empty_and_digitless_text() {
        assert_eq!(extract(""), None);
        assert_eq!(extract("   \n\t "), None);
        assert_eq!(extract("sin numeros aqui"), None);
    }

    #[test]
    fn test_whitespace_collapsed_before_matching() {
        assert_eq!(extract("N°\n  887654"), Some("887654".to_string()));
    }

    #[test]
    fn test_result_is_always_digits() {
        let samples = [
            "N° 123456",
            "BOLETA 44556",
            "ruido 9876543 ruido",
            "aa 1234 bb",
        ];
        for sample in samples {
            let folio = extract(sample).unwrap();
            assert!(folio.chars().all(|c| c.is_ascii_digit()), "{}", folio);
        }
    }
}
