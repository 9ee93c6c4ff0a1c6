#[cfg(test)]
mod tests {
    use beach_market_contest::ledger::{
        BranchDescriptor, BranchKind, BranchLocator, BranchProbe, DocumentKind, LedgerDocument,
    };
    use beach_market_contest::ocr_config::RecoveryConfig;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    /// What the fake probe should do for one branch
    #[derive(Clone)]
    enum Script {
        Match(LedgerDocument),
        NoMatch,
        Fail,
    }

    /// Scripted probe that records which branches were attempted, in order
    struct FakeProbe {
        scripts: HashMap<i64, Script>,
        attempts: Mutex<Vec<i64>>,
    }

    impl FakeProbe {
        fn new(scripts: Vec<(i64, Script)>) -> Self {
            Self {
                scripts: scripts.into_iter().collect(),
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempted(&self) -> Vec<i64> {
            self.attempts.lock().clone()
        }
    }

    impl BranchProbe for FakeProbe {
        async fn find_document(
            &self,
            branch: &BranchDescriptor,
            _folio: &str,
            _since: NaiveDate,
        ) -> anyhow::Result<Option<LedgerDocument>> {
            self.attempts.lock().push(branch.id);
            match self.scripts.get(&branch.id) {
                Some(Script::Match(document)) => Ok(Some(document.clone())),
                Some(Script::NoMatch) | None => Ok(None),
                Some(Script::Fail) => Err(anyhow::anyhow!("connection refused")),
            }
        }
    }

    fn campaign_start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 8).unwrap()
    }

    fn locator() -> BranchLocator {
        BranchLocator::new(
            5000,
            campaign_start(),
            Duration::from_millis(0),
            RecoveryConfig {
                operation_timeout_secs: 30,
                circuit_breaker_threshold: 3,
                circuit_breaker_reset_secs: 600,
            },
        )
    }

    fn branch(id: i64, kind: BranchKind) -> BranchDescriptor {
        BranchDescriptor {
            id,
            name: format!("Sucursal {}", id),
            kind,
            db_url: Some(format!("postgres://contest@sucursal-{}/ventas", id)),
        }
    }

    fn document(folio: &str, amount: i64, date: NaiveDate) -> LedgerDocument {
        LedgerDocument {
            folio: folio.to_string(),
            total_amount: amount,
            issue_date: date,
            document_kind: DocumentKind::Boleta,
        }
    }

    #[tokio::test]
    async fn test_first_match_stops_scan_after_failures() {
        // Branches 1 and 2 fail to connect, branch 3 holds the document:
        // the scan returns branch 3's match and never touches 4 or 5
        let branches: Vec<_> = (1..=5)
            .map(|id| branch(id, BranchKind::Supermercado))
            .collect();
        let probe = FakeProbe::new(vec![
            (1, Script::Fail),
            (2, Script::Fail),
            (
                3,
                Script::Match(document(
                    "887654",
                    12000,
                    NaiveDate::from_ymd_opt(2025, 10, 15).unwrap(),
                )),
            ),
            (4, Script::NoMatch),
            (5, Script::NoMatch),
        ]);

        let result = locator().locate(&branches, "887654", None, &probe).await;

        assert!(result.exists);
        assert_eq!(result.branch_id, Some(3));
        assert_eq!(result.folio.as_deref(), Some("887654"));
        assert_eq!(probe.attempted(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_no_match_anywhere_scans_every_branch() {
        let branches: Vec<_> = (1..=3)
            .map(|id| branch(id, BranchKind::Ferreteria))
            .collect();
        let probe = FakeProbe::new(vec![
            (1, Script::NoMatch),
            (2, Script::NoMatch),
            (3, Script::NoMatch),
        ]);

        let result = locator().locate(&branches, "12345", None, &probe).await;

        assert!(!result.exists);
        assert!(!result.meets_minimum_amount);
        assert!(!result.meets_minimum_date);
        assert_eq!(result.branch_id, None);
        assert_eq!(probe.attempted(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unrecognized_branch_type_skipped_silently() {
        let branches = vec![
            branch(1, BranchKind::Otro),
            branch(2, BranchKind::Supermercado),
        ];
        let probe = FakeProbe::new(vec![(
            2,
            Script::Match(document(
                "445566",
                9000,
                NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            )),
        )]);

        let result = locator().locate(&branches, "445566", None, &probe).await;

        assert!(result.exists);
        assert_eq!(probe.attempted(), vec![2]);
    }

    #[tokio::test]
    async fn test_branch_without_database_skipped() {
        let mut unconfigured = branch(1, BranchKind::Multitienda);
        unconfigured.db_url = None;
        let branches = vec![unconfigured, branch(2, BranchKind::Multitienda)];
        let probe = FakeProbe::new(vec![(2, Script::NoMatch)]);

        locator().locate(&branches, "12345", None, &probe).await;

        assert_eq!(probe.attempted(), vec![2]);
    }

    #[tokio::test]
    async fn test_kind_filter_restricts_scan() {
        let branches = vec![
            branch(1, BranchKind::Supermercado),
            branch(2, BranchKind::Ferreteria),
            branch(3, BranchKind::Supermercado),
        ];
        let probe = FakeProbe::new(vec![
            (1, Script::NoMatch),
            (2, Script::NoMatch),
            (3, Script::NoMatch),
        ]);

        locator()
            .locate(&branches, "12345", Some(BranchKind::Supermercado), &probe)
            .await;

        assert_eq!(probe.attempted(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_circuit_breaker_skips_failing_branch() {
        let branches = vec![
            branch(1, BranchKind::Supermercado),
            branch(2, BranchKind::Supermercado),
        ];
        let probe = FakeProbe::new(vec![(1, Script::Fail), (2, Script::NoMatch)]);
        let locator = locator();

        // Three failed scans reach the breaker threshold for branch 1
        for _ in 0..3 {
            locator.locate(&branches, "12345", None, &probe).await;
        }
        let attempts_before = probe.attempted().len();

        // The next scan skips branch 1 entirely
        locator.locate(&branches, "12345", None, &probe).await;
        let attempts: Vec<i64> = probe.attempted()[attempts_before..].to_vec();
        assert_eq!(attempts, vec![2]);
    }

    #[tokio::test]
    async fn test_eligibility_flags_derived_from_thresholds() {
        let branches = vec![branch(1, BranchKind::Supermercado)];

        // Below the minimum amount
        let probe = FakeProbe::new(vec![(
            1,
            Script::Match(document("111", 4999, campaign_start())),
        )]);
        let result = locator().locate(&branches, "111", None, &probe).await;
        assert!(result.exists);
        assert!(!result.meets_minimum_amount);
        assert!(result.meets_minimum_date);

        // Dated before the campaign start
        let probe = FakeProbe::new(vec![(
            1,
            Script::Match(document(
                "222",
                10000,
                NaiveDate::from_ymd_opt(2025, 10, 7).unwrap(),
            )),
        )]);
        let result = locator().locate(&branches, "222", None, &probe).await;
        assert!(result.exists);
        assert!(result.meets_minimum_amount);
        assert!(!result.meets_minimum_date);

        // Exactly on the campaign start and minimum amount: both inclusive
        let probe = FakeProbe::new(vec![(
            1,
            Script::Match(document("333", 5000, campaign_start())),
        )]);
        let result = locator().locate(&branches, "333", None, &probe).await;
        assert!(result.meets_minimum_amount);
        assert!(result.meets_minimum_date);
    }
}
